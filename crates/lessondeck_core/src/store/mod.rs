//! Deck state store.
//!
//! # Responsibility
//! - Own the in-memory slide collection of one open lesson.
//! - Publish every new collection as a [`DeckRevision`] to observers
//!   (persistence scheduler, UI).
//!
//! # Invariants
//! - Mutations replace the whole collection; a published `Arc<Vec<Slide>>`
//!   is never modified afterwards.
//! - Revision numbers increase by one per installed collection.
//! - Only `Local` revisions represent unsaved edits; `Initial` and `Reload`
//!   revisions mirror storage.

pub mod ops;

use crate::model::deck::{Comment, DeckSnapshot, LessonId, Reaction, Slide};
use crate::model::highlight::Highlight;
use std::sync::Arc;
use tokio::sync::watch;

/// Where a revision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Collection loaded from storage at mount.
    Initial,
    /// Collection produced by a local edit.
    Local,
    /// Collection re-fetched after a collaborator published.
    Reload,
}

/// One immutable deck state.
#[derive(Debug, Clone)]
pub struct DeckRevision {
    pub number: u64,
    pub origin: ChangeOrigin,
    pub slides: Arc<Vec<Slide>>,
}

/// Shared handle to the deck of one lesson. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct DeckStore {
    lesson_id: LessonId,
    revisions: Arc<watch::Sender<DeckRevision>>,
}

impl DeckStore {
    /// Creates an empty store; the empty deck counts as the initial state.
    pub fn new(lesson_id: impl Into<LessonId>) -> Self {
        let (revisions, _) = watch::channel(DeckRevision {
            number: 0,
            origin: ChangeOrigin::Initial,
            slides: Arc::new(Vec::new()),
        });
        Self {
            lesson_id: lesson_id.into(),
            revisions: Arc::new(revisions),
        }
    }

    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    /// Observes every installed revision.
    pub fn subscribe(&self) -> watch::Receiver<DeckRevision> {
        self.revisions.subscribe()
    }

    pub fn current(&self) -> DeckRevision {
        self.revisions.borrow().clone()
    }

    pub fn slides(&self) -> Arc<Vec<Slide>> {
        self.revisions.borrow().slides.clone()
    }

    pub fn snapshot(&self) -> DeckSnapshot {
        DeckSnapshot::new(self.lesson_id.clone(), self.slides().as_ref().clone())
    }

    /// Runs a pure operation against the current collection and installs its
    /// result as a local edit.
    pub fn apply(&self, op: impl FnOnce(&[Slide]) -> Vec<Slide>) -> Arc<Vec<Slide>> {
        let mut installed = Arc::default();
        self.revisions.send_modify(|revision| {
            let next = Arc::new(op(revision.slides.as_slice()));
            revision.number += 1;
            revision.origin = ChangeOrigin::Local;
            revision.slides = next.clone();
            installed = next;
        });
        installed
    }

    /// Installs the collection fetched at mount.
    pub fn load_initial(&self, slides: Vec<Slide>) {
        self.install(slides, ChangeOrigin::Initial);
    }

    /// Discards local state in favor of a freshly fetched collection.
    pub fn reload(&self, slides: Vec<Slide>) {
        self.install(slides, ChangeOrigin::Reload);
    }

    pub fn add_slide(&self, highlight: &Highlight) -> Arc<Vec<Slide>> {
        self.apply(|slides| ops::add_slide(slides, highlight))
    }

    pub fn add_comment(&self, slide_id: &str, comment: Comment) -> Arc<Vec<Slide>> {
        self.apply(|slides| ops::add_comment(slides, slide_id, comment))
    }

    pub fn delete_comment(&self, slide_id: &str, comment_id: &str) -> Arc<Vec<Slide>> {
        self.apply(|slides| ops::delete_comment(slides, slide_id, comment_id))
    }

    pub fn add_reaction(
        &self,
        slide_id: &str,
        comment_id: &str,
        reaction: Reaction,
    ) -> Arc<Vec<Slide>> {
        self.apply(|slides| ops::add_reaction(slides, slide_id, comment_id, reaction))
    }

    pub fn delete_reaction(
        &self,
        slide_id: &str,
        comment_id: &str,
        reaction_id: &str,
    ) -> Arc<Vec<Slide>> {
        self.apply(|slides| ops::delete_reaction(slides, slide_id, comment_id, reaction_id))
    }

    fn install(&self, slides: Vec<Slide>, origin: ChangeOrigin) {
        self.revisions.send_modify(|revision| {
            revision.number += 1;
            revision.origin = origin;
            revision.slides = Arc::new(slides);
        });
    }
}
