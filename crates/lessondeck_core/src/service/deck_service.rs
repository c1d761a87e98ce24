//! Deck use-case service.
//!
//! # Responsibility
//! - Provide the fetch and bulk-replace entry points behind the transport.
//! - Normalize request input before it reaches the repository.
//! - Map repository failures to stable service error codes.
//!
//! # Invariants
//! - A blank lesson id is rejected before any storage access.
//! - Replace keeps repository skip-and-continue semantics unchanged.

use crate::model::deck::{DeckSnapshot, LessonId, Slide};
use crate::repo::deck_repo::{DeckRepository, RepoError, ReplaceOutcome};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for deck use-cases.
#[derive(Debug)]
pub enum DeckServiceError {
    /// Lesson id is empty after trimming.
    InvalidLessonId,
    /// Target lesson does not exist in the lesson directory.
    LessonNotFound(LessonId),
    /// Replace transaction exceeded its deadline and was rolled back.
    Timeout { limit_ms: u128 },
    /// Any other persistence failure.
    Repo(RepoError),
}

impl DeckServiceError {
    /// Stable machine-readable code used in transport error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidLessonId => "invalid_lesson_id",
            Self::LessonNotFound(_) => "lesson_not_found",
            Self::Timeout { .. } => "transaction_timeout",
            Self::Repo(_) => "storage_error",
        }
    }
}

impl Display for DeckServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLessonId => write!(f, "lesson id cannot be empty"),
            Self::LessonNotFound(id) => write!(f, "lesson not found: {id}"),
            Self::Timeout { limit_ms } => {
                write!(f, "deck transaction exceeded {limit_ms}ms and was rolled back")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DeckServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for DeckServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::LessonNotFound(id) => Self::LessonNotFound(id),
            RepoError::Timeout { limit_ms, .. } => Self::Timeout { limit_ms },
            other => Self::Repo(other),
        }
    }
}

pub type DeckServiceResult<T> = Result<T, DeckServiceError>;

/// Use-case service wrapper for deck persistence.
pub struct DeckService<R: DeckRepository> {
    repo: R,
}

impl<R: DeckRepository> DeckService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Loads the stored deck. Returns an empty collection when the lesson has
    /// no slides.
    pub fn fetch_deck(&self, lesson_id: &str) -> DeckServiceResult<Vec<Slide>> {
        let lesson_id = normalize_lesson_id(lesson_id)?;
        Ok(self.repo.load_deck(lesson_id)?)
    }

    /// Replaces the whole stored deck with `snapshot`.
    ///
    /// # Contract
    /// - Missing lesson fails the call; nothing is written.
    /// - Invalid nested items are listed in `ReplaceOutcome::skipped`.
    pub fn replace_deck(&mut self, snapshot: &DeckSnapshot) -> DeckServiceResult<ReplaceOutcome> {
        let lesson_id = normalize_lesson_id(&snapshot.lesson_id)?;
        if lesson_id.len() == snapshot.lesson_id.len() {
            return Ok(self.repo.replace_deck(snapshot)?);
        }

        let normalized = DeckSnapshot::new(lesson_id, snapshot.slides.clone());
        Ok(self.repo.replace_deck(&normalized)?)
    }
}

fn normalize_lesson_id(lesson_id: &str) -> DeckServiceResult<&str> {
    let trimmed = lesson_id.trim();
    if trimmed.is_empty() {
        return Err(DeckServiceError::InvalidLessonId);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::{DeckService, DeckServiceError};
    use crate::model::deck::{DeckSnapshot, Slide};
    use crate::repo::deck_repo::{DeckRepository, RepoError, RepoResult, ReplaceOutcome};

    #[derive(Default)]
    struct RecordingRepo {
        replaced: Vec<String>,
        fail_with_missing_lesson: bool,
    }

    impl DeckRepository for RecordingRepo {
        fn load_deck(&self, _lesson_id: &str) -> RepoResult<Vec<Slide>> {
            Ok(Vec::new())
        }

        fn replace_deck(&mut self, snapshot: &DeckSnapshot) -> RepoResult<ReplaceOutcome> {
            if self.fail_with_missing_lesson {
                return Err(RepoError::LessonNotFound(snapshot.lesson_id.clone()));
            }
            self.replaced.push(snapshot.lesson_id.clone());
            Ok(ReplaceOutcome {
                success_count: snapshot.slides.len(),
                ..ReplaceOutcome::default()
            })
        }
    }

    #[test]
    fn blank_lesson_id_is_rejected_before_storage() {
        let mut service = DeckService::new(RecordingRepo::default());
        let err = service
            .replace_deck(&DeckSnapshot::new("  ", vec![Slide::new("A")]))
            .unwrap_err();
        assert!(matches!(err, DeckServiceError::InvalidLessonId));
        assert!(service.repo.replaced.is_empty());
        assert!(service.fetch_deck("").is_err());
    }

    #[test]
    fn lesson_id_is_trimmed_before_replace() {
        let mut service = DeckService::new(RecordingRepo::default());
        let outcome = service
            .replace_deck(&DeckSnapshot::new(" L1 ", vec![Slide::new("A")]))
            .unwrap();
        assert_eq!(outcome.success_count, 1);
        assert_eq!(service.repo.replaced, vec!["L1".to_string()]);
    }

    #[test]
    fn missing_lesson_maps_to_stable_code() {
        let mut service = DeckService::new(RecordingRepo {
            fail_with_missing_lesson: true,
            ..RecordingRepo::default()
        });
        let err = service
            .replace_deck(&DeckSnapshot::new("L9", Vec::new()))
            .unwrap_err();
        assert_eq!(err.code(), "lesson_not_found");
        assert_eq!(err.to_string(), "lesson not found: L9");
    }
}
