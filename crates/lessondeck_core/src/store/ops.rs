//! Pure deck mutations.
//!
//! Every operation reads the current collection and returns a fresh one; the
//! input is never modified. Operations addressing an absent slide, comment or
//! reaction return an unchanged copy, so retries of deletes are no-ops.

use crate::model::deck::{Comment, Note, Reaction, Slide};
use crate::model::highlight::Highlight;
use once_cell::sync::Lazy;
use regex::Regex;

const SLIDE_TITLE_MAX_CHARS: usize = 80;
const UNTITLED_SLIDE: &str = "Untitled slide";

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Appends a slide seeded from a highlight: title from the quote, one text
/// note with the highlight's note body.
pub fn add_slide(slides: &[Slide], highlight: &Highlight) -> Vec<Slide> {
    let mut slide = Slide::new(slide_title_from(&highlight.quote, &highlight.content));
    slide.notes.push(Note::text(highlight.content.clone()));

    let mut next = slides.to_vec();
    next.push(slide);
    next
}

/// Appends an empty slide created manually.
pub fn add_blank_slide(slides: &[Slide], title: &str) -> Vec<Slide> {
    let mut next = slides.to_vec();
    next.push(Slide::new(slide_title_from(title, "")));
    next
}

pub fn rename_slide(slides: &[Slide], slide_id: &str, title: &str) -> Vec<Slide> {
    map_slide(slides, slide_id, |slide| slide.title = title.to_string())
}

pub fn delete_slide(slides: &[Slide], slide_id: &str) -> Vec<Slide> {
    slides
        .iter()
        .filter(|slide| slide.id != slide_id)
        .cloned()
        .collect()
}

pub fn add_note(slides: &[Slide], slide_id: &str, note: Note) -> Vec<Slide> {
    map_slide(slides, slide_id, |slide| slide.notes.push(note))
}

/// Replaces the note at `index`; out-of-range indexes are a no-op.
pub fn update_note(slides: &[Slide], slide_id: &str, index: usize, note: Note) -> Vec<Slide> {
    map_slide(slides, slide_id, |slide| {
        if let Some(current) = slide.notes.get_mut(index) {
            *current = note;
        }
    })
}

pub fn add_comment(slides: &[Slide], slide_id: &str, comment: Comment) -> Vec<Slide> {
    map_slide(slides, slide_id, |slide| slide.comments.push(comment))
}

pub fn delete_comment(slides: &[Slide], slide_id: &str, comment_id: &str) -> Vec<Slide> {
    map_slide(slides, slide_id, |slide| {
        slide.comments.retain(|comment| comment.id != comment_id)
    })
}

pub fn add_reaction(
    slides: &[Slide],
    slide_id: &str,
    comment_id: &str,
    reaction: Reaction,
) -> Vec<Slide> {
    map_comment(slides, slide_id, comment_id, |comment| {
        comment.reactions.push(reaction)
    })
}

pub fn delete_reaction(
    slides: &[Slide],
    slide_id: &str,
    comment_id: &str,
    reaction_id: &str,
) -> Vec<Slide> {
    map_comment(slides, slide_id, comment_id, |comment| {
        comment.reactions.retain(|reaction| reaction.id != reaction_id)
    })
}

/// Derives a slide title: whitespace collapsed, capped at 80 chars, with
/// `fallback` and then a fixed placeholder when empty.
pub fn slide_title_from(primary: &str, fallback: &str) -> String {
    let pick = |value: &str| {
        let normalized = WHITESPACE_RE.replace_all(value, " ");
        let trimmed = normalized.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.chars().take(SLIDE_TITLE_MAX_CHARS).collect::<String>())
        }
    };
    pick(primary)
        .or_else(|| pick(fallback))
        .unwrap_or_else(|| UNTITLED_SLIDE.to_string())
}

fn map_slide(slides: &[Slide], slide_id: &str, edit: impl FnOnce(&mut Slide)) -> Vec<Slide> {
    let mut next = slides.to_vec();
    if let Some(slide) = next.iter_mut().find(|slide| slide.id == slide_id) {
        edit(slide);
    }
    next
}

fn map_comment(
    slides: &[Slide],
    slide_id: &str,
    comment_id: &str,
    edit: impl FnOnce(&mut Comment),
) -> Vec<Slide> {
    map_slide(slides, slide_id, |slide| {
        if let Some(comment) = slide
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id)
        {
            edit(comment);
        }
    })
}
