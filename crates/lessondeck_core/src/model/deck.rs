//! Deck domain model.
//!
//! # Responsibility
//! - Define the slide tree (`Slide -> Notes / Comments -> Reactions`).
//! - Keep serialized field names aligned with the transport payloads.
//!
//! # Invariants
//! - Notes, comments and reactions are owned by exactly one parent.
//! - `UserRef` is a weak reference: only `id` is trusted, display fields are
//!   informational and re-resolved at persistence time.
//! - Note `order` is output-only; writers recompute it from array position.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lesson identifier as issued by the course-authoring store.
pub type LessonId = String;
/// User identifier as issued by the user directory.
pub type UserId = String;
/// Client-assigned slide identifier.
pub type SlideId = String;
/// Client-assigned comment identifier.
pub type CommentId = String;
/// Client-assigned reaction identifier.
pub type ReactionId = String;

/// Generates a fresh client-side identifier for deck items.
pub fn new_item_id() -> String {
    Uuid::new_v4().to_string()
}

/// Weak user reference: identity plus display-only data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    #[serde(default)]
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl UserRef {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            image: None,
        }
    }

    /// Returns whether the reference carries a usable identity.
    pub fn has_identity(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// Media kind for one note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    #[default]
    Text,
    Image,
    Video,
}

impl NoteType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// One note inside a slide.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default)]
    pub content: String,
    /// Serialized as `type` to match the client payload.
    #[serde(rename = "type", default)]
    pub kind: NoteType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Position assigned by storage. Ignored on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

impl Note {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: NoteType::Text,
            source: None,
            order: None,
        }
    }

    pub fn media(kind: NoteType, content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind,
            source: Some(source.into()),
            order: None,
        }
    }
}

/// Emoji reaction attached to a comment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    #[serde(default)]
    pub id: ReactionId,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub user: UserRef,
}

impl Reaction {
    pub fn new(emoji: impl Into<String>, user: UserRef) -> Self {
        Self {
            id: new_item_id(),
            emoji: emoji.into(),
            user,
        }
    }
}

/// Threaded comment on a slide.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub id: CommentId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender: UserRef,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Comment {
    pub fn new(content: impl Into<String>, sender: UserRef) -> Self {
        Self {
            id: new_item_id(),
            content: content.into(),
            sender,
            reactions: Vec::new(),
        }
    }
}

/// One slide of a lesson deck.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    #[serde(default)]
    pub id: SlideId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Slide {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: new_item_id(),
            title: title.into(),
            notes: Vec::new(),
            comments: Vec::new(),
        }
    }
}

/// Complete, self-contained deck state for one lesson; the persistence unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckSnapshot {
    pub lesson_id: LessonId,
    #[serde(default)]
    pub slides: Vec<Slide>,
}

impl DeckSnapshot {
    pub fn new(lesson_id: impl Into<LessonId>, slides: Vec<Slide>) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            slides,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DeckSnapshot, Note, NoteType, Slide, UserRef};

    #[test]
    fn snapshot_parses_minimal_client_payload() {
        let payload = r#"{
            "lessonId": "L1",
            "slides": [{
                "title": "Intro",
                "notes": [{"content": "hi"}],
                "comments": [{"content": "nice", "sender": {"id": "U1"}}]
            }]
        }"#;
        let snapshot: DeckSnapshot = serde_json::from_str(payload).unwrap();
        assert_eq!(snapshot.lesson_id, "L1");
        let slide = &snapshot.slides[0];
        assert!(slide.id.is_empty());
        assert_eq!(slide.notes[0].kind, NoteType::Text);
        assert_eq!(slide.comments[0].sender.id, "U1");
        assert!(slide.comments[0].reactions.is_empty());
    }

    #[test]
    fn note_kind_serializes_as_type_field() {
        let json = serde_json::to_value(Note::media(NoteType::Video, "clip", "v.mp4")).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["source"], "v.mp4");
        assert!(json.get("order").is_none());
    }

    #[test]
    fn blank_user_ref_has_no_identity() {
        assert!(!UserRef::new("  ").has_identity());
        assert!(UserRef::new("U1").has_identity());
    }

    #[test]
    fn new_slides_get_distinct_ids() {
        assert_ne!(Slide::new("a").id, Slide::new("a").id);
    }
}
