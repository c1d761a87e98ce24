//! Lesson and user read models supplied by external stores.
//!
//! The engine only reads these records; authoring flows own their lifecycle.

use crate::model::deck::{LessonId, UserId, UserRef};
use serde::{Deserialize, Serialize};

/// Lesson metadata consumed when a deck is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: LessonId,
    pub title: String,
    /// Source document rendered for annotation.
    pub resource_url: Option<String>,
    /// Whether at least one slide is stored for the lesson.
    pub has_deck: bool,
}

/// User directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub image: Option<String>,
}

impl UserRecord {
    /// Converts the authoritative record into a weak reference.
    pub fn to_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            image: self.image.clone(),
        }
    }
}
