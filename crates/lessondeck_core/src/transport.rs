//! Persistence transport between deck clients and the storage side.
//!
//! # Responsibility
//! - Define the two request shapes clients use: fetch a deck by lesson id and
//!   replace a deck from a snapshot.
//! - Serve both shapes as JSON handlers over a shared SQLite connection.
//! - Provide an in-process async transport that runs storage work on the
//!   blocking pool.
//!
//! # Invariants
//! - Fetch of a lesson without slides returns `[]`, never an error.
//! - Replace answers `{"successCount": n}` or `{"error": "..."}`.
//! - Transport-level failures (offline, task panics) are distinct from
//!   storage-side rejections carried in the response body.

use crate::db::SharedConnection;
use crate::model::deck::{DeckSnapshot, Slide};
use crate::model::lesson::Lesson;
use crate::repo::deck_repo::{SqliteDeckRepository, DEFAULT_REPLACE_TIMEOUT};
use crate::repo::directory_repo::{LessonDirectory, SqliteLessonDirectory};
use crate::service::deck_service::{DeckService, DeckServiceError, DeckServiceResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Replace request body: `{ "lessonId": "...", "slides": [...] }`.
pub type ReplaceRequest = DeckSnapshot;

/// Replace response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplaceResponse {
    Saved {
        #[serde(rename = "successCount")]
        success_count: usize,
    },
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ReplaceResponse {
    /// Converts the body into the created slide count or a rejection.
    pub fn into_result(self) -> TransportResult<usize> {
        match self {
            Self::Saved { success_count } => Ok(success_count),
            Self::Failed { error, .. } => Err(TransportError::Rejected(error)),
        }
    }
}

impl From<DeckServiceResult<usize>> for ReplaceResponse {
    fn from(value: DeckServiceResult<usize>) -> Self {
        match value {
            Ok(success_count) => Self::Saved { success_count },
            Err(err) => Self::Failed {
                error: err.to_string(),
                code: Some(err.code().to_string()),
            },
        }
    }
}

#[derive(Debug)]
pub enum TransportError {
    /// Storage side answered with an error body.
    Rejected(String),
    /// Fetch failed on the storage side.
    Service(DeckServiceError),
    /// Transport cannot reach storage.
    Unavailable(String),
    /// Background storage task panicked or was cancelled.
    Task(tokio::task::JoinError),
    Payload(serde_json::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(message) => write!(f, "deck save rejected: {message}"),
            Self::Service(err) => write!(f, "{err}"),
            Self::Unavailable(message) => write!(f, "deck storage unavailable: {message}"),
            Self::Task(err) => write!(f, "deck storage task failed: {err}"),
            Self::Payload(err) => write!(f, "invalid deck payload: {err}"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Service(err) => Some(err),
            Self::Task(err) => Some(err),
            Self::Payload(err) => Some(err),
            Self::Rejected(_) | Self::Unavailable(_) => None,
        }
    }
}

impl From<DeckServiceError> for TransportError {
    fn from(value: DeckServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(value: serde_json::Error) -> Self {
        Self::Payload(value)
    }
}

/// Client-side view of deck storage.
pub trait DeckTransport: Send + Sync + 'static {
    fn fetch_deck(
        &self,
        lesson_id: &str,
    ) -> impl Future<Output = TransportResult<Vec<Slide>>> + Send;

    fn replace_deck(
        &self,
        request: ReplaceRequest,
    ) -> impl Future<Output = TransportResult<ReplaceResponse>> + Send;

    /// Lesson metadata shown next to the deck. Transports without access to
    /// the lesson store report none.
    fn fetch_lesson(
        &self,
        _lesson_id: &str,
    ) -> impl Future<Output = TransportResult<Option<Lesson>>> + Send {
        async { Ok(None) }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

/// Storage-side request handlers for the two deck request shapes.
#[derive(Debug, Clone)]
pub struct DeckEndpoint {
    conn: SharedConnection,
    timeout: Duration,
}

impl DeckEndpoint {
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            timeout: DEFAULT_REPLACE_TIMEOUT,
        }
    }

    /// Overrides the replace transaction deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `GET` shape: stored slides of one lesson.
    pub fn fetch(&self, lesson_id: &str) -> TransportResult<Vec<Slide>> {
        let started_at = Instant::now();
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| TransportError::Unavailable("connection lock poisoned".to_string()))?;
        let result = SqliteDeckRepository::try_new(&mut conn)
            .map_err(DeckServiceError::from)
            .and_then(|repo| DeckService::new(repo).fetch_deck(lesson_id));

        match &result {
            Ok(slides) => info!(
                "event=deck_fetch module=transport status=ok lesson_id={} slides={} duration_ms={}",
                lesson_id,
                slides.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=deck_fetch module=transport status=error lesson_id={} error_code={} error={}",
                lesson_id,
                err.code(),
                err
            ),
        }
        Ok(result?)
    }

    /// Lesson metadata from the lesson directory; `None` for unknown ids.
    pub fn lesson(&self, lesson_id: &str) -> TransportResult<Option<Lesson>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| TransportError::Unavailable("connection lock poisoned".to_string()))?;
        let lesson = SqliteLessonDirectory::new(&conn)
            .find_lesson(lesson_id.trim())
            .map_err(DeckServiceError::from)?;
        Ok(lesson)
    }

    /// `POST` shape: replace the whole deck of `request.lesson_id`.
    pub fn replace(&self, request: &ReplaceRequest) -> TransportResult<ReplaceResponse> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| TransportError::Unavailable("connection lock poisoned".to_string()))?;
        let result = SqliteDeckRepository::try_new(&mut conn)
            .map_err(DeckServiceError::from)
            .and_then(|repo| {
                DeckService::new(repo.with_timeout(self.timeout)).replace_deck(request)
            })
            .map(|outcome| outcome.success_count);
        Ok(ReplaceResponse::from(result))
    }

    /// JSON handler for the fetch shape.
    pub fn handle_fetch_json(&self, lesson_id: &str) -> String {
        match self.fetch(lesson_id) {
            Ok(slides) => {
                serde_json::to_string(&slides).unwrap_or_else(|err| error_json(&err.to_string(), None))
            }
            Err(TransportError::Service(err)) => error_json(&err.to_string(), Some(err.code())),
            Err(err) => error_json(&err.to_string(), None),
        }
    }

    /// JSON handler for the replace shape.
    pub fn handle_replace_json(&self, body: &str) -> String {
        let request: ReplaceRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(err) => {
                warn!("event=deck_replace_request module=transport status=error error_code=invalid_body error={err}");
                return error_json(&format!("invalid request body: {err}"), Some("invalid_body"));
            }
        };

        match self.replace(&request) {
            Ok(response) => serde_json::to_string(&response)
                .unwrap_or_else(|err| error_json(&err.to_string(), None)),
            Err(err) => error_json(&err.to_string(), None),
        }
    }
}

fn error_json(message: &str, code: Option<&str>) -> String {
    serde_json::to_string(&ErrorBody {
        error: message,
        code,
    })
    .unwrap_or_else(|_| r#"{"error":"internal error"}"#.to_string())
}

/// In-process async transport backed by a [`DeckEndpoint`].
///
/// Storage calls run on the blocking pool. `set_offline(true)` makes every
/// call fail as if the network were down.
#[derive(Debug, Clone)]
pub struct LocalDeckTransport {
    endpoint: DeckEndpoint,
    offline: Arc<AtomicBool>,
}

impl LocalDeckTransport {
    pub fn new(endpoint: DeckEndpoint) -> Self {
        Self {
            endpoint,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn endpoint(&self) -> &DeckEndpoint {
        &self.endpoint
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> TransportResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("transport offline".to_string()));
        }
        Ok(())
    }
}

impl DeckTransport for LocalDeckTransport {
    fn fetch_deck(
        &self,
        lesson_id: &str,
    ) -> impl Future<Output = TransportResult<Vec<Slide>>> + Send {
        let online = self.ensure_online();
        let endpoint = self.endpoint.clone();
        let lesson_id = lesson_id.to_string();
        async move {
            online?;
            tokio::task::spawn_blocking(move || endpoint.fetch(&lesson_id))
                .await
                .map_err(TransportError::Task)?
        }
    }

    fn replace_deck(
        &self,
        request: ReplaceRequest,
    ) -> impl Future<Output = TransportResult<ReplaceResponse>> + Send {
        let online = self.ensure_online();
        let endpoint = self.endpoint.clone();
        async move {
            online?;
            tokio::task::spawn_blocking(move || endpoint.replace(&request))
                .await
                .map_err(TransportError::Task)?
        }
    }

    fn fetch_lesson(
        &self,
        lesson_id: &str,
    ) -> impl Future<Output = TransportResult<Option<Lesson>>> + Send {
        let online = self.ensure_online();
        let endpoint = self.endpoint.clone();
        let lesson_id = lesson_id.to_string();
        async move {
            online?;
            tokio::task::spawn_blocking(move || endpoint.lesson(&lesson_id))
                .await
                .map_err(TransportError::Task)?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DeckEndpoint, ReplaceResponse, TransportError};
    use crate::db::{open_db_in_memory, share};
    use crate::repo::directory_repo::SqliteLessonDirectory;
    use serde_json::{json, Value};

    fn endpoint_with_lesson() -> DeckEndpoint {
        let conn = open_db_in_memory().unwrap();
        SqliteLessonDirectory::new(&conn)
            .upsert_lesson("L1", "Cells", None)
            .unwrap();
        DeckEndpoint::new(share(conn))
    }

    #[test]
    fn response_bodies_use_wire_field_names() {
        let saved = serde_json::to_value(ReplaceResponse::Saved { success_count: 2 }).unwrap();
        assert_eq!(saved, json!({ "successCount": 2 }));

        let failed: ReplaceResponse =
            serde_json::from_value(json!({ "error": "lesson not found: L2" })).unwrap();
        let err = failed.into_result().unwrap_err();
        assert!(matches!(err, TransportError::Rejected(message) if message.contains("L2")));
    }

    #[test]
    fn fetch_of_empty_lesson_is_empty_array() {
        let endpoint = endpoint_with_lesson();
        assert_eq!(endpoint.handle_fetch_json("L1"), "[]");
        assert_eq!(endpoint.handle_fetch_json("unknown"), "[]");
    }

    #[test]
    fn lesson_lookup_reports_deck_presence() {
        let endpoint = endpoint_with_lesson();
        let lesson = endpoint.lesson(" L1 ").unwrap().unwrap();
        assert_eq!(lesson.title, "Cells");
        assert!(!lesson.has_deck);
        assert!(endpoint.lesson("L2").unwrap().is_none());
    }

    #[test]
    fn replace_handler_reports_count_or_error() {
        let endpoint = endpoint_with_lesson();
        let body = json!({
            "lessonId": "L1",
            "slides": [{ "id": "s1", "title": "Intro", "notes": [], "comments": [] }]
        });
        let saved: Value =
            serde_json::from_str(&endpoint.handle_replace_json(&body.to_string())).unwrap();
        assert_eq!(saved, json!({ "successCount": 1 }));

        let missing = json!({ "lessonId": "L2", "slides": [] });
        let failed: Value =
            serde_json::from_str(&endpoint.handle_replace_json(&missing.to_string())).unwrap();
        assert_eq!(failed["code"], "lesson_not_found");
        assert!(failed["error"].as_str().unwrap().contains("L2"));

        let garbage: Value =
            serde_json::from_str(&endpoint.handle_replace_json("{not json")).unwrap();
        assert_eq!(garbage["code"], "invalid_body");
    }
}
