//! Core engine for collaborative lesson decks.
//! Annotation capture, deck state, debounced persistence, realtime reload
//! signalling and the bulk-replace storage routine live here.

pub mod capture;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;

pub use capture::{HighlightCapture, JumpOutcome, RenderSurface, SelectionEvent};
pub use config::{ConfigError, EngineConfig};
pub use logging::{init_logging, logging_status, LoggingError, LoggingStatus};
pub use model::deck::{Comment, DeckSnapshot, Note, NoteType, Reaction, Slide, UserRef};
pub use model::highlight::{Highlight, PageSize, PixelRect, Region};
pub use model::lesson::{Lesson, UserRecord};
pub use repo::deck_repo::{
    DeckRepository, RepoError, RepoResult, ReplaceOutcome, SkipReason, SkippedItem,
    SqliteDeckRepository,
};
pub use repo::directory_repo::{
    LessonDirectory, SqliteLessonDirectory, SqliteUserDirectory, UserDirectory,
};
pub use service::deck_service::{DeckService, DeckServiceError};
pub use session::{LessonSession, SessionError, SessionOptions};
pub use store::{ChangeOrigin, DeckRevision, DeckStore};
pub use sync::realtime::{ConnectionStatus, LocalBroker, RealtimeChannel, RealtimeProvider};
pub use sync::scheduler::{
    spawn_scheduler, PublishError, PublishReceipt, SchedulerEvent, SchedulerHandle,
    SchedulerOptions,
};
pub use transport::{
    DeckEndpoint, DeckTransport, LocalDeckTransport, ReplaceRequest, ReplaceResponse,
    TransportError,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
