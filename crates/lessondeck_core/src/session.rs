//! One mounted lesson deck on a client.
//!
//! # Responsibility
//! - Wire capture, deck store, persistence scheduler and realtime channel
//!   for a single lesson.
//! - Replace local state with the stored deck whenever another collaborator
//!   publishes.
//!
//! # Invariants
//! - Mount fails only when the stored deck cannot be fetched; a failed
//!   realtime join leaves the session usable but `Disconnected`.
//! - A reload signal discards unsaved local edits (last writer wins).

use crate::capture::{HighlightCapture, JumpOutcome, RenderSurface, SelectionEvent};
use crate::config::EngineConfig;
use crate::model::deck::LessonId;
use crate::model::highlight::{Highlight, HighlightId};
use crate::model::lesson::Lesson;
use crate::store::DeckStore;
use crate::sync::realtime::{
    ConnectionStatus, PeerId, RealtimeChannel, RealtimeProvider, ReloadSignal,
};
use crate::sync::scheduler::{
    spawn_scheduler, PublishError, PublishReceipt, ReloadNotifier, SchedulerEvent,
    SchedulerHandle, SchedulerOptions,
};
use crate::transport::{DeckTransport, TransportError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum SessionError {
    /// Stored deck could not be fetched at mount.
    Fetch(TransportError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "failed to load lesson deck: {err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub scheduler: SchedulerOptions,
    /// Empty falls back to the default capture palette.
    pub palette: Vec<String>,
}

impl SessionOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            scheduler: SchedulerOptions::from_config(config),
            palette: config.palette(),
        }
    }
}

pub struct LessonSession<T: DeckTransport> {
    lesson_id: LessonId,
    lesson: Option<Lesson>,
    store: DeckStore,
    capture: HighlightCapture,
    realtime: Arc<RealtimeChannel>,
    scheduler: SchedulerHandle,
    reload_pump: JoinHandle<()>,
    transport: Arc<T>,
}

impl<T: DeckTransport> LessonSession<T> {
    /// Fetches the stored deck, joins the lesson channel and starts
    /// background persistence.
    pub async fn mount<P: RealtimeProvider>(
        lesson_id: &str,
        peer_id: impl Into<PeerId>,
        transport: Arc<T>,
        provider: &P,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let store = DeckStore::new(lesson_id);
        let slides = transport
            .fetch_deck(lesson_id)
            .await
            .map_err(SessionError::Fetch)?;
        let slide_count = slides.len();
        store.load_initial(slides);

        let lesson = match transport.fetch_lesson(lesson_id).await {
            Ok(lesson) => lesson,
            Err(err) => {
                warn!(
                    "event=lesson_fetch module=session status=error lesson_id={} error={}",
                    lesson_id, err
                );
                None
            }
        };

        let realtime = Arc::new(RealtimeChannel::new(lesson_id, peer_id));
        if let Err(err) = realtime.connect(provider).await {
            warn!(
                "event=session_mount module=session status=degraded lesson_id={} error={}",
                lesson_id, err
            );
        }

        let notifier: Arc<dyn ReloadNotifier> = realtime.clone();
        let scheduler = spawn_scheduler(
            &store,
            transport.clone(),
            Some(notifier),
            options.scheduler,
        );
        let reload_pump = tokio::spawn(pump_reloads(
            store.clone(),
            transport.clone(),
            realtime.reload_signals(),
        ));

        let seeded = store.clone();
        let capture = HighlightCapture::new(options.palette).with_callback(move |highlight| {
            seeded.add_slide(highlight);
        });

        info!(
            "event=session_mount module=session status=ok lesson_id={} slides={} realtime={:?}",
            lesson_id,
            slide_count,
            realtime.status()
        );
        Ok(Self {
            lesson_id: lesson_id.to_string(),
            lesson,
            store,
            capture,
            realtime,
            scheduler,
            reload_pump,
            transport,
        })
    }

    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    /// Title and resource of the mounted lesson, when the transport knows it.
    pub fn lesson(&self) -> Option<&Lesson> {
        self.lesson.as_ref()
    }

    pub fn store(&self) -> &DeckStore {
        &self.store
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Captures a highlight and seeds a new slide from it.
    pub fn capture_highlight(
        &mut self,
        selection: SelectionEvent,
        note: &str,
    ) -> Option<Highlight> {
        self.capture.capture(selection, note)
    }

    pub fn highlights(&self) -> &[Highlight] {
        self.capture.highlights()
    }

    pub fn jump_to(
        &self,
        highlight_id: HighlightId,
        surface: &mut impl RenderSurface,
    ) -> JumpOutcome {
        self.capture.jump_to(highlight_id, surface)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.realtime.status()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.realtime.watch_status()
    }

    pub async fn presence(&self) -> Vec<PeerId> {
        self.realtime.presence().await
    }

    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.scheduler.subscribe()
    }

    /// Persists now and tells collaborators to reload.
    pub async fn publish(&self) -> Result<PublishReceipt, PublishError> {
        self.scheduler.publish().await
    }

    /// Flushes pending edits once, then leaves the channel.
    pub async fn close(self) {
        self.reload_pump.abort();
        self.scheduler.shutdown().await;
        self.realtime.disconnect().await;
        info!(
            "event=session_close module=session status=ok lesson_id={}",
            self.lesson_id
        );
    }
}

async fn pump_reloads<T: DeckTransport>(
    store: DeckStore,
    transport: Arc<T>,
    mut signals: broadcast::Receiver<ReloadSignal>,
) {
    loop {
        let from = match signals.recv().await {
            Ok(signal) => signal.from,
            // Missed signals still mean the stored deck changed.
            Err(RecvError::Lagged(_)) => "unknown".to_string(),
            Err(RecvError::Closed) => break,
        };
        match transport.fetch_deck(store.lesson_id()).await {
            Ok(slides) => {
                info!(
                    "event=deck_reload module=session status=ok lesson_id={} from={} slides={}",
                    store.lesson_id(),
                    from,
                    slides.len()
                );
                store.reload(slides);
            }
            Err(err) => warn!(
                "event=deck_reload module=session status=error lesson_id={} from={} error={}",
                store.lesson_id(),
                from,
                err
            ),
        }
    }
}
