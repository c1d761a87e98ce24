//! Debounced persistence scheduler for one open deck.
//!
//! # Responsibility
//! - Observe deck revisions and persist the latest state after a quiet
//!   period without changes.
//! - Run explicit publishes: persist now, then notify collaborators.
//! - Report save outcomes as [`SchedulerEvent`]s.
//!
//! # Invariants
//! - The first observed revision, and every `Initial`/`Reload` revision, is
//!   treated as already saved.
//! - A revision whose fingerprint equals the last saved one never saves.
//! - At most one persistence call is in flight. A local edit or an autosave
//!   due while a call is in flight marks the deck dirty; exactly one
//!   follow-up save runs when the call completes, if content still differs
//!   from the last save.
//! - A failed save leaves the last-saved fingerprint untouched.
//! - All scheduler state lives in the task; nothing is shared between decks.

use crate::config::{EngineConfig, DEFAULT_BROADCAST_CAPACITY, DEFAULT_QUIET_PERIOD_MS};
use crate::model::deck::{DeckSnapshot, LessonId, Slide};
use crate::store::{ChangeOrigin, DeckRevision, DeckStore};
use crate::transport::{DeckTransport, ReplaceResponse, TransportError, TransportResult};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};

const COMMAND_CAPACITY: usize = 16;

/// Sends the "content changed, reload" signal after a successful publish.
pub trait ReloadNotifier: Send + Sync + 'static {
    /// Returns whether the signal was handed off; delivery is not confirmed.
    fn notify_reload(&self) -> bool;
}

/// Content fingerprint: canonical JSON serialization of the slide list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns `None` when the collection cannot be serialized; such a state
    /// never compares equal and is always saved.
    pub fn of(slides: &[Slide]) -> Option<Self> {
        match serde_json::to_string(slides) {
            Ok(encoded) => Some(Self(encoded)),
            Err(err) => {
                warn!("event=deck_fingerprint module=sync status=error error={err}");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub quiet_period: Duration,
    pub event_capacity: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(DEFAULT_QUIET_PERIOD_MS),
            event_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            quiet_period: config.quiet_period(),
            event_capacity: config.sync.broadcast_capacity.max(1),
        }
    }

    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }
}

/// Outcome notices for the editing UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Saved { success_count: usize },
    AutosaveFailed { message: String },
    Published { success_count: usize, notified: bool },
    PublishFailed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub success_count: usize,
    /// Whether the reload signal was handed to the realtime channel.
    pub notified: bool,
}

#[derive(Debug, Clone)]
pub enum PublishError {
    Persist(Arc<TransportError>),
    /// Scheduler task is no longer running.
    Stopped,
}

impl Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persist(err) => write!(f, "publish failed: {err}"),
            Self::Stopped => write!(f, "publish failed: scheduler stopped"),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persist(err) => Some(err.as_ref()),
            Self::Stopped => None,
        }
    }
}

type PublishReply = oneshot::Sender<Result<PublishReceipt, PublishError>>;

enum Command {
    Publish(PublishReply),
    Shutdown(oneshot::Sender<()>),
}

/// Control handle of a running scheduler task.
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SchedulerEvent>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Persists the current deck now and notifies collaborators on success.
    /// Waits for an in-flight save to finish first.
    pub async fn publish(&self) -> Result<PublishReceipt, PublishError> {
        let (reply, receipt) = oneshot::channel();
        self.commands
            .send(Command::Publish(reply))
            .await
            .map_err(|_| PublishError::Stopped)?;
        receipt.await.map_err(|_| PublishError::Stopped)?
    }

    /// Stops the task after flushing a pending save once.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(err) = self.task.await {
            warn!("event=scheduler_stop module=sync status=error error={err}");
        }
    }
}

/// Starts the scheduler for the deck held by `store`.
pub fn spawn_scheduler<T: DeckTransport>(
    store: &DeckStore,
    transport: Arc<T>,
    notifier: Option<Arc<dyn ReloadNotifier>>,
    options: SchedulerOptions,
) -> SchedulerHandle {
    let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
    let (events, _) = broadcast::channel(options.event_capacity.max(1));
    let mut revisions = store.subscribe();
    let baseline = Fingerprint::of(&revisions.borrow_and_update().slides);

    let scheduler = Scheduler {
        lesson_id: store.lesson_id().to_string(),
        revisions,
        commands,
        events: events.clone(),
        transport,
        notifier,
        quiet_period: options.quiet_period,
        last_saved: baseline,
        deadline: None,
        in_flight: None,
        dirty_while_in_flight: false,
        pending_publishes: Vec::new(),
    };
    info!(
        "event=scheduler_start module=sync status=ok lesson_id={} quiet_period_ms={}",
        scheduler.lesson_id,
        options.quiet_period.as_millis()
    );

    SchedulerHandle {
        commands: commands_tx,
        events,
        task: tokio::spawn(scheduler.run()),
    }
}

enum SavePurpose {
    Autosave,
    Publish(Vec<PublishReply>),
}

struct InFlight {
    handle: JoinHandle<TransportResult<usize>>,
    fingerprint: Option<Fingerprint>,
    purpose: SavePurpose,
    /// A reload replaced local state while this save was running.
    superseded: bool,
    started_at: Instant,
}

struct Scheduler<T: DeckTransport> {
    lesson_id: LessonId,
    revisions: watch::Receiver<DeckRevision>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<SchedulerEvent>,
    transport: Arc<T>,
    notifier: Option<Arc<dyn ReloadNotifier>>,
    quiet_period: Duration,
    last_saved: Option<Fingerprint>,
    deadline: Option<Instant>,
    in_flight: Option<InFlight>,
    dirty_while_in_flight: bool,
    pending_publishes: Vec<PublishReply>,
}

impl<T: DeckTransport> Scheduler<T> {
    async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                changed = self.revisions.changed() => {
                    if changed.is_err() {
                        self.drain().await;
                        break;
                    }
                    self.on_revision();
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    self.start_save(SavePurpose::Autosave);
                }
                joined = wait_in_flight(&mut self.in_flight) => {
                    self.finish_save(joined);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Publish(reply)) => self.on_publish(reply),
                    Some(Command::Shutdown(ack)) => {
                        self.drain().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.drain().await;
                        break;
                    }
                },
            }
        }
        info!(
            "event=scheduler_stop module=sync status=ok lesson_id={}",
            self.lesson_id
        );
    }

    fn on_revision(&mut self) {
        let revision = self.revisions.borrow_and_update().clone();
        let fingerprint = Fingerprint::of(&revision.slides);

        match revision.origin {
            ChangeOrigin::Initial | ChangeOrigin::Reload => {
                debug!(
                    "event=deck_baseline module=sync status=ok lesson_id={} revision={}",
                    self.lesson_id, revision.number
                );
                self.last_saved = fingerprint;
                self.deadline = None;
                self.dirty_while_in_flight = false;
                if let Some(flight) = self.in_flight.as_mut() {
                    flight.superseded = true;
                }
            }
            ChangeOrigin::Local => {
                // `last_saved` predates the running save; settle after it lands.
                if self.in_flight.is_some() {
                    self.dirty_while_in_flight = true;
                }
                if fingerprint.is_some() && fingerprint == self.last_saved {
                    debug!(
                        "event=deck_autosave module=sync status=skip lesson_id={} revision={} reason=unchanged",
                        self.lesson_id, revision.number
                    );
                    self.deadline = None;
                    return;
                }
                self.deadline = Some(Instant::now() + self.quiet_period);
            }
        }
    }

    fn on_publish(&mut self, reply: PublishReply) {
        self.deadline = None;
        if self.in_flight.is_some() {
            self.pending_publishes.push(reply);
            return;
        }
        self.start_save(SavePurpose::Publish(vec![reply]));
    }

    fn start_save(&mut self, purpose: SavePurpose) {
        if self.in_flight.is_some() {
            match purpose {
                SavePurpose::Autosave => self.dirty_while_in_flight = true,
                SavePurpose::Publish(replies) => self.pending_publishes.extend(replies),
            }
            return;
        }

        let slides = self.revisions.borrow().slides.clone();
        let fingerprint = Fingerprint::of(&slides);
        if matches!(purpose, SavePurpose::Autosave)
            && fingerprint.is_some()
            && fingerprint == self.last_saved
        {
            return;
        }

        let request = DeckSnapshot::new(self.lesson_id.clone(), slides.as_ref().clone());
        let transport = self.transport.clone();
        let handle = tokio::spawn(async move {
            transport
                .replace_deck(request)
                .await
                .and_then(ReplaceResponse::into_result)
        });
        self.in_flight = Some(InFlight {
            handle,
            fingerprint,
            purpose,
            superseded: false,
            started_at: Instant::now(),
        });
    }

    fn finish_save(&mut self, joined: Result<TransportResult<usize>, JoinError>) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        let result = joined.map_err(TransportError::Task).and_then(|saved| saved);
        let duration_ms = flight.started_at.elapsed().as_millis();

        if result.is_ok() && !flight.superseded {
            self.last_saved = flight.fingerprint;
        }

        match (flight.purpose, result) {
            (SavePurpose::Autosave, Ok(success_count)) => {
                info!(
                    "event=deck_autosave module=sync status=ok lesson_id={} created={} duration_ms={}",
                    self.lesson_id, success_count, duration_ms
                );
                self.emit(SchedulerEvent::Saved { success_count });
            }
            (SavePurpose::Autosave, Err(err)) => {
                warn!(
                    "event=deck_autosave module=sync status=error lesson_id={} duration_ms={} error={}",
                    self.lesson_id, duration_ms, err
                );
                self.emit(SchedulerEvent::AutosaveFailed {
                    message: err.to_string(),
                });
            }
            (SavePurpose::Publish(replies), Ok(success_count)) => {
                let notified = self
                    .notifier
                    .as_ref()
                    .is_some_and(|notifier| notifier.notify_reload());
                info!(
                    "event=deck_publish module=sync status=ok lesson_id={} created={} notified={} duration_ms={}",
                    self.lesson_id, success_count, notified, duration_ms
                );
                self.emit(SchedulerEvent::Published {
                    success_count,
                    notified,
                });
                let receipt = PublishReceipt {
                    success_count,
                    notified,
                };
                for reply in replies {
                    let _ = reply.send(Ok(receipt));
                }
            }
            (SavePurpose::Publish(replies), Err(err)) => {
                warn!(
                    "event=deck_publish module=sync status=error lesson_id={} duration_ms={} error={}",
                    self.lesson_id, duration_ms, err
                );
                self.emit(SchedulerEvent::PublishFailed {
                    message: err.to_string(),
                });
                let err = Arc::new(err);
                for reply in replies {
                    let _ = reply.send(Err(PublishError::Persist(err.clone())));
                }
            }
        }

        if !self.pending_publishes.is_empty() {
            // A publish persists the current state, which covers any dirty edit.
            self.dirty_while_in_flight = false;
            let replies = std::mem::take(&mut self.pending_publishes);
            self.start_save(SavePurpose::Publish(replies));
        } else if std::mem::take(&mut self.dirty_while_in_flight) {
            self.start_save(SavePurpose::Autosave);
        }
    }

    /// Finishes in-flight work and flushes an armed timer once.
    async fn drain(&mut self) {
        if self.revisions.has_changed().unwrap_or(false) {
            self.on_revision();
        }
        let armed = self.deadline.take().is_some();
        self.await_in_flight().await;
        if armed {
            self.start_save(SavePurpose::Autosave);
            self.await_in_flight().await;
        }
    }

    async fn await_in_flight(&mut self) {
        while let Some(flight) = self.in_flight.as_mut() {
            let joined = (&mut flight.handle).await;
            self.finish_save(joined);
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscriber is fine; notices are advisory.
        let _ = self.events.send(event);
    }
}

async fn wait_in_flight(
    in_flight: &mut Option<InFlight>,
) -> Result<TransportResult<usize>, JoinError> {
    match in_flight {
        Some(flight) => (&mut flight.handle).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::Fingerprint;
    use crate::model::deck::{Comment, Slide, UserRef};

    #[test]
    fn fingerprint_tracks_content_not_identity() {
        let slide = Slide::new("Intro");
        let same = vec![slide.clone()];
        let mut changed = vec![slide.clone()];
        changed[0]
            .comments
            .push(Comment::new("hi", UserRef::new("U1")));

        assert_eq!(Fingerprint::of(&[slide]), Fingerprint::of(&same));
        assert_ne!(Fingerprint::of(&same), Fingerprint::of(&changed));
    }
}
