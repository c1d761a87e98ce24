//! Realtime channel adapter for deck collaborators.
//!
//! # Responsibility
//! - Join the pub/sub channel derived from the lesson id.
//! - Expose connection status, peer presence and reload signals.
//! - Send best-effort reload notifications after a publish.
//!
//! # Invariants
//! - Status moves `Disconnected -> Connecting -> Connected`, or back to
//!   `Disconnected` when the join fails. There is no automatic retry.
//! - Status is written only by this adapter.
//! - A peer never receives its own reload signal.
//! - Delivery is at-most-once; nothing is acknowledged or replayed.

use crate::sync::scheduler::ReloadNotifier;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;

pub type PeerId = String;

/// Encoded channel frame shared by all receivers.
pub type WireFrame = Arc<String>;

const RELOAD_SIGNAL_CAPACITY: usize = 16;

/// Channel name shared by every collaborator of one lesson.
pub fn channel_name(lesson_id: &str) -> String {
    format!("lesson-deck:{lesson_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Joined,
    Left,
}

/// Messages exchanged on a lesson channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ChannelMessage {
    Presence {
        peer_id: PeerId,
        state: PresenceState,
    },
    Reload {
        peer_id: PeerId,
    },
}

impl ChannelMessage {
    pub fn peer_id(&self) -> &str {
        match self {
            Self::Presence { peer_id, .. } | Self::Reload { peer_id } => peer_id,
        }
    }

    pub fn encode(&self) -> RealtimeResult<WireFrame> {
        Ok(Arc::new(serde_json::to_string(self)?))
    }

    pub fn decode(frame: &str) -> RealtimeResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Another collaborator published; local state should be re-fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSignal {
    pub from: PeerId,
}

#[derive(Debug)]
pub enum RealtimeError {
    JoinRejected { channel: String, reason: String },
    Codec(serde_json::Error),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;

impl Display for RealtimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JoinRejected { channel, reason } => {
                write!(f, "join rejected for channel `{channel}`: {reason}")
            }
            Self::Codec(err) => write!(f, "invalid channel message: {err}"),
        }
    }
}

impl Error for RealtimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            Self::JoinRejected { .. } => None,
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Both directions of a joined channel.
pub struct ChannelLink {
    pub outbound: broadcast::Sender<WireFrame>,
    pub inbound: broadcast::Receiver<WireFrame>,
}

/// Pub/sub backend able to join named channels.
pub trait RealtimeProvider: Send + Sync + 'static {
    fn join(
        &self,
        channel: &str,
        peer_id: &str,
    ) -> impl Future<Output = RealtimeResult<ChannelLink>> + Send;
}

/// In-process provider: one broadcast group per channel name.
#[derive(Clone)]
pub struct LocalBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    rooms: RwLock<HashMap<String, broadcast::Sender<WireFrame>>>,
    capacity: usize,
    reject_joins: AtomicBool,
}

impl LocalBroker {
    /// `capacity` bounds frames buffered per receiver before it lags.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                rooms: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                reject_joins: AtomicBool::new(false),
            }),
        }
    }

    /// Makes every following join fail.
    pub fn set_reject_joins(&self, reject: bool) {
        self.inner.reject_joins.store(reject, Ordering::SeqCst);
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    /// Number of live receivers on a channel.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(channel)
            .map_or(0, |room| room.receiver_count())
    }
}

impl BrokerInner {
    async fn get_or_create(&self, channel: &str) -> broadcast::Sender<WireFrame> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(channel) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Another join may have created the room meanwhile.
        if let Some(room) = rooms.get(channel) {
            return room.clone();
        }
        let (sender, _) = broadcast::channel(self.capacity);
        rooms.insert(channel.to_string(), sender.clone());
        sender
    }
}

impl RealtimeProvider for LocalBroker {
    fn join(
        &self,
        channel: &str,
        peer_id: &str,
    ) -> impl Future<Output = RealtimeResult<ChannelLink>> + Send {
        let inner = self.inner.clone();
        let channel = channel.to_string();
        let peer_id = peer_id.to_string();
        async move {
            if inner.reject_joins.load(Ordering::SeqCst) {
                return Err(RealtimeError::JoinRejected {
                    channel,
                    reason: "broker unavailable".to_string(),
                });
            }
            let outbound = inner.get_or_create(&channel).await;
            let inbound = outbound.subscribe();
            debug!("event=realtime_join module=sync status=ok channel={channel} peer_id={peer_id}");
            Ok(ChannelLink { outbound, inbound })
        }
    }
}

/// One collaborator's membership in a lesson channel.
pub struct RealtimeChannel {
    channel: String,
    peer_id: PeerId,
    status: Arc<watch::Sender<ConnectionStatus>>,
    reloads: broadcast::Sender<ReloadSignal>,
    presence: Arc<RwLock<BTreeSet<PeerId>>>,
    link: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    outbound: Option<broadcast::Sender<WireFrame>>,
    pump: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    pub fn new(lesson_id: &str, peer_id: impl Into<PeerId>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (reloads, _) = broadcast::channel(RELOAD_SIGNAL_CAPACITY);
        Self {
            channel: channel_name(lesson_id),
            peer_id: peer_id.into(),
            status: Arc::new(status),
            reloads,
            presence: Arc::new(RwLock::new(BTreeSet::new())),
            link: Mutex::new(LinkState::default()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Reload signals sent by other peers.
    pub fn reload_signals(&self) -> broadcast::Receiver<ReloadSignal> {
        self.reloads.subscribe()
    }

    /// Other peers currently known to be joined.
    pub async fn presence(&self) -> Vec<PeerId> {
        self.presence.read().await.iter().cloned().collect()
    }

    /// Joins the lesson channel. Only a `Disconnected` channel attempts a
    /// join; a failed join returns to `Disconnected` and is not retried.
    pub async fn connect<P: RealtimeProvider>(&self, provider: &P) -> RealtimeResult<()> {
        let claimed = self.status.send_if_modified(|status| {
            if *status == ConnectionStatus::Disconnected {
                *status = ConnectionStatus::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Ok(());
        }

        let ChannelLink { outbound, inbound } =
            match provider.join(&self.channel, &self.peer_id).await {
                Ok(link) => link,
                Err(err) => {
                    self.status.send_replace(ConnectionStatus::Disconnected);
                    warn!(
                        "event=realtime_connect module=sync status=error channel={} peer_id={} error={}",
                        self.channel, self.peer_id, err
                    );
                    return Err(err);
                }
            };

        let pump = InboundPump {
            peer_id: self.peer_id.clone(),
            channel: self.channel.clone(),
            outbound: outbound.clone(),
            status: self.status.clone(),
            reloads: self.reloads.clone(),
            presence: self.presence.clone(),
        };
        {
            let mut link = self.lock_link();
            link.pump = Some(tokio::spawn(pump.run(inbound)));
            link.outbound = Some(outbound);
        }
        self.status.send_replace(ConnectionStatus::Connected);
        info!(
            "event=realtime_connect module=sync status=ok channel={} peer_id={}",
            self.channel, self.peer_id
        );

        self.send(&ChannelMessage::Presence {
            peer_id: self.peer_id.clone(),
            state: PresenceState::Joined,
        });
        Ok(())
    }

    /// Asks other peers to re-fetch the deck. Best-effort: returns `false`
    /// when not connected or the frame could not be handed to the channel.
    pub fn notify_reload(&self) -> bool {
        if self.status() != ConnectionStatus::Connected {
            debug!(
                "event=realtime_notify module=sync status=skip channel={} reason=not_connected",
                self.channel
            );
            return false;
        }
        self.send(&ChannelMessage::Reload {
            peer_id: self.peer_id.clone(),
        })
    }

    /// Leaves the channel and announces it to the remaining peers.
    pub async fn disconnect(&self) {
        self.send(&ChannelMessage::Presence {
            peer_id: self.peer_id.clone(),
            state: PresenceState::Left,
        });
        let pump = {
            let mut link = self.lock_link();
            link.outbound = None;
            link.pump.take()
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        self.presence.write().await.clear();
        self.status.send_replace(ConnectionStatus::Disconnected);
        info!(
            "event=realtime_disconnect module=sync status=ok channel={} peer_id={}",
            self.channel, self.peer_id
        );
    }

    fn send(&self, message: &ChannelMessage) -> bool {
        let outbound = self.lock_link().outbound.clone();
        match outbound {
            Some(outbound) => send_frame(&outbound, &self.channel, message),
            None => false,
        }
    }

    fn lock_link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReloadNotifier for RealtimeChannel {
    fn notify_reload(&self) -> bool {
        RealtimeChannel::notify_reload(self)
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.lock_link().pump.take() {
            pump.abort();
        }
    }
}

fn send_frame(
    outbound: &broadcast::Sender<WireFrame>,
    channel: &str,
    message: &ChannelMessage,
) -> bool {
    let frame = match message.encode() {
        Ok(frame) => frame,
        Err(err) => {
            warn!("event=realtime_send module=sync status=error channel={channel} error={err}");
            return false;
        }
    };
    match outbound.send(frame) {
        Ok(receivers) => {
            debug!("event=realtime_send module=sync status=ok channel={channel} receivers={receivers}");
            true
        }
        Err(_) => {
            debug!("event=realtime_send module=sync status=skip channel={channel} reason=no_receivers");
            false
        }
    }
}

/// Background task decoding inbound frames for one channel member.
struct InboundPump {
    peer_id: PeerId,
    channel: String,
    outbound: broadcast::Sender<WireFrame>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    reloads: broadcast::Sender<ReloadSignal>,
    presence: Arc<RwLock<BTreeSet<PeerId>>>,
}

impl InboundPump {
    async fn run(self, mut inbound: broadcast::Receiver<WireFrame>) {
        loop {
            match inbound.recv().await {
                Ok(frame) => self.handle_frame(&frame).await,
                Err(RecvError::Lagged(skipped)) => warn!(
                    "event=realtime_recv module=sync status=lagged channel={} skipped={}",
                    self.channel, skipped
                ),
                Err(RecvError::Closed) => {
                    self.status.send_replace(ConnectionStatus::Disconnected);
                    warn!(
                        "event=realtime_recv module=sync status=closed channel={}",
                        self.channel
                    );
                    break;
                }
            }
        }
    }

    async fn handle_frame(&self, frame: &str) {
        let message = match ChannelMessage::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    "event=realtime_recv module=sync status=error channel={} error={}",
                    self.channel, err
                );
                return;
            }
        };
        if message.peer_id() == self.peer_id {
            return;
        }

        match message {
            ChannelMessage::Presence {
                peer_id,
                state: PresenceState::Joined,
            } => {
                let newly_seen = self.presence.write().await.insert(peer_id);
                // Answer newcomers so they learn about this peer too.
                if newly_seen {
                    send_frame(
                        &self.outbound,
                        &self.channel,
                        &ChannelMessage::Presence {
                            peer_id: self.peer_id.clone(),
                            state: PresenceState::Joined,
                        },
                    );
                }
            }
            ChannelMessage::Presence {
                peer_id,
                state: PresenceState::Left,
            } => {
                self.presence.write().await.remove(&peer_id);
            }
            ChannelMessage::Reload { peer_id } => {
                info!(
                    "event=realtime_reload module=sync status=ok channel={} from={}",
                    self.channel, peer_id
                );
                // No subscriber simply means nobody is mounted to reload.
                let _ = self.reloads.send(ReloadSignal { from: peer_id });
            }
        }
    }
}
