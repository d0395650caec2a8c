use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::MeetingSnapshot;
use crate::auth::meeting_channel_url;
use crate::backoff::{BackoffOptions, BackoffPolicy};
use crate::errors::MeetError;
use crate::events::{ConnectionState, EventEmitter, MeetEvent, MeetEventListener};
use crate::protocol::{HEARTBEAT_FRAME, Participant, ParticipantEvent};
use crate::roster::{RosterRegistry, SharedRoster};
use crate::transport::{Transport, TransportEvent};

const ERR_AUTH_CONNECT: &str = "Authentication required - please log in to connect to the meeting";
const ERR_AUTH_EXPIRED: &str = "Connection closed - authentication may have expired";
const ERR_AUTH_REQUIRED: &str = "Authentication required";
const ERR_CONNECTION_FAILED: &str =
    "Connection failed - check your internet connection and backend WebSocket endpoint";
const ERR_CONNECTION_LOST: &str = "Connection lost - attempting to reconnect...";
const ERR_BAD_FRAME: &str = "Invalid message format received";

/// Configuration for one meeting connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// HTTP backend base URL; the channel URL is derived from it.
    pub backend_url: String,
    /// Keep-alive interval while connected.
    pub heartbeat_interval: Duration,
    pub backoff: BackoffOptions,
}

impl ConnectionConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            heartbeat_interval: Duration::from_secs(30),
            backoff: BackoffOptions::default(),
        }
    }
}

enum Command {
    Reopen,
    SwitchRoom(String),
    Shutdown,
}

/// Manages the lifecycle of the per-room presence channel.
///
/// Owns one channel and one backoff policy, watches the auth gate, feeds
/// inbound participant events into the per-room roster, and reconnects with
/// exponential backoff on transport failure. Clean closes and authentication
/// loss do not trigger retries.
pub struct MeetingConnection {
    inner: Arc<Inner>,
    command_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

struct Inner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<RosterRegistry>,
    auth: watch::Receiver<bool>,
    room_id: Mutex<String>,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    backoff: Mutex<BackoffPolicy>,
    emitter: EventEmitter,
    commands: mpsc::UnboundedSender<Command>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    // Bumped whenever the current channel is torn down; pump and heartbeat
    // tasks carry the epoch they were spawned under and stop when it moves.
    link_epoch: AtomicU64,
    link_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MeetingConnection {
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        auth: watch::Receiver<bool>,
        registry: Arc<RosterRegistry>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let backoff = BackoffPolicy::new(config.backoff);
        let inner = Arc::new(Inner {
            config,
            transport,
            registry,
            auth,
            room_id: Mutex::new(String::new()),
            state: Mutex::new(ConnectionState::Disconnected),
            last_error: Mutex::new(None),
            backoff: Mutex::new(backoff),
            emitter: EventEmitter::new(),
            commands: command_tx,
            outbound: Mutex::new(None),
            link_epoch: AtomicU64::new(0),
            link_tasks: std::sync::Mutex::new(Vec::new()),
        });
        Self {
            inner,
            command_rx: std::sync::Mutex::new(Some(command_rx)),
        }
    }

    /// Register a listener for connection and roster events.
    pub fn add_listener(&self, listener: Arc<dyn MeetEventListener>) {
        self.inner.emitter.add_listener(listener);
    }

    /// Start driving the channel for `room_id`.
    ///
    /// The first call spawns the supervisor loop; later calls with a
    /// different room perform a forced room switch. An empty room id is a
    /// construction-time precondition failure and the only error this API
    /// surfaces as `Err`.
    pub async fn connect(&self, room_id: &str) -> Result<(), MeetError> {
        if room_id.is_empty() {
            return Err(MeetError::InvalidEnvironment(
                "no room id resolvable".to_string(),
            ));
        }

        let receiver = self.command_rx.lock().unwrap().take();
        match receiver {
            Some(command_rx) => {
                *self.inner.room_id.lock().await = room_id.to_string();
                let inner = self.inner.clone();
                let auth = inner.auth.clone();
                tokio::spawn(async move {
                    run(inner, command_rx, auth).await;
                });
            }
            None => {
                let _ = self
                    .inner
                    .commands
                    .send(Command::SwitchRoom(room_id.to_string()));
            }
        }
        Ok(())
    }

    /// Close the channel and stop the supervisor. Terminal for this instance.
    pub fn close(&self) {
        let _ = self.inner.commands.send(Command::Shutdown);
    }

    /// Send an application text frame. Returns whether the channel accepted it.
    pub async fn send(&self, text: &str) -> bool {
        match self.inner.outbound.lock().await.as_ref() {
            Some(tx) => tx.send(text.to_string()).is_ok(),
            None => false,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.lock().await
    }

    /// Last surfaced error string, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().await.clone()
    }

    pub async fn reconnect_attempt(&self) -> u32 {
        self.inner.backoff.lock().await.attempt_count()
    }

    /// Current room's participants in join order.
    pub async fn participants(&self) -> Vec<Participant> {
        let room_id = self.inner.room_id.lock().await.clone();
        if room_id.is_empty() {
            return Vec::new();
        }
        let roster = self.inner.registry.get_or_create(&room_id);
        let roster = roster.lock().await;
        roster.sorted_participants()
    }

    pub async fn participant_count(&self) -> usize {
        let room_id = self.inner.room_id.lock().await.clone();
        if room_id.is_empty() {
            return 0;
        }
        let roster = self.inner.registry.get_or_create(&room_id);
        let count = roster.lock().await.count();
        count
    }

    /// Seed the current room's roster from a REST meeting snapshot.
    ///
    /// Ignored once live events have arrived; returns whether it applied.
    pub async fn seed_from_meeting(&self, snapshot: &MeetingSnapshot) -> bool {
        let room_id = self.inner.room_id.lock().await.clone();
        if room_id.is_empty() {
            return false;
        }
        let roster = self.inner.registry.get_or_create(&room_id);
        let applied = roster.lock().await.seed_from_snapshot(snapshot);
        applied
    }
}

impl Drop for MeetingConnection {
    fn drop(&mut self) {
        let _ = self.inner.commands.send(Command::Shutdown);
    }
}

/// Supervisor loop: reacts to commands (retry timer, room switch, shutdown)
/// and auth gate transitions, one event at a time.
async fn run(
    inner: Arc<Inner>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut auth: watch::Receiver<bool>,
) {
    if *auth.borrow_and_update() {
        inner.open_channel().await;
    } else {
        inner.set_state(ConnectionState::Disconnected).await;
        inner.surface_error(ERR_AUTH_CONNECT).await;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Shutdown) => {
                    inner.teardown().await;
                    break;
                }
                Some(Command::Reopen) => {
                    // A timer that fired just before a successful open must
                    // not knock over the live channel.
                    if *inner.state.lock().await == ConnectionState::Connected {
                        continue;
                    }
                    if *auth.borrow() {
                        inner.open_channel().await;
                    }
                }
                Some(Command::SwitchRoom(room_id)) => {
                    inner.switch_room(room_id).await;
                }
            },
            changed = auth.changed() => {
                if changed.is_err() {
                    inner.teardown().await;
                    break;
                }
                if *auth.borrow_and_update() {
                    inner.clear_error().await;
                    inner.open_channel().await;
                } else {
                    inner.force_disconnect().await;
                }
            }
        }
    }

    tracing::debug!("meeting connection supervisor ended");
}

impl Inner {
    async fn open_channel(self: &Arc<Self>) {
        self.drop_link().await;

        let room_id = self.room_id.lock().await.clone();
        let url = meeting_channel_url(&self.config.backend_url, &room_id);

        self.set_state(ConnectionState::Connecting).await;
        tracing::info!("opening meeting channel: {url}");

        match self.transport.connect(&url).await {
            Ok(link) => {
                *self.outbound.lock().await = Some(link.outbound);
                self.backoff.lock().await.reset();
                self.clear_error().await;
                self.set_state(ConnectionState::Connected).await;

                let epoch = self.link_epoch.load(Ordering::SeqCst);
                let roster = self.registry.get_or_create(&room_id);
                let pump = tokio::spawn(pump(self.clone(), link.events, epoch, roster));
                let heartbeat = tokio::spawn(heartbeat(self.clone(), epoch));
                let mut tasks = self.link_tasks.lock().unwrap();
                tasks.push(pump);
                tasks.push(heartbeat);
            }
            Err(e) => {
                tracing::warn!("channel open failed: {e}");
                self.handle_channel_failure(ERR_CONNECTION_FAILED).await;
            }
        }
    }

    /// Transport error or unclean close: surface an error and arm the retry
    /// timer, unless one is already pending or we are unauthenticated.
    async fn handle_channel_failure(self: &Arc<Self>, message: &str) {
        self.set_state(ConnectionState::Error).await;

        let authenticated = *self.auth.borrow();
        if !authenticated {
            let auth_message = if message == ERR_CONNECTION_LOST {
                ERR_AUTH_EXPIRED
            } else {
                ERR_AUTH_CONNECT
            };
            self.surface_error(auth_message).await;
            return;
        }
        self.surface_error(message).await;

        let mut backoff = self.backoff.lock().await;
        if backoff.is_armed() {
            return;
        }
        let commands = self.commands.clone();
        let scheduled = backoff.schedule_retry(move || {
            let _ = commands.send(Command::Reopen);
        });
        if !scheduled {
            tracing::warn!(
                attempts = backoff.attempt_count(),
                "retry budget exhausted, giving up"
            );
        }
    }

    async fn switch_room(self: &Arc<Self>, room_id: String) {
        let old = {
            let mut current = self.room_id.lock().await;
            std::mem::replace(&mut *current, room_id.clone())
        };
        if old == room_id {
            return;
        }
        tracing::info!("switching room: {old} -> {room_id}");

        self.backoff.lock().await.reset();
        self.clear_error().await;
        // Invalidate the old link before disposing its roster so a stale
        // pump cannot apply old-room frames to the new room.
        self.drop_link().await;
        self.registry.dispose(&old);

        // The channel is only ever opened while authenticated; with the gate
        // down the new room waits for the auth watch to flip it back up.
        if !*self.auth.borrow() {
            self.set_state(ConnectionState::Disconnected).await;
            self.surface_error(ERR_AUTH_CONNECT).await;
            return;
        }
        self.open_channel().await;
    }

    /// Auth gate flipped false: close the channel, no retries until it flips
    /// back.
    async fn force_disconnect(self: &Arc<Self>) {
        self.backoff.lock().await.reset();
        self.drop_link().await;
        self.set_state(ConnectionState::Disconnected).await;
        self.surface_error(ERR_AUTH_REQUIRED).await;
    }

    async fn teardown(self: &Arc<Self>) {
        self.backoff.lock().await.reset();
        self.drop_link().await;
        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Invalidate the current channel: stale pump/heartbeat tasks stop, the
    /// outbound sender drops (closing the socket on the transport side).
    async fn drop_link(&self) {
        self.link_epoch.fetch_add(1, Ordering::SeqCst);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.link_tasks.lock().unwrap();
            guard.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
        self.outbound.lock().await.take();
    }

    /// Dispatch one inbound frame to the roster its link was opened for.
    ///
    /// The roster is the one captured when the link was spawned, and the
    /// epoch is re-checked under the roster lock, so a frame that raced a
    /// room switch can never land in the new room's roster.
    async fn handle_frame(self: &Arc<Self>, text: &str, roster: &SharedRoster, epoch: u64) {
        let event: ParticipantEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                if self.link_epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                let err = MeetError::MalformedMessage(e.to_string());
                tracing::warn!("{err}");
                self.surface_error(ERR_BAD_FRAME).await;
                return;
            }
        };

        let count = {
            let mut roster = roster.lock().await;
            if self.link_epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            roster.apply_event(event.clone());
            roster.count()
        };

        match event {
            ParticipantEvent::Joined { participant } => {
                self.emitter.emit(MeetEvent::ParticipantJoined(participant));
            }
            ParticipantEvent::Left { participant_id } => {
                self.emitter.emit(MeetEvent::ParticipantLeft(participant_id));
            }
            ParticipantEvent::StateSync { .. } => {
                // A full sync means we are in step with the server again.
                self.clear_error().await;
                self.emitter.emit(MeetEvent::RosterSynced(count));
            }
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock().await;
        if *current == state {
            return;
        }
        *current = state;
        drop(current);
        self.emitter.emit(MeetEvent::ConnectionStateChanged(state));
    }

    async fn surface_error(&self, message: &str) {
        let mut error = self.last_error.lock().await;
        if error.as_deref() == Some(message) {
            return;
        }
        *error = Some(message.to_string());
        drop(error);
        self.emitter
            .emit(MeetEvent::ErrorChanged(Some(message.to_string())));
    }

    async fn clear_error(&self) {
        let mut error = self.last_error.lock().await;
        if error.is_none() {
            return;
        }
        *error = None;
        drop(error);
        self.emitter.emit(MeetEvent::ErrorChanged(None));
    }
}

/// Per-channel event pump. Dispatches frames to the roster and turns channel
/// death into the matching state transition.
async fn pump(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    epoch: u64,
    roster: SharedRoster,
) {
    while let Some(event) = events.recv().await {
        if inner.link_epoch.load(Ordering::SeqCst) != epoch {
            break;
        }
        match event {
            TransportEvent::Message(text) => {
                inner.handle_frame(&text, &roster, epoch).await;
            }
            TransportEvent::Closed { clean: true } => {
                tracing::info!("meeting channel closed cleanly");
                inner.outbound.lock().await.take();
                inner.set_state(ConnectionState::Disconnected).await;
                break;
            }
            TransportEvent::Closed { clean: false } => {
                tracing::warn!("meeting channel closed uncleanly");
                inner.outbound.lock().await.take();
                inner.handle_channel_failure(ERR_CONNECTION_LOST).await;
                break;
            }
            TransportEvent::Error(e) => {
                tracing::warn!("meeting channel error: {e}");
                inner.outbound.lock().await.take();
                inner.handle_channel_failure(ERR_CONNECTION_FAILED).await;
                break;
            }
        }
    }
}

/// Sends the keep-alive frame on a fixed interval while the channel is up.
async fn heartbeat(inner: Arc<Inner>, epoch: u64) {
    let mut interval = tokio::time::interval(inner.config.heartbeat_interval);
    interval.tick().await; // immediate first tick
    loop {
        interval.tick().await;
        if inner.link_epoch.load(Ordering::SeqCst) != epoch {
            break;
        }
        let outbound = inner.outbound.lock().await;
        match outbound.as_ref() {
            Some(tx) => {
                if tx.send(HEARTBEAT_FRAME.to_string()).is_err() {
                    break;
                }
            }
            None => break,
        }
    }
}
