//! Connection lifecycle controller.
//!
//! All state lives in a single tokio task. Public methods, signaling
//! callbacks and timers only post [`Command`]s to its queue, so every
//! transition happens in one serialized context and no call ever waits on
//! the signaling client.
//!
//! ```text
//!            toggle                 connect ok
//!   Idle ───────────▶ Connecting ───────────────▶ Connected
//!    ▲                   │  error / timeout           │ toggle
//!    │◀──────────────────┘                            ▼
//!    │◀──────── remote disconnect / timeout ──── Disconnecting
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::errors::{SignalingError, SoraError};
use crate::events::{ConnectionState, EventEmitter, SoraEvent, SoraEventListener};
use crate::settings::{Configuration, Settings};
use crate::signaling::{
    ConnectCompletion, ConnectionTask, MediaChannel, MediaChannelHandlers, MediaStream,
    SignalingClient,
};
use crate::streams::StreamRouter;
use crate::timer::{Phase, PhaseTimers};

/// Identifies one connect attempt and everything it spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0.simple())
    }
}

/// Messages processed by the controller task.
pub(crate) enum Command {
    Toggle,
    Connect,
    Disconnect,
    UpdateSettings(Settings),
    ConnectResult {
        attempt: AttemptId,
        result: Result<Option<Arc<dyn MediaChannel>>, SignalingError>,
    },
    RemoteDisconnect {
        attempt: AttemptId,
        error: Option<SignalingError>,
    },
    StreamAdded {
        attempt: AttemptId,
        stream: Arc<dyn MediaStream>,
    },
    StreamRemoved {
        attempt: AttemptId,
        stream_id: String,
    },
    Timeout {
        phase: Phase,
        attempt: AttemptId,
    },
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

/// Point-in-time view of the controller, taken inside the serialized task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub attempt: Option<AttemptId>,
    pub has_channel: bool,
    pub has_pending_operation: bool,
    pub connect_timer_armed: bool,
    pub disconnect_timer_armed: bool,
    pub superseded_timers: u64,
    pub sender_stream: Option<String>,
    pub receiver_stream: Option<String>,
}

/// Handle to a running controller. Dropping it shuts the controller down.
pub struct ConnectionController {
    tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    emitter: EventEmitter,
}

impl ConnectionController {
    /// Start a controller on the current tokio runtime.
    pub fn new(client: Arc<dyn SignalingClient>, settings: Settings) -> Self {
        Self::spawn_on(&Handle::current(), client, settings)
    }

    /// Start a controller on an explicit runtime, for callers that are not
    /// themselves running inside tokio (FFI hosts).
    pub fn spawn_on(handle: &Handle, client: Arc<dyn SignalingClient>, settings: Settings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let emitter = EventEmitter::new();

        let task = ControllerTask {
            client,
            settings,
            state: ConnectionState::Idle,
            session: None,
            timers: PhaseTimers::new(tx.clone()),
            tx: tx.clone(),
            state_tx,
            emitter: emitter.clone(),
        };
        // Timers are spawned from inside the task and share its runtime.
        handle.spawn(task.run(rx));

        Self {
            tx,
            state_rx,
            emitter,
        }
    }

    /// Single-button action: connect when idle, disconnect when connected,
    /// ignored while a transition is in flight.
    pub fn toggle(&self) -> Result<(), SoraError> {
        self.send(Command::Toggle)
    }

    /// Connect if idle; ignored in any other state.
    pub fn connect(&self) -> Result<(), SoraError> {
        self.send(Command::Connect)
    }

    /// Disconnect if connected; ignored in any other state.
    pub fn disconnect(&self) -> Result<(), SoraError> {
        self.send(Command::Disconnect)
    }

    /// Replace the settings used by the next connect attempt.
    pub fn update_settings(&self, settings: Settings) -> Result<(), SoraError> {
        self.send(Command::UpdateSettings(settings))
    }

    /// Latest published state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the controller reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), SoraError> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| SoraError::Closed)
    }

    /// Snapshot taken after every command sent so far has been processed.
    pub async fn snapshot(&self) -> Result<Snapshot, SoraError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| SoraError::Closed)
    }

    /// Register a listener for state changes, surfaced errors and stream
    /// attachments.
    pub fn add_listener(&self, listener: Arc<dyn SoraEventListener>) {
        self.emitter.add_listener(listener);
    }

    /// Tear down any attempt or connection and stop the controller task.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    /// Resolves once the controller task has exited. Owns what it needs, so
    /// it can be driven from another thread.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = self.tx.clone();
        async move { tx.closed().await }
    }

    fn send(&self, command: Command) -> Result<(), SoraError> {
        self.tx.send(command).map_err(|_| SoraError::Closed)
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// In-flight request of a session.
enum Attempt {
    Pending(Box<dyn ConnectionTask>),
    Succeeded(Arc<dyn MediaChannel>),
}

/// Everything owned on behalf of one connect attempt.
struct Session {
    id: AttemptId,
    configuration: Configuration,
    attempt: Attempt,
    streams: StreamRouter,
}

impl Session {
    fn channel(&self) -> Option<&Arc<dyn MediaChannel>> {
        match &self.attempt {
            Attempt::Succeeded(channel) => Some(channel),
            Attempt::Pending(_) => None,
        }
    }
}

struct ControllerTask {
    client: Arc<dyn SignalingClient>,
    settings: Settings,
    state: ConnectionState,
    session: Option<Session>,
    timers: PhaseTimers,
    tx: mpsc::UnboundedSender<Command>,
    state_tx: watch::Sender<ConnectionState>,
    emitter: EventEmitter,
}

impl ControllerTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Toggle => match self.state {
                    ConnectionState::Idle => self.start_connect(),
                    ConnectionState::Connected => self.start_disconnect(),
                    state => tracing::debug!("toggle ignored while {state:?}"),
                },
                Command::Connect => match self.state {
                    ConnectionState::Idle => self.start_connect(),
                    state => tracing::debug!("connect ignored while {state:?}"),
                },
                Command::Disconnect => match self.state {
                    ConnectionState::Connected => self.start_disconnect(),
                    state => tracing::debug!("disconnect ignored while {state:?}"),
                },
                Command::UpdateSettings(settings) => {
                    tracing::debug!("settings updated");
                    self.settings = settings;
                }
                Command::ConnectResult { attempt, result } => {
                    self.on_connect_result(attempt, result)
                }
                Command::RemoteDisconnect { attempt, error } => {
                    self.on_remote_disconnect(attempt, error)
                }
                Command::StreamAdded { attempt, stream } => self.on_stream_added(attempt, stream),
                Command::StreamRemoved { attempt, stream_id } => {
                    self.on_stream_removed(attempt, &stream_id)
                }
                Command::Timeout { phase, attempt } => self.on_timeout(phase, attempt),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown => {
                    self.shutdown();
                    break;
                }
            }
            self.check_invariants();
        }
        tracing::info!("connection controller stopped");
    }

    fn start_connect(&mut self) {
        let configuration = match self.settings.to_configuration() {
            Ok(configuration) => configuration,
            Err(e) => {
                self.surface(e);
                return;
            }
        };

        let attempt = AttemptId::new();
        tracing::info!(
            "{attempt}: connecting to channel {} via {} URL(s)",
            configuration.channel_id,
            configuration.signaling_urls.len()
        );
        self.set_state(ConnectionState::Connecting);

        let handlers = MediaChannelHandlers::new(attempt, self.tx.clone());
        let completion = ConnectCompletion::new(attempt, self.tx.clone());
        let task = self.client.connect(&configuration, handlers, completion);

        self.timers
            .arm(Phase::Connect, attempt, configuration.connect_timeout);
        let streams = StreamRouter::new(configuration.publisher_stream_id.clone());
        self.session = Some(Session {
            id: attempt,
            configuration,
            attempt: Attempt::Pending(task),
            streams,
        });
    }

    fn start_disconnect(&mut self) {
        let Some(session) = &self.session else {
            tracing::warn!("connected without a session, resetting");
            self.set_state(ConnectionState::Idle);
            return;
        };
        let Some(channel) = session.channel() else {
            tracing::warn!("{}: connected without a channel, resetting", session.id);
            self.release_session();
            self.set_state(ConnectionState::Idle);
            return;
        };

        tracing::info!("{}: disconnecting", session.id);
        channel.disconnect(None);
        let (attempt, timeout) = (session.id, session.configuration.disconnect_timeout);
        self.set_state(ConnectionState::Disconnecting);
        self.timers.arm(Phase::Disconnect, attempt, timeout);
    }

    fn on_connect_result(
        &mut self,
        attempt: AttemptId,
        result: Result<Option<Arc<dyn MediaChannel>>, SignalingError>,
    ) {
        let current = self.state == ConnectionState::Connecting
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.id == attempt && matches!(s.attempt, Attempt::Pending(_)));
        if !current {
            match result {
                Ok(Some(channel)) => {
                    tracing::warn!("{attempt}: late connect result, closing its channel");
                    channel.disconnect(None);
                }
                _ => tracing::debug!("{attempt}: stale connect result discarded"),
            }
            return;
        }

        self.timers.cancel(Phase::Connect);
        let Some(mut session) = self.session.take() else {
            return;
        };

        match result {
            Err(e) => {
                session.streams.detach_all(&self.emitter);
                self.set_state(ConnectionState::Idle);
                self.surface(SoraError::from(e));
            }
            Ok(None) => {
                session.streams.detach_all(&self.emitter);
                self.set_state(ConnectionState::Idle);
                self.surface(SoraError::MissingChannel);
            }
            Ok(Some(channel)) => {
                tracing::info!(
                    "{attempt}: connected (connection id {})",
                    channel.connection_id().as_deref().unwrap_or("unknown")
                );
                if let Some(stream) = channel.sender_stream() {
                    session.streams.attach_sender(stream, &self.emitter);
                }
                session.attempt = Attempt::Succeeded(channel);
                self.session = Some(session);
                self.set_state(ConnectionState::Connected);
            }
        }
    }

    fn on_remote_disconnect(&mut self, attempt: AttemptId, error: Option<SignalingError>) {
        match self.state {
            ConnectionState::Idle | ConnectionState::Connecting => {
                tracing::debug!("{attempt}: disconnect notification ignored while {:?}", self.state);
                return;
            }
            ConnectionState::Connected | ConnectionState::Disconnecting => {}
        }
        if self.session.as_ref().map(|s| s.id) != Some(attempt) {
            tracing::debug!("{attempt}: disconnect notification for a previous attempt");
            return;
        }

        tracing::info!("{attempt}: disconnected");
        self.timers.cancel_all();
        self.release_session();
        self.set_state(ConnectionState::Idle);
        if let Some(e) = error {
            self.surface(SoraError::RemoteDisconnect(e.message));
        }
    }

    fn on_stream_added(&mut self, attempt: AttemptId, stream: Arc<dyn MediaStream>) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::debug!("{attempt}: stream added while {:?}, ignored", self.state);
            return;
        }
        match self.session.as_mut() {
            Some(session) if session.id == attempt => {
                session.streams.add(stream, &self.emitter);
            }
            _ => tracing::debug!("{attempt}: stream added for a previous attempt"),
        }
    }

    fn on_stream_removed(&mut self, attempt: AttemptId, stream_id: &str) {
        if let Some(session) = self.session.as_mut().filter(|s| s.id == attempt) {
            session.streams.remove(stream_id, &self.emitter);
        }
    }

    fn on_timeout(&mut self, phase: Phase, attempt: AttemptId) {
        if !self.timers.fired(phase, attempt) {
            tracing::debug!("{attempt}: {phase:?} timer already cancelled");
            return;
        }
        match phase {
            Phase::Connect => self.on_connect_timeout(attempt),
            Phase::Disconnect => self.on_disconnect_timeout(attempt),
        }
    }

    fn on_connect_timeout(&mut self, attempt: AttemptId) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };
        tracing::warn!("{attempt}: connect timed out");

        // State and references go first: a result triggered by `cancel`
        // must find the controller idle and be treated as stale.
        session.streams.detach_all(&self.emitter);
        self.set_state(ConnectionState::Idle);
        if let Attempt::Pending(task) = session.attempt {
            task.cancel();
        }
        self.surface(SoraError::ConnectTimeout(session.configuration.connect_timeout));
    }

    fn on_disconnect_timeout(&mut self, attempt: AttemptId) {
        if self.state != ConnectionState::Disconnecting {
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };
        tracing::warn!("{attempt}: no disconnect notification, forcing idle");

        session.streams.detach_all(&self.emitter);
        self.set_state(ConnectionState::Idle);
        self.surface(SoraError::DisconnectTimeout(
            session.configuration.disconnect_timeout,
        ));
    }

    fn shutdown(&mut self) {
        self.timers.cancel_all();
        if let Some(mut session) = self.session.take() {
            tracing::info!("{}: shutting down", session.id);
            session.streams.detach_all(&self.emitter);
            match session.attempt {
                Attempt::Pending(task) => task.cancel(),
                Attempt::Succeeded(channel) => {
                    if self.state == ConnectionState::Connected {
                        channel.disconnect(None);
                    }
                }
            }
        }
        self.set_state(ConnectionState::Idle);
    }

    /// Drop the session and detach its streams without touching the
    /// signaling client.
    fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.streams.detach_all(&self.emitter);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::info!("connection state {:?} -> {state:?}", self.state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.emitter.emit(SoraEvent::ConnectionStateChanged(state));
    }

    fn surface(&self, error: SoraError) {
        tracing::warn!("{error}");
        self.emitter.emit(SoraEvent::ErrorSurfaced(error));
    }

    fn snapshot(&self) -> Snapshot {
        let session = self.session.as_ref();
        Snapshot {
            state: self.state,
            attempt: session.map(|s| s.id),
            has_channel: session.is_some_and(|s| s.channel().is_some()),
            has_pending_operation: session
                .is_some_and(|s| matches!(s.attempt, Attempt::Pending(_))),
            connect_timer_armed: self.timers.is_armed(Phase::Connect),
            disconnect_timer_armed: self.timers.is_armed(Phase::Disconnect),
            superseded_timers: self.timers.superseded(),
            sender_stream: session.and_then(|s| s.streams.sender_id()),
            receiver_stream: session.and_then(|s| s.streams.receiver_id()),
        }
    }

    fn check_invariants(&self) {
        match self.state {
            ConnectionState::Idle => {
                debug_assert!(self.session.is_none(), "idle with a live session");
                debug_assert!(
                    !self.timers.is_armed(Phase::Connect)
                        && !self.timers.is_armed(Phase::Disconnect),
                    "idle with an armed timer"
                );
            }
            ConnectionState::Connecting => {
                debug_assert!(
                    self.session
                        .as_ref()
                        .is_some_and(|s| matches!(s.attempt, Attempt::Pending(_))),
                    "connecting without a pending operation"
                );
            }
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                debug_assert!(
                    self.session.as_ref().is_some_and(|s| s.channel().is_some()),
                    "{:?} without a channel",
                    self.state
                );
            }
        }
    }
}
