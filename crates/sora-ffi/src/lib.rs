//! UniFFI bindings for sora-core.
//!
//! Provides a SoraClient object that wraps the connection controller and
//! the settings store into a single FFI-safe interface. The host plugs the
//! Sora SDK in through the `SignalingBridge` callback interface and reports
//! SDK callbacks back with the `report_*` methods.

mod bridge;

use std::sync::Arc;

use sora_core::{
    ConnectionState as CoreConnectionState, RenderSlot as CoreRenderSlot, Role as CoreRole,
    SoraEvent as CoreSoraEvent,
};

use crate::bridge::BridgeSignaling;

uniffi::include_scaffolding!("sora");

// ── Namespace functions ──────────────────────────────────────────────

const DEFAULT_LOG_FILTER: &str = "sora_core=debug,sora_ffi=debug";

/// Initialize tracing/logging. Only the first call takes effect.
///
/// `RUST_LOG` wins over `filter`; hosts normally pass the `log_filter` of
/// the persisted settings.
fn init_logging(filter: Option<String>) {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
        });
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl From<CoreConnectionState> for ConnectionState {
    fn from(s: CoreConnectionState) -> Self {
        match s {
            CoreConnectionState::Idle => Self::Idle,
            CoreConnectionState::Connecting => Self::Connecting,
            CoreConnectionState::Connected => Self::Connected,
            CoreConnectionState::Disconnecting => Self::Disconnecting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSlot {
    Sender,
    Receiver,
}

impl From<CoreRenderSlot> for RenderSlot {
    fn from(s: CoreRenderSlot) -> Self {
        match s {
            CoreRenderSlot::Sender => Self::Sender,
            CoreRenderSlot::Receiver => Self::Receiver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sendonly,
    Recvonly,
    Sendrecv,
}

impl From<CoreRole> for Role {
    fn from(r: CoreRole) -> Self {
        match r {
            CoreRole::Sendonly => Self::Sendonly,
            CoreRole::Recvonly => Self::Recvonly,
            CoreRole::Sendrecv => Self::Sendrecv,
        }
    }
}

impl From<Role> for CoreRole {
    fn from(r: Role) -> Self {
        match r {
            Role::Sendonly => Self::Sendonly,
            Role::Recvonly => Self::Recvonly,
            Role::Sendrecv => Self::Sendrecv,
        }
    }
}

/// Connection settings. `signaling_connect_metadata` is JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub signaling_urls: Vec<String>,
    pub channel_id: String,
    pub role: Role,
    pub multistream_enabled: bool,
    pub signaling_connect_metadata: Option<String>,
    pub ca_cert_filename: Option<String>,
    pub connect_timeout_secs: u64,
    pub disconnect_timeout_secs: u64,
    pub log_filter: String,
}

impl From<sora_core::Settings> for Settings {
    fn from(s: sora_core::Settings) -> Self {
        Self {
            signaling_urls: s.signaling_urls,
            channel_id: s.channel_id,
            role: s.role.into(),
            multistream_enabled: s.multistream_enabled,
            signaling_connect_metadata: s.signaling_connect_metadata.map(|v| v.to_string()),
            ca_cert_filename: s.ca_cert_filename,
            connect_timeout_secs: s.connect_timeout_secs,
            disconnect_timeout_secs: s.disconnect_timeout_secs,
            log_filter: s.log_filter,
        }
    }
}

impl Settings {
    /// Convert to core settings, rejecting metadata that is not JSON.
    fn into_core(self) -> Result<sora_core::Settings, SoraError> {
        let signaling_connect_metadata = self
            .signaling_connect_metadata
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| SoraError::Config {
                msg: format!("signaling metadata is not valid JSON: {e}"),
            })?;
        Ok(sora_core::Settings {
            signaling_urls: self.signaling_urls,
            channel_id: self.channel_id,
            role: self.role.into(),
            multistream_enabled: self.multistream_enabled,
            signaling_connect_metadata,
            ca_cert_filename: self.ca_cert_filename,
            connect_timeout_secs: self.connect_timeout_secs,
            disconnect_timeout_secs: self.disconnect_timeout_secs,
            log_filter: self.log_filter,
        })
    }
}

/// What the host needs to start an SDK connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub signaling_urls: Vec<String>,
    pub channel_id: String,
    pub role: Role,
    pub multistream_enabled: bool,
    pub signaling_connect_metadata: Option<String>,
    pub ca_cert_filename: Option<String>,
    pub publisher_stream_id: String,
}

impl From<&sora_core::Configuration> for ConnectRequest {
    fn from(c: &sora_core::Configuration) -> Self {
        Self {
            signaling_urls: c.signaling_urls.iter().map(|u| u.to_string()).collect(),
            channel_id: c.channel_id.clone(),
            role: c.role.into(),
            multistream_enabled: c.multistream_enabled,
            signaling_connect_metadata: c.signaling_connect_metadata.as_ref().map(|v| v.to_string()),
            ca_cert_filename: c.ca_cert_filename.clone(),
            publisher_stream_id: c.publisher_stream_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SoraEvent {
    ConnectionStateChanged { state: ConnectionState },
    ErrorSurfaced { message: String },
    StreamAttached { stream_id: String, slot: RenderSlot },
    StreamDetached { stream_id: String, slot: RenderSlot },
}

impl From<CoreSoraEvent> for SoraEvent {
    fn from(e: CoreSoraEvent) -> Self {
        match e {
            CoreSoraEvent::ConnectionStateChanged(s) => {
                Self::ConnectionStateChanged { state: s.into() }
            }
            CoreSoraEvent::ErrorSurfaced(err) => Self::ErrorSurfaced {
                message: err.to_string(),
            },
            CoreSoraEvent::StreamAttached { stream_id, slot } => {
                Self::StreamAttached { stream_id, slot: slot.into() }
            }
            CoreSoraEvent::StreamDetached { stream_id, slot } => {
                Self::StreamDetached { stream_id, slot: slot.into() }
            }
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SoraError {
    #[error("Connection failed: {msg}")]
    Connect { msg: String },
    #[error("Connection succeeded without a media channel")]
    MissingChannel,
    #[error("Connection timed out after {timeout_ms} ms")]
    ConnectTimeout { timeout_ms: u64 },
    #[error("Disconnected: {msg}")]
    RemoteDisconnect { msg: String },
    #[error("Disconnect timed out after {timeout_ms} ms")]
    DisconnectTimeout { timeout_ms: u64 },
    #[error("Invalid configuration: {msg}")]
    Config { msg: String },
    #[error("Client is closed")]
    Closed,
    #[error("Internal error: {msg}")]
    Internal { msg: String },
}

impl From<sora_core::SoraError> for SoraError {
    fn from(e: sora_core::SoraError) -> Self {
        tracing::error!("SoraError: {e}");
        match e {
            sora_core::SoraError::Connect(msg) => Self::Connect { msg },
            sora_core::SoraError::MissingChannel => Self::MissingChannel,
            sora_core::SoraError::ConnectTimeout(d) => Self::ConnectTimeout {
                timeout_ms: millis(d),
            },
            sora_core::SoraError::RemoteDisconnect(msg) => Self::RemoteDisconnect { msg },
            sora_core::SoraError::DisconnectTimeout(d) => Self::DisconnectTimeout {
                timeout_ms: millis(d),
            },
            sora_core::SoraError::Config(msg) => Self::Config { msg },
            sora_core::SoraError::Closed => Self::Closed,
        }
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait SoraEventListener: Send + Sync {
    fn on_event(&self, event: SoraEvent);
}

/// Host side of the signaling SDK. Called from a background thread; every
/// method must return promptly and report outcomes through `SoraClient`.
pub trait SignalingBridge: Send + Sync {
    fn connect(&self, request_id: String, request: ConnectRequest);
    fn cancel(&self, request_id: String);
    fn disconnect(&self, request_id: String);
    fn attach_renderer(&self, stream_id: String, slot: RenderSlot);
    fn detach_renderer(&self, stream_id: String);
}

// ── Bridge listener: FFI callback → core listener ─────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn SoraEventListener>,
}

impl sora_core::SoraEventListener for BridgeListener {
    fn on_event(&self, event: CoreSoraEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

// ── SoraClient: main FFI object ───────────────────────────────────────

pub struct SoraClient {
    controller: sora_core::ConnectionController,
    signaling: Arc<BridgeSignaling>,
    settings: sora_core::SettingsStore,
    rt: Option<tokio::runtime::Runtime>,
}

impl SoraClient {
    pub fn new(data_dir: String, bridge: Box<dyn SignalingBridge>) -> Result<Self, SoraError> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sora-core")
            .enable_all()
            .build()
            .map_err(|e| SoraError::Internal {
                msg: format!("failed to create tokio runtime: {e}"),
            })?;
        let settings = sora_core::SettingsStore::new(&data_dir);
        let signaling = Arc::new(BridgeSignaling::new(Arc::from(bridge)));
        let controller =
            sora_core::ConnectionController::spawn_on(rt.handle(), signaling.clone(), settings.get());
        tracing::info!("SoraClient created, data dir {data_dir}");

        Ok(Self {
            controller,
            signaling,
            settings,
            rt: Some(rt),
        })
    }

    pub fn toggle(&self) -> Result<(), SoraError> {
        self.controller.toggle().map_err(SoraError::from)
    }

    pub fn connect(&self) -> Result<(), SoraError> {
        self.controller.connect().map_err(SoraError::from)
    }

    pub fn disconnect(&self) -> Result<(), SoraError> {
        self.controller.disconnect().map_err(SoraError::from)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.controller.state().into()
    }

    pub fn add_listener(&self, listener: Box<dyn SoraEventListener>) {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: Arc::from(listener),
        });
        self.controller.add_listener(bridge);
    }

    pub fn get_settings(&self) -> Settings {
        self.settings.get().into()
    }

    /// Validate, persist, and apply to the next connect attempt.
    pub fn set_settings(&self, settings: Settings) -> Result<(), SoraError> {
        let core = settings.into_core()?;
        core.to_configuration().map_err(SoraError::from)?;
        self.settings.set(core.clone());
        self.controller.update_settings(core).map_err(SoraError::from)
    }

    pub fn report_connect_result(
        &self,
        request_id: String,
        error: Option<String>,
        has_channel: bool,
        sender_stream_id: Option<String>,
        connection_id: Option<String>,
    ) {
        self.signaling
            .connect_result(&request_id, error, has_channel, sender_stream_id, connection_id);
    }

    pub fn report_remote_disconnect(&self, request_id: String, error: Option<String>) {
        self.signaling.remote_disconnect(&request_id, error);
    }

    pub fn report_stream_added(&self, request_id: String, stream_id: String) {
        self.signaling.stream_added(&request_id, stream_id);
    }

    pub fn report_stream_removed(&self, request_id: String, stream_id: String) {
        self.signaling.stream_removed(&request_id, stream_id);
    }

    /// Tear down any connection and wait for the controller to stop.
    ///
    /// From inside a listener callback the wait is skipped: blocking the
    /// runtime's own thread is not allowed.
    pub fn shutdown(&self) {
        self.controller.shutdown();
        if tokio::runtime::Handle::try_current().is_ok() {
            return;
        }
        if let Some(rt) = &self.rt {
            rt.block_on(self.controller.stopped());
        }
    }
}

impl Drop for SoraClient {
    fn drop(&mut self) {
        self.controller.shutdown();
        let stopped = self.controller.stopped();
        let Some(rt) = self.rt.take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            // Released on a runtime thread: finish the teardown elsewhere.
            std::thread::spawn(move || rt.block_on(stopped));
        } else {
            rt.block_on(stopped);
        }
    }
}
