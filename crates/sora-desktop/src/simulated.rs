//! In-process stand-in for the Sora SDK.
//!
//! Answers connects after a delay, announces the local and one remote
//! stream, and confirms disconnects. Failure modes let the timeout paths of
//! the controller be exercised by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sora_core::{
    ConnectCompletion, Configuration, ConnectionTask, MediaChannel, MediaChannelHandlers,
    MediaStream, RenderSlot, SignalingClient, SignalingError,
};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    None,
    /// Connect fails with an error.
    Error,
    /// Connect "succeeds" without a channel.
    NoChannel,
    /// Connect never answers.
    Hang,
    /// Disconnect never confirms.
    DropDisconnect,
}

impl FailureMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "none" => Some(Self::None),
            "error" => Some(Self::Error),
            "no-channel" => Some(Self::NoChannel),
            "hang" => Some(Self::Hang),
            "drop-disconnect" => Some(Self::DropDisconnect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedSignaling {
    connect_delay: Duration,
    disconnect_delay: Duration,
    failure: FailureMode,
    connections: Arc<AtomicU64>,
}

impl SimulatedSignaling {
    pub fn new(connect_delay: Duration, disconnect_delay: Duration, failure: FailureMode) -> Self {
        Self {
            connect_delay,
            disconnect_delay,
            failure,
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Read `SORA_SIM_CONNECT_MS`, `SORA_SIM_DISCONNECT_MS` and
    /// `SORA_SIM_FAIL` from the environment.
    pub fn from_env() -> Self {
        let millis = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(default))
        };
        let failure = match std::env::var("SORA_SIM_FAIL") {
            Ok(value) => FailureMode::parse(&value).unwrap_or_else(|| {
                tracing::warn!("unknown SORA_SIM_FAIL={value:?}, ignoring");
                FailureMode::None
            }),
            Err(_) => FailureMode::None,
        };
        Self::new(
            millis("SORA_SIM_CONNECT_MS", 500),
            millis("SORA_SIM_DISCONNECT_MS", 300),
            failure,
        )
    }
}

impl SignalingClient for SimulatedSignaling {
    fn connect(
        &self,
        configuration: &Configuration,
        handlers: MediaChannelHandlers,
        completion: ConnectCompletion,
    ) -> Box<dyn ConnectionTask> {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let connection_number = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        let publisher_stream_id = configuration.publisher_stream_id.clone();
        let channel_id = configuration.channel_id.clone();
        let delay = self.connect_delay;
        let disconnect_delay = self.disconnect_delay;
        let failure = self.failure;

        tracing::info!(
            "simulated connect #{connection_number} to {} (channel {channel_id})",
            configuration
                .signaling_urls
                .first()
                .map(|u| u.as_str())
                .unwrap_or("<none>")
        );

        tokio::spawn(async move {
            if failure == FailureMode::Hang {
                let _ = cancel_rx.changed().await;
                completion.complete(Err(SignalingError::new("connection cancelled")));
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx.changed() => {
                    completion.complete(Err(SignalingError::new("connection cancelled")));
                    return;
                }
            }

            match failure {
                FailureMode::Error => {
                    completion.complete(Err(SignalingError::new("simulated server rejection")));
                }
                FailureMode::NoChannel => completion.complete(Ok(None)),
                _ => {
                    let own = SimulatedStream::new(publisher_stream_id);
                    handlers.notify_add_stream(own.clone());
                    handlers.notify_add_stream(SimulatedStream::new(format!(
                        "{channel_id}-remote-{connection_number}"
                    )));
                    let channel = Arc::new(SimulatedChannel {
                        handlers,
                        sender: own,
                        disconnect_delay,
                        confirm_disconnect: failure != FailureMode::DropDisconnect,
                        connection_id: format!("sim-{connection_number}"),
                    });
                    completion.complete(Ok(Some(channel)));
                }
            }
        });

        Box::new(SimulatedTask { cancel_tx })
    }
}

struct SimulatedTask {
    cancel_tx: watch::Sender<bool>,
}

impl ConnectionTask for SimulatedTask {
    fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

struct SimulatedChannel {
    handlers: MediaChannelHandlers,
    sender: Arc<SimulatedStream>,
    disconnect_delay: Duration,
    confirm_disconnect: bool,
    connection_id: String,
}

impl MediaChannel for SimulatedChannel {
    fn disconnect(&self, _error: Option<SignalingError>) {
        tracing::info!("simulated disconnect of {}", self.connection_id);
        if !self.confirm_disconnect {
            return;
        }
        let handlers = self.handlers.clone();
        let delay = self.disconnect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handlers.notify_disconnect(None);
        });
    }

    fn sender_stream(&self) -> Option<Arc<dyn MediaStream>> {
        Some(self.sender.clone())
    }

    fn connection_id(&self) -> Option<String> {
        Some(self.connection_id.clone())
    }
}

struct SimulatedStream {
    stream_id: String,
}

impl SimulatedStream {
    fn new(stream_id: String) -> Arc<Self> {
        Arc::new(Self { stream_id })
    }
}

impl MediaStream for SimulatedStream {
    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn attach_renderer(&self, slot: RenderSlot) {
        tracing::debug!("rendering {} in {slot:?} view", self.stream_id);
    }

    fn detach_renderer(&self) {
        tracing::debug!("stopped rendering {}", self.stream_id);
    }
}
