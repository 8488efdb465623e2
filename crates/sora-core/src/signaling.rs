//! Contract with the external signaling client.
//!
//! The client (the Sora SDK on device, a simulator on desktop, a scripted
//! double in tests) is a black box. The controller calls into it through
//! [`SignalingClient`] and gets results back through [`ConnectCompletion`]
//! and [`MediaChannelHandlers`], both of which may be invoked from any
//! thread: they only post a message to the controller's queue.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::controller::{AttemptId, Command};
use crate::errors::SignalingError;
use crate::events::RenderSlot;
use crate::settings::Configuration;

/// Entry point of the signaling SDK.
pub trait SignalingClient: Send + Sync {
    /// Start connecting. The result is delivered exactly once through
    /// `completion`, or never if the client gives up silently.
    fn connect(
        &self,
        configuration: &Configuration,
        handlers: MediaChannelHandlers,
        completion: ConnectCompletion,
    ) -> Box<dyn ConnectionTask>;
}

/// Handle to an in-flight connect.
pub trait ConnectionTask: Send + Sync {
    /// Ask the client to abandon the attempt. Advisory: a result may still
    /// arrive afterwards. Calling it more than once must be harmless.
    fn cancel(&self);
}

/// An established connection.
pub trait MediaChannel: Send + Sync {
    /// Start tearing the connection down. Completion is reported through
    /// [`MediaChannelHandlers::notify_disconnect`].
    fn disconnect(&self, error: Option<SignalingError>);

    /// The locally published stream, if the role publishes.
    fn sender_stream(&self) -> Option<Arc<dyn MediaStream>>;

    fn connection_id(&self) -> Option<String> {
        None
    }
}

/// A media stream that can be bound to a video surface.
pub trait MediaStream: Send + Sync {
    fn stream_id(&self) -> String;
    fn attach_renderer(&self, slot: RenderSlot);
    fn detach_renderer(&self);
}

/// Notifications the client raises for a channel, tagged with the attempt
/// that created them.
#[derive(Clone)]
pub struct MediaChannelHandlers {
    attempt: AttemptId,
    tx: UnboundedSender<Command>,
}

impl MediaChannelHandlers {
    pub(crate) fn new(attempt: AttemptId, tx: UnboundedSender<Command>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// The connection was closed by the server, the network, or as the
    /// answer to a local `disconnect`. `error` is `None` for a clean close.
    pub fn notify_disconnect(&self, error: Option<SignalingError>) {
        self.send(Command::RemoteDisconnect {
            attempt: self.attempt,
            error,
        });
    }

    pub fn notify_add_stream(&self, stream: Arc<dyn MediaStream>) {
        self.send(Command::StreamAdded {
            attempt: self.attempt,
            stream,
        });
    }

    pub fn notify_remove_stream(&self, stream_id: impl Into<String>) {
        self.send(Command::StreamRemoved {
            attempt: self.attempt,
            stream_id: stream_id.into(),
        });
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            tracing::debug!("controller closed, dropping notification for {}", self.attempt);
        }
    }
}

/// One-shot result slot for a connect attempt.
pub struct ConnectCompletion {
    attempt: AttemptId,
    tx: UnboundedSender<Command>,
}

impl ConnectCompletion {
    pub(crate) fn new(attempt: AttemptId, tx: UnboundedSender<Command>) -> Self {
        Self { attempt, tx }
    }

    /// Deliver the outcome. `Ok(None)` means the client reported success
    /// without handing over a channel.
    pub fn complete(self, result: Result<Option<Arc<dyn MediaChannel>>, SignalingError>) {
        let command = Command::ConnectResult {
            attempt: self.attempt,
            result,
        };
        if let Err(rejected) = self.tx.send(command) {
            // Nobody will ever own this channel: close it here.
            if let Command::ConnectResult {
                result: Ok(Some(channel)),
                ..
            } = rejected.0
            {
                tracing::debug!("controller closed, tearing down late channel");
                channel.disconnect(None);
            }
        }
    }
}
