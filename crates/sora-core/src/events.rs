use std::sync::Arc;

use crate::errors::SoraError;

/// Events emitted by the core to native UI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SoraEvent {
    ConnectionStateChanged(ConnectionState),
    ErrorSurfaced(SoraError),
    StreamAttached { stream_id: String, slot: RenderSlot },
    StreamDetached { stream_id: String, slot: RenderSlot },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// True while an attempt or a teardown is in flight.
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

/// Video surface a stream is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderSlot {
    /// Local self-view.
    Sender,
    /// Remote publisher view.
    Receiver,
}

/// Trait for receiving events from the core.
///
/// Called from the controller task. Implementations that touch UI must hop
/// to their own main thread.
pub trait SoraEventListener: Send + Sync {
    fn on_event(&self, event: SoraEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn SoraEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SoraEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: SoraEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
