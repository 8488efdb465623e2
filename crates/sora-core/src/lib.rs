//! Sora quick-start connection core.
//!
//! Pure Rust crate with no platform dependencies. Owns the connection
//! lifecycle (connect, disconnect, timeouts, stale-result handling) around
//! an opaque signaling client supplied by the host.
//! Consumed by native UI shells via UniFFI bindings.

pub mod controller;
pub mod errors;
pub mod events;
pub mod settings;
pub mod signaling;
mod streams;
mod timer;

#[cfg(test)]
mod mock;

pub use controller::{AttemptId, ConnectionController, Snapshot};
pub use errors::{SignalingError, SoraError};
pub use events::{ConnectionState, RenderSlot, SoraEvent, SoraEventListener};
pub use settings::{Configuration, Role, Settings, SettingsStore};
pub use signaling::{
    ConnectCompletion, ConnectionTask, MediaChannel, MediaChannelHandlers, MediaStream,
    SignalingClient,
};
pub use timer::Phase;
