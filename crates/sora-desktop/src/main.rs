//! Terminal quick-start: one play/stop button driven from stdin.
//!
//! Enter (or `t`) toggles, `c`/`d` connect and disconnect explicitly, `s`
//! prints a snapshot, `q` quits. The SDK is replaced by an in-process
//! simulator tuned with `SORA_SIM_*` environment variables.

mod simulated;

use std::path::PathBuf;
use std::sync::Arc;

use sora_core::{
    ConnectionController, ConnectionState, SettingsStore, SoraError, SoraEvent, SoraEventListener,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::simulated::SimulatedSignaling;

/// Prints what a sample app would show on screen.
struct ConsoleListener;

impl SoraEventListener for ConsoleListener {
    fn on_event(&self, event: SoraEvent) {
        match event {
            SoraEvent::ConnectionStateChanged(state) => {
                println!("[{}] {state:?}", button_label(state));
            }
            SoraEvent::ErrorSurfaced(e) => println!("error: {e}"),
            SoraEvent::StreamAttached { stream_id, slot } => {
                println!("{slot:?} view <- {stream_id}");
            }
            SoraEvent::StreamDetached { stream_id, slot } => {
                println!("{slot:?} view cleared ({stream_id})");
            }
        }
    }
}

fn button_label(state: ConnectionState) -> &'static str {
    match state {
        state if state.is_transitioning() => "....",
        ConnectionState::Connected => "stop",
        _ => "play",
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sora-quickstart")
}

#[tokio::main]
async fn main() -> Result<(), SoraError> {
    let dir = data_dir();
    let store = SettingsStore::new(&dir);
    let settings = store.get();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_filter)),
        )
        .init();

    // Fail early on a bad settings file rather than on the first toggle.
    settings.to_configuration()?;
    tracing::info!("settings loaded from {}", dir.display());

    let controller =
        ConnectionController::new(Arc::new(SimulatedSignaling::from_env()), settings);
    controller.add_listener(Arc::new(ConsoleListener));

    println!("[play] Idle  (enter/t: toggle, c: connect, d: disconnect, s: status, q: quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("stdin: {e}");
                break;
            }
        };
        match line.trim() {
            "" | "t" => controller.toggle()?,
            "c" => controller.connect()?,
            "d" => controller.disconnect()?,
            "s" => {
                let snap = controller.snapshot().await?;
                println!(
                    "{:?} attempt={} channel={} sender={} receiver={} superseded_timers={}",
                    snap.state,
                    snap.attempt.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
                    snap.has_channel,
                    snap.sender_stream.as_deref().unwrap_or("-"),
                    snap.receiver_stream.as_deref().unwrap_or("-"),
                    snap.superseded_timers,
                );
            }
            "q" => break,
            other => println!("unknown command {other:?}"),
        }
    }

    controller.shutdown();
    controller.stopped().await;
    Ok(())
}
