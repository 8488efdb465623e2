use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::controller::{AttemptId, Command};

/// Which transition a timeout guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Connect,
    Disconnect,
}

struct LiveTimer {
    attempt: AttemptId,
    handle: JoinHandle<()>,
}

/// One timer slot per phase. A timer posts `Command::Timeout` back into the
/// controller queue when its deadline passes.
pub(crate) struct PhaseTimers {
    tx: UnboundedSender<Command>,
    connect: Option<LiveTimer>,
    disconnect: Option<LiveTimer>,
    superseded: u64,
}

impl PhaseTimers {
    pub(crate) fn new(tx: UnboundedSender<Command>) -> Self {
        Self {
            tx,
            connect: None,
            disconnect: None,
            superseded: 0,
        }
    }

    /// Schedule a timeout for `phase`, cancelling any timer already armed
    /// for that phase.
    pub(crate) fn arm(&mut self, phase: Phase, attempt: AttemptId, after: Duration) {
        if let Some(old) = self.slot(phase).take() {
            old.handle.abort();
            self.superseded += 1;
            tracing::debug!("{phase:?} timer for {} superseded", old.attempt);
        }

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Command::Timeout { phase, attempt });
        });
        *self.slot(phase) = Some(LiveTimer { attempt, handle });
    }

    /// Cancel the timer for `phase`. No-op if none is armed.
    pub(crate) fn cancel(&mut self, phase: Phase) {
        if let Some(timer) = self.slot(phase).take() {
            timer.handle.abort();
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        self.cancel(Phase::Connect);
        self.cancel(Phase::Disconnect);
    }

    /// Consume a `Timeout` message. Returns `true` only if it comes from the
    /// timer currently armed for `phase`; a timer that was cancelled or
    /// superseded after posting its message is reported as stale.
    pub(crate) fn fired(&mut self, phase: Phase, attempt: AttemptId) -> bool {
        let slot = self.slot(phase);
        if slot.as_ref().is_some_and(|timer| timer.attempt == attempt) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_armed(&self, phase: Phase) -> bool {
        match phase {
            Phase::Connect => self.connect.is_some(),
            Phase::Disconnect => self.disconnect.is_some(),
        }
    }

    /// Number of timers cancelled because a new one was armed for the same
    /// phase.
    pub(crate) fn superseded(&self) -> u64 {
        self.superseded
    }

    fn slot(&mut self, phase: Phase) -> &mut Option<LiveTimer> {
        match phase {
            Phase::Connect => &mut self.connect,
            Phase::Disconnect => &mut self.disconnect,
        }
    }
}

impl Drop for PhaseTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
