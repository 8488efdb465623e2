//! Scripted signaling client and listeners for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::SignalingError;
use crate::events::{RenderSlot, SoraEvent, SoraEventListener};
use crate::settings::Configuration;
use crate::signaling::{
    ConnectCompletion, ConnectionTask, MediaChannel, MediaChannelHandlers, MediaStream,
    SignalingClient,
};

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<SoraEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<SoraEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<crate::SoraError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SoraEvent::ErrorSurfaced(err) => Some(err),
                _ => None,
            })
            .collect()
    }
}

impl SoraEventListener for EventLog {
    fn on_event(&self, event: SoraEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct MockStream {
    id: String,
    slot: Mutex<Option<RenderSlot>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
}

impl MockStream {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            slot: Mutex::new(None),
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
        })
    }

    pub fn slot(&self) -> Option<RenderSlot> {
        *self.slot.lock().unwrap()
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl MediaStream for MockStream {
    fn stream_id(&self) -> String {
        self.id.clone()
    }

    fn attach_renderer(&self, slot: RenderSlot) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock().unwrap() = Some(slot);
    }

    fn detach_renderer(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock().unwrap() = None;
    }
}

pub struct MockChannel {
    disconnects: AtomicUsize,
    sender: Option<Arc<MockStream>>,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            disconnects: AtomicUsize::new(0),
            sender: None,
        })
    }

    pub fn with_sender(stream: Arc<MockStream>) -> Arc<Self> {
        Arc::new(Self {
            disconnects: AtomicUsize::new(0),
            sender: Some(stream),
        })
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl MediaChannel for MockChannel {
    fn disconnect(&self, _error: Option<SignalingError>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn sender_stream(&self) -> Option<Arc<dyn MediaStream>> {
        self.sender.clone().map(|s| s as Arc<dyn MediaStream>)
    }
}

type CompletionSlot = Arc<Mutex<Option<ConnectCompletion>>>;

pub struct MockTask {
    cancels: AtomicUsize,
    completion: CompletionSlot,
    /// Delivered through the completion when cancelled, simulating a client
    /// that reports a result from inside `cancel`.
    result_on_cancel: Option<Arc<MockChannel>>,
}

impl MockTask {
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl ConnectionTask for Arc<MockTask> {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(channel) = &self.result_on_cancel {
            if let Some(completion) = self.completion.lock().unwrap().take() {
                completion.complete(Ok(Some(channel.clone())));
            }
        }
    }
}

pub struct MockAttempt {
    pub configuration: Configuration,
    pub handlers: MediaChannelHandlers,
    completion: CompletionSlot,
    pub task: Arc<MockTask>,
}

impl MockAttempt {
    pub fn complete(&self, result: Result<Option<Arc<dyn MediaChannel>>, SignalingError>) {
        let completion = self
            .completion
            .lock()
            .unwrap()
            .take()
            .expect("attempt already completed");
        completion.complete(result);
    }

    pub fn succeed(&self, channel: Arc<MockChannel>) {
        self.complete(Ok(Some(channel)));
    }

    pub fn fail(&self, message: &str) {
        self.complete(Err(SignalingError::new(message)));
    }
}

#[derive(Default)]
pub struct MockSignaling {
    attempts: Mutex<Vec<Arc<MockAttempt>>>,
    result_on_cancel: Mutex<Option<Arc<MockChannel>>>,
}

impl MockSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt(&self, index: usize) -> Arc<MockAttempt> {
        self.attempts.lock().unwrap()[index].clone()
    }

    pub fn last_attempt(&self) -> Arc<MockAttempt> {
        self.attempts
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connect call recorded")
    }

    /// Make the next attempts answer with `channel` when cancelled.
    pub fn succeed_on_cancel(&self, channel: Arc<MockChannel>) {
        *self.result_on_cancel.lock().unwrap() = Some(channel);
    }
}

impl SignalingClient for MockSignaling {
    fn connect(
        &self,
        configuration: &Configuration,
        handlers: MediaChannelHandlers,
        completion: ConnectCompletion,
    ) -> Box<dyn ConnectionTask> {
        let completion: CompletionSlot = Arc::new(Mutex::new(Some(completion)));
        let task = Arc::new(MockTask {
            cancels: AtomicUsize::new(0),
            completion: completion.clone(),
            result_on_cancel: self.result_on_cancel.lock().unwrap().clone(),
        });
        self.attempts.lock().unwrap().push(Arc::new(MockAttempt {
            configuration: configuration.clone(),
            handlers,
            completion,
            task: task.clone(),
        }));
        Box::new(task)
    }
}
