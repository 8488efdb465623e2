use std::sync::Arc;

use crate::events::{EventEmitter, RenderSlot, SoraEvent};
use crate::signaling::MediaStream;

/// Binds the streams of one connection to the two video surfaces.
///
/// The sender slot shows the locally published stream. The receiver slot
/// shows the most recently added remote stream; earlier ones are detached.
pub(crate) struct StreamRouter {
    publisher_stream_id: String,
    sender: Option<Arc<dyn MediaStream>>,
    receiver: Option<Arc<dyn MediaStream>>,
}

impl StreamRouter {
    pub(crate) fn new(publisher_stream_id: String) -> Self {
        Self {
            publisher_stream_id,
            sender: None,
            receiver: None,
        }
    }

    pub(crate) fn attach_sender(&mut self, stream: Arc<dyn MediaStream>, emitter: &EventEmitter) {
        Self::detach(&mut self.sender, RenderSlot::Sender, emitter);
        Self::attach(&mut self.sender, stream, RenderSlot::Sender, emitter);
    }

    /// Handle a stream announced by the server. Our own published stream is
    /// ignored, and re-announcing the attached stream keeps it as is.
    pub(crate) fn add(&mut self, stream: Arc<dyn MediaStream>, emitter: &EventEmitter) {
        let stream_id = stream.stream_id();
        if stream_id == self.publisher_stream_id {
            tracing::debug!("ignoring own publisher stream {stream_id}");
            return;
        }
        if self.receiver_id().as_deref() == Some(stream_id.as_str()) {
            return;
        }
        Self::detach(&mut self.receiver, RenderSlot::Receiver, emitter);
        Self::attach(&mut self.receiver, stream, RenderSlot::Receiver, emitter);
    }

    pub(crate) fn remove(&mut self, stream_id: &str, emitter: &EventEmitter) {
        if self.receiver_id().as_deref() == Some(stream_id) {
            Self::detach(&mut self.receiver, RenderSlot::Receiver, emitter);
        }
    }

    pub(crate) fn detach_all(&mut self, emitter: &EventEmitter) {
        Self::detach(&mut self.receiver, RenderSlot::Receiver, emitter);
        Self::detach(&mut self.sender, RenderSlot::Sender, emitter);
    }

    pub(crate) fn sender_id(&self) -> Option<String> {
        self.sender.as_ref().map(|s| s.stream_id())
    }

    pub(crate) fn receiver_id(&self) -> Option<String> {
        self.receiver.as_ref().map(|s| s.stream_id())
    }

    fn attach(
        slot_ref: &mut Option<Arc<dyn MediaStream>>,
        stream: Arc<dyn MediaStream>,
        slot: RenderSlot,
        emitter: &EventEmitter,
    ) {
        let stream_id = stream.stream_id();
        stream.attach_renderer(slot);
        tracing::info!("stream {stream_id} attached to {slot:?}");
        *slot_ref = Some(stream);
        emitter.emit(SoraEvent::StreamAttached { stream_id, slot });
    }

    fn detach(
        slot_ref: &mut Option<Arc<dyn MediaStream>>,
        slot: RenderSlot,
        emitter: &EventEmitter,
    ) {
        if let Some(stream) = slot_ref.take() {
            let stream_id = stream.stream_id();
            stream.detach_renderer();
            tracing::info!("stream {stream_id} detached from {slot:?}");
            emitter.emit(SoraEvent::StreamDetached { stream_id, slot });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{EventLog, MockStream};

    fn router() -> (StreamRouter, EventEmitter, Arc<EventLog>) {
        let emitter = EventEmitter::new();
        let log = Arc::new(EventLog::default());
        emitter.add_listener(log.clone());
        (StreamRouter::new("me".to_string()), emitter, log)
    }

    #[test]
    fn own_stream_is_not_rendered_as_receiver() {
        let (mut router, emitter, log) = router();
        let own = MockStream::new("me");
        router.add(own.clone(), &emitter);
        assert!(router.receiver_id().is_none());
        assert!(own.slot().is_none());
        assert!(log.events().is_empty());
    }

    #[test]
    fn last_remote_stream_wins() {
        let (mut router, emitter, log) = router();
        let alice = MockStream::new("alice");
        let bob = MockStream::new("bob");

        router.add(alice.clone(), &emitter);
        router.add(bob.clone(), &emitter);

        assert_eq!(router.receiver_id().as_deref(), Some("bob"));
        assert_eq!(alice.slot(), None);
        assert_eq!(alice.detach_count(), 1);
        assert_eq!(bob.slot(), Some(RenderSlot::Receiver));
        assert_eq!(
            log.events(),
            vec![
                SoraEvent::StreamAttached { stream_id: "alice".into(), slot: RenderSlot::Receiver },
                SoraEvent::StreamDetached { stream_id: "alice".into(), slot: RenderSlot::Receiver },
                SoraEvent::StreamAttached { stream_id: "bob".into(), slot: RenderSlot::Receiver },
            ]
        );
    }

    #[test]
    fn duplicate_add_keeps_attachment() {
        let (mut router, emitter, log) = router();
        let alice = MockStream::new("alice");
        router.add(alice.clone(), &emitter);
        router.add(alice.clone(), &emitter);
        assert_eq!(alice.attach_count(), 1);
        assert_eq!(alice.detach_count(), 0);
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn removing_other_stream_keeps_receiver() {
        let (mut router, emitter, _log) = router();
        let alice = MockStream::new("alice");
        router.add(alice.clone(), &emitter);
        router.remove("carol", &emitter);
        assert_eq!(router.receiver_id().as_deref(), Some("alice"));
        router.remove("alice", &emitter);
        assert!(router.receiver_id().is_none());
        assert_eq!(alice.detach_count(), 1);
    }

    #[test]
    fn detach_all_clears_both_slots() {
        let (mut router, emitter, _log) = router();
        let own = MockStream::new("me");
        let alice = MockStream::new("alice");
        router.attach_sender(own.clone(), &emitter);
        router.add(alice.clone(), &emitter);

        router.detach_all(&emitter);
        assert!(router.sender_id().is_none());
        assert!(router.receiver_id().is_none());
        assert_eq!(own.detach_count(), 1);
        assert_eq!(alice.detach_count(), 1);

        // Second call has nothing left to detach.
        router.detach_all(&emitter);
        assert_eq!(own.detach_count(), 1);
    }
}
