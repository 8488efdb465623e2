//! Adapts the host's `SignalingBridge` callback interface to the core
//! `SignalingClient` contract.
//!
//! The host drives the real SDK and reports back through `SoraClient`
//! methods keyed by the request id handed to `SignalingBridge::connect`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use sora_core::{
    ConnectCompletion, ConnectionTask, MediaChannel, MediaChannelHandlers, MediaStream,
    SignalingClient, SignalingError,
};

use crate::{ConnectRequest, RenderSlot, SignalingBridge};

/// Cancelled request ids remembered for late connect results.
const CANCELLED_CAPACITY: usize = 32;

struct PendingRequest {
    handlers: MediaChannelHandlers,
    completion: Option<ConnectCompletion>,
}

#[derive(Default)]
struct Requests {
    live: HashMap<String, PendingRequest>,
    cancelled: VecDeque<String>,
}

impl Requests {
    fn mark_cancelled(&mut self, request_id: String) {
        if self.cancelled.len() == CANCELLED_CAPACITY {
            self.cancelled.pop_front();
        }
        self.cancelled.push_back(request_id);
    }

    fn take_cancelled(&mut self, request_id: &str) -> bool {
        match self.cancelled.iter().position(|id| id == request_id) {
            Some(index) => {
                self.cancelled.remove(index);
                true
            }
            None => false,
        }
    }
}

type SharedRequests = Arc<Mutex<Requests>>;

fn lock(requests: &SharedRequests) -> MutexGuard<'_, Requests> {
    requests
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct BridgeSignaling {
    bridge: Arc<dyn SignalingBridge>,
    requests: SharedRequests,
}

impl BridgeSignaling {
    pub(crate) fn new(bridge: Arc<dyn SignalingBridge>) -> Self {
        Self {
            bridge,
            requests: SharedRequests::default(),
        }
    }

    pub(crate) fn connect_result(
        &self,
        request_id: &str,
        error: Option<String>,
        has_channel: bool,
        sender_stream_id: Option<String>,
        connection_id: Option<String>,
    ) {
        let completion = {
            let mut requests = lock(&self.requests);
            if requests.take_cancelled(request_id) {
                drop(requests);
                if error.is_none() && has_channel {
                    tracing::warn!("late channel for cancelled request {request_id}, disconnecting");
                    self.bridge.disconnect(request_id.to_string());
                } else {
                    tracing::debug!("late result for cancelled request {request_id}");
                }
                return;
            }
            let Some(request) = requests.live.get_mut(request_id) else {
                tracing::debug!("connect result for unknown request {request_id}");
                return;
            };
            let completion = request.completion.take();
            if error.is_some() || !has_channel {
                requests.live.remove(request_id);
            }
            completion
        };
        let Some(completion) = completion else {
            tracing::warn!("duplicate connect result for request {request_id}");
            return;
        };

        let result = match (error, has_channel) {
            (Some(message), _) => Err(SignalingError::new(message)),
            (None, false) => Ok(None),
            (None, true) => {
                let sender = sender_stream_id.map(|stream_id| {
                    Arc::new(BridgeStream {
                        stream_id,
                        bridge: self.bridge.clone(),
                    }) as Arc<dyn MediaStream>
                });
                Ok(Some(Arc::new(BridgeChannel {
                    request_id: request_id.to_string(),
                    bridge: self.bridge.clone(),
                    requests: self.requests.clone(),
                    sender,
                    connection_id,
                }) as Arc<dyn MediaChannel>))
            }
        };
        completion.complete(result);
    }

    pub(crate) fn remote_disconnect(&self, request_id: &str, error: Option<String>) {
        let handlers = {
            let mut requests = lock(&self.requests);
            let Some(request) = requests.live.get(request_id) else {
                tracing::debug!("disconnect for unknown request {request_id}");
                return;
            };
            let handlers = request.handlers.clone();
            // Keep the entry while a connect result can still arrive.
            if request.completion.is_none() {
                requests.live.remove(request_id);
            }
            handlers
        };
        handlers.notify_disconnect(error.map(SignalingError::new));
    }

    pub(crate) fn stream_added(&self, request_id: &str, stream_id: String) {
        if let Some(handlers) = self.handlers(request_id) {
            handlers.notify_add_stream(Arc::new(BridgeStream {
                stream_id,
                bridge: self.bridge.clone(),
            }));
        }
    }

    pub(crate) fn stream_removed(&self, request_id: &str, stream_id: String) {
        if let Some(handlers) = self.handlers(request_id) {
            handlers.notify_remove_stream(stream_id);
        }
    }

    fn handlers(&self, request_id: &str) -> Option<MediaChannelHandlers> {
        lock(&self.requests)
            .live
            .get(request_id)
            .map(|request| request.handlers.clone())
    }

    #[cfg(test)]
    fn live_requests(&self) -> usize {
        lock(&self.requests).live.len()
    }
}

impl SignalingClient for BridgeSignaling {
    fn connect(
        &self,
        configuration: &sora_core::Configuration,
        handlers: MediaChannelHandlers,
        completion: ConnectCompletion,
    ) -> Box<dyn ConnectionTask> {
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("{}: bridge request {request_id}", handlers.attempt());
        lock(&self.requests).live.insert(
            request_id.clone(),
            PendingRequest {
                handlers,
                completion: Some(completion),
            },
        );

        // Registered before the call: the host may report synchronously.
        self.bridge
            .connect(request_id.clone(), ConnectRequest::from(configuration));

        Box::new(BridgeTask {
            request_id,
            bridge: self.bridge.clone(),
            requests: self.requests.clone(),
        })
    }
}

struct BridgeTask {
    request_id: String,
    bridge: Arc<dyn SignalingBridge>,
    requests: SharedRequests,
}

impl ConnectionTask for BridgeTask {
    fn cancel(&self) {
        let abandoned = {
            let mut requests = lock(&self.requests);
            let abandoned = requests.live.remove(&self.request_id);
            if abandoned
                .as_ref()
                .is_some_and(|request| request.completion.is_some())
            {
                requests.mark_cancelled(self.request_id.clone());
            }
            abandoned
        };
        drop(abandoned);
        self.bridge.cancel(self.request_id.clone());
    }
}

struct BridgeChannel {
    request_id: String,
    bridge: Arc<dyn SignalingBridge>,
    requests: SharedRequests,
    sender: Option<Arc<dyn MediaStream>>,
    connection_id: Option<String>,
}

impl MediaChannel for BridgeChannel {
    fn disconnect(&self, _error: Option<SignalingError>) {
        self.bridge.disconnect(self.request_id.clone());
    }

    fn sender_stream(&self) -> Option<Arc<dyn MediaStream>> {
        self.sender.clone()
    }

    fn connection_id(&self) -> Option<String> {
        self.connection_id.clone()
    }
}

impl Drop for BridgeChannel {
    /// The controller released the channel: later host reports for this
    /// request have nobody to go to.
    fn drop(&mut self) {
        let released = lock(&self.requests).live.remove(&self.request_id);
        drop(released);
    }
}

struct BridgeStream {
    stream_id: String,
    bridge: Arc<dyn SignalingBridge>,
}

impl MediaStream for BridgeStream {
    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn attach_renderer(&self, slot: sora_core::RenderSlot) {
        self.bridge
            .attach_renderer(self.stream_id.clone(), RenderSlot::from(slot));
    }

    fn detach_renderer(&self) {
        self.bridge.detach_renderer(self.stream_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sora_core::{ConnectionController, ConnectionState, Settings};

    /// Host that records calls and never reports anything back.
    #[derive(Default)]
    struct SilentHost {
        connects: Mutex<Vec<String>>,
        cancels: Mutex<Vec<String>>,
        disconnects: Mutex<Vec<String>>,
    }

    impl SignalingBridge for SilentHost {
        fn connect(&self, request_id: String, _request: ConnectRequest) {
            self.connects.lock().unwrap().push(request_id);
        }

        fn cancel(&self, request_id: String) {
            self.cancels.lock().unwrap().push(request_id);
        }

        fn disconnect(&self, request_id: String) {
            self.disconnects.lock().unwrap().push(request_id);
        }

        fn attach_renderer(&self, _stream_id: String, _slot: RenderSlot) {}

        fn detach_renderer(&self, _stream_id: String) {}
    }

    fn setup() -> (ConnectionController, Arc<BridgeSignaling>, Arc<SilentHost>) {
        let host = Arc::new(SilentHost::default());
        let signaling = Arc::new(BridgeSignaling::new(host.clone()));
        let controller = ConnectionController::new(signaling.clone(), Settings::default());
        (controller, signaling, host)
    }

    fn last_request(host: &SilentHost) -> String {
        host.connects.lock().unwrap().last().cloned().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempts_release_their_requests() {
        let (controller, signaling, host) = setup();

        for _ in 0..5 {
            controller.toggle().unwrap();
            controller.wait_for_state(ConnectionState::Connecting).await.unwrap();
            controller.wait_for_state(ConnectionState::Idle).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(controller.state(), ConnectionState::Idle);
        assert_eq!(signaling.live_requests(), 0);
        assert_eq!(host.cancels.lock().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn late_channel_for_cancelled_request_is_disconnected() {
        let (controller, signaling, host) = setup();
        controller.toggle().unwrap();
        controller.wait_for_state(ConnectionState::Connecting).await.unwrap();
        let request_id = last_request(&host);
        controller.wait_for_state(ConnectionState::Idle).await.unwrap();
        controller.snapshot().await.unwrap();

        signaling.connect_result(&request_id, None, true, None, None);
        assert_eq!(*host.disconnects.lock().unwrap(), vec![request_id.clone()]);

        // Only the first late result is acted on.
        signaling.connect_result(&request_id, None, true, None, None);
        assert_eq!(host.disconnects.lock().unwrap().len(), 1);
        assert_eq!(signaling.live_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_failure_for_cancelled_request_is_dropped() {
        let (controller, signaling, host) = setup();
        controller.toggle().unwrap();
        controller.wait_for_state(ConnectionState::Connecting).await.unwrap();
        let request_id = last_request(&host);
        controller.wait_for_state(ConnectionState::Idle).await.unwrap();
        controller.snapshot().await.unwrap();

        signaling.connect_result(&request_id, Some("cancelled".into()), false, None, None);
        assert!(host.disconnects.lock().unwrap().is_empty());
        assert_eq!(signaling.live_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_timeout_releases_request() {
        let (controller, signaling, host) = setup();
        controller.toggle().unwrap();
        controller.wait_for_state(ConnectionState::Connecting).await.unwrap();
        let request_id = last_request(&host);

        signaling.connect_result(&request_id, None, true, None, None);
        controller.wait_for_state(ConnectionState::Connected).await.unwrap();
        assert_eq!(signaling.live_requests(), 1);

        controller.toggle().unwrap();
        controller.wait_for_state(ConnectionState::Disconnecting).await.unwrap();
        controller.wait_for_state(ConnectionState::Idle).await.unwrap();
        controller.snapshot().await.unwrap();

        assert_eq!(*host.disconnects.lock().unwrap(), vec![request_id]);
        assert_eq!(signaling.live_requests(), 0);
    }

    #[test]
    fn cancelled_ids_are_bounded() {
        let mut requests = Requests::default();
        for i in 0..CANCELLED_CAPACITY + 5 {
            requests.mark_cancelled(format!("req-{i}"));
        }
        assert_eq!(requests.cancelled.len(), CANCELLED_CAPACITY);
        assert!(!requests.take_cancelled("req-0"));
        assert!(requests.take_cancelled(&format!("req-{}", CANCELLED_CAPACITY + 4)));
    }
}
