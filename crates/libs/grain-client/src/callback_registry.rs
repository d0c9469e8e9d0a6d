//! Callback registry (C2, spec.md §4.2): pairs an outstanding request's
//! correlation id with a completion sink and a resend timer. Grounded in
//! the corpus's oneshot-per-request RPC pattern (the retrieval pack's
//! `grammers-mtsender::sender_pool`), adapted to add the resend policy.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::message::{CorrelationId, Message, Response};
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One outstanding request: its completion sink and the task that will
/// fire the resend/timeout policy if no response arrives in time.
struct CallbackEntry {
    sink: oneshot::Sender<Result<Response, ClientError>>,
    timer: JoinHandle<()>,
}

/// `Mutex<HashMap<..>>` as specified (§5): no lock is held across the
/// user-visible `oneshot::Sender::send`, so a slow or dropped receiver
/// never blocks another caller's registration or completion.
#[derive(Clone)]
pub struct CallbackRegistry {
    entries: Arc<Mutex<HashMap<CorrelationId, CallbackEntry>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers `msg` (already stamped with its correlation id) as
    /// awaiting a response, arms the response-timeout timer, and returns
    /// the receiver half the caller awaits. The timer, on firing, either
    /// resends through `transport` (bumping `resend_count` and rewriting
    /// headers per §4.4) or completes the caller with
    /// [`ClientError::Timeout`] once the resend budget is exhausted.
    pub fn register(
        &self,
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        msg: Message,
    ) -> oneshot::Receiver<Result<Response, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.arm(config, transport, msg, tx);
        rx
    }

    fn arm(
        &self,
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        msg: Message,
        sink: oneshot::Sender<Result<Response, ClientError>>,
    ) {
        let id = msg.id;
        let registry = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(config.response_timeout).await;
            registry.on_timeout(config, transport, msg);
        });
        let mut entries = self.entries.lock().expect("callback registry lock poisoned");
        entries.insert(id, CallbackEntry { sink, timer });
    }

    fn on_timeout(&self, config: Arc<ClientConfig>, transport: Arc<dyn Transport>, mut msg: Message) {
        let entry = {
            let mut entries = self.entries.lock().expect("callback registry lock poisoned");
            entries.remove(&msg.id)
        };
        let Some(entry) = entry else {
            // Already completed by an inbound response racing the timer.
            return;
        };
        if msg.may_resend(&config) {
            msg.prepare_for_resend();
            self.arm(config, transport.clone(), msg.clone(), entry.sink);
            if let Err(err) = transport.send_message(msg) {
                log::warn!("resend dispatch failed: {err}");
            }
            return;
        }
        let _ = entry.sink.send(Err(ClientError::Timeout(msg.id)));
    }

    /// Delivers a response to the matching outstanding request, aborting
    /// its timer. A correlation id with no matching entry is a duplicate
    /// or late-arriving response and is silently dropped, matching the
    /// `Rejection(DuplicateRequest)` handling at the gateway boundary.
    pub fn complete(&self, id: CorrelationId, response: Response) {
        let entry = {
            let mut entries = self.entries.lock().expect("callback registry lock poisoned");
            entries.remove(&id)
        };
        if let Some(entry) = entry {
            entry.timer.abort();
            let _ = entry.sink.send(Ok(response));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("callback registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ActivationId, GrainId};
    use crate::message::Direction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct NullTransport {
        sent: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transport for NullTransport {
        async fn start(&self) -> Result<(), ClientError> {
            Ok(())
        }
        async fn prepare_to_stop(&self) {}
        async fn stop(&self) {}
        fn send_message(&self, _msg: Message) -> Result<(), ClientError> {
            self.sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        async fn wait_message(
            &self,
            _category: crate::transport::MessageCategory,
            _cancel: CancellationToken,
        ) -> Option<Message> {
            None
        }
        async fn register_observer(&self, _grain_id: GrainId) -> Result<(), ClientError> {
            Ok(())
        }
        async fn unregister_observer(&self, _grain_id: GrainId) -> Result<(), ClientError> {
            Ok(())
        }
        async fn get_type_code_map(&self) -> Result<crate::transport::InterfaceMap, ClientError> {
            Ok(Default::default())
        }
        fn my_address(&self) -> Option<String> {
            None
        }
    }

    fn test_message() -> Message {
        Message::new_request(
            CorrelationId::generate(),
            GrainId::new_client_target(),
            ActivationId::new(),
            GrainId::new_client_target(),
            Direction::Request,
            vec![],
        )
    }

    #[tokio::test]
    async fn completion_delivers_response_and_cancels_timer() {
        let config = Arc::new(
            ClientConfig::builder()
                .gateway_address("gw-1:5000")
                .response_timeout(Duration::from_secs(30))
                .build()
                .expect("valid config"),
        );
        let transport: Arc<dyn Transport> = Arc::new(NullTransport { sent: AtomicUsize::new(0) });
        let registry = CallbackRegistry::new();
        let msg = test_message();
        let id = msg.id;
        let rx = registry.register(config, transport, msg);
        assert_eq!(registry.len(), 1);
        registry.complete(id, Response::Value(vec![1, 2, 3]));
        let result = rx.await.expect("sink not dropped");
        assert!(matches!(result, Ok(Response::Value(body)) if body == vec![1, 2, 3]));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_resend_budget_surfaces_timeout_error() {
        let config = Arc::new(
            ClientConfig::builder()
                .gateway_address("gw-1:5000")
                .response_timeout(Duration::from_millis(10))
                .max_resend_count(0)
                .build()
                .expect("valid config"),
        );
        let transport: Arc<dyn Transport> = Arc::new(NullTransport { sent: AtomicUsize::new(0) });
        let registry = CallbackRegistry::new();
        let msg = test_message();
        let rx = registry.register(config, transport, msg);
        tokio::time::advance(Duration::from_millis(20)).await;
        let result = rx.await.expect("sink not dropped");
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_within_resend_budget_resends_through_transport() {
        let config = Arc::new(
            ClientConfig::builder()
                .gateway_address("gw-1:5000")
                .response_timeout(Duration::from_millis(10))
                .max_resend_count(1)
                .build()
                .expect("valid config"),
        );
        let transport = Arc::new(NullTransport { sent: AtomicUsize::new(0) });
        let transport_dyn: Arc<dyn Transport> = transport.clone();
        let registry = CallbackRegistry::new();
        let msg = test_message();
        let id = msg.id;
        let _rx = registry.register(config, transport_dyn, msg);
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(transport.sent.load(Ordering::Relaxed), 1);
        // The entry is still armed under the same correlation id.
        assert!(registry.entries.lock().unwrap().contains_key(&id));
    }
}
