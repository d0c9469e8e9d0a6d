//! Per-object pump (C6, spec.md §4.6): drains one local object's queue in
//! strict FIFO order, invoking the registered [`Invoker`][crate::local_object::Invoker]
//! and emitting a response or exception for two-way requests (§4.7).
//! Scheduled by [`dispatch`] whenever a message lands on an empty,
//! non-running queue; grounded in the corpus's per-connection drain-loop
//! pattern (`rns-rpc/src/transport/test_bridge.rs`), generalized from one
//! queue per connection to one queue per local callback object.

use crate::error::ClientError;
use crate::identity::{ClientIdentity, GrainId};
use crate::local_object::{LocalObjectData, LocalObjectRegistry};
use crate::message::{CorrelationId, Direction, Message, Response};
use crate::serializer::Serializer;
use crate::transport::Transport;
use std::sync::Arc;

/// Routes an inbound request/one-way message to its target local object,
/// spawning a drain task the first time the queue transitions
/// empty -> non-running (spec.md §4.6). Unknown targets are logged and
/// dropped (§4.5: "If no entry, log and drop").
pub fn dispatch(
    msg: Message,
    local_objects: &LocalObjectRegistry,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn Serializer>,
    identity: Arc<ClientIdentity>,
) {
    let Some(data) = local_objects.lookup(msg.target_grain) else {
        log::warn!("dropping message for unknown local object {:?}", msg.target_grain);
        return;
    };
    if data.enqueue(msg) {
        let local_objects = local_objects.clone();
        tokio::spawn(async move {
            drain(data, local_objects, transport, serializer, identity).await;
        });
    }
}

/// Drains `data`'s queue in order, non-overlappingly with any other pump
/// (invariant 2). Unexpected errors inside the loop are swallowed to keep
/// the pump alive (spec.md §4.6 step 7 / §7 propagation policy).
async fn drain(
    data: Arc<LocalObjectData>,
    local_objects: LocalObjectRegistry,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn Serializer>,
    identity: Arc<ClientIdentity>,
) {
    loop {
        let Some(msg) = data.dequeue() else {
            return;
        };
        if msg.is_expired() {
            log::debug!("dropping expired message {:?} targeting {:?}", msg.id, msg.target_grain);
            continue;
        }

        let grain_id = data.grain_id;
        let target = match local_objects.resolve_strong(grain_id) {
            Ok(target) => target,
            Err(err) => {
                log::warn!("local object {grain_id:?} unreachable, dropping its queue: {err}");
                if let Err(unregister_err) = transport.unregister_observer(grain_id).await {
                    log::warn!("failed to unregister observer {grain_id:?}: {unregister_err}");
                }
                return;
            }
        };

        let direction = msg.direction;
        let reply_to = msg.sending_grain;
        let correlation_id = msg.id;
        let invoker = data.invoker.clone();
        match invoker.invoke(target, msg).await {
            Ok(body) if direction == Direction::OneWay => {
                let _ = body;
            }
            Ok(body) => {
                emit_response(&transport, &serializer, &identity, correlation_id, grain_id, reply_to, body).await;
            }
            Err(err) if direction == Direction::OneWay => {
                log::warn!("one-way invocation targeting {grain_id:?} failed: {err}");
            }
            Err(err) => {
                emit_exception(&transport, &serializer, &identity, correlation_id, grain_id, reply_to, err).await;
            }
        }
    }
}

/// Deep-copies the invocation result and sends a value response, or a
/// copy-failure exception response if the copy itself fails (spec.md §4.7).
async fn emit_response(
    transport: &Arc<dyn Transport>,
    serializer: &Arc<dyn Serializer>,
    identity: &Arc<ClientIdentity>,
    correlation_id: CorrelationId,
    sending_grain: GrainId,
    target_grain: GrainId,
    body: Vec<u8>,
) {
    let response = match serializer.deep_copy(&body) {
        Ok(copy) => Response::Value(copy),
        Err(err) => {
            log::warn!("deep copy of response body for {correlation_id:?} failed: {err}");
            Response::Exception(copy_failure_payload(&err))
        }
    };
    send_response(transport, identity, correlation_id, sending_grain, target_grain, response);
}

/// Deep-copies the exception payload and sends an exception response, or a
/// copy-failure exception response if that copy itself fails (spec.md §4.7).
async fn emit_exception(
    transport: &Arc<dyn Transport>,
    serializer: &Arc<dyn Serializer>,
    identity: &Arc<ClientIdentity>,
    correlation_id: CorrelationId,
    sending_grain: GrainId,
    target_grain: GrainId,
    err: ClientError,
) {
    let payload = err.to_string().into_bytes();
    let response = match serializer.deep_copy(&payload) {
        Ok(copy) => Response::Exception(copy),
        Err(copy_err) => {
            log::warn!("deep copy of exception payload for {correlation_id:?} failed: {copy_err}");
            Response::Exception(copy_failure_payload(&copy_err))
        }
    };
    send_response(transport, identity, correlation_id, sending_grain, target_grain, response);
}

fn copy_failure_payload(err: &ClientError) -> Vec<u8> {
    format!("serialization failure: {err}").into_bytes()
}

fn send_response(
    transport: &Arc<dyn Transport>,
    identity: &Arc<ClientIdentity>,
    correlation_id: CorrelationId,
    sending_grain: GrainId,
    target_grain: GrainId,
    response: Response,
) {
    let mut msg = Message::new_request(
        correlation_id,
        sending_grain,
        identity.self_activation_id,
        target_grain,
        Direction::Response,
        Vec::new(),
    );
    msg.response = Some(response);
    if let Err(err) = transport.send_message(msg) {
        log::warn!("failed to send response for {correlation_id:?}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ActivationId;
    use crate::local_object::Invoker;
    use crate::message::CorrelationId;
    use crate::serializer::StandardSerializer;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct RecordingTransport {
        sent: Mutex<Vec<Message>>,
        unregistered: Mutex<Vec<GrainId>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                unregistered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn start(&self) -> Result<(), ClientError> {
            Ok(())
        }
        async fn prepare_to_stop(&self) {}
        async fn stop(&self) {}
        fn send_message(&self, msg: Message) -> Result<(), ClientError> {
            self.sent.lock().unwrap().push(msg);
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
        async fn unregister_observer(&self, grain_id: GrainId) -> Result<(), ClientError> {
            self.unregistered.lock().unwrap().push(grain_id);
            Ok(())
        }
        async fn get_type_code_map(&self) -> Result<crate::transport::InterfaceMap, ClientError> {
            Ok(Default::default())
        }
        fn my_address(&self) -> Option<String> {
            None
        }
    }

    struct OrderRecordingInvoker {
        order: Arc<Mutex<Vec<u8>>>,
    }

    #[async_trait]
    impl Invoker for OrderRecordingInvoker {
        async fn invoke(&self, _target: Arc<dyn Any + Send + Sync>, msg: Message) -> Result<Vec<u8>, ClientError> {
            self.order.lock().unwrap().push(msg.body[0]);
            Ok(msg.body)
        }
    }

    fn request(target: GrainId, tag: u8) -> Message {
        Message::new_request(
            CorrelationId::generate(),
            GrainId::new_client_target(),
            ActivationId::new(),
            target,
            Direction::OneWay,
            vec![tag],
        )
    }

    #[tokio::test]
    async fn three_enqueued_messages_invoke_in_order_non_overlapping() {
        let local_objects = LocalObjectRegistry::new();
        let owner: Arc<dyn Any + Send + Sync> = Arc::new(7u32);
        let grain_id = GrainId::new_client_target();
        let order = Arc::new(Mutex::new(Vec::new()));
        local_objects.register(
            grain_id,
            Arc::downgrade(&owner),
            Arc::new(OrderRecordingInvoker { order: order.clone() }),
        );

        let transport: Arc<dyn Transport> = Arc::new(RecordingTransport::new());
        let serializer: Arc<dyn Serializer> = Arc::new(StandardSerializer);
        let identity = Arc::new(ClientIdentity::allocate());

        dispatch(request(grain_id, b'A'), &local_objects, transport.clone(), serializer.clone(), identity.clone());
        dispatch(request(grain_id, b'B'), &local_objects, transport.clone(), serializer.clone(), identity.clone());
        dispatch(request(grain_id, b'C'), &local_objects, transport, serializer, identity);

        // Give the spawned drain task a chance to finish draining all three.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if order.lock().unwrap().len() == 3 {
                break;
            }
        }
        assert_eq!(*order.lock().unwrap(), vec![b'A', b'B', b'C']);
    }

    #[tokio::test]
    async fn collected_target_evicts_and_unregisters_without_invoking() {
        let local_objects = LocalObjectRegistry::new();
        let grain_id = GrainId::new_client_target();
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let owner: Arc<dyn Any + Send + Sync> = Arc::new(7u32);
            local_objects.register(
                grain_id,
                Arc::downgrade(&owner),
                Arc::new(OrderRecordingInvoker { order: order.clone() }),
            );
        } // owner dropped here

        let transport = Arc::new(RecordingTransport::new());
        let transport_dyn: Arc<dyn Transport> = transport.clone();
        let serializer: Arc<dyn Serializer> = Arc::new(StandardSerializer);
        let identity = Arc::new(ClientIdentity::allocate());

        dispatch(request(grain_id, b'A'), &local_objects, transport_dyn, serializer, identity);
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if !transport.unregistered.lock().unwrap().is_empty() {
                break;
            }
        }
        assert!(order.lock().unwrap().is_empty());
        assert_eq!(transport.unregistered.lock().unwrap().as_slice(), &[grain_id]);
        assert!(local_objects.lookup(grain_id).is_none());
    }
}
