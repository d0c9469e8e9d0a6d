//! Inbound message pump (C5, spec.md §4.5): a single long-running worker
//! task that drains the transport's application-message queue and routes
//! each message either to the callback registry (responses) or to the
//! local object registry for dispatch (requests/one-way messages).

use crate::callback_registry::CallbackRegistry;
use crate::identity::ClientIdentity;
use crate::local_object::LocalObjectRegistry;
use crate::message::Direction;
use crate::object_pump;
use crate::serializer::Serializer;
use crate::transport::{MessageCategory, Transport};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawns the inbound pump on its own worker task. Returns the handle so
/// the lifecycle manager can join it during `Reset`; shutdown is driven by
/// `cancel`, not by dropping the handle.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    transport: Arc<dyn Transport>,
    callbacks: CallbackRegistry,
    local_objects: LocalObjectRegistry,
    serializer: Arc<dyn Serializer>,
    identity: Arc<ClientIdentity>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(msg) = transport
                .wait_message(MessageCategory::Application, cancel.clone())
                .await
            else {
                log::debug!("inbound pump stopping: cancellation observed");
                break;
            };
            match msg.direction {
                Direction::Response => {
                    let Some(response) = msg.response else {
                        log::warn!("dropping response message {:?} with no response payload", msg.id);
                        continue;
                    };
                    callbacks.complete(msg.id, response);
                }
                Direction::Request | Direction::OneWay => {
                    object_pump::dispatch(
                        msg,
                        &local_objects,
                        transport.clone(),
                        serializer.clone(),
                        identity.clone(),
                    );
                }
            }
        }
    })
}
