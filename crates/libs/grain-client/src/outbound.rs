//! Outbound request path (C4, spec.md §4.4): stamps, registers, and
//! dispatches a request, then awaits its completion (or timeout/resend
//! outcome) through the callback registry.

use crate::callback_registry::CallbackRegistry;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::identity::{ActivationId, ClientIdentity, GrainId, SiloAddress};
use crate::message::{CorrelationId, Direction, Message, RejectionKind, Response, MAXIMUM_CLOCK_SKEW};
use crate::serializer::Serializer;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Instant;

/// Ties together identity, config, transport, serializer, and the callback
/// registry to build, stamp, dispatch, and await outbound messages.
pub struct OutboundPath {
    identity: Arc<ClientIdentity>,
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn Serializer>,
    callbacks: CallbackRegistry,
}

impl OutboundPath {
    pub fn new(
        identity: Arc<ClientIdentity>,
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        serializer: Arc<dyn Serializer>,
        callbacks: CallbackRegistry,
    ) -> Self {
        Self {
            identity,
            config,
            transport,
            serializer,
            callbacks,
        }
    }

    /// Shares the serializer with collaborators that need deep-copy at a
    /// different hand-off boundary (the per-object pump's response path).
    pub fn serializer(&self) -> Arc<dyn Serializer> {
        self.serializer.clone()
    }

    #[allow(clippy::too_many_arguments)]
    fn stamp(
        &self,
        target_grain: GrainId,
        target_silo: Option<SiloAddress>,
        direction: Direction,
        body: Vec<u8>,
        generic_grain_type: Option<String>,
        debug_context: Option<String>,
    ) -> Result<Message, ClientError> {
        let body = self.serializer.deep_copy(&body)?;
        let mut msg = Message::new_request(
            CorrelationId::generate(),
            self.identity.self_grain_id,
            self.identity.self_activation_id,
            target_grain,
            direction,
            body,
        );
        msg.target_silo = target_silo;
        if let Some(silo) = target_silo {
            msg.target_activation = Some(ActivationId::for_system_target(target_grain, silo));
        }
        // §4.4 steps 4-5: stamp generic arguments / debug context only when
        // the caller actually supplied them.
        if let Some(generic_grain_type) = generic_grain_type {
            msg.generic_grain_type = Some(generic_grain_type);
        }
        if let Some(debug_context) = debug_context {
            msg.debug_context = Some(debug_context);
        }
        if msg.is_expirable(&self.config) {
            msg.expiration = Some(Instant::now() + self.config.response_timeout + MAXIMUM_CLOCK_SKEW);
        }
        Ok(msg)
    }

    /// Sends a two-way request and awaits its response, applying the
    /// resend/timeout policy transparently (§4.4). The remote outcome is
    /// mapped onto [`ClientError`] variants; a successful call returns the
    /// raw response body.
    #[allow(clippy::too_many_arguments)]
    pub async fn call(
        &self,
        target_grain: GrainId,
        target_silo: Option<SiloAddress>,
        body: Vec<u8>,
        generic_grain_type: Option<String>,
        debug_context: Option<String>,
    ) -> Result<Vec<u8>, ClientError> {
        let msg = self.stamp(
            target_grain,
            target_silo,
            Direction::Request,
            body,
            generic_grain_type,
            debug_context,
        )?;
        let rx = self
            .callbacks
            .register(self.config.clone(), self.transport.clone(), msg.clone());
        self.transport.send_message(msg)?;
        let response = rx
            .await
            .map_err(|_| ClientError::Stopped)??;
        match response {
            Response::Value(bytes) => Ok(bytes),
            Response::Exception(bytes) => Err(ClientError::RemoteException(bytes)),
            Response::Rejection(RejectionKind::DuplicateRequest) => Err(ClientError::Stopped),
            Response::Rejection(RejectionKind::GatewayTooBusy) => {
                Err(ClientError::Transport("gateway too busy".to_string()))
            }
            Response::Rejection(RejectionKind::Unrecoverable) => {
                Err(ClientError::Transport("unrecoverable gateway rejection".to_string()))
            }
        }
    }

    /// Sends a one-way message with no registered callback; the transport
    /// hand-off is the only failure mode.
    pub fn send_one_way(
        &self,
        target_grain: GrainId,
        target_silo: Option<SiloAddress>,
        body: Vec<u8>,
        generic_grain_type: Option<String>,
        debug_context: Option<String>,
    ) -> Result<(), ClientError> {
        let msg = self.stamp(
            target_grain,
            target_silo,
            Direction::OneWay,
            body,
            generic_grain_type,
            debug_context,
        )?;
        self.transport.send_message(msg)
    }
}
