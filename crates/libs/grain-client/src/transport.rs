//! The proxied message transport — out of scope per spec.md §1, consumed
//! only through this trait (spec.md §6). Object-safe via `async_trait` so
//! the runtime can hold `Arc<dyn Transport>` and tests can swap in a fake
//! (grounded in the corpus's trait-object component pattern for
//! testability, e.g. `message_router::traits::*` in the retrieval pack).

use crate::error::ClientError;
use crate::identity::GrainId;
use crate::message::Message;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Which queue `wait_message` should drain. The client runtime only ever
/// asks for `Application`; other categories exist on the wire but are
/// handled by server-side runtimes, not this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MessageCategory {
    Application,
}

/// Interface-id -> type-name map fetched once from the gateway during
/// `Start` (spec.md §4.8, §6).
pub type InterfaceMap = BTreeMap<u32, String>;

/// Narrow interface to the connection-management/framing layer. Real
/// implementations own sockets, reconnection, and wire codecs; this crate
/// never does.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self) -> Result<(), ClientError>;
    async fn prepare_to_stop(&self);
    async fn stop(&self);

    /// Hands off ownership of `msg` to the transport for delivery.
    fn send_message(&self, msg: Message) -> Result<(), ClientError>;

    /// Blocks until a message in `category` arrives or `cancel` fires, in
    /// which case it returns `None` (spec.md §4.5).
    async fn wait_message(
        &self,
        category: MessageCategory,
        cancel: CancellationToken,
    ) -> Option<Message>;

    async fn register_observer(&self, grain_id: GrainId) -> Result<(), ClientError>;
    async fn unregister_observer(&self, grain_id: GrainId) -> Result<(), ClientError>;

    /// Fetches the interface/type-code map from the gateway. Called once,
    /// blocking, during `Start` (spec.md §4.8).
    async fn get_type_code_map(&self) -> Result<InterfaceMap, ClientError>;

    /// The transport's locally bound endpoint, available only after
    /// `start()` has completed.
    fn my_address(&self) -> Option<String>;
}
