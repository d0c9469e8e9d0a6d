use crate::identity::GrainId;
use crate::message::CorrelationId;

/// Errors surfaced across the client runtime boundary.
///
/// Every variant here corresponds to one of the error kinds enumerated in
/// the runtime's error handling design: construction failures, lifecycle
/// misuse, timeouts, remote exceptions, serialization failures, and the two
/// local-object-registry failure modes (not found, collected).
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("a grain client runtime is already active in this process")]
    AlreadyRunning,

    #[error("operation is not valid on a client runtime: {0}")]
    InvalidContext(&'static str),

    #[error("request {0:?} timed out")]
    Timeout(CorrelationId),

    #[error("remote exception")]
    RemoteException(Vec<u8>),

    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    #[error("no local object registered for {0:?}")]
    TargetNotFound(GrainId),

    #[error("local object {0:?} was garbage collected")]
    TargetCollected(GrainId),

    #[error("reference {0:?} is not a locally registered object")]
    NotLocal(GrainId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("client runtime was reset and can no longer accept work")]
    Stopped,
}
