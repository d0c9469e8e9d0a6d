//! Payload (de)duplication at hand-off boundaries (spec.md §6). Request and
//! response bodies cross between caller-owned buffers and the outbound/
//! inbound paths; the `Serializer` is the seam where a deep copy is made so
//! neither side can observe mutation through a shared buffer.

use crate::config::ClientConfig;
use crate::error::ClientError;
use std::sync::Arc;

/// Deep-copies an opaque payload. Synchronous and infallible in the
/// standard implementation; the trait returns `Result` so providers that
/// validate or transcode on copy (SPEC_FULL.md §9.3 provider plugins) can
/// reject malformed bytes.
pub trait Serializer: Send + Sync {
    fn deep_copy(&self, bytes: &[u8]) -> Result<Vec<u8>, ClientError>;
}

/// The always-available fallback (`use_standard_serializer = true` in
/// [`crate::config::ClientConfig`]): a plain byte-for-byte clone.
#[derive(Default)]
pub struct StandardSerializer;

impl Serializer for StandardSerializer {
    fn deep_copy(&self, bytes: &[u8]) -> Result<Vec<u8>, ClientError> {
        Ok(bytes.to_vec())
    }
}

/// The non-standard flavor (`use_standard_serializer = false`): round-trips
/// the payload through a JSON `Value` so a malformed body is caught at the
/// hand-off boundary instead of silently propagating to the remote peer.
#[derive(Default)]
pub struct JsonValidatingSerializer;

impl Serializer for JsonValidatingSerializer {
    fn deep_copy(&self, bytes: &[u8]) -> Result<Vec<u8>, ClientError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|err| ClientError::SerializationFailure(err.to_string()))?;
        serde_json::to_vec(&value).map_err(|err| ClientError::SerializationFailure(err.to_string()))
    }
}

/// Picks the serializer flavor named by `config.use_standard_serializer`
/// (spec.md §6: "selects serializer flavor").
pub fn select(config: &ClientConfig) -> Arc<dyn Serializer> {
    if config.use_standard_serializer {
        Arc::new(StandardSerializer)
    } else {
        Arc::new(JsonValidatingSerializer)
    }
}
