//! Client-side runtime for a distributed actor ("grain") system: invoking
//! methods on remote grains, exposing local callback objects remote grains
//! can call back into, and publishing client telemetry. See `spec.md` at
//! the workspace root for the full specification this crate implements.
//!
//! The runtime never hosts activations; see [`error::ClientError::InvalidContext`]
//! and the stub methods on [`lifecycle::GrainClient`] for the server-only
//! operations this client refuses to perform.

pub mod callback_registry;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod inbound;
pub mod lifecycle;
pub mod local_object;
pub mod message;
pub mod object_pump;
pub mod plugins;
pub mod serializer;
pub mod statistics;
pub mod transport;

pub use config::{ClientConfig, ClientConfigBuilder, PreferredFamily};
pub use error::ClientError;
pub use gateway::{GatewayListProvider, StaticGatewayListProvider};
pub use identity::{ActivationId, ClientGuid, ClientIdentity, GrainId, SiloAddress};
pub use lifecycle::{GrainClient, GrainClientDeps, LocalObjectRef, NoopStreamingProviderManager, StreamingProviderManager};
pub use local_object::Invoker;
pub use message::{CorrelationId, Direction, Message, RejectionKind, Response};
pub use plugins::PluginRegistry;
pub use serializer::{select as select_serializer, JsonValidatingSerializer, Serializer, StandardSerializer};
pub use statistics::{CounterSample, CounterSource, NoopCounterSource, StatisticsPublisher, TelemetryRow};
pub use transport::{InterfaceMap, MessageCategory, Transport};
