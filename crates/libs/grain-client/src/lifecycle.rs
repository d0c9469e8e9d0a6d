//! Lifecycle manager (C7, spec.md §4.8): owns identity, config, the
//! transport, and both registries; enforces "one active runtime per
//! process" (invariant 6); and tears everything down tolerantly on
//! `Reset`, wrapping each step so one failure never prevents the rest.

use crate::callback_registry::CallbackRegistry;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gateway::GatewayListProvider;
use crate::identity::{ActivationId, ClientIdentity, GrainId, SiloAddress};
use crate::inbound;
use crate::local_object::{Invoker, LocalObjectRegistry};
use crate::outbound::OutboundPath;
use crate::plugins::PluginRegistry;
use crate::serializer::Serializer;
use crate::statistics::{CounterSource, NoopCounterSource, StatisticsAdapter, StatisticsPublisher};
use crate::transport::Transport;
use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Narrow stub the lifecycle calls into during `Start` without
/// implementing its body (spec.md §1 Out of scope; SPEC_FULL.md Non-goals:
/// "a one-method stub trait sufficient for the lifecycle to call into
/// during Start, per §4.8, without implementing their bodies").
#[async_trait]
pub trait StreamingProviderManager: Send + Sync {
    async fn initialize(&self) -> Result<(), ClientError>;
}

/// The no-op default: this crate implements no streaming providers.
#[derive(Default)]
pub struct NoopStreamingProviderManager;

#[async_trait]
impl StreamingProviderManager for NoopStreamingProviderManager {
    async fn initialize(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Handle returned by [`GrainClient::create_object_reference`]; the only
/// thing a caller needs to invoke [`GrainClient::delete_object_reference`]
/// later.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LocalObjectRef {
    pub grain_id: GrainId,
}

/// Collaborators supplied at construction. Every field is an external
/// seam per spec.md §6 — this crate never provides a "real" transport,
/// gateway provider, or statistics publisher, only the trait boundaries.
pub struct GrainClientDeps {
    pub transport: Arc<dyn Transport>,
    pub gateway_provider: Arc<dyn GatewayListProvider>,
    pub serializer: Arc<dyn Serializer>,
    pub streaming: Arc<dyn StreamingProviderManager>,
    pub statistics_publisher: Option<Arc<dyn StatisticsPublisher>>,
    pub counter_source: Arc<dyn CounterSource>,
}

impl GrainClientDeps {
    /// Collaborators suitable for tests and minimal deployments: no
    /// statistics publisher configured, a no-op streaming manager, and the
    /// serializer flavor named by `config.use_standard_serializer` (§6).
    pub fn new(
        transport: Arc<dyn Transport>,
        gateway_provider: Arc<dyn GatewayListProvider>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            transport,
            gateway_provider,
            serializer: crate::serializer::select(config),
            streaming: Arc::new(NoopStreamingProviderManager),
            statistics_publisher: None,
            counter_source: Arc::new(NoopCounterSource),
        }
    }
}

struct Inner {
    identity: Arc<ClientIdentity>,
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    gateway_provider: Arc<dyn GatewayListProvider>,
    streaming: Arc<dyn StreamingProviderManager>,
    statistics_publisher: Option<Arc<dyn StatisticsPublisher>>,
    counter_source: Arc<dyn CounterSource>,
    callbacks: CallbackRegistry,
    local_objects: LocalObjectRegistry,
    outbound: OutboundPath,
    cancel: CancellationToken,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
    statistics_flush_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Best-effort: releases the cancellation token so a leaked pump
        // task observes shutdown even if `reset`/`dispose` was never
        // called explicitly (spec.md §4.8 Dispose).
        self.cancel.cancel();
    }
}

static CURRENT_RUNTIME: OnceLock<Mutex<Option<Weak<Inner>>>> = OnceLock::new();

fn singleton_slot() -> &'static Mutex<Option<Weak<Inner>>> {
    CURRENT_RUNTIME.get_or_init(|| Mutex::new(None))
}

/// The client-side runtime facade (C1–C8 wired together). Cheap to clone:
/// every clone shares the same underlying state via `Arc`.
#[derive(Clone)]
pub struct GrainClient {
    inner: Arc<Inner>,
}

impl GrainClient {
    /// Constructor (spec.md §4.8 Init): validates collaborators, allocates
    /// identity, resolves the gateway list within `gateway_init_timeout`,
    /// and wires the statistics provider (either supplied directly or
    /// resolved from `plugins` by name). A resolution failure here is the
    /// "ConstructorReset" path: nothing long-lived has been acquired yet,
    /// so the error simply propagates without any teardown to perform.
    pub async fn init(
        config: ClientConfig,
        deps: GrainClientDeps,
        plugins: &PluginRegistry,
    ) -> Result<Self, ClientError> {
        let config = Arc::new(config);

        let gateways = tokio::time::timeout(
            config.gateway_init_timeout,
            deps.gateway_provider.gateway_addresses(),
        )
        .await
        .map_err(|_| ClientError::ConfigInvalid("timed out resolving the gateway list".to_string()))??;
        if gateways.is_empty() {
            return Err(ClientError::ConfigInvalid(
                "gateway list provider returned no gateways".to_string(),
            ));
        }

        let statistics_publisher = match (deps.statistics_publisher.clone(), &config.statistics_provider_name) {
            (Some(publisher), _) => Some(publisher),
            (None, Some(name)) => match plugins.resolve_statistics_provider(name) {
                Some(resolved) => Some(resolved),
                None => {
                    return Err(ClientError::ConfigInvalid(format!(
                        "no statistics provider registered under {name:?}"
                    )));
                }
            },
            (None, None) => None,
        };

        let identity = Arc::new(ClientIdentity::allocate());
        let callbacks = CallbackRegistry::new();
        let local_objects = LocalObjectRegistry::new();
        let outbound = OutboundPath::new(
            identity.clone(),
            config.clone(),
            deps.transport.clone(),
            deps.serializer.clone(),
            callbacks.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                identity,
                config,
                transport: deps.transport,
                gateway_provider: deps.gateway_provider,
                streaming: deps.streaming,
                statistics_publisher,
                counter_source: deps.counter_source,
                callbacks,
                local_objects,
                outbound,
                cancel: CancellationToken::new(),
                pump_handle: Mutex::new(None),
                statistics_flush_handle: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Start (spec.md §4.8): claims the process-wide singleton slot
    /// (invariant 6), starts the transport, derives `self_address`, fetches
    /// the interface/type-code map, initializes streaming, and launches the
    /// inbound pump plus (if configured) the statistics flush loop.
    pub async fn start(&self) -> Result<(), ClientError> {
        self.claim_singleton()?;

        self.inner.transport.start().await?;
        let endpoint = self.inner.transport.my_address().unwrap_or_default();
        self.inner.identity.bind_self_address(endpoint);

        self.inner.transport.get_type_code_map().await?;
        self.inner.streaming.initialize().await?;

        let pump_handle = inbound::spawn(
            self.inner.transport.clone(),
            self.inner.callbacks.clone(),
            self.inner.local_objects.clone(),
            self.inner.outbound.serializer(),
            self.inner.identity.clone(),
            self.inner.cancel.clone(),
        );
        *self.inner.pump_handle.lock().expect("pump handle lock poisoned") = Some(pump_handle);

        if let Some(publisher) = self.inner.statistics_publisher.clone() {
            publisher.init_table().await?;
            let flush_handle = self.spawn_statistics_flush_loop(publisher);
            *self.inner.statistics_flush_handle.lock().expect("flush handle lock poisoned") = Some(flush_handle);
        }

        Ok(())
    }

    fn claim_singleton(&self) -> Result<(), ClientError> {
        let mut guard = singleton_slot().lock().expect("runtime singleton lock poisoned");
        if let Some(existing) = guard.as_ref() {
            if existing.upgrade().is_some() {
                return Err(ClientError::AlreadyRunning);
            }
        }
        *guard = Some(Arc::downgrade(&self.inner));
        Ok(())
    }

    fn spawn_statistics_flush_loop(&self, publisher: Arc<dyn StatisticsPublisher>) -> JoinHandle<()> {
        let counter_source = self.inner.counter_source.clone();
        let interval_duration = self.inner.config.statistics_flush_interval;
        let deployment_id = self.inner.config.deployment_id.clone();
        let client_epoch = (self.inner.identity.client_guid.0 & u128::from(u64::MAX)) as u64;
        let bulk_cap = self.inner.config.statistics_bulk_cap;
        tokio::spawn(async move {
            let adapter = StatisticsAdapter::new(publisher, deployment_id, Some(client_epoch), bulk_cap);
            let mut ticker = tokio::time::interval(interval_duration);
            loop {
                ticker.tick().await;
                let samples = counter_source.sample();
                if samples.is_empty() {
                    continue;
                }
                if let Err(err) = adapter.publish(OffsetDateTime::now_utc(), samples).await {
                    log::warn!("statistics flush failed: {err}");
                }
            }
        })
    }

    /// Reset (spec.md §4.8): signals pump shutdown, tears down the
    /// transport, stops statistics, and clears the singleton slot. Every
    /// step is independently guarded so one failure never prevents the
    /// rest from running.
    pub async fn reset(&self) {
        self.inner.cancel.cancel();

        if let Some(handle) = self.inner.pump_handle.lock().expect("pump handle lock poisoned").take() {
            if let Err(err) = handle.await {
                log::warn!("inbound pump task join failed: {err}");
            }
        }

        self.inner.transport.prepare_to_stop().await;
        self.inner.transport.stop().await;

        if let Some(handle) = self
            .inner
            .statistics_flush_handle
            .lock()
            .expect("flush handle lock poisoned")
            .take()
        {
            handle.abort();
        }

        let mut guard = singleton_slot().lock().expect("runtime singleton lock poisoned");
        if let Some(existing) = guard.as_ref() {
            if let Some(strong) = existing.upgrade() {
                if Arc::ptr_eq(&strong, &self.inner) {
                    *guard = None;
                }
            } else {
                *guard = None;
            }
        }
    }

    /// Dispose (spec.md §4.8): idempotent; a second call is a no-op.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reset().await;
    }

    /// Registers `object` as a local callback target reachable by remote
    /// grains, returning a reference bound to a freshly allocated
    /// client-addressable grain id (spec.md §4.3).
    pub async fn create_object_reference(
        &self,
        object: Arc<dyn Any + Send + Sync>,
        invoker: Arc<dyn Invoker>,
    ) -> Result<LocalObjectRef, ClientError> {
        let grain_id = GrainId::new_client_target();
        self.inner.transport.register_observer(grain_id).await?;
        self.inner
            .local_objects
            .register(grain_id, Arc::downgrade(&object), invoker);
        Ok(LocalObjectRef { grain_id })
    }

    /// Removes a local object reference (spec.md §4.3). Fails with
    /// [`ClientError::NotLocal`] if the reference isn't registered.
    pub async fn delete_object_reference(&self, reference: LocalObjectRef) -> Result<(), ClientError> {
        if self.inner.local_objects.lookup(reference.grain_id).is_none() {
            return Err(ClientError::NotLocal(reference.grain_id));
        }
        self.inner.local_objects.unregister(reference.grain_id);
        self.inner.transport.unregister_observer(reference.grain_id).await
    }

    /// Sends a two-way request and awaits the response (spec.md §4.4).
    /// `generic_grain_type` and `debug_context` are stamped onto the outbound
    /// message only when supplied (§4.4 steps 4-5).
    pub async fn call(
        &self,
        target_grain: GrainId,
        target_silo: Option<SiloAddress>,
        body: Vec<u8>,
        generic_grain_type: Option<String>,
        debug_context: Option<String>,
    ) -> Result<Vec<u8>, ClientError> {
        self.inner
            .outbound
            .call(target_grain, target_silo, body, generic_grain_type, debug_context)
            .await
    }

    /// Sends a one-way message with no registered callback (spec.md §4.4).
    /// `generic_grain_type` and `debug_context` are stamped onto the outbound
    /// message only when supplied (§4.4 steps 4-5).
    pub fn send_one_way(
        &self,
        target_grain: GrainId,
        target_silo: Option<SiloAddress>,
        body: Vec<u8>,
        generic_grain_type: Option<String>,
        debug_context: Option<String>,
    ) -> Result<(), ClientError> {
        self.inner
            .outbound
            .send_one_way(target_grain, target_silo, body, generic_grain_type, debug_context)
    }

    pub fn self_activation_id(&self) -> ActivationId {
        self.inner.identity.self_activation_id
    }

    // Server-only operations (spec.md §7 InvalidContext): the client never
    // hosts activations, so each of these fails unconditionally.

    pub fn get_silo_status(&self) -> Result<(), ClientError> {
        Err(ClientError::InvalidContext("GetSiloStatus"))
    }

    pub fn deactivate_on_idle(&self, _grain_id: GrainId) -> Result<(), ClientError> {
        Err(ClientError::InvalidContext("DeactivateOnIdle"))
    }

    pub fn capture_runtime_environment(&self) -> Result<(), ClientError> {
        Err(ClientError::InvalidContext("CaptureRuntimeEnvironment"))
    }

    pub fn get_invoker(&self, _grain_id: GrainId) -> Result<(), ClientError> {
        Err(ClientError::InvalidContext("GetInvoker"))
    }

    pub fn process_outgoing_message(&self) -> Result<(), ClientError> {
        Err(ClientError::InvalidContext("ProcessOutgoingMessage"))
    }

    pub fn process_incoming_message(&self) -> Result<(), ClientError> {
        Err(ClientError::InvalidContext("ProcessIncomingMessage"))
    }

    pub fn reminder_service(&self) -> Result<(), ClientError> {
        Err(ClientError::InvalidContext("reminder service"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::StaticGatewayListProvider;
    use crate::identity::GrainId;
    use crate::local_object::Invoker;
    use crate::message::{Direction, Message, Response};
    use crate::transport::MessageCategory;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    struct LoopbackTransport {
        inbox: AsyncMutex<Vec<Message>>,
        notify: tokio::sync::Notify,
        sent: Mutex<Vec<Message>>,
        registered: Mutex<Vec<GrainId>>,
        unregistered: Mutex<Vec<GrainId>>,
    }

    impl LoopbackTransport {
        fn new() -> Self {
            Self {
                inbox: AsyncMutex::new(Vec::new()),
                notify: tokio::sync::Notify::new(),
                sent: Mutex::new(Vec::new()),
                registered: Mutex::new(Vec::new()),
                unregistered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn start(&self) -> Result<(), ClientError> {
            Ok(())
        }
        async fn prepare_to_stop(&self) {}
        async fn stop(&self) {}
        fn send_message(&self, msg: Message) -> Result<(), ClientError> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }
        async fn wait_message(&self, _category: MessageCategory, cancel: CancellationToken) -> Option<Message> {
            loop {
                if let Some(msg) = self.inbox.lock().await.pop() {
                    return Some(msg);
                }
                tokio::select! {
                    _ = self.notify.notified() => continue,
                    _ = cancel.cancelled() => return None,
                }
            }
        }
        async fn register_observer(&self, grain_id: GrainId) -> Result<(), ClientError> {
            self.registered.lock().unwrap().push(grain_id);
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
            Some("127.0.0.1:4000".to_string())
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig::builder()
            .gateway_address("gw-1:5000")
            .response_timeout(Duration::from_secs(5))
            .build()
            .expect("valid config")
    }

    async fn test_deps() -> (Arc<LoopbackTransport>, GrainClientDeps) {
        let transport = Arc::new(LoopbackTransport::new());
        let gateway_provider = Arc::new(StaticGatewayListProvider::new(vec!["gw-1:5000".to_string()]));
        let deps = GrainClientDeps::new(transport.clone(), gateway_provider, &test_config());
        (transport, deps)
    }

    #[tokio::test]
    async fn second_concurrent_start_fails_already_running() {
        let (_t1, deps1) = test_deps().await;
        let client1 = GrainClient::init(test_config(), deps1, &PluginRegistry::new())
            .await
            .expect("init");
        client1.start().await.expect("first start succeeds");

        let (_t2, deps2) = test_deps().await;
        let client2 = GrainClient::init(test_config(), deps2, &PluginRegistry::new())
            .await
            .expect("init");
        let result = client2.start().await;
        assert!(matches!(result, Err(ClientError::AlreadyRunning)));

        client1.reset().await;
    }

    #[tokio::test]
    async fn reset_frees_singleton_slot_for_a_later_start() {
        let (_t1, deps1) = test_deps().await;
        let client1 = GrainClient::init(test_config(), deps1, &PluginRegistry::new())
            .await
            .expect("init");
        client1.start().await.expect("start");
        client1.reset().await;

        let (_t2, deps2) = test_deps().await;
        let client2 = GrainClient::init(test_config(), deps2, &PluginRegistry::new())
            .await
            .expect("init");
        client2.start().await.expect("slot is free after reset");
        client2.reset().await;
    }

    #[tokio::test]
    async fn self_address_is_bound_after_start() {
        let (_t, deps) = test_deps().await;
        let client = GrainClient::init(test_config(), deps, &PluginRegistry::new())
            .await
            .expect("init");
        assert!(client.identity().self_address().is_none());
        client.start().await.expect("start");
        assert!(client.identity().self_address().is_some());
        client.reset().await;
    }

    struct EchoInvoker {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Invoker for EchoInvoker {
        async fn invoke(&self, _target: Arc<dyn Any + Send + Sync>, msg: Message) -> Result<Vec<u8>, ClientError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(msg.body)
        }
    }

    #[tokio::test]
    async fn create_and_delete_object_reference_round_trips_through_transport() {
        let (transport, deps) = test_deps().await;
        let client = GrainClient::init(test_config(), deps, &PluginRegistry::new())
            .await
            .expect("init");
        let object: Arc<dyn Any + Send + Sync> = Arc::new(EchoInvoker { calls: Arc::new(AtomicUsize::new(0)) });
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = Arc::new(EchoInvoker { calls: calls.clone() });
        let reference = client
            .create_object_reference(object, invoker)
            .await
            .expect("create reference");
        assert_eq!(transport.registered.lock().unwrap().as_slice(), &[reference.grain_id]);

        client.delete_object_reference(reference).await.expect("delete reference");
        assert_eq!(transport.unregistered.lock().unwrap().as_slice(), &[reference.grain_id]);

        let missing = client.delete_object_reference(reference).await;
        assert!(matches!(missing, Err(ClientError::NotLocal(_))));
    }

    #[tokio::test]
    async fn two_way_call_round_trips_through_the_inbound_pump() {
        let (transport, deps) = test_deps().await;
        let client = GrainClient::init(test_config(), deps, &PluginRegistry::new())
            .await
            .expect("init");
        client.start().await.expect("start");

        let target = GrainId::new_client_target();
        let client_for_call = client.clone();
        let call = tokio::spawn(async move { client_for_call.call(target, None, vec![5, 6, 7], None, None).await });

        // Wait for the outbound message to hit the transport, then feed a
        // matching response back in through the inbound pump as a real
        // gateway round-trip would.
        let sent_id = loop {
            tokio::task::yield_now().await;
            if let Some(msg) = transport.sent.lock().unwrap().first() {
                break msg.id;
            }
        };
        let mut response = Message::new_request(
            sent_id,
            target,
            client.self_activation_id(),
            client.identity().self_grain_id,
            Direction::Response,
            Vec::new(),
        );
        response.response = Some(Response::Value(vec![5, 6, 7]));
        {
            let mut inbox = transport.inbox.lock().await;
            inbox.push(response);
        }
        transport.notify.notify_one();

        let result = call.await.expect("call task joined").expect("call succeeds");
        assert_eq!(result, vec![5, 6, 7]);

        client.reset().await;
    }
}
