//! Static plugin/provider registry (spec.md §9 Design Notes: "In a target
//! ecosystem without dynamic loading, treat this as a static registry
//! populated at build time"). There is no assembly-scanning equivalent in a
//! statically linked Rust binary, so unlike the teacher's `ProviderConfigurations`-
//! driven dynamic discovery, statistics providers are registered by name up
//! front and resolved against [`crate::config::ClientConfig::statistics_provider_name`]
//! during [`crate::lifecycle::GrainClient::init`].

use crate::statistics::StatisticsPublisher;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a fresh provider instance on demand, mirroring the teacher's
/// pattern of constructing one provider instance per client rather than
/// sharing a process-wide singleton.
pub type StatisticsProviderFactory = fn() -> Arc<dyn StatisticsPublisher>;

/// Compile-time registry of named statistics providers.
#[derive(Default)]
pub struct PluginRegistry {
    statistics_providers: BTreeMap<&'static str, StatisticsProviderFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_statistics_provider(&mut self, name: &'static str, factory: StatisticsProviderFactory) {
        self.statistics_providers.insert(name, factory);
    }

    pub fn resolve_statistics_provider(&self, name: &str) -> Option<Arc<dyn StatisticsPublisher>> {
        self.statistics_providers.get(name).map(|factory| factory())
    }
}
