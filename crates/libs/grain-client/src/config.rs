//! Recognized client configuration options (spec.md §6), plus the ambient
//! TOML-driven provider/plugin configuration layer (SPEC_FULL.md §9.3),
//! modeled the way the teacher's `ProfileSettings`/`RuntimeConfig` load
//! profile TOML files.

use crate::error::ClientError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
/// Applied instead of `response_timeout` when a debugger is attached at
/// init, so breakpoints don't spuriously trip request timeouts (§4.2).
const DEBUGGER_RESPONSE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MAX_RESEND_COUNT: u32 = 1;
const DEFAULT_GATEWAY_INIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Default)]
pub enum PreferredFamily {
    #[default]
    Unspecified,
    Ipv4,
    Ipv6,
}

/// Immutable once built. Constructed via [`ClientConfigBuilder`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub response_timeout: Duration,
    pub use_standard_serializer: bool,
    pub preferred_family: PreferredFamily,
    pub net_interface: Option<String>,
    pub provider_configurations: BTreeMap<String, toml::Value>,
    pub statistics_provider_name: Option<String>,
    pub dns_host_name: String,
    pub deployment_id: String,
    pub gateway_addresses: Vec<String>,
    pub gateway_init_timeout: Duration,
    pub max_resend_count: u32,
    pub statistics_flush_interval: Duration,
    pub statistics_bulk_cap: usize,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), ClientError> {
        if self.gateway_addresses.is_empty() {
            return Err(ClientError::ConfigInvalid(
                "at least one gateway address must be configured".to_string(),
            ));
        }
        if self.statistics_bulk_cap == 0 {
            return Err(ClientError::ConfigInvalid(
                "statistics_bulk_cap must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ClientConfigBuilder {
    response_timeout: Option<Duration>,
    debugger_attached: bool,
    use_standard_serializer: bool,
    preferred_family: PreferredFamily,
    net_interface: Option<String>,
    provider_configurations: BTreeMap<String, toml::Value>,
    statistics_provider_name: Option<String>,
    dns_host_name: Option<String>,
    deployment_id: Option<String>,
    gateway_addresses: Vec<String>,
    gateway_init_timeout: Option<Duration>,
    max_resend_count: Option<u32>,
    statistics_flush_interval: Option<Duration>,
    statistics_bulk_cap: Option<usize>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            response_timeout: None,
            debugger_attached: false,
            use_standard_serializer: true,
            preferred_family: PreferredFamily::default(),
            net_interface: None,
            provider_configurations: BTreeMap::new(),
            statistics_provider_name: None,
            dns_host_name: None,
            deployment_id: None,
            gateway_addresses: Vec::new(),
            gateway_init_timeout: None,
            max_resend_count: None,
            statistics_flush_interval: None,
            statistics_bulk_cap: None,
        }
    }
}

impl ClientConfigBuilder {
    pub fn response_timeout(mut self, value: Duration) -> Self {
        self.response_timeout = Some(value);
        self
    }

    /// If a debugger is attached, the configured `ResponseTimeout` is
    /// replaced by a long default (§4.2) so the caller never sees spurious
    /// timeouts while stepping through code in a debugger.
    pub fn debugger_attached(mut self, attached: bool) -> Self {
        self.debugger_attached = attached;
        self
    }

    pub fn use_standard_serializer(mut self, value: bool) -> Self {
        self.use_standard_serializer = value;
        self
    }

    pub fn preferred_family(mut self, value: PreferredFamily) -> Self {
        self.preferred_family = value;
        self
    }

    pub fn net_interface(mut self, value: impl Into<String>) -> Self {
        self.net_interface = Some(value.into());
        self
    }

    pub fn provider_configuration(mut self, name: impl Into<String>, value: toml::Value) -> Self {
        self.provider_configurations.insert(name.into(), value);
        self
    }

    pub fn statistics_provider_name(mut self, value: impl Into<String>) -> Self {
        self.statistics_provider_name = Some(value.into());
        self
    }

    pub fn dns_host_name(mut self, value: impl Into<String>) -> Self {
        self.dns_host_name = Some(value.into());
        self
    }

    pub fn deployment_id(mut self, value: impl Into<String>) -> Self {
        self.deployment_id = Some(value.into());
        self
    }

    pub fn gateway_address(mut self, value: impl Into<String>) -> Self {
        self.gateway_addresses.push(value.into());
        self
    }

    pub fn gateway_addresses(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.gateway_addresses.extend(values);
        self
    }

    pub fn gateway_init_timeout(mut self, value: Duration) -> Self {
        self.gateway_init_timeout = Some(value);
        self
    }

    pub fn max_resend_count(mut self, value: u32) -> Self {
        self.max_resend_count = Some(value);
        self
    }

    pub fn statistics_flush_interval(mut self, value: Duration) -> Self {
        self.statistics_flush_interval = Some(value);
        self
    }

    pub fn statistics_bulk_cap(mut self, value: usize) -> Self {
        self.statistics_bulk_cap = Some(value);
        self
    }

    /// Merges in a `[provider_configurations]`-shaped TOML document, the
    /// ambient plugin/provider configuration layer (SPEC_FULL.md §9.3).
    pub fn merge_toml(mut self, document: &str) -> Result<Self, ClientError> {
        let parsed: RawProviderDocument = toml::from_str(document)
            .map_err(|err| ClientError::ConfigInvalid(err.to_string()))?;
        for (name, value) in parsed.provider_configurations {
            self.provider_configurations.insert(name, value);
        }
        if let Some(name) = parsed.statistics_provider_name {
            self.statistics_provider_name = Some(name);
        }
        Ok(self)
    }

    pub fn build(self) -> Result<ClientConfig, ClientError> {
        let response_timeout = if self.debugger_attached {
            DEBUGGER_RESPONSE_TIMEOUT
        } else {
            self.response_timeout.unwrap_or(DEFAULT_RESPONSE_TIMEOUT)
        };
        let dns_host_name = self.dns_host_name.unwrap_or_else(|| local_host_name());
        let config = ClientConfig {
            response_timeout,
            use_standard_serializer: self.use_standard_serializer,
            preferred_family: self.preferred_family,
            net_interface: self.net_interface,
            provider_configurations: self.provider_configurations,
            statistics_provider_name: self.statistics_provider_name,
            dns_host_name,
            deployment_id: self.deployment_id.unwrap_or_else(|| "default-deployment".to_string()),
            gateway_addresses: self.gateway_addresses,
            gateway_init_timeout: self.gateway_init_timeout.unwrap_or(DEFAULT_GATEWAY_INIT_TIMEOUT),
            max_resend_count: self.max_resend_count.unwrap_or(DEFAULT_MAX_RESEND_COUNT),
            statistics_flush_interval: self
                .statistics_flush_interval
                .unwrap_or(Duration::from_secs(30)),
            statistics_bulk_cap: self.statistics_bulk_cap.unwrap_or(200),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize, Default)]
struct RawProviderDocument {
    #[serde(default)]
    provider_configurations: BTreeMap<String, toml::Value>,
    #[serde(default)]
    statistics_provider_name: Option<String>,
}

fn local_host_name() -> String {
    // No portable stdlib hostname lookup; loopback is an acceptable,
    // deterministic default for a telemetry label when none is configured.
    IpAddr::from([127, 0, 0, 1]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_gateways_fails_validation() {
        let result = ClientConfig::builder().build();
        assert!(matches!(result, Err(ClientError::ConfigInvalid(_))));
    }

    #[test]
    fn debugger_attached_overrides_response_timeout() {
        let config = ClientConfig::builder()
            .gateway_address("gw-1:5000")
            .debugger_attached(true)
            .response_timeout(Duration::from_millis(50))
            .build()
            .expect("valid config");
        assert_eq!(config.response_timeout, DEBUGGER_RESPONSE_TIMEOUT);
    }

    #[test]
    fn provider_toml_merges_into_config() {
        let toml_doc = r#"
            statistics_provider_name = "table-stats"

            [provider_configurations.reminders]
            enabled = true
        "#;
        let config = ClientConfig::builder()
            .gateway_address("gw-1:5000")
            .merge_toml(toml_doc)
            .expect("parse")
            .build()
            .expect("valid config");
        assert_eq!(config.statistics_provider_name.as_deref(), Some("table-stats"));
        assert!(config.provider_configurations.contains_key("reminders"));
    }
}
