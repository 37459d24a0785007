//! Configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::mask_connection_string;
use crate::core::provider::ProviderIdentity;
use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Handle used when the caller does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_instance: Option<String>,

    /// Logical database instances, addressed by name.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: InstanceConfig) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_instance = Some(name.into());
        self
    }

    /// Find an instance by name.
    pub fn instance(&self, name: &str) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// The configured default instance, or the only instance when exactly one exists.
    pub fn default_instance_name(&self) -> Option<&str> {
        match (&self.default_instance, self.instances.as_slice()) {
            (Some(name), _) => Some(name.as_str()),
            (None, [only]) => Some(only.name.as_str()),
            _ => None,
        }
    }
}

/// One logical database instance.
///
/// Exactly one of `connection_string` (single tenancy) and `shards`
/// (distributed tenancy) is set.
#[derive(Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Logical handle.
    pub name: String,

    /// Provider type (`mssql`, `postgres`, `sqlite`, ...).
    #[serde(rename = "type")]
    pub provider_type: String,

    /// Connection string for a single-tenancy instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    /// Shards for a distributed instance, in routing order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shards: Vec<ShardConfig>,

    /// Allow shards to override the provider type (default: false).
    #[serde(default)]
    pub allow_mixed_providers: bool,
}

impl InstanceConfig {
    /// Single-tenancy instance.
    pub fn single(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider_type: provider_type.into(),
            connection_string: Some(connection_string.into()),
            shards: Vec::new(),
            allow_mixed_providers: false,
        }
    }

    /// Distributed instance over `shards`.
    pub fn distributed(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        shards: Vec<ShardConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            provider_type: provider_type.into(),
            connection_string: None,
            shards,
            allow_mixed_providers: false,
        }
    }

    pub fn allow_mixed_providers(mut self) -> Self {
        self.allow_mixed_providers = true;
        self
    }

    pub fn is_distributed(&self) -> bool {
        !self.shards.is_empty()
    }

    /// Provider identity for the instance's `type`.
    pub fn provider(&self) -> Result<ProviderIdentity> {
        ProviderIdentity::from_type_name(&self.provider_type)
    }
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("name", &self.name)
            .field("provider_type", &self.provider_type)
            .field(
                "connection_string",
                &self.connection_string.as_deref().map(mask_connection_string),
            )
            .field("shards", &self.shards)
            .field("allow_mixed_providers", &self.allow_mixed_providers)
            .finish()
    }
}

/// One shard of a distributed instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Routing key (default: `shard-<index>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Provider type override; requires `allow_mixed_providers`.
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_type: Option<String>,

    /// Connection string.
    pub connection_string: String,
}

impl ShardConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            key: None,
            provider_type: None,
            connection_string: connection_string.into(),
        }
    }

    pub fn keyed(key: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(connection_string)
        }
    }

    pub fn with_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = Some(provider_type.into());
        self
    }

    /// Routing key, defaulting to `shard-<index>`.
    pub fn key_or_default(&self, index: usize) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("shard-{}", index))
    }

    /// Provider type, falling back to the instance's.
    pub fn provider_type_or<'a>(&'a self, instance_type: &'a str) -> &'a str {
        self.provider_type.as_deref().unwrap_or(instance_type)
    }
}

impl fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardConfig")
            .field("key", &self.key)
            .field("provider_type", &self.provider_type)
            .field(
                "connection_string",
                &mask_connection_string(&self.connection_string),
            )
            .finish()
    }
}
