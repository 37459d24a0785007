//! Tenancy resolution: logical handles to connection targets.
//!
//! A handle is either single-tenancy (one target) or distributed (an ordered
//! set of keyed shards). The [`TenancyResolver`] holds an immutable table
//! built from [`Config`]; [`reload`](TenancyResolver::reload) validates a new
//! configuration first and then swaps the whole table, so readers see either
//! the old or the new table and never a mix.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::config::{mask_connection_string, Config, InstanceConfig};
use crate::core::provider::ProviderIdentity;
use crate::error::{DataError, Result};

/// A provider plus the connection string to reach it.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    provider: ProviderIdentity,
    connection_string: String,
}

impl ConnectionTarget {
    pub fn new(provider: ProviderIdentity, connection_string: impl Into<String>) -> Self {
        Self {
            provider,
            connection_string: connection_string.into(),
        }
    }

    pub fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Connection string with password values redacted.
    pub fn masked(&self) -> String {
        mask_connection_string(&self.connection_string)
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("provider", &self.provider)
            .field("connection_string", &self.masked())
            .finish()
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.provider, self.masked())
    }
}

/// How a handle maps to targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenancyMode {
    Single,
    Distributed,
}

impl TenancyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TenancyMode::Single => "single",
            TenancyMode::Distributed => "distributed",
        }
    }
}

impl fmt::Display for TenancyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One keyed shard of a distributed handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub key: String,
    pub target: ConnectionTarget,
}

/// Resolved tenancy of one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenancyDescriptor {
    Single(ConnectionTarget),
    /// Shards in configuration order.
    Distributed(Vec<Shard>),
}

impl TenancyDescriptor {
    fn from_instance(instance: &InstanceConfig) -> Result<Self> {
        let provider = instance.provider()?;
        if let Some(conn) = &instance.connection_string {
            return Ok(TenancyDescriptor::Single(ConnectionTarget::new(
                provider,
                conn.clone(),
            )));
        }

        let shards = instance
            .shards
            .iter()
            .enumerate()
            .map(|(index, shard)| {
                let provider = match &shard.provider_type {
                    Some(type_name) => ProviderIdentity::from_type_name(type_name)?,
                    None => provider.clone(),
                };
                Ok(Shard {
                    key: shard.key_or_default(index),
                    target: ConnectionTarget::new(provider, shard.connection_string.clone()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TenancyDescriptor::Distributed(shards))
    }

    pub fn mode(&self) -> TenancyMode {
        match self {
            TenancyDescriptor::Single(_) => TenancyMode::Single,
            TenancyDescriptor::Distributed(_) => TenancyMode::Distributed,
        }
    }

    /// Every target, in configuration order.
    pub fn targets(&self) -> Vec<&ConnectionTarget> {
        match self {
            TenancyDescriptor::Single(target) => vec![target],
            TenancyDescriptor::Distributed(shards) => shards.iter().map(|s| &s.target).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct TenancyTable {
    default_handle: Option<String>,
    /// Handles in configuration order.
    handles: Vec<String>,
    entries: HashMap<String, Arc<TenancyDescriptor>>,
}

impl TenancyTable {
    fn build(config: &Config) -> Result<Self> {
        config.validate()?;
        let mut table = TenancyTable {
            default_handle: config.default_instance_name().map(str::to_string),
            ..Default::default()
        };
        for instance in &config.instances {
            let descriptor = TenancyDescriptor::from_instance(instance)?;
            table.handles.push(instance.name.clone());
            table
                .entries
                .insert(instance.name.clone(), Arc::new(descriptor));
        }
        Ok(table)
    }
}

/// Resolves logical handles to connection targets.
pub struct TenancyResolver {
    table: RwLock<Arc<TenancyTable>>,
}

impl TenancyResolver {
    /// Build a resolver from a configuration, validating it first.
    pub fn from_config(config: &Config) -> Result<Self> {
        let table = TenancyTable::build(config)?;
        debug!("Tenancy resolver loaded {} handles", table.handles.len());
        Ok(Self {
            table: RwLock::new(Arc::new(table)),
        })
    }

    /// Replace the tenancy table.
    ///
    /// The new configuration is validated before anything changes; on error
    /// the previous table stays in effect.
    pub fn reload(&self, config: &Config) -> Result<()> {
        let table = Arc::new(TenancyTable::build(config)?);
        let count = table.handles.len();
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
        info!("Tenancy table reloaded: {} handles", count);
        Ok(())
    }

    fn snapshot(&self) -> Arc<TenancyTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tenancy of `handle`.
    pub fn descriptor(&self, handle: &str) -> Result<Arc<TenancyDescriptor>> {
        self.snapshot()
            .entries
            .get(handle)
            .cloned()
            .ok_or_else(|| DataError::UnknownHandle(handle.to_string()))
    }

    /// The single target of a single-tenancy handle.
    pub fn resolve_single(&self, handle: &str) -> Result<ConnectionTarget> {
        match self.descriptor(handle)?.as_ref() {
            TenancyDescriptor::Single(target) => Ok(target.clone()),
            TenancyDescriptor::Distributed(_) => Err(DataError::TenancyModeMismatch {
                handle: handle.to_string(),
                expected: TenancyMode::Single.as_str(),
                actual: TenancyMode::Distributed.as_str(),
            }),
        }
    }

    /// All targets of a handle in configuration order.
    ///
    /// A single-tenancy handle yields a one-element collection.
    pub fn resolve_distributed(&self, handle: &str) -> Result<Vec<ConnectionTarget>> {
        Ok(self
            .descriptor(handle)?
            .targets()
            .into_iter()
            .cloned()
            .collect())
    }

    /// Keyed shards of a handle in configuration order.
    ///
    /// A single-tenancy handle yields one shard keyed `shard-0`.
    pub fn shards(&self, handle: &str) -> Result<Vec<Shard>> {
        Ok(match self.descriptor(handle)?.as_ref() {
            TenancyDescriptor::Single(target) => vec![Shard {
                key: "shard-0".to_string(),
                target: target.clone(),
            }],
            TenancyDescriptor::Distributed(shards) => shards.clone(),
        })
    }

    /// The shard of a distributed handle with the given key.
    pub fn resolve_shard(&self, handle: &str, key: &str) -> Result<ConnectionTarget> {
        match self.descriptor(handle)?.as_ref() {
            TenancyDescriptor::Single(_) => Err(DataError::TenancyModeMismatch {
                handle: handle.to_string(),
                expected: TenancyMode::Distributed.as_str(),
                actual: TenancyMode::Single.as_str(),
            }),
            TenancyDescriptor::Distributed(shards) => shards
                .iter()
                .find(|s| s.key == key)
                .map(|s| s.target.clone())
                .ok_or_else(|| DataError::UnknownShard {
                    handle: handle.to_string(),
                    key: key.to_string(),
                }),
        }
    }

    /// The default handle, if one is configured (or only one instance exists).
    pub fn default_handle(&self) -> Option<String> {
        self.snapshot().default_handle.clone()
    }

    /// All handles in configuration order.
    pub fn handles(&self) -> Vec<String> {
        self.snapshot().handles.clone()
    }
}

impl fmt::Debug for TenancyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.snapshot();
        f.debug_struct("TenancyResolver")
            .field("default_handle", &table.default_handle)
            .field("handles", &table.handles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardConfig;

    fn config() -> Config {
        Config::new()
            .with_instance(InstanceConfig::single(
                "main",
                "mssql",
                "Server=tcp:db,1433;Database=app;User Id=sa;Password=secret",
            ))
            .with_instance(InstanceConfig::distributed(
                "events",
                "postgres",
                vec![
                    ShardConfig::keyed("eu", "host=eu dbname=events"),
                    ShardConfig::new("host=us dbname=events"),
                ],
            ))
            .with_default("main")
    }

    #[test]
    fn test_resolve_single() {
        let resolver = TenancyResolver::from_config(&config()).unwrap();
        let target = resolver.resolve_single("main").unwrap();
        assert_eq!(target.provider(), &ProviderIdentity::mssql());
        assert!(target.connection_string().contains("Password=secret"));
        assert!(!format!("{:?}", target).contains("secret"));
    }

    #[test]
    fn test_resolve_single_on_distributed_is_mode_mismatch() {
        let resolver = TenancyResolver::from_config(&config()).unwrap();
        match resolver.resolve_single("events").unwrap_err() {
            DataError::TenancyModeMismatch {
                handle,
                expected,
                actual,
            } => {
                assert_eq!(handle, "events");
                assert_eq!(expected, "single");
                assert_eq!(actual, "distributed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_distributed() {
        let resolver = TenancyResolver::from_config(&config()).unwrap();

        let targets = resolver.resolve_distributed("events").unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].connection_string(), "host=eu dbname=events");
        assert_eq!(targets[1].connection_string(), "host=us dbname=events");

        let single = resolver.resolve_distributed("main").unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0], resolver.resolve_single("main").unwrap());
    }

    #[test]
    fn test_resolve_shard_by_key() {
        let resolver = TenancyResolver::from_config(&config()).unwrap();
        let us = resolver.resolve_shard("events", "shard-1").unwrap();
        assert_eq!(us.connection_string(), "host=us dbname=events");

        assert!(matches!(
            resolver.resolve_shard("events", "apac").unwrap_err(),
            DataError::UnknownShard { .. }
        ));
        assert!(matches!(
            resolver.resolve_shard("main", "eu").unwrap_err(),
            DataError::TenancyModeMismatch { .. }
        ));
    }

    #[test]
    fn test_unknown_handle() {
        let resolver = TenancyResolver::from_config(&config()).unwrap();
        assert!(matches!(
            resolver.resolve_single("nope").unwrap_err(),
            DataError::UnknownHandle(h) if h == "nope"
        ));
    }

    #[test]
    fn test_reload_swaps_table_and_keeps_old_on_error() {
        let resolver = TenancyResolver::from_config(&config()).unwrap();
        assert_eq!(resolver.handles(), vec!["main", "events"]);

        let bad = Config::new().with_instance(InstanceConfig::single("main", "db2", "x"));
        assert!(resolver.reload(&bad).is_err());
        assert_eq!(resolver.handles(), vec!["main", "events"]);
        assert_eq!(resolver.default_handle().as_deref(), Some("main"));

        let next = Config::new().with_instance(InstanceConfig::single(
            "local",
            "sqlite",
            ":memory:",
        ));
        resolver.reload(&next).unwrap();
        assert_eq!(resolver.handles(), vec!["local"]);
        assert_eq!(resolver.default_handle().as_deref(), Some("local"));
        assert!(resolver.resolve_single("main").is_err());
    }

    #[test]
    fn test_concurrent_readers_during_reload() {
        let resolver = Arc::new(TenancyResolver::from_config(&config()).unwrap());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let resolver = resolver.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let handles = resolver.handles();
                        assert!(handles == ["main", "events"] || handles == ["local"]);
                    }
                })
            })
            .collect();

        let next = Config::new().with_instance(InstanceConfig::single(
            "local",
            "sqlite",
            ":memory:",
        ));
        for _ in 0..50 {
            resolver.reload(&next).unwrap();
            resolver.reload(&config()).unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
