//! Configuration validation.

use std::collections::HashSet;

use super::{Config, InstanceConfig};
use crate::core::provider::ProviderIdentity;
use crate::error::{DataError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.instances.is_empty() {
        return Err(DataError::Config(
            "at least one instance must be configured".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for (index, instance) in config.instances.iter().enumerate() {
        if instance.name.trim().is_empty() {
            return Err(DataError::Config(format!(
                "instances[{}].name is required",
                index
            )));
        }
        if !names.insert(instance.name.as_str()) {
            return Err(DataError::Config(format!(
                "instance '{}' is defined more than once",
                instance.name
            )));
        }
        validate_instance(instance)?;
    }

    if let Some(default) = &config.default_instance {
        if config.instance(default).is_none() {
            return Err(DataError::Config(format!(
                "default_instance '{}' does not name a configured instance",
                default
            )));
        }
    }

    Ok(())
}

fn validate_instance(instance: &InstanceConfig) -> Result<()> {
    let name = &instance.name;
    let provider = provider_for(name, &instance.provider_type)?;

    match (&instance.connection_string, instance.shards.is_empty()) {
        (Some(_), false) => {
            return Err(DataError::Config(format!(
                "instance '{}': set either connection_string or shards, not both",
                name
            )))
        }
        (None, true) => {
            return Err(DataError::Config(format!(
                "instance '{}': connection_string or shards is required",
                name
            )))
        }
        (Some(conn), true) if conn.trim().is_empty() => {
            return Err(DataError::Config(format!(
                "instance '{}': connection_string is empty",
                name
            )))
        }
        _ => {}
    }

    let mut keys = HashSet::new();
    for (index, shard) in instance.shards.iter().enumerate() {
        let key = shard.key_or_default(index);
        if key.trim().is_empty() {
            return Err(DataError::Config(format!(
                "instance '{}': shards[{}].key is empty",
                name, index
            )));
        }
        if !keys.insert(key.clone()) {
            return Err(DataError::Config(format!(
                "instance '{}': shard key '{}' is used more than once",
                name, key
            )));
        }
        if shard.connection_string.trim().is_empty() {
            return Err(DataError::Config(format!(
                "instance '{}': shard '{}' has an empty connection_string",
                name, key
            )));
        }

        let shard_provider = provider_for(name, shard.provider_type_or(&instance.provider_type))?;
        if shard_provider != provider && !instance.allow_mixed_providers {
            return Err(DataError::Config(format!(
                "instance '{}': shard '{}' uses {} but the instance is {}; \
                 set allow_mixed_providers to shard across providers",
                name, key, shard_provider, provider
            )));
        }
    }

    Ok(())
}

fn provider_for(instance: &str, type_name: &str) -> Result<ProviderIdentity> {
    ProviderIdentity::from_type_name(type_name)
        .map_err(|e| DataError::Config(format!("instance '{}': {}", instance, e)))
}
