//! Configuration validation

use super::*;
use anyhow::Result;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_identity(&config.identity())?;
    validate_store(&config.run.store)?;
    validate_events(&config.run.events)?;

    Ok(())
}

/// Validate client identity
pub fn validate_identity(identity: &ClientIdentity) -> Result<()> {
    if identity.concurrent_clients == 0 {
        anyhow::bail!("concurrent_clients must be at least 1");
    }

    if identity.global_client_index >= identity.concurrent_clients {
        anyhow::bail!(
            "global_client_index ({}) must be less than concurrent_clients ({})",
            identity.global_client_index,
            identity.concurrent_clients
        );
    }

    Ok(())
}

/// Validate store configuration
pub fn validate_store(store: &StoreConfig) -> Result<()> {
    if store.poll_interval_ms == 0 {
        anyhow::bail!("poll_interval_ms must be greater than 0");
    }

    if store.request_timeout_secs == 0 {
        anyhow::bail!("request_timeout_secs must be greater than 0");
    }

    if let Some(ref url) = store.url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("store url must be an http(s) URL, got {}", url);
        }
    }

    Ok(())
}

/// Validate events configuration
pub fn validate_events(events: &EventsConfig) -> Result<()> {
    if events.tail_interval_ms == 0 {
        anyhow::bail!("tail_interval_ms must be greater than 0");
    }

    Ok(())
}
