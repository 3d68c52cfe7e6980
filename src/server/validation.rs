//! Configuration validation
//!
//! Rejects settings the runtime cannot start with and warns about odd ones.

use super::config::AppConfig;
use anyhow::{bail, Result};
use std::collections::HashSet;
use tracing::warn;

/// Validate the loaded configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.processor.max_concurrent_tasks == 0 {
        bail!("processor.max_concurrent_tasks must be at least 1");
    }
    if config.tools.max_concurrent_requests == 0 {
        bail!("tools.max_concurrent_requests must be at least 1");
    }
    if config.tools.max_outbound_calls == 0 {
        bail!("tools.max_outbound_calls must be at least 1");
    }
    if config.queue.max_queue_size == 0 {
        bail!("queue.max_queue_size must be at least 1");
    }
    if config.tools.health_check_interval_secs == 0 {
        bail!("tools.health_check_interval_secs must be at least 1");
    }
    if config.cache.cleanup_interval_secs == 0 {
        bail!("cache.cleanup_interval_secs must be at least 1");
    }

    let mut names = HashSet::new();
    for server in &config.tools.servers {
        if server.name.trim().is_empty() {
            bail!("tool server with endpoint '{}' has no name", server.endpoint);
        }
        if !names.insert(server.name.as_str()) {
            bail!("duplicate tool server name '{}'", server.name);
        }
        if !server.endpoint.starts_with("http://") && !server.endpoint.starts_with("https://") {
            warn!(
                server = %server.name,
                endpoint = %server.endpoint,
                "Tool server endpoint is not an HTTP URL"
            );
        }
    }

    if config.tools.servers.is_empty() {
        warn!("No tool servers configured; the tool agent will have nothing to call");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3sist_tools::ToolServerConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = AppConfig::default();
        config.processor.max_concurrent_tasks = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_tasks"));

        let mut config = AppConfig::default();
        config.tools.max_concurrent_requests = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_maintenance_intervals_are_rejected() {
        let mut config = AppConfig::default();
        config.tools.health_check_interval_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("health_check_interval_secs"));

        let mut config = AppConfig::default();
        config.cache.cleanup_interval_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cleanup_interval_secs"));
    }

    #[test]
    fn test_duplicate_server_names_are_rejected() {
        let mut config = AppConfig::default();
        config.tools.servers = vec![
            ToolServerConfig::new("knowledge", "http://localhost:3003"),
            ToolServerConfig::new("knowledge", "http://localhost:4003"),
        ];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate tool server name 'knowledge'"));
    }
}
