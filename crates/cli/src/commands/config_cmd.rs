//! `shelfwise config`: configuration management commands.

use super::load_config;
use shelfwise_config::AppConfig;
use std::path::Path;

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match load_config(config_path) {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if config.connectors.is_empty() {
                warnings.push("No connectors configured; every shelf will return empty results".to_string());
            }
            for connector in config.enabled_connectors() {
                if connector.path.is_none() {
                    warnings.push(format!("Connector '{}' has no fixture path", connector.name));
                }
            }
            if !config.cache.enabled {
                warnings.push("Result cache is disabled".to_string());
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Connectors: {} ({} enabled)", config.connectors.len(), config.enabled_connectors().count());
            println!("   Cache TTL:  {}s", config.cache.ttl_secs);
            println!("   Timeout:    {}ms", config.aggregator.fetch_timeout_ms);
            println!(
                "   Rate limit: {}/min per shelf, {}/min per agent",
                config.rate_limit.requests_per_minute, config.rate_limit.agent_requests_per_minute
            );
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);
    println!("{}", path.display());
    Ok(())
}
