pub mod config_cmd;
pub mod connectors;
pub mod query;
pub mod view;

use serde::Serialize;
use shelfwise_config::{AppConfig, ConfigError};
use shelfwise_connectors::build_from_config;
use shelfwise_core::{AgentContext, ErrorEnvelope, RawParams};
use shelfwise_engine::Mediator;
use std::path::Path;
use std::sync::Arc;

/// Load from `path` when given, otherwise from the default location, then
/// apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path else {
        return AppConfig::load();
    };
    let mut config = AppConfig::load_from(path)?;
    config.apply_env(std::env::vars())?;
    config.validate()?;
    Ok(config)
}

/// Wire connectors, aggregator, cache, and rate limiter from config.
pub fn build_mediator(config: &AppConfig) -> Result<Arc<Mediator>, shelfwise_core::Error> {
    let registry = Arc::new(build_from_config(config)?);
    Ok(Arc::new(Mediator::from_config(config, registry)))
}

/// The CLI acts as a single agent holding every scope, in a fresh session.
pub fn cli_context(agent: &str) -> AgentContext {
    AgentContext::new(agent, uuid::Uuid::new_v4().to_string()).with_all_scopes()
}

/// Parse `key=value` arguments. Later duplicates win.
pub fn parse_params(args: &[String]) -> Result<RawParams, String> {
    let mut params = RawParams::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{arg}'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("missing key in '{arg}'"));
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the error envelope on stderr and hand the error back.
pub fn report(err: shelfwise_core::Error) -> Box<dyn std::error::Error> {
    let envelope = ErrorEnvelope::from(&err);
    if let Ok(json) = serde_json::to_string_pretty(&envelope) {
        eprintln!("{json}");
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn params_split_on_first_equals() {
        let params = parse_params(&args(&["query=a=b", "limit=5"])).unwrap();
        assert_eq!(params["query"], "a=b");
        assert_eq!(params["limit"], "5");
    }

    #[test]
    fn malformed_params_rejected() {
        assert!(parse_params(&args(&["limit"])).is_err());
        assert!(parse_params(&args(&["=5"])).is_err());
    }

    #[test]
    fn cli_context_holds_every_scope() {
        let ctx = cli_context("cli");
        assert!(ctx.has_scope("read:comms"));
        assert!(ctx.has_scope("tool:today_briefing"));
        assert!(!ctx.session_id.is_empty());
    }
}
