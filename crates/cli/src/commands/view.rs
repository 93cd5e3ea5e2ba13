//! `shelfwise view` and `shelfwise views`.

use super::{build_mediator, cli_context, load_config, parse_params, print_json, report};
use shelfwise_views::{ViewComposer, default_registry};
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    agent: &str,
    name: &str,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let mediator = build_mediator(&config).map_err(report)?;
    let composer = ViewComposer::with_builtins(mediator.clone());
    let params = parse_params(args)?;
    let ctx = cli_context(agent);

    let result = composer.run_view(name, &params, &ctx).await.map_err(report)?;
    if !result.missing.is_empty() {
        tracing::warn!(view = name, missing = ?result.missing, "View is incomplete");
    }
    print_json(&result)?;

    mediator.end_session(&ctx.session_id);
    Ok(())
}

pub fn list() -> Result<(), Box<dyn std::error::Error>> {
    print_json(&default_registry().describe())
}
