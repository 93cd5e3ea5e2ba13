//! `shelfwise query`: query one shelf.

use super::{build_mediator, cli_context, load_config, parse_params, print_json, report};
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    agent: &str,
    shelf: &str,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let mediator = build_mediator(&config).map_err(report)?;
    let params = parse_params(args)?;
    let ctx = cli_context(agent);

    let result = mediator.query(shelf, &params, &ctx).await.map_err(report)?;
    for failure in &result.errors {
        tracing::warn!(
            connector = %failure.connector,
            reason = ?failure.reason,
            "Connector contributed nothing: {}",
            failure.message
        );
    }
    print_json(result.as_ref())?;

    mediator.end_session(&ctx.session_id);
    Ok(())
}
