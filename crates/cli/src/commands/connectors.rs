//! `shelfwise connectors`: list configured connectors.

use super::{load_config, print_json, report};
use shelfwise_connectors::build_from_config;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, check: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let registry = build_from_config(&config).map_err(report)?;

    if check {
        let reports = registry.authenticate_all().await;
        print_json(&reports)?;
        if reports.iter().any(|r| !r.authenticated) {
            return Err("one or more connectors failed to authenticate".into());
        }
        return Ok(());
    }

    print_json(&registry.describe())
}
