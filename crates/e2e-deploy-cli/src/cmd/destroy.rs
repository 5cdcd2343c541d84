use crate::cmd::load_config;
use anyhow::Context;
use e2e_deploy_core::infra::InfraClient;
use std::path::Path;

/// Tracked resources are left in place unless `reconcile remove` ran first;
/// the destroy covers whatever state currently holds.
pub fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let client = config.terraform_client();
    let ws = config.workspace();

    client.init(&ws).context("terraform init failed")?;
    client
        .destroy(&ws)
        .with_context(|| format!("destroy of {} failed", ws.label()))?;
    println!("Destroyed {}", ws.label());
    Ok(())
}
