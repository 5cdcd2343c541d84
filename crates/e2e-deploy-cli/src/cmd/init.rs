use anyhow::Context;
use e2e_deploy_core::{config::Config, io};
use std::path::Path;

pub fn run(config_path: &Path, force: bool) -> anyhow::Result<()> {
    let data = serde_yaml::to_string(&Config::website_v1()).context("failed to render config")?;

    if force {
        io::atomic_write(config_path, data.as_bytes())
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("  wrote:   {}", config_path.display());
    } else if io::write_if_missing(config_path, data.as_bytes())
        .with_context(|| format!("failed to write {}", config_path.display()))?
    {
        println!("  created: {}", config_path.display());
    } else {
        println!("  exists:  {} (use --force to overwrite)", config_path.display());
    }

    println!("\nNext: edit the config, then run 'e2e-deploy config validate'.");
    Ok(())
}
