use crate::cmd::load_config;
use crate::output::{print_fields, print_json};
use clap::Subcommand;
use e2e_deploy_core::config::WarnLevel;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config for common mistakes
    Validate,

    /// Print the effective config
    Show,
}

pub fn run(config_path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(config_path, json),
        ConfigSubcommand::Show => show(config_path, json),
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if json {
        return print_json(&config);
    }

    let location = config
        .cluster
        .location()
        .map(|l| format!("{} {}", l.flag(), l.name()))
        .unwrap_or_else(|e| format!("<{e}>"));

    print_fields(&[
        ("config", config_path.display().to_string()),
        ("project", config.project_id.clone()),
        ("infra dir", config.workspace().dir.display().to_string()),
        ("backend", config.workspace().label()),
        ("tracked", config.infra.tracked_resources.len().to_string()),
        ("cluster output", config.cluster.output.clone()),
        ("location", location),
        ("release", format!("{} ({})", config.release.name, config.release.namespace)),
        ("chart", config.release_spec().chart.display().to_string()),
        ("health url", config.health.url.clone()),
        (
            "health budget",
            format!(
                "{} retries, {}s apart, {}s timeout",
                config.health.retries, config.health.delay_secs, config.health.timeout_secs
            ),
        ),
        ("state dir", config.state_dir().display().to_string()),
    ]);
    Ok(())
}
