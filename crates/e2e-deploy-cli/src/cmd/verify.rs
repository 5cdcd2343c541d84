use crate::cmd::load_config;
use crate::output::{print_fields, print_json};
use std::path::Path;
use std::time::Duration;

pub fn run(
    config_path: &Path,
    url: Option<String>,
    retries: Option<u32>,
    delay_secs: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let mut spec = config.health.spec();
    if let Some(url) = url {
        spec.url = url;
    }
    if let Some(retries) = retries {
        spec.retries = retries;
    }
    if let Some(secs) = delay_secs {
        spec.delay = Duration::from_secs(secs);
    }

    let verdict = config.health_verifier().verify(&spec);

    if json {
        print_json(&verdict)?;
    } else {
        print_fields(&[
            ("url", spec.url.clone()),
            ("passed", verdict.passed.to_string()),
            ("attempts", verdict.attempts.to_string()),
            ("elapsed", format!("{}ms", verdict.elapsed_ms)),
            (
                "last status",
                verdict
                    .last_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            (
                "last error",
                verdict.last_error.clone().unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    if !verdict.passed {
        anyhow::bail!(
            "{} did not become healthy after {} attempts",
            spec.url,
            verdict.attempts
        );
    }
    Ok(())
}
