use crate::cmd::load_config;
use crate::output::{print_fields, print_json, print_table};
use anyhow::Context;
use e2e_deploy_core::config::WarnLevel;
use e2e_deploy_core::orchestrator::{RunOutcome, TeardownStatus};
use e2e_deploy_core::{io, paths};
use std::path::Path;

pub fn run(config_path: &Path, report: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let errors: Vec<_> = config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .collect();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("[error] {}", e.message);
        }
        anyhow::bail!("config has errors; run 'e2e-deploy config validate'");
    }
    config.preflight().context("tool preflight failed")?;

    let run_id = paths::new_run_id();
    let plan = config.run_plan(&run_id)?;
    tracing::info!(run_id = %run_id, workspace = %plan.workspace.label(), "starting run");

    let outcome = config.orchestrator().run(&plan);

    if let Some(path) = report {
        let data = serde_json::to_vec_pretty(&outcome)?;
        io::atomic_write(path, &data)
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }

    if json {
        print_json(&outcome)?;
    } else {
        print_summary(&outcome, report);
    }

    if !outcome.passed() {
        let reason = match (&outcome.failure, &outcome.verdict) {
            (Some(f), _) => format!("stage {} failed: {}", f.stage, f.message),
            (None, Some(v)) => format!("health check failed after {} attempts", v.attempts),
            (None, None) => "run did not reach verification".to_string(),
        };
        anyhow::bail!("run {run_id} failed: {reason}");
    }
    Ok(())
}

fn print_summary(outcome: &RunOutcome, report: Option<&Path>) {
    let duration = outcome
        .finished_at
        .map(|end| format!("{}s", (end - outcome.started_at).num_seconds()))
        .unwrap_or_else(|| "-".to_string());
    let verdict = match &outcome.verdict {
        Some(v) if v.passed => format!("passed (attempt {})", v.attempts),
        Some(v) => format!(
            "failed after {} attempts (last status {})",
            v.attempts,
            v.last_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        ),
        None => "not reached".to_string(),
    };
    let teardown = match &outcome.teardown {
        TeardownStatus::NotRegistered => "not registered".to_string(),
        TeardownStatus::Succeeded => "succeeded".to_string(),
        TeardownStatus::Failed { message } => format!("FAILED: {message}"),
    };

    let mut rows = vec![
        ("run", outcome.run_id.clone()),
        ("duration", duration),
        (
            "cluster",
            outcome.cluster_name.clone().unwrap_or_else(|| "-".to_string()),
        ),
        (
            "context",
            outcome.kube_context.clone().unwrap_or_else(|| "-".to_string()),
        ),
        ("verdict", verdict),
        ("teardown", teardown),
    ];
    if let Some(f) = &outcome.failure {
        rows.push(("failure", format!("[{}] {}", f.stage, f.message)));
    }
    if let Some(path) = report {
        rows.push(("report", path.display().to_string()));
    }
    print_fields(&rows);

    if !outcome.reconcile_notes.is_empty() {
        println!();
        let notes = outcome
            .reconcile_notes
            .iter()
            .map(|n| {
                vec![
                    format!("{:?}", n.phase).to_lowercase(),
                    n.address.clone(),
                    format!("{:?}", n.kind),
                ]
            })
            .collect();
        print_table(&["PHASE", "ADDRESS", "NOTE"], notes);
    }
}
