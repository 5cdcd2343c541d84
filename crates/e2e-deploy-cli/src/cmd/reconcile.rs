use crate::cmd::load_config;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use e2e_deploy_core::infra::InfraClient;
use e2e_deploy_core::reconcile::{ReconcileNote, Reconciler};
use std::path::Path;

#[derive(Subcommand)]
pub enum ReconcileSubcommand {
    /// Import tracked resources into state (before a manual apply)
    Import,

    /// Remove tracked resources from state (before a manual destroy)
    Remove,
}

pub fn run(config_path: &Path, subcmd: ReconcileSubcommand, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let client = config.terraform_client();
    let ws = config.workspace();

    client.init(&ws).context("terraform init failed")?;
    let reconciler = Reconciler::new(&client);
    let notes = match subcmd {
        ReconcileSubcommand::Import => reconciler.import_all(&ws).context("import failed")?,
        ReconcileSubcommand::Remove => reconciler.remove_all(&ws).context("state removal failed")?,
    };

    if json {
        print_json(&serde_json::json!({ "notes": notes }))?;
    } else {
        print_notes(&notes);
    }
    Ok(())
}

fn print_notes(notes: &[ReconcileNote]) {
    if notes.is_empty() {
        println!("All tracked resources reconciled.");
        return;
    }
    let rows = notes
        .iter()
        .map(|n| vec![n.address.clone(), format!("{:?}", n.kind)])
        .collect();
    print_table(&["ADDRESS", "SKIPPED"], rows);
}
