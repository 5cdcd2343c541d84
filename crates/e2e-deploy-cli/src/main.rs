mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, reconcile::ReconcileSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "e2e-deploy",
    about = "Provision, deploy and health-check a service end to end, then tear it down",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from e2e-deploy.yaml or .git/)
    #[arg(long, global = true, env = "E2E_DEPLOY_ROOT")]
    root: Option<PathBuf>,

    /// Config file (default: <root>/e2e-deploy.yaml)
    #[arg(long, global = true, env = "E2E_DEPLOY_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Inspect and validate the config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Provision, reconcile, deploy, verify and tear down
    Run {
        /// Also write the run outcome as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run health verification only
    Verify {
        /// Override the configured URL
        #[arg(long)]
        url: Option<String>,
        /// Override the configured retry count
        #[arg(long)]
        retries: Option<u32>,
        /// Override the configured delay between attempts
        #[arg(long)]
        delay_secs: Option<u64>,
    },

    /// Import or remove tracked resources by hand
    Reconcile {
        #[command(subcommand)]
        subcommand: ReconcileSubcommand,
    },

    /// Destroy everything tracked in state
    Destroy,

    /// Show provisioning outputs
    Outputs {
        /// Print a single output value
        key: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. }
        | Commands::Verify { .. }
        | Commands::Reconcile { .. }
        | Commands::Destroy => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let config_path = root::config_path(&root, cli.config.as_deref());

    let result = match cli.command {
        Commands::Init { force } => cmd::init::run(&config_path, force),
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
        Commands::Run { report } => cmd::run::run(&config_path, report.as_deref(), cli.json),
        Commands::Verify {
            url,
            retries,
            delay_secs,
        } => cmd::verify::run(&config_path, url, retries, delay_secs, cli.json),
        Commands::Reconcile { subcommand } => {
            cmd::reconcile::run(&config_path, subcommand, cli.json)
        }
        Commands::Destroy => cmd::destroy::run(&config_path),
        Commands::Outputs { key } => cmd::outputs::run(&config_path, key.as_deref(), cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
