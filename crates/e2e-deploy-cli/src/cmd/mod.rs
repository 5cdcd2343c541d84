pub mod config;
pub mod destroy;
pub mod init;
pub mod outputs;
pub mod reconcile;
pub mod run;
pub mod verify;

use anyhow::Context;
use e2e_deploy_core::config::Config;
use std::path::Path;

pub(crate) fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("failed to load {}", path.display()))
}
