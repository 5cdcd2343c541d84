use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "e2e-deploy.yaml";
pub const DEFAULT_STATE_DIR: &str = ".e2e-deploy";
pub const RUNS_DIR: &str = "runs";
pub const KUBECONFIG_FILE: &str = "kubeconfig";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Per-run scratch directory. Each run gets its own so concurrent or
/// repeated runs on one host never share a kubeconfig. Removed again once
/// the run's teardown succeeds.
pub fn run_dir(state_dir: &Path, run_id: &str) -> PathBuf {
    state_dir.join(RUNS_DIR).join(run_id)
}

pub fn kubeconfig_path(state_dir: &Path, run_id: &str) -> PathBuf {
    run_dir(state_dir, run_id).join(KUBECONFIG_FILE)
}

/// Fresh run identifier.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
