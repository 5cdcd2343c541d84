use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::command::{run_checked, CommandRunner, Invocation};
use crate::error::Result;

/// Where a GKE cluster lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Zone(String),
    Region(String),
}

impl Location {
    pub fn flag(&self) -> &'static str {
        match self {
            Location::Zone(_) => "--zone",
            Location::Region(_) => "--region",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Location::Zone(z) => z,
            Location::Region(r) => r,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRef {
    pub name: String,
    pub location: Location,
    pub project_id: String,
}

impl ClusterRef {
    /// Context name gcloud writes into the kubeconfig.
    pub fn context_name(&self) -> String {
        format!(
            "gke_{}_{}_{}",
            self.project_id,
            self.location.name(),
            self.name
        )
    }
}

/// Cluster access for the rest of the run: which kubeconfig, which context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KubeContext {
    pub kubeconfig: PathBuf,
    pub context: String,
}

/// Resolves a cluster into credentials written at `kubeconfig`.
pub trait CredentialFetcher {
    fn fetch(&self, cluster: &ClusterRef, kubeconfig: &Path) -> Result<KubeContext>;
}

/// `gcloud container clusters get-credentials`, with `KUBECONFIG` pointed at
/// the run's own file.
pub struct GcloudCredentials {
    binary: String,
    runner: Box<dyn CommandRunner>,
}

impl GcloudCredentials {
    pub fn new(binary: impl Into<String>, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }
}

impl CredentialFetcher for GcloudCredentials {
    fn fetch(&self, cluster: &ClusterRef, kubeconfig: &Path) -> Result<KubeContext> {
        if let Some(parent) = kubeconfig.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let inv = Invocation::new(&self.binary)
            .args(["container", "clusters", "get-credentials"])
            .arg(&cluster.name)
            .arg(cluster.location.flag())
            .arg(cluster.location.name())
            .arg("--project")
            .arg(&cluster.project_id)
            .env("KUBECONFIG", kubeconfig.display().to_string());

        tracing::info!(
            cluster = %cluster.name,
            location = %cluster.location.name(),
            kubeconfig = %kubeconfig.display(),
            "fetching cluster credentials"
        );
        run_checked(self.runner.as_ref(), &inv)?;

        Ok(KubeContext {
            kubeconfig: kubeconfig.to_path_buf(),
            context: cluster.context_name(),
        })
    }
}
