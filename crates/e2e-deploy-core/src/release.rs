//! Application release onto the cluster.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::command::{run_checked, CommandRunner, Invocation};
use crate::credentials::KubeContext;
use crate::error::{DeployError, Result};

/// Everything needed to install or upgrade one release. Built once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSpec {
    pub name: String,
    pub chart: PathBuf,
    pub namespace: String,
    /// Inline `--set key=value` entries.
    pub values: BTreeMap<String, String>,
    /// `--set-file key=path` entries, for content too large for inline values.
    pub files: BTreeMap<String, PathBuf>,
}

impl ReleaseSpec {
    /// Every file-backed value must exist before helm is invoked.
    pub fn check_files(&self) -> Result<()> {
        for (key, path) in &self.files {
            if !path.is_file() {
                return Err(DeployError::MissingValueFile {
                    key: key.clone(),
                    path: path.display().to_string(),
                });
            }
        }
        Ok(())
    }

    fn value_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity((self.values.len() + self.files.len()) * 2);
        for (k, v) in &self.values {
            args.push("--set".to_string());
            args.push(format!("{k}={v}"));
        }
        for (k, p) in &self.files {
            args.push("--set-file".to_string());
            args.push(format!("{k}={}", p.display()));
        }
        args
    }
}

/// Pushes a release onto a cluster. Upgrade-or-install; no rollback on failure.
pub trait DeploymentDriver {
    fn upgrade(&self, release: &ReleaseSpec, target: &KubeContext) -> Result<()>;
}

pub struct HelmDriver {
    binary: String,
    runner: Box<dyn CommandRunner>,
}

impl HelmDriver {
    pub fn new(binary: impl Into<String>, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }
}

impl DeploymentDriver for HelmDriver {
    fn upgrade(&self, release: &ReleaseSpec, target: &KubeContext) -> Result<()> {
        release.check_files()?;
        let inv = Invocation::new(&self.binary)
            .args(["upgrade", "--install"])
            .arg(&release.name)
            .arg(release.chart.display().to_string())
            .arg("--namespace")
            .arg(&release.namespace)
            .arg("--kube-context")
            .arg(&target.context)
            .arg("--kubeconfig")
            .arg(target.kubeconfig.display().to_string())
            .args(release.value_args());

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            context = %target.context,
            values = release.values.len(),
            files = release.files.len(),
            "helm upgrade --install"
        );
        run_checked(self.runner.as_ref(), &inv)?;
        Ok(())
    }
}
