//! In-memory doubles for orchestrator and reconciler tests.
//!
//! [`FakeInfra`] models the two sets the reconciler cares about: addresses in
//! tracked state, and objects that exist remotely. Applying a config whose
//! resource exists remotely but is not tracked fails the way a soft-deleted
//! resource does in the real engine.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::credentials::{ClusterRef, CredentialFetcher, KubeContext};
use crate::error::{DeployError, Result};
use crate::infra::InfraClient;
use crate::release::{DeploymentDriver, ReleaseSpec};
use crate::workspace::Workspace;

/// Ordered call log shared by all fakes in one test.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

#[derive(Debug, Default)]
pub(crate) struct InfraState {
    /// Addresses currently tracked in state.
    pub(crate) tracked: BTreeSet<String>,
    /// Remote objects: address → import id.
    pub(crate) remote: BTreeMap<String, String>,
    /// Addresses the configuration manages (everything apply creates).
    pub(crate) managed: Vec<(String, String)>,
    pub(crate) fail_init: bool,
    pub(crate) fail_apply: bool,
    pub(crate) fail_destroy: bool,
    pub(crate) fail_remove: bool,
    pub(crate) fail_output: bool,
    /// Import of this address fails with a non-benign error.
    pub(crate) fail_import: Option<String>,
    pub(crate) cluster_name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeInfra {
    pub(crate) log: CallLog,
    pub(crate) state: Arc<Mutex<InfraState>>,
}

impl FakeInfra {
    /// Managed resources: the cluster plus every tracked resource.
    pub(crate) fn new(log: CallLog, ws: &Workspace) -> Self {
        let mut managed = vec![(
            "google_container_cluster.primary".to_string(),
            "datacommons-us-central1-a".to_string(),
        )];
        for r in &ws.tracked {
            let id = r
                .import_id
                .clone()
                .unwrap_or_else(|| r.address.rsplit('.').next().unwrap_or("").to_string());
            managed.push((r.address.clone(), id));
        }
        let state = InfraState {
            managed,
            cluster_name: "datacommons-us-central1-a".into(),
            ..Default::default()
        };
        Self {
            log,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn with<F: FnOnce(&mut InfraState)>(self, f: F) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub(crate) fn tracked(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().tracked.clone()
    }

    pub(crate) fn remote(&self) -> BTreeMap<String, String> {
        self.state.lock().unwrap().remote.clone()
    }
}

impl InfraClient for FakeInfra {
    fn init(&self, _ws: &Workspace) -> Result<()> {
        self.log.push("infra.init");
        if self.state.lock().unwrap().fail_init {
            return Err(DeployError::CommandFailed {
                command: "terraform init".into(),
                status: "code 1".into(),
                stderr: "Error: Failed to get existing workspaces".into(),
            });
        }
        Ok(())
    }

    fn apply(&self, _ws: &Workspace) -> Result<()> {
        self.log.push("infra.apply");
        let mut s = self.state.lock().unwrap();
        if s.fail_apply {
            return Err(DeployError::CommandFailed {
                command: "terraform apply".into(),
                status: "code 1".into(),
                stderr: "Error: quota exceeded".into(),
            });
        }
        let managed = s.managed.clone();
        for (address, id) in managed {
            if s.tracked.contains(&address) {
                continue;
            }
            if s.remote.contains_key(&address) {
                return Err(DeployError::CommandFailed {
                    command: "terraform apply".into(),
                    status: "code 1".into(),
                    stderr: format!("Error: {address} already exists"),
                });
            }
            s.remote.insert(address.clone(), id);
            s.tracked.insert(address);
        }
        Ok(())
    }

    fn destroy(&self, _ws: &Workspace) -> Result<()> {
        self.log.push("infra.destroy");
        let mut s = self.state.lock().unwrap();
        if s.fail_destroy {
            return Err(DeployError::CommandFailed {
                command: "terraform destroy".into(),
                status: "code 1".into(),
                stderr: "Error: timeout while waiting for state".into(),
            });
        }
        let tracked: Vec<String> = s.tracked.iter().cloned().collect();
        for address in tracked {
            s.remote.remove(&address);
        }
        s.tracked.clear();
        Ok(())
    }

    fn import_resource(&self, _ws: &Workspace, address: &str, id: &str) -> Result<()> {
        self.log.push(format!("infra.import {address} {id}"));
        let mut s = self.state.lock().unwrap();
        if s.fail_import.as_deref() == Some(address) {
            return Err(DeployError::CommandFailed {
                command: format!("terraform import {address} {id}"),
                status: "code 1".into(),
                stderr: "Error: googleapi: Error 403: Permission denied".into(),
            });
        }
        if s.tracked.contains(address) {
            return Err(DeployError::AlreadyTracked {
                address: address.into(),
            });
        }
        if !s.remote.contains_key(address) {
            return Err(DeployError::RemoteAbsent {
                address: address.into(),
            });
        }
        s.tracked.insert(address.to_string());
        Ok(())
    }

    fn remove_from_state(&self, _ws: &Workspace, address: &str) -> Result<()> {
        self.log.push(format!("infra.state_rm {address}"));
        let mut s = self.state.lock().unwrap();
        if s.fail_remove {
            return Err(DeployError::CommandFailed {
                command: format!("terraform state rm {address}"),
                status: "code 1".into(),
                stderr: "Error acquiring the state lock".into(),
            });
        }
        if !s.tracked.remove(address) {
            return Err(DeployError::NotInState {
                address: address.into(),
            });
        }
        Ok(())
    }

    fn output(&self, _ws: &Workspace, key: &str) -> Result<String> {
        self.log.push(format!("infra.output {key}"));
        let s = self.state.lock().unwrap();
        if s.fail_output {
            return Err(DeployError::CommandFailed {
                command: format!("terraform output -no-color -json {key}"),
                status: "code 1".into(),
                stderr: "Error: Failed to read state: permission denied".into(),
            });
        }
        if key == "cluster_name" {
            Ok(s.cluster_name.clone())
        } else {
            Err(DeployError::MissingOutput(key.into()))
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeCredentials {
    pub(crate) log: CallLog,
    pub(crate) fail: bool,
}

impl CredentialFetcher for FakeCredentials {
    fn fetch(&self, cluster: &ClusterRef, kubeconfig: &Path) -> Result<KubeContext> {
        self.log.push(format!("credentials.fetch {}", cluster.name));
        if self.fail {
            return Err(DeployError::CommandFailed {
                command: "gcloud container clusters get-credentials".into(),
                status: "code 1".into(),
                stderr: "ERROR: NOT_FOUND".into(),
            });
        }
        Ok(KubeContext {
            kubeconfig: kubeconfig.to_path_buf(),
            context: cluster.context_name(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeployBehavior {
    Succeed,
    Fail,
    Panic,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeDeployer {
    pub(crate) log: CallLog,
    pub(crate) behavior: DeployBehavior,
}

impl DeploymentDriver for FakeDeployer {
    fn upgrade(&self, release: &ReleaseSpec, target: &KubeContext) -> Result<()> {
        self.log
            .push(format!("deploy.upgrade {} {}", release.name, target.context));
        match self.behavior {
            DeployBehavior::Succeed => Ok(()),
            DeployBehavior::Fail => Err(DeployError::CommandFailed {
                command: "helm upgrade".into(),
                status: "code 1".into(),
                stderr: "Error: UPGRADE FAILED".into(),
            }),
            DeployBehavior::Panic => panic!("deployer crashed"),
        }
    }
}
