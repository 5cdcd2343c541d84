//! End-to-end run sequencing.
//!
//! ```text
//! init → import tracked → apply → remove tracked → [teardown armed]
//!      → resolve cluster → fetch credentials → deploy → verify → teardown
//! ```
//!
//! Any failure before teardown is armed stops the run with nothing to clean
//! up. Once armed, teardown runs exactly once on every exit path, including a
//! panic in a later step. Teardown failure is recorded on the outcome but
//! never changes the verdict.
//!
//! The run's kubeconfig is deleted at the end unless teardown failed, in
//! which case the cluster may still be up and the credentials are kept.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::credentials::{ClusterRef, CredentialFetcher, Location};
use crate::error::DeployError;
use crate::health::{HealthCheckSpec, HealthVerifier, Verdict};
use crate::infra::InfraClient;
use crate::reconcile::{ReconcileNote, Reconciler};
use crate::release::{DeploymentDriver, ReleaseSpec};
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// RunPlan
// ---------------------------------------------------------------------------

/// Everything one run needs, resolved up front. Credential routing travels
/// here as an explicit path rather than through the process environment.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: String,
    pub workspace: Workspace,
    /// Provisioning output holding the cluster name.
    pub cluster_output: String,
    pub expected_cluster: Option<String>,
    pub location: Location,
    pub project_id: String,
    pub kubeconfig: PathBuf,
    pub release: ReleaseSpec,
    pub health: HealthCheckSpec,
}

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Import,
    Apply,
    Remove,
    ResolveCluster,
    FetchCredentials,
    Deploy,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Import => "import",
            Stage::Apply => "apply",
            Stage::Remove => "remove",
            Stage::ResolveCluster => "resolve_cluster",
            Stage::FetchCredentials => "fetch_credentials",
            Stage::Deploy => "deploy",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fatal error that stopped a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TeardownStatus {
    /// The run stopped before anything needed tearing down.
    NotRegistered,
    Succeeded,
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cluster_name: Option<String>,
    pub kube_context: Option<String>,
    pub verdict: Option<Verdict>,
    pub reconcile_notes: Vec<ReconcileNote>,
    pub failure: Option<StageFailure>,
    pub teardown: TeardownStatus,
}

impl RunOutcome {
    fn started(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            cluster_name: None,
            kube_context: None,
            verdict: None,
            reconcile_notes: Vec::new(),
            failure: None,
            teardown: TeardownStatus::NotRegistered,
        }
    }

    /// Pass/fail of the run: the health verdict, nothing else.
    pub fn passed(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.passed)
    }
}

// ---------------------------------------------------------------------------
// Teardown guard
// ---------------------------------------------------------------------------

/// Destroys the workspace when released, or when dropped while still armed
/// (early return, panic unwinding).
struct TeardownGuard<'a> {
    infra: &'a dyn InfraClient,
    ws: &'a Workspace,
    armed: bool,
}

impl<'a> TeardownGuard<'a> {
    fn arm(infra: &'a dyn InfraClient, ws: &'a Workspace) -> Self {
        tracing::debug!(workspace = %ws.label(), "teardown registered");
        Self {
            infra,
            ws,
            armed: true,
        }
    }

    fn release(mut self) -> TeardownStatus {
        self.armed = false;
        teardown(self.infra, self.ws)
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            let _ = teardown(self.infra, self.ws);
        }
    }
}

fn teardown(infra: &dyn InfraClient, ws: &Workspace) -> TeardownStatus {
    tracing::info!(workspace = %ws.label(), "tearing down");
    match infra.destroy(ws) {
        Ok(()) => TeardownStatus::Succeeded,
        Err(e) => {
            tracing::error!(workspace = %ws.label(), error = %e, "teardown failed");
            TeardownStatus::Failed {
                message: e.to_string(),
            }
        }
    }
}

fn discard_kubeconfig(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "kubeconfig removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove kubeconfig");
            return;
        }
    }
    // Only succeeds once the run directory is empty.
    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir(dir);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    infra: Box<dyn InfraClient>,
    credentials: Box<dyn CredentialFetcher>,
    deployer: Box<dyn DeploymentDriver>,
    verifier: HealthVerifier,
}

fn at(stage: Stage) -> impl Fn(DeployError) -> StageFailure {
    move |e| StageFailure {
        stage,
        message: e.to_string(),
    }
}

impl Orchestrator {
    pub fn new(
        infra: Box<dyn InfraClient>,
        credentials: Box<dyn CredentialFetcher>,
        deployer: Box<dyn DeploymentDriver>,
        verifier: HealthVerifier,
    ) -> Self {
        Self {
            infra,
            credentials,
            deployer,
            verifier,
        }
    }

    /// Drive one full run. Never returns early: fatal errors are recorded on
    /// the outcome.
    pub fn run(&self, plan: &RunPlan) -> RunOutcome {
        let mut outcome = RunOutcome::started(&plan.run_id);
        tracing::info!(run_id = %plan.run_id, workspace = %plan.workspace.label(), "run started");

        if let Err(failure) = self.execute(plan, &mut outcome) {
            tracing::error!(stage = %failure.stage, error = %failure.message, "run aborted");
            outcome.failure = Some(failure);
        }

        if !matches!(outcome.teardown, TeardownStatus::Failed { .. }) {
            discard_kubeconfig(&plan.kubeconfig);
        }

        outcome.finished_at = Some(Utc::now());
        tracing::info!(
            run_id = %plan.run_id,
            passed = outcome.passed(),
            cluster = ?outcome.cluster_name,
            "run finished"
        );
        outcome
    }

    fn execute(&self, plan: &RunPlan, outcome: &mut RunOutcome) -> Result<(), StageFailure> {
        let ws = &plan.workspace;
        let reconciler = Reconciler::new(self.infra.as_ref());

        self.infra.init(ws).map_err(at(Stage::Init))?;
        // Imports that already went through stay tracked; a destroy now would
        // delete them.
        let notes = reconciler.import_all(ws).map_err(|e| StageFailure {
            stage: Stage::Import,
            message: format!(
                "{e}; run 'e2e-deploy reconcile remove' before any 'e2e-deploy destroy'"
            ),
        })?;
        outcome.reconcile_notes.extend(notes);
        self.infra.apply(ws).map_err(at(Stage::Apply))?;

        // A tracked resource still in state would be deleted by teardown, so
        // a failed removal stops here without arming it.
        let notes = reconciler.remove_all(ws).map_err(|e| StageFailure {
            stage: Stage::Remove,
            message: format!(
                "{e}; teardown skipped, run 'e2e-deploy reconcile remove' then 'e2e-deploy destroy'"
            ),
        })?;
        outcome.reconcile_notes.extend(notes);

        let guard = TeardownGuard::arm(self.infra.as_ref(), ws);
        let result = self.deploy_and_verify(plan, outcome);
        outcome.teardown = guard.release();
        result
    }

    fn deploy_and_verify(
        &self,
        plan: &RunPlan,
        outcome: &mut RunOutcome,
    ) -> Result<(), StageFailure> {
        let cluster_name = self
            .infra
            .output(&plan.workspace, &plan.cluster_output)
            .map_err(at(Stage::ResolveCluster))?;
        tracing::info!(cluster = %cluster_name, "resolved cluster");
        outcome.cluster_name = Some(cluster_name.clone());

        if let Some(expected) = &plan.expected_cluster {
            if *expected != cluster_name {
                return Err(at(Stage::ResolveCluster)(DeployError::ClusterMismatch {
                    expected: expected.clone(),
                    actual: cluster_name,
                }));
            }
        }

        let cluster = ClusterRef {
            name: cluster_name,
            location: plan.location.clone(),
            project_id: plan.project_id.clone(),
        };
        let ctx = self
            .credentials
            .fetch(&cluster, &plan.kubeconfig)
            .map_err(at(Stage::FetchCredentials))?;
        outcome.kube_context = Some(ctx.context.clone());

        self.deployer
            .upgrade(&plan.release, &ctx)
            .map_err(at(Stage::Deploy))?;

        outcome.verdict = Some(self.verifier.verify(&plan.health));
        Ok(())
    }
}
