//! Soft-delete reconciliation.
//!
//! Some remote objects (API keys, endpoint service definitions, managed
//! certificates still bound to a load balancer) cannot go through a
//! destroy/create cycle. They are imported into state before apply, so apply
//! computes an update instead of a create, and removed from state after apply,
//! so teardown leaves them alone.

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};
use crate::infra::InfraClient;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    Import,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// Import skipped: the address was already in state.
    AlreadyTracked,
    /// Import skipped: nothing exists remotely yet; apply will create it.
    RemoteAbsent,
    /// Removal skipped: the address was not in state.
    NotInState,
}

/// A non-fatal reconciliation signal, kept on the run outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileNote {
    pub phase: ReconcilePhase,
    pub address: String,
    pub kind: NoteKind,
}

pub struct Reconciler<'a> {
    infra: &'a dyn InfraClient,
}

impl<'a> Reconciler<'a> {
    pub fn new(infra: &'a dyn InfraClient) -> Self {
        Self { infra }
    }

    /// Import every tracked resource that has an import id. Must run before
    /// apply.
    pub fn import_all(&self, ws: &Workspace) -> Result<Vec<ReconcileNote>> {
        let mut notes = Vec::new();
        for resource in &ws.tracked {
            let Some(id) = resource.import_id.as_deref() else {
                continue;
            };
            match self.infra.import_resource(ws, &resource.address, id) {
                Ok(()) => {
                    tracing::info!(address = %resource.address, id, "imported into state");
                }
                Err(e) => {
                    let kind = note_kind(&e).ok_or(e)?;
                    tracing::info!(address = %resource.address, ?kind, "import skipped");
                    notes.push(ReconcileNote {
                        phase: ReconcilePhase::Import,
                        address: resource.address.clone(),
                        kind,
                    });
                }
            }
        }
        Ok(notes)
    }

    /// Drop every tracked resource from state. Must run after apply and
    /// before any destroy.
    pub fn remove_all(&self, ws: &Workspace) -> Result<Vec<ReconcileNote>> {
        let mut notes = Vec::new();
        for resource in &ws.tracked {
            match self.infra.remove_from_state(ws, &resource.address) {
                Ok(()) => {
                    tracing::info!(address = %resource.address, "removed from state");
                }
                Err(e) => {
                    let kind = note_kind(&e).ok_or(e)?;
                    tracing::info!(address = %resource.address, ?kind, "removal skipped");
                    notes.push(ReconcileNote {
                        phase: ReconcilePhase::Remove,
                        address: resource.address.clone(),
                        kind,
                    });
                }
            }
        }
        Ok(notes)
    }
}

fn note_kind(e: &DeployError) -> Option<NoteKind> {
    match e {
        DeployError::AlreadyTracked { .. } => Some(NoteKind::AlreadyTracked),
        DeployError::RemoteAbsent { .. } => Some(NoteKind::RemoteAbsent),
        DeployError::NotInState { .. } => Some(NoteKind::NotInState),
        _ => None,
    }
}
