//! Infra-as-code client.
//!
//! [`InfraClient`] is the contract the orchestrator and reconciler depend on;
//! [`TerraformClient`] implements it by shelling out to the Terraform CLI.
//!
//! Import and state-removal failures are classified from stderr into
//! distinct error variants so the reconciler can tell "already where we want
//! it" apart from real failures.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use crate::clock::Clock;
use crate::command::{self, CommandOutput, CommandRunner, Invocation};
use crate::error::{DeployError, Result};
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// InfraClient
// ---------------------------------------------------------------------------

/// Provisioning operations against one workspace. All calls block until the
/// engine finishes.
pub trait InfraClient {
    fn init(&self, ws: &Workspace) -> Result<()>;

    /// Outputs are not read here; a failed output read must not be mistaken
    /// for a failed apply.
    fn apply(&self, ws: &Workspace) -> Result<()>;

    fn destroy(&self, ws: &Workspace) -> Result<()>;

    /// Fails with [`DeployError::AlreadyTracked`] when the address is already
    /// in state and [`DeployError::RemoteAbsent`] when the remote object does
    /// not exist yet.
    fn import_resource(&self, ws: &Workspace, address: &str, id: &str) -> Result<()>;

    /// Fails with [`DeployError::NotInState`] when there is nothing to remove.
    fn remove_from_state(&self, ws: &Workspace, address: &str) -> Result<()>;

    fn output(&self, ws: &Workspace, key: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Root-module outputs, as reported by `terraform output -json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outputs {
    values: BTreeMap<String, serde_json::Value>,
}

impl Outputs {
    /// Parse `terraform output -json`: `{"name": {"value": ..., "type": ...}}`.
    pub fn parse(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
        let values = raw
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::Object(mut obj) => {
                        obj.remove("value").unwrap_or(serde_json::Value::Null)
                    }
                    other => other,
                };
                (k, value)
            })
            .collect();
        Ok(Self { values })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// String output `key`.
    pub fn string(&self, key: &str) -> Result<String> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| DeployError::MissingOutput(key.to_string()))?;
        value_as_string(key, value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn value_as_string(key: &str, value: &serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => Err(DeployError::InvalidOutput {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

static RETRYABLE_RE: OnceLock<Regex> = OnceLock::new();
static ALREADY_TRACKED_RE: OnceLock<Regex> = OnceLock::new();
static REMOTE_ABSENT_RE: OnceLock<Regex> = OnceLock::new();
static NOT_IN_STATE_RE: OnceLock<Regex> = OnceLock::new();

/// Transient engine failures that are worth re-running the same command for.
fn retryable_re() -> &'static Regex {
    RETRYABLE_RE.get_or_init(|| {
        Regex::new(concat!(
            r"read: connection reset by peer",
            r"|TLS handshake timeout",
            r"|Failed to load backend",
            r"|Error configuring the backend",
            r"|Error installing provider",
            r"|Failed to query available provider packages",
            r"|timeout while waiting for plugin to start",
            r"|timed out waiting for server handshake",
            r"|could not query provider registry",
        ))
        .unwrap()
    })
}

fn already_tracked_re() -> &'static Regex {
    ALREADY_TRACKED_RE.get_or_init(|| Regex::new(r"Resource already managed by Terraform").unwrap())
}

fn remote_absent_re() -> &'static Regex {
    REMOTE_ABSENT_RE.get_or_init(|| {
        Regex::new(r"Cannot import non-existent remote object").unwrap()
    })
}

fn not_in_state_re() -> &'static Regex {
    NOT_IN_STATE_RE.get_or_init(|| {
        Regex::new(r"No matching objects? found|Invalid target address").unwrap()
    })
}

pub fn is_retryable(stderr: &str) -> bool {
    retryable_re().is_match(stderr)
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Re-run policy for transient engine failures.
///
/// `max_retries` counts re-runs after the first attempt, so `0` means a
/// single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// TerraformClient
// ---------------------------------------------------------------------------

pub struct TerraformClient {
    binary: String,
    runner: Box<dyn CommandRunner>,
    clock: Box<dyn Clock>,
    retry: RetryPolicy,
}

impl TerraformClient {
    pub fn new(
        binary: impl Into<String>,
        runner: Box<dyn CommandRunner>,
        clock: Box<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            binary: binary.into(),
            runner,
            clock,
            retry,
        }
    }

    fn invocation(&self, ws: &Workspace) -> Invocation {
        Invocation::new(&self.binary)
            .current_dir(&ws.dir)
            .env("TF_IN_AUTOMATION", "1")
    }

    /// Run a command, re-running it while stderr matches a retryable pattern.
    /// The final output is returned whether it succeeded or not.
    fn exec(&self, inv: &Invocation) -> Result<CommandOutput> {
        let mut attempt = 0u32;
        loop {
            let output = self.runner.run(inv)?;
            if output.success || attempt >= self.retry.max_retries || !is_retryable(&output.stderr)
            {
                return Ok(output);
            }
            attempt += 1;
            tracing::warn!(
                command = %inv.display(),
                attempt,
                max_retries = self.retry.max_retries,
                "transient terraform error, retrying"
            );
            self.clock.sleep(self.retry.delay);
        }
    }

    fn exec_checked(&self, inv: &Invocation) -> Result<CommandOutput> {
        let output = self.exec(inv)?;
        if output.success {
            Ok(output)
        } else {
            Err(command::failure(inv, &output))
        }
    }

    /// Every root-module output currently in state.
    pub fn outputs(&self, ws: &Workspace) -> Result<Outputs> {
        let out = self.exec_checked(&self.invocation(ws).args(["output", "-no-color", "-json"]))?;
        Outputs::parse(&out.stdout)
    }
}

impl InfraClient for TerraformClient {
    fn init(&self, ws: &Workspace) -> Result<()> {
        let inv = self
            .invocation(ws)
            .args(["init", "-input=false", "-no-color"])
            .args(ws.backend.init_args());
        tracing::info!(workspace = %ws.label(), "terraform init");
        self.exec_checked(&inv)?;
        Ok(())
    }

    fn apply(&self, ws: &Workspace) -> Result<()> {
        let inv = self
            .invocation(ws)
            .args(["apply", "-input=false", "-auto-approve", "-no-color"])
            .args(ws.var_file_args());
        tracing::info!(workspace = %ws.label(), "terraform apply");
        self.exec_checked(&inv)?;
        Ok(())
    }

    fn destroy(&self, ws: &Workspace) -> Result<()> {
        let inv = self
            .invocation(ws)
            .args(["destroy", "-input=false", "-auto-approve", "-no-color"])
            .args(ws.var_file_args());
        tracing::info!(workspace = %ws.label(), "terraform destroy");
        self.exec_checked(&inv)?;
        Ok(())
    }

    fn import_resource(&self, ws: &Workspace, address: &str, id: &str) -> Result<()> {
        let inv = self
            .invocation(ws)
            .args(["import", "-input=false", "-no-color"])
            .args(ws.var_file_args())
            .args([address, id]);
        let output = self.exec(&inv)?;
        if output.success {
            return Ok(());
        }
        let diagnostics = format!("{}\n{}", output.stderr, output.stdout);
        if already_tracked_re().is_match(&diagnostics) {
            return Err(DeployError::AlreadyTracked {
                address: address.to_string(),
            });
        }
        if remote_absent_re().is_match(&diagnostics) {
            return Err(DeployError::RemoteAbsent {
                address: address.to_string(),
            });
        }
        Err(command::failure(&inv, &output))
    }

    fn remove_from_state(&self, ws: &Workspace, address: &str) -> Result<()> {
        let inv = self
            .invocation(ws)
            .args(["state", "rm", "-no-color", address]);
        let output = self.exec(&inv)?;
        if output.success {
            return Ok(());
        }
        let diagnostics = format!("{}\n{}", output.stderr, output.stdout);
        if not_in_state_re().is_match(&diagnostics) {
            return Err(DeployError::NotInState {
                address: address.to_string(),
            });
        }
        Err(command::failure(&inv, &output))
    }

    fn output(&self, ws: &Workspace, key: &str) -> Result<String> {
        let inv = self
            .invocation(ws)
            .args(["output", "-no-color", "-json", key]);
        let output = self.exec(&inv)?;
        if !output.success {
            if output.stderr.contains("not found") {
                return Err(DeployError::MissingOutput(key.to_string()));
            }
            return Err(command::failure(&inv, &output));
        }
        let value: serde_json::Value = serde_json::from_str(output.stdout.trim())?;
        value_as_string(key, &value)
    }
}
