//! Subprocess invocation for the external deployment tools.
//!
//! Terraform, gcloud and helm are all driven through [`CommandRunner`]. Every
//! invocation carries its own argument vector, working directory and child
//! environment; nothing here touches the parent process environment.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{DeployError, Result};

/// One external command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra variables set on the child only.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Command line as a single string, for logs and error messages.
    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn status_text(&self) -> String {
        match self.code {
            Some(c) => format!("code {c}"),
            None => "signal".to_string(),
        }
    }
}

/// Executes an [`Invocation`] to completion.
///
/// Returns `Err` only when the process could not be started. A non-zero exit
/// is reported through [`CommandOutput::success`] so callers can classify the
/// failure from stderr.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(command = %invocation.display(), "spawning");
        let output = cmd.output().map_err(|e| DeployError::Spawn {
            program: invocation.program.clone(),
            source: e,
        })?;

        let result = CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(
            command = %invocation.display(),
            success = result.success,
            code = ?result.code,
            "finished"
        );
        Ok(result)
    }
}

/// Run `invocation` and turn a non-zero exit into [`DeployError::CommandFailed`].
pub fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<CommandOutput> {
    let output = runner.run(invocation)?;
    if output.success {
        return Ok(output);
    }
    Err(failure(invocation, &output))
}

pub(crate) fn failure(invocation: &Invocation, output: &CommandOutput) -> DeployError {
    let stderr = if output.stderr.trim().is_empty() {
        output.stdout.chars().take(2000).collect()
    } else {
        output.stderr.trim().chars().take(2000).collect()
    };
    DeployError::CommandFailed {
        command: invocation.display(),
        status: output.status_text(),
        stderr,
    }
}

/// Resolve `program` on `PATH` (or as a path) before any step runs.
pub fn require_tool(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|_| DeployError::ToolNotFound(program.to_string()))
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

#[cfg(test)]
type Responder = dyn Fn(&Invocation) -> CommandOutput + Send + Sync;

/// Records every invocation and answers with a caller-supplied responder.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct ScriptedRunner {
    calls: std::sync::Arc<std::sync::Mutex<Vec<Invocation>>>,
    respond: std::sync::Arc<Responder>,
}

#[cfg(test)]
impl ScriptedRunner {
    pub(crate) fn new(
        respond: impl Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Default::default(),
            respond: std::sync::Arc::new(respond),
        }
    }

    pub(crate) fn succeeding() -> Self {
        Self::new(|_| CommandOutput::ok(""))
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok((self.respond)(invocation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_display_joins_args() {
        let inv = Invocation::new("terraform").args(["state", "rm", "a.b"]);
        assert_eq!(inv.display(), "terraform state rm a.b");
    }

    #[test]
    fn process_runner_captures_stdout() {
        let inv = Invocation::new("sh").args(["-c", "echo hello"]);
        let out = ProcessRunner.run(&inv).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn process_runner_sets_child_env_only() {
        let inv = Invocation::new("sh")
            .args(["-c", "printf %s \"$E2E_DEPLOY_PROBE\""])
            .env("E2E_DEPLOY_PROBE", "scoped");
        let out = ProcessRunner.run(&inv).unwrap();
        assert_eq!(out.stdout, "scoped");
        assert!(std::env::var("E2E_DEPLOY_PROBE").is_err());
    }

    #[test]
    fn run_checked_reports_stderr_on_failure() {
        let inv = Invocation::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let err = run_checked(&ProcessRunner, &inv).unwrap_err();
        match err {
            DeployError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, "code 3");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let inv = Invocation::new("/nonexistent/e2e-deploy-tool");
        let err = ProcessRunner.run(&inv).unwrap_err();
        assert!(matches!(err, DeployError::Spawn { .. }));
    }

    #[test]
    fn require_tool_rejects_unknown_binary() {
        let err = require_tool("definitely-not-a-real-binary-e2e").unwrap_err();
        assert!(matches!(err, DeployError::ToolNotFound(_)));
    }
}
