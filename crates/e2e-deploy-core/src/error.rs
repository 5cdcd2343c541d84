use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("config not found at {0}: run 'e2e-deploy init'")]
    NotConfigured(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("required tool '{0}' not found on PATH")]
    ToolNotFound(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("resource '{address}' is already tracked in state")]
    AlreadyTracked { address: String },

    #[error("resource '{address}' does not exist remotely yet")]
    RemoteAbsent { address: String },

    #[error("resource '{address}' is not in state")]
    NotInState { address: String },

    #[error("output '{0}' not found")]
    MissingOutput(String),

    #[error("output '{key}' is not a string: {value}")]
    InvalidOutput { key: String, value: String },

    #[error("cluster name mismatch: expected '{expected}', provisioning reported '{actual}'")]
    ClusterMismatch { expected: String, actual: String },

    #[error("file-backed value '{key}' points at missing file {path}")]
    MissingValueFile { key: String, path: String },

    #[error("http client error: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Non-fatal reconciliation signals: the resource is already where the
    /// reconciler wants it to be.
    pub fn is_reconcile_benign(&self) -> bool {
        matches!(
            self,
            DeployError::AlreadyTracked { .. }
                | DeployError::RemoteAbsent { .. }
                | DeployError::NotInState { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
