use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Remote state location for a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub bucket: String,
    pub prefix: String,
}

impl Backend {
    /// `-backend-config=key=value` arguments, in a stable order.
    pub fn init_args(&self) -> Vec<String> {
        vec![
            format!("-backend-config=bucket={}", self.bucket),
            format!("-backend-config=prefix={}", self.prefix),
        ]
    }
}

// ---------------------------------------------------------------------------
// TrackedResource
// ---------------------------------------------------------------------------

/// An infra object that must never go through the destroy/create cycle.
///
/// With an `import_id` it is imported before apply; without one the engine
/// creates it on the first run. Either way it is dropped from state after
/// apply so teardown leaves it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
}

impl TrackedResource {
    pub fn imported(address: impl Into<String>, import_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            import_id: Some(import_id.into()),
        }
    }

    pub fn remove_only(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            import_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// One provisioning unit: a terraform directory plus its state backend.
///
/// Runs against the same workspace must be serialized by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub dir: PathBuf,
    pub backend: Backend,
    pub var_files: Vec<PathBuf>,
    pub tracked: Vec<TrackedResource>,
}

impl Workspace {
    /// `-var-file=<path>` arguments for every configured variable file.
    pub fn var_file_args(&self) -> Vec<String> {
        self.var_files
            .iter()
            .map(|f| format!("-var-file={}", f.display()))
            .collect()
    }

    /// Short human label used in logs.
    pub fn label(&self) -> String {
        format!("gs://{}/{}", self.backend.bucket, self.backend.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        Workspace {
            dir: PathBuf::from("/tf/website_v1"),
            backend: Backend {
                bucket: "custom-dc-test-terraform-state".into(),
                prefix: "integration_test/website_v1".into(),
            },
            var_files: vec![PathBuf::from("variables.tfvars.integration_test")],
            tracked: vec![],
        }
    }

    #[test]
    fn backend_args_carry_bucket_and_prefix() {
        assert_eq!(
            workspace().backend.init_args(),
            vec![
                "-backend-config=bucket=custom-dc-test-terraform-state",
                "-backend-config=prefix=integration_test/website_v1",
            ]
        );
    }

    #[test]
    fn var_file_args_format() {
        assert_eq!(
            workspace().var_file_args(),
            vec!["-var-file=variables.tfvars.integration_test"]
        );
    }

    #[test]
    fn tracked_resource_yaml_omits_missing_import_id() {
        let r = TrackedResource::remove_only("module.esp.google_project_service.project");
        let yaml = serde_yaml::to_string(&r).unwrap();
        assert!(!yaml.contains("import_id"));
        let parsed: TrackedResource = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn label_names_state_location() {
        assert_eq!(
            workspace().label(),
            "gs://custom-dc-test-terraform-state/integration_test/website_v1"
        );
    }
}
