use crate::clock::SystemClock;
use crate::command::{require_tool, ProcessRunner};
use crate::credentials::{GcloudCredentials, Location};
use crate::error::{DeployError, Result};
use crate::health::{
    status_and_body_contains, status_is, HealthCheckSpec, HealthVerifier, ReqwestProbe, TlsPolicy,
};
use crate::infra::{RetryPolicy, TerraformClient};
use crate::io::resolve_path;
use crate::orchestrator::{Orchestrator, RunPlan};
use crate::paths;
use crate::release::{HelmDriver, ReleaseSpec};
use crate::workspace::{Backend, TrackedResource, Workspace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ToolsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_terraform")]
    pub terraform: String,
    #[serde(default = "default_gcloud")]
    pub gcloud: String,
    #[serde(default = "default_helm")]
    pub helm: String,
}

fn default_terraform() -> String {
    "terraform".to_string()
}

fn default_gcloud() -> String {
    "gcloud".to_string()
}

fn default_helm() -> String {
    "helm".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            terraform: default_terraform(),
            gcloud: default_gcloud(),
            helm: default_helm(),
        }
    }
}

impl ToolsConfig {
    pub fn all(&self) -> [&str; 3] {
        [&self.terraform, &self.gcloud, &self.helm]
    }
}

// ---------------------------------------------------------------------------
// InfraConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    /// Terraform root module directory.
    pub dir: PathBuf,
    pub backend: Backend,
    #[serde(default)]
    pub var_files: Vec<PathBuf>,
    #[serde(default)]
    pub tracked_resources: Vec<TrackedResource>,
    #[serde(default = "default_infra_retries")]
    pub max_retries: u32,
    #[serde(default = "default_infra_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_infra_retries() -> u32 {
    3
}

fn default_infra_retry_delay() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// ClusterConfig
// ---------------------------------------------------------------------------

/// Exactly one of `zone` / `region` must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_output")]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

fn default_cluster_output() -> String {
    "cluster_name".to_string()
}

impl ClusterConfig {
    pub fn location(&self) -> Result<Location> {
        match (&self.zone, &self.region) {
            (Some(z), None) => Ok(Location::Zone(z.clone())),
            (None, Some(r)) => Ok(Location::Region(r.clone())),
            (Some(_), Some(_)) => Err(DeployError::InvalidConfig(
                "cluster: set either zone or region, not both".into(),
            )),
            (None, None) => Err(DeployError::InvalidConfig(
                "cluster: one of zone or region is required".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ReleaseConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub name: String,
    pub chart: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub files: BTreeMap<String, PathBuf>,
}

fn default_namespace() -> String {
    "default".to_string()
}

// ---------------------------------------------------------------------------
// HealthConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    pub url: String,
    #[serde(default)]
    pub tls: TlsPolicy,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_retries")]
    pub retries: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    #[serde(default = "default_expect_status")]
    pub expect_status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_health_retries() -> u32 {
    60
}

fn default_delay_secs() -> u64 {
    30
}

fn default_expect_status() -> u16 {
    200
}

impl HealthConfig {
    pub fn spec(&self) -> HealthCheckSpec {
        let predicate = match &self.body_contains {
            Some(needle) => status_and_body_contains(self.expect_status, needle.clone()),
            None => status_is(self.expect_status),
        };
        HealthCheckSpec {
            url: self.url.clone(),
            tls: self.tls,
            timeout: Duration::from_secs(self.timeout_secs),
            retries: self.retries,
            delay: Duration::from_secs(self.delay_secs),
            predicate,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project_id: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub infra: InfraConfig,
    pub cluster: ClusterConfig,
    pub release: ReleaseConfig,
    pub health: HealthConfig,
    /// Directory relative paths resolve against; the config file's parent.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_STATE_DIR)
}

impl Config {
    /// Starter config reproducing the website_v1 integration harness, with
    /// paths relative to the website repository root.
    pub fn website_v1() -> Self {
        const PROJECT_ID: &str = "custom-dc-test";
        const DOMAIN: &str = "custom-dc-test.alex-datacommons.dev";
        const IMAGE_PROJECT: &str = "datcom-ci";
        const WEBSITE_GITHASH: &str = "1ea8f35";
        const MIXER_GITHASH: &str = "23a1a90";

        let values: BTreeMap<String, String> = [
            ("website.image.project", IMAGE_PROJECT.to_string()),
            ("website.image.tag", WEBSITE_GITHASH.to_string()),
            ("website.githash", WEBSITE_GITHASH.to_string()),
            ("mixer.image.project", IMAGE_PROJECT.to_string()),
            ("mixer.image.tag", MIXER_GITHASH.to_string()),
            ("mixer.githash", MIXER_GITHASH.to_string()),
            ("website.gcpProjectID", PROJECT_ID.to_string()),
            ("website.domain", DOMAIN.to_string()),
            ("website.secretGCPProjectID", PROJECT_ID.to_string()),
            ("mixer.hostProject", PROJECT_ID.to_string()),
            (
                "mixer.serviceName",
                format!("website-esp.endpoints.{PROJECT_ID}.cloud.goog"),
            ),
            ("ingress.enabled", "true".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let files: BTreeMap<String, PathBuf> = [
            (r#"mixer.schemaConfigs."base\.mcf""#, "../mixer/deploy/mapping/base.mcf"),
            (r#"mixer.schemaConfigs."encode\.mcf""#, "../mixer/deploy/mapping/encode.mcf"),
            ("kgStoreConfig.bigqueryVersion", "../mixer/deploy/storage/bigquery.version"),
            (
                "kgStoreConfig.baseBigtableInfo",
                "../mixer/deploy/storage/base_bigtable_info.yaml",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), PathBuf::from(v)))
        .collect();

        Self {
            project_id: PROJECT_ID.to_string(),
            state_dir: default_state_dir(),
            tools: ToolsConfig::default(),
            infra: InfraConfig {
                dir: PathBuf::from("deploy/terraform-datacommons-website/examples/website_v1"),
                backend: Backend {
                    bucket: "custom-dc-test-terraform-state".to_string(),
                    prefix: "integration_test/website_v1".to_string(),
                },
                var_files: vec![PathBuf::from("variables.tfvars.integration_test")],
                tracked_resources: vec![
                    TrackedResource::imported(
                        "google_compute_managed_ssl_certificate.dc_website_cert",
                        "dc-website-cert",
                    ),
                    TrackedResource::imported(
                        "module.apikeys.google_apikeys_key.maps_api_key",
                        "maps-api-key",
                    ),
                    TrackedResource::remove_only("module.esp.google_endpoints_service.mixer_endpoint"),
                    TrackedResource::remove_only("module.esp.google_project_service.project"),
                ],
                max_retries: default_infra_retries(),
                retry_delay_secs: default_infra_retry_delay(),
            },
            cluster: ClusterConfig {
                output: default_cluster_output(),
                expected_name: Some("datacommons-us-central1-a".to_string()),
                zone: Some("us-central1-a".to_string()),
                region: None,
            },
            release: ReleaseConfig {
                name: "dc-website-e2e".to_string(),
                chart: PathBuf::from("deploy/helm_charts/dc_website"),
                namespace: "website".to_string(),
                values,
                files,
            },
            health: HealthConfig {
                url: format!("https://{DOMAIN}"),
                tls: TlsPolicy::Verify,
                timeout_secs: default_timeout_secs(),
                retries: default_health_retries(),
                delay_secs: default_delay_secs(),
                expect_status: default_expect_status(),
                body_contains: None,
            },
            base_dir: PathBuf::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeployError::NotConfigured(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&data)?;
        cfg.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        resolve_path(&self.base_dir, p)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve(&self.state_dir)
    }

    // -----------------------------------------------------------------------
    // Domain views
    // -----------------------------------------------------------------------

    /// Variable files stay relative to the terraform directory, which is the
    /// working directory of every terraform command.
    pub fn workspace(&self) -> Workspace {
        Workspace {
            dir: self.resolve(&self.infra.dir),
            backend: self.infra.backend.clone(),
            var_files: self.infra.var_files.clone(),
            tracked: self.infra.tracked_resources.clone(),
        }
    }

    pub fn release_spec(&self) -> ReleaseSpec {
        ReleaseSpec {
            name: self.release.name.clone(),
            chart: self.resolve(&self.release.chart),
            namespace: self.release.namespace.clone(),
            values: self.release.values.clone(),
            files: self
                .release
                .files
                .iter()
                .map(|(k, p)| (k.clone(), self.resolve(p)))
                .collect(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.infra.max_retries,
            delay: Duration::from_secs(self.infra.retry_delay_secs),
        }
    }

    pub fn run_plan(&self, run_id: &str) -> Result<RunPlan> {
        Ok(RunPlan {
            run_id: run_id.to_string(),
            workspace: self.workspace(),
            cluster_output: self.cluster.output.clone(),
            expected_cluster: self.cluster.expected_name.clone(),
            location: self.cluster.location()?,
            project_id: self.project_id.clone(),
            kubeconfig: paths::kubeconfig_path(&self.state_dir(), run_id),
            release: self.release_spec(),
            health: self.health.spec(),
        })
    }

    // -----------------------------------------------------------------------
    // Real tool wiring
    // -----------------------------------------------------------------------

    pub fn terraform_client(&self) -> TerraformClient {
        TerraformClient::new(
            &self.tools.terraform,
            Box::new(ProcessRunner),
            Box::new(SystemClock::new()),
            self.retry_policy(),
        )
    }

    pub fn health_verifier(&self) -> HealthVerifier {
        HealthVerifier::new(Box::new(ReqwestProbe), Box::new(SystemClock::new()))
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Box::new(self.terraform_client()),
            Box::new(GcloudCredentials::new(&self.tools.gcloud, Box::new(ProcessRunner))),
            Box::new(HelmDriver::new(&self.tools.helm, Box::new(ProcessRunner))),
            self.health_verifier(),
        )
    }

    /// Every configured tool must resolve on PATH before a run starts.
    pub fn preflight(&self) -> Result<Vec<PathBuf>> {
        self.tools.all().into_iter().map(require_tool).collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.project_id.trim().is_empty() {
            error("project_id is empty".to_string());
        }
        if self.infra.backend.bucket.trim().is_empty() {
            error("infra.backend.bucket is empty".to_string());
        }
        if self.cluster.output.trim().is_empty() {
            error("cluster.output is empty".to_string());
        }
        if let Err(e) = self.cluster.location() {
            error(e.to_string());
        }

        // 1. Tracked resource addresses must be unique
        let mut seen = BTreeSet::new();
        for r in &self.infra.tracked_resources {
            if !seen.insert(r.address.as_str()) {
                error(format!(
                    "infra.tracked_resources: duplicate address '{}'",
                    r.address
                ));
            }
        }

        // 2. File-backed release values must exist
        for (key, path) in &self.release.files {
            let resolved = self.resolve(path);
            if !resolved.is_file() {
                error(format!(
                    "release.files['{key}']: {} does not exist",
                    resolved.display()
                ));
            }
        }

        if !self.health.url.starts_with("http://") && !self.health.url.starts_with("https://") {
            error(format!(
                "health.url '{}' must start with http:// or https://",
                self.health.url
            ));
        }

        let mut warn = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message,
            })
        };

        if !self.workspace().dir.is_dir() {
            warn(format!(
                "infra.dir {} does not exist",
                self.workspace().dir.display()
            ));
        }
        if self.infra.var_files.is_empty() {
            warn("infra.var_files is empty".to_string());
        }
        if self.health.url.starts_with("http://") {
            warn("health.url is plain http; TLS is not exercised".to_string());
        }
        if self.health.tls == TlsPolicy::Insecure {
            warn("health.tls is insecure; certificate errors are ignored".to_string());
        }
        if self.health.retries > 120 {
            warn(format!(
                "health.retries={} (>120 is unusual)",
                self.health.retries
            ));
        }
        if self.health.retries > 0 && self.health.delay_secs == 0 {
            warn("health.delay_secs is 0; retries will hammer the endpoint".to_string());
        }
        if self.infra.max_retries > 10 {
            warn(format!(
                "infra.max_retries={} (>10 is unusual)",
                self.infra.max_retries
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
project_id: demo
infra:
  dir: tf
  backend:
    bucket: demo-state
    prefix: e2e
  var_files: [ci.tfvars]
  tracked_resources:
    - address: google_compute_managed_ssl_certificate.cert
      import_id: demo-cert
    - address: module.esp.google_endpoints_service.svc
cluster:
  zone: us-central1-a
release:
  name: demo
  chart: charts/demo
  values:
    ingress.enabled: "true"
health:
  url: https://demo.example.dev
"#;

    fn load_minimal(dir: &TempDir) -> Config {
        let path = dir.path().join(paths::CONFIG_FILE);
        std::fs::write(&path, MINIMAL).unwrap();
        Config::load(&path).unwrap()
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let dir = TempDir::new().unwrap();
        let cfg = load_minimal(&dir);
        assert_eq!(cfg.tools, ToolsConfig::default());
        assert_eq!(cfg.cluster.output, "cluster_name");
        assert_eq!(cfg.release.namespace, "default");
        assert_eq!(cfg.health.retries, 60);
        assert_eq!(cfg.health.delay_secs, 30);
        assert_eq!(cfg.health.timeout_secs, 10);
        assert_eq!(cfg.health.tls, TlsPolicy::Verify);
        assert_eq!(cfg.infra.max_retries, 3);
        assert_eq!(cfg.infra.tracked_resources[1].import_id, None);
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = TempDir::new().unwrap();
        let cfg = load_minimal(&dir);
        assert_eq!(cfg.workspace().dir, dir.path().join("tf"));
        assert_eq!(cfg.release_spec().chart, dir.path().join("charts/demo"));
        assert_eq!(cfg.state_dir(), dir.path().join(".e2e-deploy"));
        assert_eq!(cfg.workspace().var_files, vec![PathBuf::from("ci.tfvars")]);
    }

    #[test]
    fn run_plan_scopes_kubeconfig_per_run() {
        let dir = TempDir::new().unwrap();
        let cfg = load_minimal(&dir);
        let plan = cfg.run_plan("abc").unwrap();
        assert_eq!(
            plan.kubeconfig,
            dir.path().join(".e2e-deploy/runs/abc/kubeconfig")
        );
        assert_eq!(plan.location, Location::Zone("us-central1-a".into()));
        assert_eq!(plan.health.max_attempts(), 61);
        assert!((plan.health.predicate)(200, ""));
        assert!(!(plan.health.predicate)(503, ""));
    }

    #[test]
    fn missing_config_is_not_configured() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, DeployError::NotConfigured(_)));
    }

    #[test]
    fn save_and_reload_website_v1() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(paths::CONFIG_FILE);
        Config::website_v1().save(&path).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.infra.tracked_resources.len(), 4);
        assert_eq!(cfg.release.values["ingress.enabled"], "true");
        assert_eq!(
            cfg.release.values["mixer.serviceName"],
            "website-esp.endpoints.custom-dc-test.cloud.goog"
        );
        assert_eq!(cfg.health.url, "https://custom-dc-test.alex-datacommons.dev");
        assert_eq!(
            cfg.cluster.expected_name.as_deref(),
            Some("datacommons-us-central1-a")
        );
    }

    #[test]
    #[cfg(unix)]
    fn preflight_reports_missing_tool() {
        let dir = TempDir::new().unwrap();
        let mut cfg = load_minimal(&dir);
        cfg.tools.terraform = "sh".into();
        cfg.tools.gcloud = "sh".into();
        cfg.tools.helm = "helm-that-does-not-exist-e2e".into();
        let err = cfg.preflight().unwrap_err();
        assert!(matches!(err, DeployError::ToolNotFound(t) if t == "helm-that-does-not-exist-e2e"));
    }

    #[test]
    fn location_requires_exactly_one() {
        let mut c = ClusterConfig {
            output: "cluster_name".into(),
            expected_name: None,
            zone: None,
            region: None,
        };
        assert!(c.location().is_err());
        c.region = Some("us-central1".into());
        assert_eq!(c.location().unwrap(), Location::Region("us-central1".into()));
        c.zone = Some("us-central1-a".into());
        assert!(c.location().is_err());
    }

    #[test]
    fn body_contains_builds_content_predicate() {
        let dir = TempDir::new().unwrap();
        let mut cfg = load_minimal(&dir);
        cfg.health.body_contains = Some("Data Commons".into());
        let spec = cfg.health.spec();
        assert!((spec.predicate)(200, "Welcome to Data Commons"));
        assert!(!(spec.predicate)(200, "default backend - 404"));
    }

    #[test]
    fn validate_flags_duplicates_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let mut cfg = load_minimal(&dir);
        cfg.infra
            .tracked_resources
            .push(TrackedResource::remove_only("module.esp.google_endpoints_service.svc"));
        cfg.release
            .files
            .insert("kgStoreConfig.bigqueryVersion".into(), PathBuf::from("missing.version"));

        let warnings = cfg.validate();
        let errors: Vec<_> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert!(errors
            .iter()
            .any(|w| w.message.contains("duplicate address")));
        assert!(errors
            .iter()
            .any(|w| w.message.contains("kgStoreConfig.bigqueryVersion")));
    }

    #[test]
    fn validate_warns_on_unusual_budget() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tf")).unwrap();
        let mut cfg = load_minimal(&dir);
        cfg.health.retries = 500;
        cfg.health.tls = TlsPolicy::Insecure;

        let warnings = cfg.validate();
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Warning));
        assert!(warnings.iter().any(|w| w.message.contains("retries=500")));
        assert!(warnings.iter().any(|w| w.message.contains("insecure")));
    }

    #[test]
    fn valid_config_has_no_findings() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tf")).unwrap();
        let cfg = load_minimal(&dir);
        assert!(cfg.validate().is_empty());
    }
}
