//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::deploy::orchestrator::{FailurePolicy, HealthPolicy};
use crate::errors::OpsError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::target::ClusterOptions;

/// agroctl settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Environment label, also the name of the persisted release state
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Project directory captured by local backups
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Backup storage location
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Archives kept by `cleanup-old`
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,

    /// Application image
    #[serde(default)]
    pub image: ImageSettings,

    /// Local container
    #[serde(default)]
    pub container: ContainerSettings,

    /// Kubernetes target
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Post-deploy health check
    #[serde(default)]
    pub health: HealthSettings,

    /// What a failed health check leads to
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_environment() -> String {
    "local".to_string()
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_keep_count() -> usize {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            environment: default_environment(),
            project_root: default_project_root(),
            backup_dir: default_backup_dir(),
            keep_count: default_keep_count(),
            image: ImageSettings::default(),
            container: ContainerSettings::default(),
            cluster: ClusterSettings::default(),
            health: HealthSettings::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Settings {
    /// Read settings from `file`, using defaults when it does not exist
    pub async fn load(file: &File) -> Result<Self, OpsError> {
        if !file.exists().await {
            debug!("No settings at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json().await.map_err(|e| {
            OpsError::ConfigError(format!("{}: {}", file.path().display(), e))
        })
    }

    /// Apply `AGRO_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(registry) = lookup("AGRO_REGISTRY") {
            self.image.registry = registry;
        }
        if let Some(tag) = lookup("AGRO_IMAGE_TAG") {
            self.image.tag = tag;
        }
        if let Some(namespace) = lookup("AGRO_NAMESPACE") {
            self.cluster.namespace = namespace;
        }
        if let Some(url) = lookup("AGRO_HEALTH_URL") {
            self.health.url = url;
        }
    }

    /// Version to deploy: the requested one, else the configured image tag
    pub fn release_version(&self, requested: Option<&str>) -> String {
        requested
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.image.tag)
            .to_string()
    }

    /// Kubernetes adapter options derived from these settings
    pub fn cluster_options(&self) -> ClusterOptions {
        ClusterOptions {
            namespace: self.cluster.namespace.clone(),
            selector: self.cluster.selector.clone(),
            ready_timeout: Duration::from_secs(self.cluster.ready_timeout_secs),
        }
    }

    /// Health check policy derived from these settings
    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            max_attempts: self.health.max_attempts,
            delay: Duration::from_secs(self.health.delay_secs),
        }
    }
}

/// Image settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Registry host and namespace, e.g. `ghcr.io/agro-shop`. Empty for Docker Hub.
    #[serde(default)]
    pub registry: String,

    /// Repository name
    #[serde(default = "default_repository")]
    pub repository: String,

    /// Tag deployed when none is given
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_repository() -> String {
    "agro-shop".to_string()
}

fn default_tag() -> String {
    "latest".to_string()
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            registry: String::new(),
            repository: default_repository(),
            tag: default_tag(),
        }
    }
}

impl ImageSettings {
    /// Full image reference for `version`
    pub fn reference(&self, version: &str) -> String {
        if self.registry.is_empty() {
            format!("{}:{}", self.repository, version)
        } else {
            format!(
                "{}/{}:{}",
                self.registry.trim_end_matches('/'),
                self.repository,
                version
            )
        }
    }
}

/// Local container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Container name
    #[serde(default = "default_container_name")]
    pub name: String,

    /// Host port published to the application's port 5000
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database file inside the workload
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_container_name() -> String {
    "agro-shop".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_database_path() -> String {
    "/app/agro.db".to_string()
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            name: default_container_name(),
            port: default_port(),
            database_path: default_database_path(),
        }
    }
}

/// Kubernetes settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Deployment updated by releases
    #[serde(default = "default_container_name")]
    pub deployment: String,

    /// Container within the deployment's pod template
    #[serde(default = "default_container_name")]
    pub container: String,

    /// Label selector of the application pods
    #[serde(default = "default_selector")]
    pub selector: String,

    /// Readiness wait after restore and rollout
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

fn default_namespace() -> String {
    "agro-shop".to_string()
}

fn default_selector() -> String {
    "app=agro-shop".to_string()
}

fn default_ready_timeout() -> u64 {
    300
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            deployment: default_container_name(),
            container: default_container_name(),
            selector: default_selector(),
            ready_timeout_secs: default_ready_timeout(),
        }
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_url")]
    pub url: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay")]
    pub delay_secs: u64,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_health_url() -> String {
    "http://localhost:5000/health".to_string()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_delay() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            url: default_health_url(),
            max_attempts: default_max_attempts(),
            delay_secs: default_delay(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Credentials read from the environment only; never persisted or logged
#[derive(Debug, Default)]
pub struct Credentials {
    /// Registry login for `docker login`
    pub registry_user: Option<String>,
    pub registry_token: Option<SecretString>,

    /// Admin account passed to the application container
    pub admin_username: Option<String>,
    pub admin_password: Option<SecretString>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            registry_user: lookup("AGRO_REGISTRY_USER"),
            registry_token: lookup("AGRO_REGISTRY_TOKEN").map(SecretString::from),
            admin_username: lookup("ADMIN_USERNAME"),
            admin_password: lookup("ADMIN_PASSWORD").map(SecretString::from),
        }
    }
}
