//! Workload runtimes driven by the release orchestrator

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::errors::OpsError;
use crate::process::{CommandRunner, CommandSpec};
use crate::storage::settings::{ClusterSettings, ContainerSettings, Credentials, ImageSettings};

/// Start/stop control over the application workload
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// Short name for status lines
    fn name(&self) -> &str;

    /// Fetch the artifact for `version`
    async fn pull(&self, version: &str) -> Result<(), OpsError>;

    /// Stop the running workload. Nothing running is not an error.
    async fn stop(&self) -> Result<(), OpsError>;

    /// Start the workload at `version`
    async fn start(&self, version: &str) -> Result<(), OpsError>;

    /// Last `tail` lines of the workload's output
    async fn logs(&self, tail: usize) -> Result<String, OpsError>;
}

/// Container on the local Docker engine
pub struct DockerRuntime {
    image: ImageSettings,
    container: ContainerSettings,
    credentials: Credentials,
    runner: Arc<dyn CommandRunner>,
}

impl DockerRuntime {
    pub fn new(
        image: ImageSettings,
        container: ContainerSettings,
        credentials: Credentials,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            image,
            container,
            credentials,
            runner,
        }
    }

    async fn login(&self) {
        let Some(token) = &self.credentials.registry_token else {
            debug!("No registry token set, attempting anonymous pull");
            return;
        };
        let host = match self.image.registry.split('/').next() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                debug!("No registry configured, skipping docker login");
                return;
            }
        };
        let user = self
            .credentials
            .registry_user
            .clone()
            .unwrap_or_else(|| "agroctl".to_string());

        let spec = CommandSpec::new(
            "docker",
            ["login", host.as_str(), "-u", user.as_str(), "--password-stdin"],
        )
        .stdin(token.expose_secret().as_bytes().to_vec());

        match self.runner.run(spec).await {
            Ok(output) if output.success() => debug!("Authenticated with {}", host),
            Ok(output) => warn!(
                "docker login to {} failed, attempting pull anyway: {}",
                host,
                output.stderr.trim()
            ),
            Err(e) => warn!("Failed to run docker login: {}, attempting pull anyway", e),
        }
    }
}

#[async_trait]
impl WorkloadRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn pull(&self, version: &str) -> Result<(), OpsError> {
        self.login().await;
        let reference = self.image.reference(version);
        info!("Pulling image: {}", reference);
        self.runner
            .run_checked(CommandSpec::new("docker", ["pull", reference.as_str()]))
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), OpsError> {
        let name = self.container.name.as_str();
        debug!("Stopping existing container: {}", name);
        for action in ["stop", "rm"] {
            let output = self
                .runner
                .run(CommandSpec::new("docker", [action, name]))
                .await?;
            if !output.success() {
                debug!("docker {} {}: {}", action, name, output.stderr.trim());
            }
        }
        Ok(())
    }

    async fn start(&self, version: &str) -> Result<(), OpsError> {
        let reference = self.image.reference(version);
        let port = format!("{}:5000", self.container.port);
        let mut args: Vec<String> = [
            "run",
            "-d",
            "--name",
            self.container.name.as_str(),
            "--restart",
            "unless-stopped",
            "-p",
            port.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        // Values travel through the docker CLI's environment so they stay out
        // of argv and our logs.
        let mut env = Vec::new();
        if let Some(user) = &self.credentials.admin_username {
            env.push(("ADMIN_USERNAME", user.clone()));
        }
        if let Some(password) = &self.credentials.admin_password {
            env.push(("ADMIN_PASSWORD", password.expose_secret().to_string()));
        }
        for (key, _) in &env {
            args.push("-e".to_string());
            args.push(key.to_string());
        }
        args.push(reference.clone());

        let mut spec = CommandSpec::new("docker", args);
        for (key, value) in env {
            spec = spec.env(key, value);
        }

        info!("Starting container {} from {}", self.container.name, reference);
        self.runner.run_checked(spec).await?;
        Ok(())
    }

    async fn logs(&self, tail: usize) -> Result<String, OpsError> {
        let output = self
            .runner
            .run_checked(CommandSpec::new(
                "docker",
                [
                    "logs".to_string(),
                    "--tail".to_string(),
                    tail.to_string(),
                    self.container.name.clone(),
                ],
            ))
            .await?;
        // The application logs to stderr; docker replays it there.
        Ok(format!("{}{}", output.stdout_string(), output.stderr))
    }
}

/// Deployment in a Kubernetes namespace
pub struct KubernetesRuntime {
    image: ImageSettings,
    cluster: ClusterSettings,
    runner: Arc<dyn CommandRunner>,
}

impl KubernetesRuntime {
    pub fn new(image: ImageSettings, cluster: ClusterSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            image,
            cluster,
            runner,
        }
    }

    fn deployment(&self) -> String {
        format!("deployment/{}", self.cluster.deployment)
    }

    fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster.ready_timeout_secs)
    }
}

#[async_trait]
impl WorkloadRuntime for KubernetesRuntime {
    fn name(&self) -> &str {
        "kubernetes"
    }

    async fn pull(&self, version: &str) -> Result<(), OpsError> {
        // Nodes pull on rollout.
        debug!("Image {} is pulled by the cluster", self.image.reference(version));
        Ok(())
    }

    async fn stop(&self) -> Result<(), OpsError> {
        // The rolling update replaces running pods.
        debug!("{} is replaced by the rollout", self.deployment());
        Ok(())
    }

    async fn start(&self, version: &str) -> Result<(), OpsError> {
        let reference = self.image.reference(version);
        let deployment = self.deployment();
        info!("Updating {} to {}", deployment, reference);

        self.runner
            .run_checked(CommandSpec::new(
                "kubectl",
                [
                    "set".to_string(),
                    "image".to_string(),
                    deployment.clone(),
                    format!("{}={}", self.cluster.container, reference),
                    "-n".to_string(),
                    self.cluster.namespace.clone(),
                ],
            ))
            .await?;

        self.runner
            .run_checked(CommandSpec::new(
                "kubectl",
                [
                    "rollout".to_string(),
                    "status".to_string(),
                    deployment,
                    "-n".to_string(),
                    self.cluster.namespace.clone(),
                    format!("--timeout={}s", self.rollout_timeout().as_secs()),
                ],
            ))
            .await?;
        Ok(())
    }

    async fn logs(&self, tail: usize) -> Result<String, OpsError> {
        let output = self
            .runner
            .run_checked(CommandSpec::new(
                "kubectl",
                [
                    "logs".to_string(),
                    self.deployment(),
                    "-n".to_string(),
                    self.cluster.namespace.clone(),
                    format!("--tail={}", tail),
                ],
            ))
            .await?;
        Ok(output.stdout_string())
    }
}
