//! agroctl - Entry Point
//!
//! Operational CLI for the Agro Shop deployment: backups, restores, releases
//! with health-checked rollout, rollback and verification.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agroctl::backup::{AssumeYes, BackupLocation, BackupManager, BackupOptions, Confirm, StdinConfirm};
use agroctl::console;
use agroctl::deploy::{
    DockerRuntime, FailurePolicy, HttpHealthProbe, KubernetesRuntime, ReleaseOrchestrator,
    ReleaseReport, WorkloadRuntime,
};
use agroctl::errors::OpsError;
use agroctl::filesys::file::File;
use agroctl::logs::{init_logging, LogLevel, LogOptions};
use agroctl::process::{CommandRunner, SystemRunner};
use agroctl::storage::layout::StorageLayout;
use agroctl::storage::release::ReleaseStore;
use agroctl::storage::settings::{Credentials, Settings};
use agroctl::target::{ClusterAdapter, LocalAdapter, TargetAdapter, TargetKind};
use agroctl::utils::{human_size, version_info};
use agroctl::verify::{check_pods, Verifier, VerificationSummary};

#[derive(Debug, Parser)]
#[command(name = "agroctl", about = "Backup, restore and release orchestration for Agro Shop")]
struct Cli {
    /// Settings file (default: settings.json in the state directory)
    #[arg(long, global = true, env = "AGROCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Backup storage location
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Back up the local project directory and database
    BackupLocal,

    /// Back up the Kubernetes namespace and database
    BackupCluster {
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Restore a local backup archive
    RestoreLocal {
        #[arg(long)]
        backup_file: PathBuf,

        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Restore a cluster backup archive
    RestoreCluster {
        #[arg(long)]
        backup_file: PathBuf,

        #[arg(long)]
        namespace: Option<String>,

        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// List backups, newest first
    ListBackups,

    /// Delete all but the most recent backups
    CleanupOld {
        /// Archives to keep (default from settings, 5)
        #[arg(long)]
        keep: Option<usize>,
    },

    /// Deploy a version and wait for it to become healthy
    Deploy {
        /// Image tag to deploy (default: AGRO_IMAGE_TAG or the configured tag)
        #[arg(long)]
        version: Option<String>,

        /// local (docker) or cluster (kubernetes)
        #[arg(long, default_value = "local")]
        target: TargetKind,

        /// Roll back to the last healthy version if the health check fails
        #[arg(long)]
        auto_rollback: bool,
    },

    /// Redeploy the previous version, or the given one
    Rollback {
        #[arg(long)]
        version: Option<String>,

        #[arg(long, default_value = "local")]
        target: TargetKind,
    },

    /// Show the recorded release state
    Status,

    /// Verify a running deployment
    Verify {
        /// Base URL of the application (default derived from the health URL)
        #[arg(long)]
        url: Option<String>,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Also check pod readiness in the namespace
        #[arg(long)]
        k8s: bool,

        /// Namespace checked with --k8s
        #[arg(long)]
        namespace: Option<String>,

        /// Where the JSON report is written
        #[arg(long, default_value = ".")]
        report_dir: PathBuf,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            console::error(format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Command::Version = cli.command {
        println!("{}", serde_json::to_string_pretty(&version_info())?);
        return Ok(ExitCode::SUCCESS);
    }

    let layout = StorageLayout::default();
    let settings_file = cli
        .config
        .clone()
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());
    let mut settings = Settings::load(&settings_file)
        .await
        .context("Unable to read settings file")?;
    settings.apply_env();
    if let Some(level) = cli.log_level.clone() {
        settings.log_level = level;
    }
    if let Some(dir) = cli.backup_dir.clone() {
        settings.backup_dir = dir;
    }

    layout
        .setup()
        .await
        .context("Unable to create the state directory")?;

    let _guard = init_logging(LogOptions {
        log_level: settings.log_level.clone(),
        json_format: cli.json_logs,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    })
    .context("Failed to initialize logging")?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let location = BackupLocation::new(settings.backup_dir.clone());

    match cli.command {
        Command::BackupLocal => {
            backup_manager(&settings, TargetKind::Local, runner)
                .create_backup(&location)
                .await?;
        }
        Command::BackupCluster { namespace } => {
            if let Some(namespace) = namespace {
                settings.cluster.namespace = namespace;
            }
            backup_manager(&settings, TargetKind::Cluster, runner)
                .create_backup(&location)
                .await?;
        }
        Command::RestoreLocal { backup_file, yes } => {
            let manager = backup_manager(&settings, TargetKind::Local, runner);
            return restore(&manager, &backup_file, &location, yes).await;
        }
        Command::RestoreCluster {
            backup_file,
            namespace,
            yes,
        } => {
            if let Some(namespace) = namespace {
                settings.cluster.namespace = namespace;
            }
            let manager = backup_manager(&settings, TargetKind::Cluster, runner);
            return restore(&manager, &backup_file, &location, yes).await;
        }
        Command::ListBackups => {
            let backups = backup_manager(&settings, TargetKind::Local, runner)
                .list_backups(&location)
                .await?;
            if backups.is_empty() {
                console::info(format!("No backups in {}", location.path().display()));
            }
            for backup in backups {
                let mut line = format!(
                    "{}  {:<7}  {:>9}  {}",
                    backup.id,
                    backup.kind,
                    human_size(backup.size_bytes),
                    backup.path.display()
                );
                if backup.partial == Some(true) {
                    line.push_str("  (partial)");
                }
                if let Some(commit) = &backup.git_commit {
                    line.push_str(&format!("  {}", commit.chars().take(8).collect::<String>()));
                }
                println!("{}", line);
            }
        }
        Command::CleanupOld { keep } => {
            let keep = keep.unwrap_or(settings.keep_count);
            backup_manager(&settings, TargetKind::Local, runner)
                .cleanup_old(&location, keep)
                .await?;
        }
        Command::Deploy {
            version,
            target,
            auto_rollback,
        } => {
            if auto_rollback {
                settings.failure_policy = FailurePolicy::Rollback;
            }
            let version = settings.release_version(version.as_deref());
            let orchestrator = orchestrator(&settings, &layout, target, runner)?;
            let report = orchestrator.deploy(&version).await?;
            return Ok(release_exit_code(&report));
        }
        Command::Rollback { version, target } => {
            let orchestrator = orchestrator(&settings, &layout, target, runner)?;
            orchestrator.rollback(version.as_deref()).await?;
        }
        Command::Status => {
            let store = ReleaseStore::new(
                layout.release_file(&settings.environment),
                &settings.environment,
            );
            let state = store.load().await?;
            console::info(format!("Environment: {}", state.environment));
            console::info(format!("Status: {}", state.status));
            console::info(format!(
                "Current version: {}",
                state.current_version.as_deref().unwrap_or("-")
            ));
            console::info(format!(
                "Previous version: {}",
                state.previous_version.as_deref().unwrap_or("-")
            ));
            if let Some(error) = &state.last_error {
                console::warning(format!("Last error: {}", error));
            }
            console::info(format!("Updated at: {}", state.updated_at.to_rfc3339()));
        }
        Command::Verify {
            url,
            timeout,
            k8s,
            namespace,
            report_dir,
        } => {
            let base_url = url.unwrap_or_else(|| {
                settings
                    .health
                    .url
                    .trim_end_matches('/')
                    .trim_end_matches("/health")
                    .to_string()
            });
            console::info(format!("Verifying deployment at {}", base_url));
            let verifier = Verifier::new(&base_url, Duration::from_secs(timeout))?;
            let mut results = verifier.run().await;
            if k8s {
                let namespace = namespace.unwrap_or_else(|| settings.cluster.namespace.clone());
                results.push(check_pods(runner.as_ref(), &namespace, &settings.cluster.selector).await);
            }
            for result in &results {
                println!("{}", result.line());
            }

            let summary = VerificationSummary::new(results);
            summary.print();
            let report = summary.save(&report_dir).await?;
            console::info(format!("Detailed report saved to {}", report.display()));
            if !summary.passed() {
                console::error(format!("{} verification checks failed", summary.failed_tests));
                return Ok(ExitCode::FAILURE);
            }
            console::success("All verification checks passed");
        }
        Command::Version => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn backup_manager(
    settings: &Settings,
    kind: TargetKind,
    runner: Arc<dyn CommandRunner>,
) -> BackupManager {
    let adapter: Arc<dyn TargetAdapter> = match kind {
        TargetKind::Local => Arc::new(LocalAdapter::new(
            settings.project_root.clone(),
            &settings.container.name,
            runner.clone(),
        )),
        TargetKind::Cluster => Arc::new(ClusterAdapter::new(
            settings.cluster_options(),
            runner.clone(),
        )),
    };
    let options = BackupOptions {
        environment: settings.environment.clone(),
        project_root: settings.project_root.clone(),
        database_path: settings.container.database_path.clone(),
        dump_database: true,
    };
    BackupManager::new(adapter, runner, options)
}

async fn restore(
    manager: &BackupManager,
    backup_file: &std::path::Path,
    location: &BackupLocation,
    yes: bool,
) -> anyhow::Result<ExitCode> {
    let confirm: Box<dyn Confirm> = if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(StdinConfirm)
    };
    match manager
        .restore_file(backup_file, location, confirm.as_ref())
        .await
    {
        Ok(report) => {
            info!(
                "Restored {} items, {} skipped, database restored: {}",
                report.applied.len(),
                report.skipped.len(),
                report.database_restored
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(OpsError::Aborted(reason)) => {
            console::warning(format!("Restore cancelled: {}", reason));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e.into()),
    }
}

fn orchestrator(
    settings: &Settings,
    layout: &StorageLayout,
    target: TargetKind,
    runner: Arc<dyn CommandRunner>,
) -> anyhow::Result<ReleaseOrchestrator> {
    let runtime: Arc<dyn WorkloadRuntime> = match target {
        TargetKind::Local => Arc::new(DockerRuntime::new(
            settings.image.clone(),
            settings.container.clone(),
            Credentials::from_env(),
            runner,
        )),
        TargetKind::Cluster => Arc::new(KubernetesRuntime::new(
            settings.image.clone(),
            settings.cluster.clone(),
            runner,
        )),
    };
    let probe = Arc::new(HttpHealthProbe::new(
        &settings.health.url,
        Duration::from_secs(settings.health.timeout_secs),
    )?);
    let store = ReleaseStore::new(
        layout.release_file(&settings.environment),
        &settings.environment,
    );

    Ok(ReleaseOrchestrator::new(runtime, probe, store)
        .with_health_policy(settings.health_policy())
        .with_failure_policy(settings.failure_policy)
        .with_cancellation(shutdown_token()))
}

/// Cancelled on Ctrl+C; checked between health check attempts
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, stopping after the current step");
            console::warning("Interrupted, stopping after the current step");
            cancel.cancel();
        }
    });
    token
}

/// A deploy that only succeeded by rolling back is still a failed deploy
fn release_exit_code(report: &ReleaseReport) -> ExitCode {
    match &report.rolled_back_from {
        Some(failed) => {
            console::error(format!(
                "Deployment of {} failed; {} is running after rollback",
                failed, report.version
            ));
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}
