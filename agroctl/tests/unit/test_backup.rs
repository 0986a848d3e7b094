//! Backup manager tests against a local project directory

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use agroctl::archive::{pack, unpack, BackupId, BackupMetadata, Payload};
use agroctl::backup::location::archive_file_name;
use agroctl::backup::manager::DUMP_ENTRY;
use agroctl::backup::{AssumeYes, BackupLocation, BackupManager, BackupOptions, Confirm};
use agroctl::errors::OpsError;
use agroctl::target::{LocalAdapter, TargetKind};

use common::{ok, FakeRunner};

const DUMP: &str = "BEGIN TRANSACTION;\nCREATE TABLE product (id INTEGER PRIMARY KEY);\nCOMMIT;\n";

fn project(dir: &Path) {
    std::fs::write(dir.join("app.py"), "from flask import Flask\n").unwrap();
    std::fs::write(dir.join("agro.db"), [0x53, 0x51, 0x4c, 0x69, 0x74, 0x65]).unwrap();
}

fn dumping_runner() -> Arc<FakeRunner> {
    let runner = Arc::new(FakeRunner::new());
    runner.on(&["docker", "exec", "agro-shop", "sqlite3"], ok(DUMP));
    runner.on(&["docker", "exec", "-i", "agro-shop", "sh"], ok(""));
    runner
}

fn manager(root: &Path, runner: Arc<FakeRunner>) -> BackupManager {
    let adapter = Arc::new(LocalAdapter::new(root.to_path_buf(), "agro-shop", runner.clone()));
    BackupManager::new(
        adapter,
        runner,
        BackupOptions {
            project_root: root.to_path_buf(),
            ..Default::default()
        },
    )
}

/// Remembers whether it was asked
struct RecordingConfirm {
    answer: bool,
    asked: AtomicBool,
}

impl RecordingConfirm {
    fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Confirm for RecordingConfirm {
    async fn confirm(&self, _prompt: &str) -> Result<bool, OpsError> {
        self.asked.store(true, Ordering::SeqCst);
        Ok(self.answer)
    }
}

#[tokio::test]
async fn test_backup_skips_missing_paths() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    let location = BackupLocation::new(store.path().join("backups"));

    let manager = manager(root.path(), dumping_runner());
    let summary = manager.create_backup(&location).await.unwrap();

    let bytes = std::fs::read(&summary.path).unwrap();
    let (payload, metadata) = unpack(&bytes).unwrap();
    assert!(metadata.files.contains(&"app.py".to_string()));
    assert!(metadata.files.contains(&"agro.db".to_string()));
    assert!(!metadata.files.iter().any(|f| f.starts_with("templates")));
    assert!(metadata.warnings.iter().any(|w| w.starts_with("templates")));
    assert!(!metadata.partial);
    assert_eq!(metadata.backup_type, TargetKind::Local);
    assert_eq!(payload[DUMP_ENTRY], DUMP.as_bytes());

    let listed = manager.list_backups(&location).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, summary.id);
    assert_eq!(listed[0].id, metadata.timestamp);
    assert_eq!(listed[0].partial, Some(false));
}

#[tokio::test]
async fn test_failed_dump_marks_backup_partial() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    let location = BackupLocation::new(store.path());

    // docker exec is not scripted and exits 127
    let manager = manager(root.path(), Arc::new(FakeRunner::new()));
    let summary = manager.create_backup(&location).await.unwrap();

    let (payload, metadata) = unpack(&std::fs::read(&summary.path).unwrap()).unwrap();
    assert!(metadata.partial);
    assert!(!payload.contains_key(DUMP_ENTRY));
    assert!(payload.contains_key("app.py"));
    assert_eq!(summary.partial, Some(true));
}

#[tokio::test]
async fn test_cluster_archive_rejected_by_local_adapter() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());

    let mut payload = Payload::new();
    payload.insert("app.py".to_string(), b"overwritten".to_vec());
    payload.insert("kubernetes/deployments.json".to_string(), b"{}".to_vec());
    let id = BackupId::from_datetime(Utc::now());
    let mut metadata = BackupMetadata::new(TargetKind::Cluster, id, "production");
    metadata.describe(&payload);
    let archive = store.path().join(archive_file_name(TargetKind::Cluster, &id));
    std::fs::write(&archive, pack(&payload, &metadata).unwrap()).unwrap();

    let runner = dumping_runner();
    let manager = manager(root.path(), runner.clone());
    let confirm = RecordingConfirm::new(true);
    let result = manager
        .restore_file(&archive, &BackupLocation::new(store.path()), &confirm)
        .await;

    assert!(matches!(
        result,
        Err(OpsError::KindMismatch {
            archive: TargetKind::Cluster,
            adapter: TargetKind::Local
        })
    ));
    assert!(!confirm.asked.load(Ordering::SeqCst));
    assert_eq!(
        std::fs::read_to_string(root.path().join("app.py")).unwrap(),
        "from flask import Flask\n"
    );
    assert!(!root.path().join("kubernetes").exists());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_restore_overwrites_files_and_replays_dump() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    let location = BackupLocation::new(store.path());

    let runner = dumping_runner();
    let manager = manager(root.path(), runner.clone());
    let summary = manager.create_backup(&location).await.unwrap();

    std::fs::write(root.path().join("app.py"), "broken").unwrap();
    std::fs::remove_file(root.path().join("agro.db")).unwrap();

    let report = manager
        .restore_backup(&summary.id, &location, &AssumeYes)
        .await
        .unwrap();

    assert!(report.database_restored);
    assert!(report.applied.contains(&"app.py".to_string()));
    assert!(!report.applied.contains(&DUMP_ENTRY.to_string()));
    assert_eq!(
        std::fs::read_to_string(root.path().join("app.py")).unwrap(),
        "from flask import Flask\n"
    );
    assert!(root.path().join("agro.db").exists());
    assert!(!root.path().join(DUMP_ENTRY).exists());

    let replay = runner
        .calls()
        .into_iter()
        .find(|c| c.args.first().map(String::as_str) == Some("exec") && c.stdin.is_some())
        .expect("dump replayed");
    assert_eq!(replay.stdin.as_deref(), Some(DUMP.as_bytes()));
    assert!(replay.args.iter().any(|a| a.contains("sqlite3 '/app/agro.db'")));
}

#[tokio::test]
async fn test_declined_restore_changes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    let location = BackupLocation::new(store.path());

    let manager = manager(root.path(), dumping_runner());
    let summary = manager.create_backup(&location).await.unwrap();
    std::fs::write(root.path().join("app.py"), "edited").unwrap();

    let confirm = RecordingConfirm::new(false);
    let result = manager.restore_backup(&summary.id, &location, &confirm).await;

    assert!(matches!(result, Err(OpsError::Aborted(_))));
    assert!(confirm.asked.load(Ordering::SeqCst));
    assert_eq!(std::fs::read_to_string(root.path().join("app.py")).unwrap(), "edited");
}

#[tokio::test]
async fn test_tampered_archive_fails_checksum() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    let location = BackupLocation::new(store.path());

    let manager = manager(root.path(), dumping_runner());
    let summary = manager.create_backup(&location).await.unwrap();

    let mut bytes = std::fs::read(&summary.path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&summary.path, bytes).unwrap();

    let result = manager.restore_backup(&summary.id, &location, &AssumeYes).await;
    assert!(matches!(result, Err(OpsError::CorruptArchive(_))));
}

#[tokio::test]
async fn test_cleanup_keeps_most_recent() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    let location = BackupLocation::new(store.path());
    let manager = manager(root.path(), dumping_runner());

    let mut created = Vec::new();
    for _ in 0..7 {
        created.push(manager.create_backup(&location).await.unwrap().id);
    }
    assert!(created.windows(2).all(|w| w[0] < w[1]));

    let removed = manager.cleanup_old(&location, 5).await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(removed.contains(&created[0]));
    assert!(removed.contains(&created[1]));

    let kept: Vec<BackupId> = location.list().await.unwrap().into_iter().map(|b| b.id).collect();
    let mut newest: Vec<BackupId> = created[2..].to_vec();
    newest.reverse();
    assert_eq!(kept, newest);

    let index = location.load_index().await.unwrap();
    assert_eq!(index.records.len(), 5);

    // Fewer than keep: nothing to do
    assert!(manager.cleanup_old(&location, 5).await.unwrap().is_empty());
    assert!(manager.cleanup_old(&location, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_listing_reflects_external_deletion() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    let location = BackupLocation::new(store.path());
    let manager = manager(root.path(), dumping_runner());

    let first = manager.create_backup(&location).await.unwrap();
    let second = manager.create_backup(&location).await.unwrap();
    assert_eq!(location.list().await.unwrap().len(), 2);

    std::fs::remove_file(&first.path).unwrap();
    let listed = location.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, second.id);
}

#[tokio::test]
async fn test_checksum_checked_however_the_path_is_spelled() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    std::fs::create_dir(store.path().join("backups")).unwrap();
    let location = BackupLocation::new(store.path().join("backups").join("..").join("backups"));

    let manager = manager(root.path(), dumping_runner());
    let summary = manager.create_backup(&location).await.unwrap();
    let name = summary.path.file_name().unwrap().to_owned();

    let mut bytes = std::fs::read(&summary.path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&summary.path, bytes).unwrap();

    let other_spelling = store.path().join("backups").join(&name);
    let result = manager.restore_file(&other_spelling, &location, &AssumeYes).await;
    assert!(matches!(result, Err(OpsError::CorruptArchive(reason)) if reason.contains("checksum")));
}

#[tokio::test]
async fn test_restore_recreates_nested_paths() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    std::fs::create_dir_all(root.path().join("templates/admin")).unwrap();
    std::fs::write(root.path().join("templates/index.html"), "<h1>Agro</h1>").unwrap();
    std::fs::write(root.path().join("templates/admin/login.html"), "<form>").unwrap();
    let location = BackupLocation::new(store.path());

    let manager = manager(root.path(), dumping_runner());
    let summary = manager.create_backup(&location).await.unwrap();
    std::fs::remove_dir_all(root.path().join("templates")).unwrap();

    let report = manager
        .restore_backup(&summary.id, &location, &AssumeYes)
        .await
        .unwrap();

    assert!(report.applied.contains(&"templates/admin/login.html".to_string()));
    assert_eq!(
        std::fs::read_to_string(root.path().join("templates/index.html")).unwrap(),
        "<h1>Agro</h1>"
    );
    assert_eq!(
        std::fs::read_to_string(root.path().join("templates/admin/login.html")).unwrap(),
        "<form>"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_restore_keeps_executable_scripts() {
    use std::os::unix::fs::PermissionsExt;

    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    project(root.path());
    let script = root.path().join("k8s/deploy.sh");
    std::fs::create_dir_all(script.parent().unwrap()).unwrap();
    std::fs::write(&script, "#!/bin/sh\nkubectl apply -f .\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let location = BackupLocation::new(store.path());

    let manager = manager(root.path(), dumping_runner());
    let summary = manager.create_backup(&location).await.unwrap();
    let (_, metadata) = unpack(&std::fs::read(&summary.path).unwrap()).unwrap();
    assert_eq!(metadata.executables, ["k8s/deploy.sh"]);

    std::fs::remove_dir_all(root.path().join("k8s")).unwrap();
    manager
        .restore_backup(&summary.id, &location, &AssumeYes)
        .await
        .unwrap();

    let mode = std::fs::metadata(&script).unwrap().permissions().mode();
    assert_ne!(mode & 0o111, 0);
    let app_mode = std::fs::metadata(root.path().join("app.py")).unwrap().permissions().mode();
    assert_eq!(app_mode & 0o111, 0);
}
