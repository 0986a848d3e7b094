//! Archive codec tests

use chrono::{TimeZone, Utc};

use agroctl::archive::{pack, unpack, BackupId, BackupMetadata, Payload, MANIFEST_NAME};
use agroctl::errors::OpsError;
use agroctl::target::TargetKind;

fn sample() -> (Payload, BackupMetadata) {
    let mut payload = Payload::new();
    payload.insert("app.py".to_string(), b"from flask import Flask\n".to_vec());
    payload.insert("agro.db".to_string(), vec![0x53, 0x51, 0x4c, 0x00, 0xff]);
    payload.insert("templates/index.html".to_string(), b"<html></html>".to_vec());
    payload.insert("config/empty.cfg".to_string(), Vec::new());

    let id = BackupId::from_datetime(Utc.with_ymd_and_hms(2025, 10, 16, 14, 30, 0).unwrap());
    let mut metadata = BackupMetadata::new(TargetKind::Local, id, "production");
    metadata.git_commit = Some("4f2a9c1".to_string());
    metadata.git_branch = Some("main".to_string());
    metadata.mark_partial("database dump: container not running");
    metadata.describe(&payload);
    (payload, metadata)
}

#[test]
fn test_round_trip() {
    let (payload, metadata) = sample();
    let bytes = pack(&payload, &metadata).unwrap();
    let (unpacked, manifest) = unpack(&bytes).unwrap();

    assert_eq!(unpacked, payload);
    assert_eq!(manifest, metadata);
    assert_eq!(manifest.files.len(), 4);
    assert_eq!(manifest.backup_size, 24 + 5 + 13);
}

#[test]
fn test_empty_payload_round_trip() {
    let id = BackupId::from_datetime(Utc::now());
    let mut metadata = BackupMetadata::new(TargetKind::Cluster, id, "local");
    metadata.describe(&Payload::new());

    let (payload, manifest) = unpack(&pack(&Payload::new(), &metadata).unwrap()).unwrap();
    assert!(payload.is_empty());
    assert_eq!(manifest.backup_type, TargetKind::Cluster);
}

#[test]
fn test_manifest_fields() {
    let (payload, metadata) = sample();
    let bytes = pack(&payload, &metadata).unwrap();

    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(bytes.as_slice()));
    let mut manifest = None;
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap().to_str() == Some(MANIFEST_NAME) {
            let mut raw = String::new();
            std::io::Read::read_to_string(&mut entry, &mut raw).unwrap();
            manifest = Some(serde_json::from_str::<serde_json::Value>(&raw).unwrap());
        }
    }
    let manifest = manifest.expect("manifest entry");

    assert_eq!(manifest["backup_type"], "local");
    assert_eq!(manifest["timestamp"], "20251016_143000_000");
    assert_eq!(manifest["git_commit"], "4f2a9c1");
    assert_eq!(manifest["git_branch"], "main");
    assert_eq!(manifest["partial"], true);
    assert!(manifest["date"].as_str().unwrap().starts_with("2025-10-16T14:30:00"));
}

#[test]
fn test_truncated_archive_is_corrupt() {
    let (payload, metadata) = sample();
    let bytes = pack(&payload, &metadata).unwrap();
    let truncated = &bytes[..bytes.len() / 2];

    assert!(matches!(unpack(truncated), Err(OpsError::CorruptArchive(_))));
}
