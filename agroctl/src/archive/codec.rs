//! Pack and unpack backup archives

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::archive::metadata::BackupMetadata;
use crate::errors::OpsError;

/// Name of the manifest entry inside every archive
pub const MANIFEST_NAME: &str = "backup_metadata.json";

/// Archive payload: relative path -> file content.
///
/// A map, so every path appears exactly once.
pub type Payload = BTreeMap<String, Vec<u8>>;

/// Serialize the manifest and payload into one gzip-compressed tar stream
pub fn pack(payload: &Payload, metadata: &BackupMetadata) -> Result<Vec<u8>, OpsError> {
    let mtime = metadata.date.timestamp().max(0) as u64;
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let manifest = serde_json::to_vec_pretty(metadata)?;
    append_entry(&mut builder, MANIFEST_NAME, &manifest, 0o644, mtime)?;

    for (path, content) in payload {
        validate_entry_path(path)?;
        let mode = if metadata.executables.contains(path) {
            0o755
        } else {
            0o644
        };
        append_entry(&mut builder, path, content, mode, mtime)?;
    }

    let encoder = builder.into_inner()?;
    let bytes = encoder.finish()?;
    debug!(
        "Packed {} entries into {} bytes",
        payload.len() + 1,
        bytes.len()
    );
    Ok(bytes)
}

/// Extract the payload and manifest from an archive
pub fn unpack(bytes: &[u8]) -> Result<(Payload, BackupMetadata), OpsError> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut payload = Payload::new();
    let mut metadata = None;

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let raw_path = entry.path().map_err(corrupt)?;
        let path = raw_path
            .to_str()
            .ok_or_else(|| OpsError::CorruptArchive("entry path is not UTF-8".to_string()))?
            .trim_start_matches("./")
            .to_string();

        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(corrupt)?;

        if path == MANIFEST_NAME {
            if metadata.is_some() {
                return Err(OpsError::CorruptArchive(
                    "more than one manifest entry".to_string(),
                ));
            }
            let parsed = serde_json::from_slice(&content).map_err(|e| {
                OpsError::CorruptArchive(format!("unreadable {}: {}", MANIFEST_NAME, e))
            })?;
            metadata = Some(parsed);
            continue;
        }

        validate_entry_path(&path)
            .map_err(|e| OpsError::CorruptArchive(e.to_string()))?;
        if payload.insert(path.clone(), content).is_some() {
            return Err(OpsError::CorruptArchive(format!("duplicate entry {}", path)));
        }
    }

    let metadata = metadata.ok_or(OpsError::MissingManifest)?;
    Ok((payload, metadata))
}

/// Payload paths must be relative, normalized, and not shadow the manifest
pub fn validate_entry_path(path: &str) -> Result<(), OpsError> {
    if path.is_empty() || path == MANIFEST_NAME {
        return Err(OpsError::InvalidPath(path.to_string()));
    }
    let all_normal = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal || path.contains('\\') {
        return Err(OpsError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    content: &[u8],
    mode: u32,
    mtime: u64,
) -> Result<(), OpsError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(mtime);
    builder.append_data(&mut header, path, content)?;
    Ok(())
}

fn corrupt(err: std::io::Error) -> OpsError {
    OpsError::CorruptArchive(err.to_string())
}
