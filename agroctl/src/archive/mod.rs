//! Backup archive format
//!
//! An archive is a gzip-compressed tar stream holding exactly one
//! `backup_metadata.json` manifest plus the payload files under their
//! relative paths.

pub mod codec;
pub mod metadata;

pub use codec::{pack, unpack, Payload, MANIFEST_NAME};
pub use metadata::{BackupId, BackupMetadata};
