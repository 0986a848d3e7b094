//! Backup, restore, listing, and retention

pub mod confirm;
pub mod location;
pub mod manager;

pub use confirm::{AssumeYes, Confirm, StdinConfirm};
pub use location::{BackupLocation, BackupSummary};
pub use manager::{BackupManager, BackupOptions, RestoreReport};
