//! agroctl library
//!
//! Backup, restore and release orchestration for the Agro Shop deployment,
//! against either the local project directory and Docker engine or a
//! Kubernetes namespace.

pub mod archive;
pub mod backup;
pub mod console;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod process;
pub mod storage;
pub mod target;
pub mod utils;
pub mod verify;
