//! Persistent orchestrator state

pub mod layout;
pub mod release;
pub mod settings;
