//! Confirmation before destructive operations

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::errors::OpsError;

/// Asks the operator to approve a destructive step
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> Result<bool, OpsError>;
}

/// Prompts on the terminal and waits for an answer. There is no timeout.
#[derive(Debug, Clone, Default)]
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> Result<bool, OpsError> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("{} (yes/no): ", prompt).as_bytes())
            .await?;
        stdout.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(is_yes(&line))
    }
}

/// Approves everything; selected by `--yes`
#[derive(Debug, Clone, Default)]
pub struct AssumeYes;

#[async_trait]
impl Confirm for AssumeYes {
    async fn confirm(&self, _prompt: &str) -> Result<bool, OpsError> {
        Ok(true)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
