//! Operator confirmation for large candidate batches
//!
//! The populator asks a [`ConfirmPolicy`] before committing a gated batch
//! larger than the configured threshold. Nothing has been written when the
//! question is asked, so declining needs no rollback.

use crate::error::{Error, Result};
use async_trait::async_trait;
use nda_common::config::ConfirmPolicyKind;
use std::io::{BufRead, Write};
use tracing::info;

/// Candidates listed in the prompt before it switches to a count
const PROMPT_LIST_LIMIT: usize = 20;

/// A pending batch awaiting confirmation
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub target: String,
    /// Canonical keys of the pending candidates
    pub candidates: Vec<String>,
    pub threshold: usize,
}

impl ConfirmRequest {
    pub fn pending(&self) -> usize {
        self.candidates.len()
    }

    /// Prompt text: target, pending count and (up to a limit) the keys
    pub fn describe(&self) -> String {
        let mut text = format!(
            "{} pending candidate(s) for '{}' (threshold {}):\n",
            self.pending(),
            self.target,
            self.threshold
        );
        for key in self.candidates.iter().take(PROMPT_LIST_LIMIT) {
            text.push_str("  ");
            text.push_str(key);
            text.push('\n');
        }
        if self.pending() > PROMPT_LIST_LIMIT {
            text.push_str(&format!("  ... and {} more\n", self.pending() - PROMPT_LIST_LIMIT));
        }
        text
    }
}

/// Decides whether a gated batch may be committed
#[async_trait]
pub trait ConfirmPolicy: Send + Sync {
    async fn confirm(&self, request: &ConfirmRequest) -> Result<bool>;
}

/// Always proceed
pub struct AutoApprove;

#[async_trait]
impl ConfirmPolicy for AutoApprove {
    async fn confirm(&self, request: &ConfirmRequest) -> Result<bool> {
        info!(target_name = %request.target, pending = request.pending(), "Batch auto-approved");
        Ok(true)
    }
}

/// Decline every batch that reaches the gate
pub struct RejectIfOverThreshold;

#[async_trait]
impl ConfirmPolicy for RejectIfOverThreshold {
    async fn confirm(&self, request: &ConfirmRequest) -> Result<bool> {
        info!(
            target_name = %request.target,
            pending = request.pending(),
            threshold = request.threshold,
            "Batch over threshold rejected"
        );
        Ok(false)
    }
}

/// Ask on the terminal; only `y` or `yes` proceeds
pub struct Prompt;

#[async_trait]
impl ConfirmPolicy for Prompt {
    async fn confirm(&self, request: &ConfirmRequest) -> Result<bool> {
        let text = request.describe();
        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            write!(stdout, "{}Commit? [yes, No]: ", text).map_err(io_error)?;
            stdout.flush().map_err(io_error)?;

            let mut answer = String::new();
            std::io::stdin().lock().read_line(&mut answer).map_err(io_error)?;
            Ok(is_affirmative(&answer))
        })
        .await
        .map_err(|e| Error::Internal(format!("confirmation prompt task failed: {}", e)))?
    }
}

fn io_error(err: std::io::Error) -> Error {
    Error::Internal(format!("confirmation prompt: {}", err))
}

/// `y` / `yes` in any case, surrounding whitespace ignored
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Policy for a configured kind
pub fn policy_for(kind: ConfirmPolicyKind) -> Box<dyn ConfirmPolicy> {
    match kind {
        ConfirmPolicyKind::Prompt => Box::new(Prompt),
        ConfirmPolicyKind::AutoApprove => Box::new(AutoApprove),
        ConfirmPolicyKind::RejectIfOverThreshold => Box::new(RejectIfOverThreshold),
    }
}
