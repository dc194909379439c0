//! Error taxonomy for the build loop.
//!
//! [`RalphError`] covers document- and infra-scoped failures that end a run.
//! They travel through `anyhow` and are recovered by downcast at the loop and
//! CLI boundary. [`StoryFailure`] covers story-scoped failures; those never
//! propagate and are turned into a `failed` status plus a progress record.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::io::agent::AgentKind;

/// Run-level failures.
#[derive(Debug, Error)]
pub enum RalphError {
    /// Backlog missing, malformed, or inconsistent. Raised before any iteration.
    #[error("task store: invalid backlog {}: {message}", path.display())]
    Schema { path: PathBuf, message: String },

    /// `.ralph/config.toml` could not be used.
    #[error("config: {0}")]
    Config(String),

    /// Agent binary unavailable. Fatal for the whole run, not one story.
    #[error("agent adapter: {agent} binary '{binary}' not found on PATH")]
    AgentNotFound { agent: AgentKind, binary: String },

    /// Commits are enabled but the project root is not inside a git work tree.
    #[error("commit manager: {} is not inside a git work tree", path.display())]
    NotARepository { path: PathBuf },

    /// Commit could not be created for a story that reached `done`.
    #[error("commit manager: story {story_id}: {message}")]
    Commit { story_id: String, message: String },
}

/// Story-scoped failures, recorded and then left behind.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoryFailure {
    #[error("{}", describe_exit(*code))]
    AgentExitedNonZero { code: Option<i32> },

    #[error("agent timed out after {timeout_secs}s")]
    AgentTimedOut { timeout_secs: u64 },

    #[error("verification failed: {failed} of {total} checks failed")]
    Verification { failed: usize, total: usize },

    #[error("quality gate failed: {command}")]
    QualityGate { command: String },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("agent exited with code {code}"),
        None => "agent terminated by signal".to_string(),
    }
}
