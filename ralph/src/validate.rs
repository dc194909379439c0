//! Validation helper for `ralph validate`.

use std::path::Path;

use anyhow::Result;

use crate::backlog::StoryStatus;
use crate::io::backlog_store::load_backlog;
use crate::io::config::RalphConfig;

/// Status breakdown of a valid backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub project: String,
    pub stories: usize,
    pub open: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
    pub quality_gates: usize,
}

impl ValidateOutcome {
    /// One-line summary printed by the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} stories ({} open, {} in_progress, {} done, {} failed), {} quality gates",
            self.project,
            self.stories,
            self.open,
            self.in_progress,
            self.done,
            self.failed,
            self.quality_gates
        )
    }
}

/// Load the backlog under `root` through schema and invariant checks.
pub fn validate_backlog(root: &Path, cfg: &RalphConfig) -> Result<ValidateOutcome> {
    let doc = load_backlog(&cfg.backlog_path(root))?;
    Ok(ValidateOutcome {
        project: doc.project.clone(),
        stories: doc.stories.len(),
        open: doc.count_status(StoryStatus::Open),
        in_progress: doc.count_status(StoryStatus::InProgress),
        done: doc.count_status(StoryStatus::Done),
        failed: doc.count_status(StoryStatus::Failed),
        quality_gates: doc.quality_gates.len(),
    })
}
