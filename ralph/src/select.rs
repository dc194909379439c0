//! Selection helper for `ralph next`.

use std::path::Path;

use anyhow::Result;

use crate::core::resolver::{BlockedStory, Selection, select};
use crate::io::backlog_store::load_backlog;
use crate::io::config::RalphConfig;

/// Owned selection outcome, detached from the loaded backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextOutcome {
    Eligible { id: String, title: String },
    Exhausted,
    Deadlocked(Vec<BlockedStory>),
}

/// Load the backlog under `root` and report what the build loop would pick next.
pub fn next_from_root(root: &Path, cfg: &RalphConfig) -> Result<NextOutcome> {
    let doc = load_backlog(&cfg.backlog_path(root))?;
    Ok(match select(&doc) {
        Selection::Eligible(story) => NextOutcome::Eligible {
            id: story.id.clone(),
            title: story.title.clone(),
        },
        Selection::Exhausted => NextOutcome::Exhausted,
        Selection::Deadlocked(blocked) => NextOutcome::Deadlocked(blocked),
    })
}

/// One line per blocked story: `US-002 waits on US-001 (failed)`.
pub fn describe_blocked(blocked: &[BlockedStory]) -> Vec<String> {
    blocked
        .iter()
        .map(|story| {
            let deps = story
                .waiting_on
                .iter()
                .map(|(id, status)| format!("{id} ({status})"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} waits on {deps}", story.id)
        })
        .collect()
}
