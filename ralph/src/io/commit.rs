//! Commit manager: one git commit per story that reaches `done`.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::backlog::Story;
use crate::core::types::CommitOutcome;
use crate::error::RalphError;
use crate::io::git::Git;

const SHORT_SHA_LEN: usize = 7;

/// Paths ralph itself writes. Changes limited to these do not count as story work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookkeeping {
    files: Vec<String>,
}

impl Bookkeeping {
    /// `.ralph/` plus the given files (backlog, progress log), relative to the repo root.
    pub fn new<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: files
                .into_iter()
                .map(Into::into)
                .map(|file| file.trim_start_matches("./").to_string())
                .collect(),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        path.starts_with(".ralph/") || self.files.iter().any(|file| file == path)
    }
}

/// Commit message for a completed story.
pub fn commit_message(story: &Story) -> String {
    format!("feat({}): {}", story.id, story.title)
}

/// Stage the working tree and commit it as the work for `story`.
///
/// Disabled commits are a recorded no-op. When enabled, a staged diff made only
/// of bookkeeping paths is refused with [`RalphError::Commit`], as is any git
/// failure; the index is reset in the refusal case so nothing half-staged lingers.
#[instrument(skip_all, fields(story_id = %story.id, enabled = enabled))]
pub fn commit(
    workdir: &Path,
    story: &Story,
    enabled: bool,
    bookkeeping: &Bookkeeping,
) -> Result<CommitOutcome> {
    if !enabled {
        info!("commits disabled");
        return Ok(CommitOutcome::Disabled);
    }

    let git = Git::new(workdir);
    let commit_error = |message: String| RalphError::Commit {
        story_id: story.id.clone(),
        message,
    };

    git.add_all()
        .map_err(|err| commit_error(format!("stage changes: {err:#}")))?;
    let staged = git
        .staged_paths()
        .map_err(|err| commit_error(format!("list staged changes: {err:#}")))?;
    let work = staged
        .iter()
        .filter(|path| !bookkeeping.contains(path))
        .count();
    if work == 0 {
        warn!(staged = staged.len(), "verification passed but no work changes are staged");
        if let Err(err) = git.reset_index() {
            warn!(err = %err, "failed to unstage bookkeeping changes");
        }
        return Err(commit_error("nothing to commit".to_string()).into());
    }

    git.commit_staged(&commit_message(story))
        .map_err(|err| commit_error(format!("git commit: {err:#}")))?;
    let sha = git
        .head_short_sha(SHORT_SHA_LEN)
        .map_err(|err| commit_error(format!("read HEAD: {err:#}")))?;
    info!(sha = %sha, files = work, "story committed");
    Ok(CommitOutcome::Committed { sha })
}

/// Fail fast when commits are enabled outside a git work tree.
pub fn ensure_repository(workdir: &Path) -> Result<()> {
    if Git::new(workdir).is_work_tree()? {
        return Ok(());
    }
    Err(RalphError::NotARepository {
        path: workdir.to_path_buf(),
    }
    .into())
}
