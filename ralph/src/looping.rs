//! Multi-iteration build loop for `ralph build`.

use std::path::Path;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::backlog::StoryStatus;
use crate::core::resolver::{BlockedStory, Selection, select};
use crate::interrupt::Interrupt;
use crate::io::agent::{AgentKind, Executor};
use crate::io::backlog_store::{load_backlog, save_backlog};
use crate::io::commit::{Bookkeeping, ensure_repository};
use crate::io::config::RalphConfig;
use crate::io::gates::QualityGateRunner;
use crate::io::init::{RalphPaths, ensure_ralph_dir};
use crate::step::{StepContext, StepOutcome, run_iteration};

/// Options for one `ralph build` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Maximum number of iterations (stories attempted) in this run.
    pub count: u32,
    pub agent: AgentKind,
    /// Create one commit per story that reaches `done`.
    pub commit: bool,
    pub dry_run: bool,
    /// Reset `failed` stories to `open` before the first selection.
    pub retry_failed: bool,
}

/// Reason why `run_build` stopped.
///
/// Run-level failures (`Aborted`) are not a variant: they surface as the
/// `Err` of [`run_build`] carrying a [`crate::error::RalphError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// No story is left `open` or `in_progress`.
    Exhausted,
    /// The requested iteration count was reached.
    Budgeted,
    /// Open stories remain, but every one waits on a dependency that is not `done`.
    Deadlocked { blocked: Vec<BlockedStory> },
    /// An interrupt was requested. `story_id` is the story left `in_progress`, if any.
    Interrupted { story_id: Option<String> },
}

impl LoopStop {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStop::Exhausted => "exhausted",
            LoopStop::Budgeted => "budgeted",
            LoopStop::Deadlocked { .. } => "deadlocked",
            LoopStop::Interrupted { .. } => "interrupted",
        }
    }
}

/// Summary of a build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub run_id: String,
    pub iterations: u32,
    /// Stories that reached `done` in this run.
    pub completed: u32,
    /// Stories that ended `failed` in this run.
    pub failed: u32,
    pub stop: LoopStop,
}

/// Run up to `options.count` iterations over the backlog under `root`.
///
/// Preflights (agent binary, git work tree) run before any story changes
/// state. Stories left `in_progress` by an earlier run are reset to `open`.
/// Each finished iteration is reported through `on_iteration`.
#[instrument(skip_all, fields(root = %root.display(), count = options.count, agent = %options.agent))]
pub fn run_build<E, G, F>(
    root: &Path,
    cfg: &RalphConfig,
    options: &BuildOptions,
    executor: &E,
    gate_runner: &G,
    interrupt: &Interrupt,
    mut on_iteration: F,
) -> Result<BuildSummary>
where
    E: Executor,
    G: QualityGateRunner,
    F: FnMut(&StepOutcome),
{
    if options.count == 0 {
        bail!("iteration count must be at least 1");
    }
    let paths = RalphPaths::new(root, cfg);
    let mut doc = load_backlog(&paths.backlog_path)?;

    if !options.dry_run {
        executor.preflight(options.agent, cfg.agent.binary_override(options.agent))?;
    }
    if options.commit {
        ensure_repository(root)?;
    }
    ensure_ralph_dir(&paths)?;

    let recovered = doc.reset_status(StoryStatus::InProgress, StoryStatus::Open);
    for id in &recovered {
        warn!(story_id = %id, "story was left in_progress by an earlier run, reopening");
    }
    let retried = if options.retry_failed {
        doc.reset_status(StoryStatus::Failed, StoryStatus::Open)
    } else {
        Vec::new()
    };
    if !retried.is_empty() {
        info!(stories = ?retried, "retrying failed stories");
    }
    if !recovered.is_empty() || !retried.is_empty() {
        save_backlog(&paths.backlog_path, &doc)?;
    }

    let run_id = new_run_id(&paths.runs_dir, Utc::now());
    let bookkeeping = Bookkeeping::new(paths.bookkeeping_files());
    let ctx = StepContext {
        paths: &paths,
        cfg,
        run_id: &run_id,
        agent: options.agent,
        dry_run: options.dry_run,
        commit: options.commit,
        interrupt,
        bookkeeping: &bookkeeping,
    };
    info!(run_id = %run_id, dry_run = options.dry_run, commit = options.commit, "build started");

    let mut summary = BuildSummary {
        run_id: run_id.clone(),
        iterations: 0,
        completed: 0,
        failed: 0,
        stop: LoopStop::Budgeted,
    };
    loop {
        if interrupt.is_triggered() {
            summary.stop = LoopStop::Interrupted { story_id: None };
            break;
        }
        let story_id = match select(&doc) {
            Selection::Eligible(story) => story.id.clone(),
            Selection::Exhausted => {
                summary.stop = LoopStop::Exhausted;
                break;
            }
            Selection::Deadlocked(blocked) => {
                warn!(blocked = blocked.len(), "no eligible story, backlog is deadlocked");
                summary.stop = LoopStop::Deadlocked { blocked };
                break;
            }
        };
        if summary.iterations >= options.count {
            summary.stop = LoopStop::Budgeted;
            break;
        }

        summary.iterations += 1;
        let step = run_iteration(
            &mut doc,
            &story_id,
            summary.iterations,
            &ctx,
            executor,
            gate_runner,
        )?;
        match step.status {
            StoryStatus::Done => summary.completed += 1,
            StoryStatus::Failed => summary.failed += 1,
            StoryStatus::Open | StoryStatus::InProgress => {}
        }
        on_iteration(&step);
        if step.status == StoryStatus::InProgress {
            summary.stop = LoopStop::Interrupted {
                story_id: Some(step.story_id),
            };
            break;
        }
    }

    info!(
        iterations = summary.iterations,
        completed = summary.completed,
        failed = summary.failed,
        stop = ?summary.stop,
        "build finished"
    );
    Ok(summary)
}

/// Timestamp-based run id, suffixed when a run directory with that name exists.
fn new_run_id(runs_dir: &Path, now: DateTime<Utc>) -> String {
    let base = now.format("%Y%m%d-%H%M%S").to_string();
    if !runs_dir.join(&base).exists() {
        return base;
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !runs_dir.join(&candidate).exists() {
            return candidate;
        }
        n += 1;
    }
}
