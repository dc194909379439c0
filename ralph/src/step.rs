//! Orchestration for a single build-loop iteration.
//!
//! One iteration takes one eligible story through
//! `Invoking -> Verifying -> Gating -> Committing -> Logging`. Story-scoped
//! failures end here as a `failed` status plus a progress record; run-level
//! failures are returned as errors after the iteration has been recorded.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::backlog::{BacklogDocument, Story, StoryStatus};
use crate::core::types::{CommitOutcome, GateReport, IterationResult, VerificationResult};
use crate::error::{RalphError, StoryFailure};
use crate::interrupt::Interrupt;
use crate::io::agent::{AgentKind, AgentOutcome, AgentStatus, Executor, InvokeOptions, invoke};
use crate::io::backlog_store::save_backlog;
use crate::io::commit::{Bookkeeping, commit};
use crate::io::config::RalphConfig;
use crate::io::gates::{GateRequest, QualityGateRunner, run_quality_gates};
use crate::io::init::RalphPaths;
use crate::io::iteration_log::{IterationMeta, IterationPaths};
use crate::io::progress_log::{ProgressRecord, append_progress};
use crate::io::prompt::render_story_prompt;
use crate::io::verify::verify;

/// Run-wide settings shared by every iteration.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    pub paths: &'a RalphPaths,
    pub cfg: &'a RalphConfig,
    pub run_id: &'a str,
    pub agent: AgentKind,
    pub dry_run: bool,
    pub commit: bool,
    pub interrupt: &'a Interrupt,
    pub bookkeeping: &'a Bookkeeping,
}

/// Result of a single iteration.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub iter: u32,
    pub story_id: String,
    pub result: IterationResult,
    /// Story status after the iteration.
    pub status: StoryStatus,
    pub failure: Option<StoryFailure>,
    pub commit: CommitOutcome,
    /// Story had no machine-checkable criterion.
    pub unchecked: bool,
}

/// Everything observed during one iteration, turned into artifacts at the end.
struct IterationReport {
    started_at: DateTime<Utc>,
    started: Instant,
    agent: Option<AgentOutcome>,
    verification: Option<VerificationResult>,
    gates: GateReport,
    commit: CommitOutcome,
    failure: Option<StoryFailure>,
    reason: Option<String>,
}

impl IterationReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            agent: None,
            verification: None,
            gates: GateReport::skipped(),
            commit: CommitOutcome::Skipped,
            failure: None,
            reason: None,
        }
    }

    fn fail(&mut self, failure: StoryFailure) {
        self.reason = Some(failure.to_string());
        self.failure = Some(failure);
    }
}

/// Take `story_id` through one full iteration.
///
/// The backlog is persisted after every status transition. Returns `Err` only
/// for run-level failures: the agent or the quality gates could not be run
/// (story restored to its previous status, `aborted` recorded) or a commit
/// error under `commit.fail_on_error`.
#[instrument(skip_all, fields(story_id = %story_id, iter = iter, agent = %ctx.agent))]
pub fn run_iteration<E: Executor, G: QualityGateRunner>(
    doc: &mut BacklogDocument,
    story_id: &str,
    iter: u32,
    ctx: &StepContext<'_>,
    executor: &E,
    gate_runner: &G,
) -> Result<StepOutcome> {
    let mut report = IterationReport::new();
    let story = doc
        .story(story_id)
        .cloned()
        .with_context(|| format!("story {story_id} not in backlog"))?;
    let paths = IterationPaths::new(&ctx.paths.runs_dir, ctx.run_id, iter);
    paths.create()?;

    let previous = doc.mark_status(story_id, StoryStatus::InProgress)?;
    save_backlog(&ctx.paths.backlog_path, doc)?;
    info!(%previous, "story in progress");
    let it = Iteration {
        story,
        iter,
        previous,
        paths,
        ctx,
    };

    let prompt = render_story_prompt(doc, &it.story, &ctx.paths.backlog_display())?;
    it.paths.write_prompt(&prompt)?;

    let invoked = invoke(
        executor,
        ctx.agent,
        &it.story,
        &prompt,
        &ctx.paths.root,
        &InvokeOptions {
            dry_run: ctx.dry_run,
            binary: ctx
                .cfg
                .agent
                .binary_override(ctx.agent)
                .map(str::to_string),
            timeout: ctx.cfg.agent.timeout(),
            output_limit_bytes: ctx.cfg.agent.output_limit_bytes,
            log_path: it.paths.agent_log_path.clone(),
            interrupt: ctx.interrupt.clone(),
        },
    );
    let agent = match invoked {
        Ok(agent) => agent,
        Err(err) => {
            warn!(err = %err, "agent could not run, aborting");
            return it.abort(doc, report, err);
        }
    };
    report.agent = Some(agent.clone());

    if agent.status == AgentStatus::Interrupted {
        warn!("agent interrupted, story stays in_progress");
        report.reason = Some("interrupted".to_string());
        return it.finish(doc, report, IterationResult::Interrupted);
    }

    if let Some(failure) = agent.failure(ctx.cfg.agent.timeout()) {
        warn!(%failure, "agent did not complete the story");
        report.fail(failure);
    } else {
        let verification = verify(&it.story, &ctx.paths.root);
        let passed = verification.passed;
        if !passed {
            let failed = verification.failed_checks().count();
            warn!(failed, "acceptance verification failed");
            report.fail(StoryFailure::Verification {
                failed,
                total: verification.details.len(),
            });
        } else if verification.unchecked() {
            warn!("story has no machine-checkable criteria, accepting on agent success");
        }
        report.verification = Some(verification);

        if passed {
            let gates = run_quality_gates(
                gate_runner,
                &doc.quality_gates,
                &GateRequest {
                    workdir: ctx.paths.root.clone(),
                    log_path: it.paths.gates_log_path.clone(),
                    timeout: ctx.cfg.gates.timeout(),
                    output_limit_bytes: ctx.cfg.gates.output_limit_bytes,
                },
            );
            report.gates = match gates {
                Ok(gates) => gates,
                Err(err) => {
                    warn!(err = %err, "quality gates could not run, aborting");
                    return it.abort(doc, report, err);
                }
            };
            if let Some(gate) = report.gates.first_failure() {
                let failure = StoryFailure::QualityGate {
                    command: gate.command.clone(),
                };
                report.fail(failure);
            }
        }
    }

    if report.failure.is_some() {
        doc.mark_status(story_id, StoryStatus::Failed)?;
        save_backlog(&ctx.paths.backlog_path, doc)?;
        return it.finish(doc, report, IterationResult::Fail);
    }

    doc.mark_status(story_id, StoryStatus::Done)?;
    save_backlog(&ctx.paths.backlog_path, doc)?;

    let mut commit_err = None;
    report.commit = match commit(&ctx.paths.root, &it.story, ctx.commit, ctx.bookkeeping) {
        Ok(outcome) => outcome,
        Err(err) => {
            let message = match err.downcast_ref::<RalphError>() {
                Some(RalphError::Commit { message, .. }) => message.clone(),
                _ => format!("{err:#}"),
            };
            warn!(%message, "commit failed");
            commit_err = Some(err);
            CommitOutcome::Failed { message }
        }
    };

    let outcome = it.finish(doc, report, IterationResult::Pass)?;
    match commit_err {
        Some(err) if ctx.cfg.commit.fail_on_error => Err(err),
        _ => Ok(outcome),
    }
}

/// Fixed facts about the iteration in flight.
struct Iteration<'a> {
    story: Story,
    iter: u32,
    /// Status before the story was marked `in_progress`.
    previous: StoryStatus,
    paths: IterationPaths,
    ctx: &'a StepContext<'a>,
}

impl Iteration<'_> {
    /// Infra fault, not a verdict on the story: put the story back, record
    /// `aborted`, and hand `err` to the caller.
    fn abort(
        &self,
        doc: &mut BacklogDocument,
        mut report: IterationReport,
        err: anyhow::Error,
    ) -> Result<StepOutcome> {
        doc.mark_status(&self.story.id, self.previous)?;
        save_backlog(&self.ctx.paths.backlog_path, doc)?;
        report.reason = Some(format!("{err:#}"));
        self.finish(doc, report, IterationResult::Aborted)?;
        Err(err)
    }

    /// Write `meta.json`, append the progress record, and build the outcome.
    fn finish(
        &self,
        doc: &BacklogDocument,
        report: IterationReport,
        result: IterationResult,
    ) -> Result<StepOutcome> {
        let ctx = self.ctx;
        let story = &self.story;
        let ended_at = Utc::now();
        let duration_ms = report.started.elapsed().as_millis() as u64;
        let status = doc.status_of(&story.id).unwrap_or(story.status);
        let unchecked = report
            .verification
            .as_ref()
            .is_some_and(VerificationResult::unchecked);

        let (checks_passed, checks_total, failed_checks) = match &report.verification {
            Some(v) => (
                v.passed_count(),
                v.details.len(),
                v.failed_checks()
                    .map(|check| format!("{} ({})", check.criterion, check.detail))
                    .collect(),
            ),
            None => (0, 0, Vec::new()),
        };

        append_progress(
            &ctx.paths.progress_path,
            &ProgressRecord {
                timestamp: report.started_at,
                run_id: ctx.run_id.to_string(),
                iteration: self.iter,
                story_id: story.id.clone(),
                title: story.title.clone(),
                agent: ctx.agent,
                dry_run: ctx.dry_run,
                result,
                reason: report.reason.clone(),
                agent_exit: report.agent.as_ref().and_then(|agent| agent.exit_code),
                checks_passed,
                checks_total,
                failed_checks,
                unchecked,
                gates: report.gates.outcome,
                commit: report.commit.clone(),
                duration_ms,
            },
        )?;

        self.paths.write_meta(&IterationMeta {
            run_id: ctx.run_id.to_string(),
            iter: self.iter,
            story_id: story.id.clone(),
            result,
            failure: report.failure.clone(),
            agent: report.agent,
            verification: report.verification,
            gates: report.gates,
            commit: report.commit.clone(),
            started_at: report
                .started_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            ended_at: ended_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration_ms,
        })?;

        info!(%result, %status, "iteration finished");
        Ok(StepOutcome {
            iter: self.iter,
            story_id: story.id.clone(),
            result,
            status,
            failure: report.failure,
            commit: report.commit,
            unchecked,
        })
    }
}
