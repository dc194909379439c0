//! Agent adapter: one capability over the codex, claude, and droid CLIs.
//!
//! Each [`AgentBackend`] only knows how to build its command line. Spawning,
//! timeouts, and outcome translation are shared through [`Executor`], which
//! tests replace with scripted executors that never spawn a process.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::backlog::Story;
use crate::error::{RalphError, StoryFailure};
use crate::interrupt::Interrupt;
use crate::io::bin_detect::resolve_command;
use crate::io::process::{RunLimits, is_not_found, run_command};

/// Supported agent backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Codex,
    Claude,
    Droid,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Codex, AgentKind::Claude, AgentKind::Droid];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Codex => "codex",
            AgentKind::Claude => "claude",
            AgentKind::Droid => "droid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn backend(&self) -> &'static dyn AgentBackend {
        match self {
            AgentKind::Codex => &CodexBackend,
            AgentKind::Claude => &ClaudeBackend,
            AgentKind::Droid => &DroidBackend,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command line for one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub args: Vec<String>,
    /// Prompt piped on stdin, if the backend reads it from there.
    pub stdin: Option<String>,
}

/// Per-backend command construction.
pub trait AgentBackend: Sync {
    fn kind(&self) -> AgentKind;
    fn default_binary(&self) -> &'static str;
    fn command(&self, prompt: &str) -> AgentCommand;
}

pub struct CodexBackend;

impl AgentBackend for CodexBackend {
    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn default_binary(&self) -> &'static str {
        "codex"
    }

    fn command(&self, prompt: &str) -> AgentCommand {
        AgentCommand {
            args: [
                "exec",
                "--sandbox",
                "danger-full-access",
                "--skip-git-repo-check",
                "-",
            ]
            .map(String::from)
            .to_vec(),
            stdin: Some(prompt.to_string()),
        }
    }
}

pub struct ClaudeBackend;

impl AgentBackend for ClaudeBackend {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn default_binary(&self) -> &'static str {
        "claude"
    }

    fn command(&self, prompt: &str) -> AgentCommand {
        // Non-interactive print mode; permission prompts would hang the loop.
        AgentCommand {
            args: [
                "-p",
                "--dangerously-skip-permissions",
                "--output-format",
                "text",
            ]
            .map(String::from)
            .to_vec(),
            stdin: Some(prompt.to_string()),
        }
    }
}

pub struct DroidBackend;

impl AgentBackend for DroidBackend {
    fn kind(&self) -> AgentKind {
        AgentKind::Droid
    }

    fn default_binary(&self) -> &'static str {
        "droid"
    }

    fn command(&self, prompt: &str) -> AgentCommand {
        AgentCommand {
            args: vec![
                "exec".to_string(),
                "--auto".to_string(),
                "high".to_string(),
                prompt.to_string(),
            ],
            stdin: None,
        }
    }
}

/// How the agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Succeeded,
    ExitedNonZero,
    TimedOut,
    Interrupted,
}

/// Ephemeral per-iteration result of invoking an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentOutcome {
    pub agent: AgentKind,
    pub status: AgentStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub dry_run: bool,
}

impl AgentOutcome {
    /// Deterministic synthetic success used by dry runs.
    pub fn dry_run(agent: AgentKind) -> Self {
        Self {
            agent,
            status: AgentStatus::Succeeded,
            exit_code: Some(0),
            duration_ms: 0,
            dry_run: true,
        }
    }

    /// Story-scoped failure implied by this outcome, if any.
    ///
    /// `Interrupted` is not a story failure: the story stays `in_progress`.
    pub fn failure(&self, timeout: Duration) -> Option<StoryFailure> {
        match self.status {
            AgentStatus::Succeeded | AgentStatus::Interrupted => None,
            AgentStatus::ExitedNonZero => Some(StoryFailure::AgentExitedNonZero {
                code: self.exit_code,
            }),
            AgentStatus::TimedOut => Some(StoryFailure::AgentTimedOut {
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub agent: AgentKind,
    pub story_id: String,
    /// Binary to run (resolved path or bare name).
    pub binary: String,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text for the agent.
    pub prompt: String,
    /// Path to write agent stdout/stderr log.
    pub log_path: PathBuf,
    pub timeout: Duration,
    /// Truncate agent output logs beyond this many bytes.
    pub output_limit_bytes: usize,
    pub interrupt: Interrupt,
}

/// Abstraction over agent execution.
pub trait Executor {
    /// Run the agent to completion (or timeout/interrupt) and report how it ended.
    fn exec(&self, request: &ExecRequest) -> Result<AgentOutcome>;

    /// Fail fast when the agent cannot be started. Runs once per build, before
    /// any story changes state.
    fn preflight(&self, agent: AgentKind, binary_override: Option<&str>) -> Result<()> {
        ensure_agent_available(agent, binary_override).map(|_| ())
    }
}

/// Executor that spawns the real agent CLI.
pub struct CliExecutor;

impl Executor for CliExecutor {
    #[instrument(skip_all, fields(agent = %request.agent, timeout_secs = request.timeout.as_secs()))]
    fn exec(&self, request: &ExecRequest) -> Result<AgentOutcome> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let agent_cmd = request.agent.backend().command(&request.prompt);

        let mut cmd = Command::new(&request.binary);
        cmd.args(&agent_cmd.args).current_dir(&request.workdir);

        let output = run_command(
            cmd,
            agent_cmd.stdin.as_deref().map(str::as_bytes),
            &RunLimits {
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
                interrupt: Some(request.interrupt.clone()),
            },
        )
        .with_context(|| format!("run {} agent", request.agent))?;

        write_agent_log(&request.log_path, &output.render_log("agent"))?;

        let status = if output.interrupted {
            AgentStatus::Interrupted
        } else if output.timed_out {
            warn!("agent timed out");
            AgentStatus::TimedOut
        } else if output.status.success() {
            AgentStatus::Succeeded
        } else {
            warn!(exit_code = ?output.status.code(), "agent failed");
            AgentStatus::ExitedNonZero
        };
        debug!(?status, "agent finished");

        Ok(AgentOutcome {
            agent: request.agent,
            status,
            exit_code: output.status.code(),
            duration_ms: output.elapsed.as_millis() as u64,
            dry_run: false,
        })
    }
}

/// Options for [`invoke`].
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Return a synthetic success without spawning anything.
    pub dry_run: bool,
    /// Binary override; defaults to the backend's binary name.
    pub binary: Option<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub log_path: PathBuf,
    pub interrupt: Interrupt,
}

/// Hand `story` to the agent and wait for it to finish.
///
/// A missing binary surfaces as [`RalphError::AgentNotFound`]; every other
/// way the process can end is reported through [`AgentOutcome::status`].
#[instrument(skip_all, fields(agent = %agent, story_id = %story.id, dry_run = options.dry_run))]
pub fn invoke<E: Executor>(
    executor: &E,
    agent: AgentKind,
    story: &Story,
    prompt: &str,
    workdir: &Path,
    options: &InvokeOptions,
) -> Result<AgentOutcome> {
    if options.dry_run {
        info!("dry run: skipping agent process");
        return Ok(AgentOutcome::dry_run(agent));
    }

    let binary = binary_name(agent, options.binary.as_deref());
    let request = ExecRequest {
        agent,
        story_id: story.id.clone(),
        binary: binary.clone(),
        workdir: workdir.to_path_buf(),
        prompt: prompt.to_string(),
        log_path: options.log_path.clone(),
        timeout: options.timeout,
        output_limit_bytes: options.output_limit_bytes,
        interrupt: options.interrupt.clone(),
    };
    executor.exec(&request).map_err(|err| {
        if is_not_found(&err) {
            RalphError::AgentNotFound { agent, binary }.into()
        } else {
            err
        }
    })
}

/// Binary `agent` would run with, honoring an override.
pub fn binary_name(agent: AgentKind, override_bin: Option<&str>) -> String {
    override_bin
        .map(str::trim)
        .filter(|bin| !bin.is_empty())
        .unwrap_or(agent.backend().default_binary())
        .to_string()
}

/// Check that the agent binary can be found before any story changes state.
pub fn ensure_agent_available(agent: AgentKind, override_bin: Option<&str>) -> Result<PathBuf> {
    let binary = binary_name(agent, override_bin);
    let resolved = resolve_command(&binary)
        .ok_or_else(|| RalphError::AgentNotFound { agent, binary })?;
    debug!(%agent, path = %resolved.display(), "agent binary resolved");
    Ok(resolved)
}

fn write_agent_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write agent log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::story;

    struct NotFoundExecutor;

    impl Executor for NotFoundExecutor {
        fn exec(&self, _request: &ExecRequest) -> Result<AgentOutcome> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
                .context("spawn command")
        }
    }

    struct PanicExecutor;

    impl Executor for PanicExecutor {
        fn exec(&self, _request: &ExecRequest) -> Result<AgentOutcome> {
            panic!("dry run must not reach the executor");
        }
    }

    fn options(dry_run: bool) -> InvokeOptions {
        InvokeOptions {
            dry_run,
            binary: None,
            timeout: Duration::from_secs(5),
            output_limit_bytes: 1000,
            log_path: PathBuf::from("agent.log"),
            interrupt: Interrupt::new(),
        }
    }

    #[test]
    fn backends_build_their_command_lines() {
        let codex = AgentKind::Codex.backend().command("do it");
        assert_eq!(codex.args.last().map(String::as_str), Some("-"));
        assert_eq!(codex.stdin.as_deref(), Some("do it"));

        let claude = AgentKind::Claude.backend().command("do it");
        assert_eq!(claude.args[0], "-p");
        assert_eq!(claude.stdin.as_deref(), Some("do it"));

        let droid = AgentKind::Droid.backend().command("do it");
        assert_eq!(droid.args[0], "exec");
        assert_eq!(droid.args.last().map(String::as_str), Some("do it"));
        assert_eq!(droid.stdin, None);

        for kind in AgentKind::ALL {
            assert_eq!(kind.backend().kind(), kind);
            assert_eq!(AgentKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn dry_run_short_circuits_without_executor() {
        let outcome = invoke(
            &PanicExecutor,
            AgentKind::Claude,
            &story("US-001", &[]),
            "prompt",
            Path::new("."),
            &options(true),
        )
        .expect("dry run");
        assert_eq!(outcome, AgentOutcome::dry_run(AgentKind::Claude));
    }

    #[test]
    fn spawn_not_found_maps_to_agent_not_found() {
        let err = invoke(
            &NotFoundExecutor,
            AgentKind::Codex,
            &story("US-001", &[]),
            "prompt",
            Path::new("."),
            &options(false),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RalphError>(),
            Some(RalphError::AgentNotFound {
                agent: AgentKind::Codex,
                ..
            })
        ));
    }

    #[test]
    fn outcome_failures_follow_status() {
        let mut outcome = AgentOutcome::dry_run(AgentKind::Codex);
        assert_eq!(outcome.failure(Duration::from_secs(9)), None);

        outcome.status = AgentStatus::ExitedNonZero;
        outcome.exit_code = Some(1);
        assert_eq!(
            outcome.failure(Duration::from_secs(9)),
            Some(StoryFailure::AgentExitedNonZero { code: Some(1) })
        );

        outcome.status = AgentStatus::TimedOut;
        assert_eq!(
            outcome.failure(Duration::from_secs(9)),
            Some(StoryFailure::AgentTimedOut { timeout_secs: 9 })
        );

        outcome.status = AgentStatus::Interrupted;
        assert_eq!(outcome.failure(Duration::from_secs(9)), None);
    }

    #[test]
    fn binary_override_wins_unless_blank() {
        assert_eq!(binary_name(AgentKind::Droid, None), "droid");
        assert_eq!(binary_name(AgentKind::Droid, Some("  ")), "droid");
        assert_eq!(
            binary_name(AgentKind::Droid, Some("/opt/droid")),
            "/opt/droid"
        );
    }

    #[test]
    fn missing_binary_fails_preflight() {
        let err = ensure_agent_available(AgentKind::Codex, Some("ralph-missing-agent-bin"))
            .unwrap_err();
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[cfg(unix)]
    #[test]
    fn cli_executor_reports_exit_status_and_writes_log() {
        // `sh exec ...` runs ./exec as a script, which stands in for `codex exec`.
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("exec"),
            "cat >/dev/null\necho working\nexit 7\n",
        )
        .expect("write script");

        let log_path = temp.path().join("logs/agent.log");
        let outcome = CliExecutor
            .exec(&ExecRequest {
                agent: AgentKind::Codex,
                story_id: "US-001".to_string(),
                binary: "sh".to_string(),
                workdir: temp.path().to_path_buf(),
                prompt: "prompt".to_string(),
                log_path: log_path.clone(),
                timeout: Duration::from_secs(10),
                output_limit_bytes: 1000,
                interrupt: Interrupt::new(),
            })
            .expect("exec");

        assert_eq!(outcome.status, AgentStatus::ExitedNonZero);
        assert_eq!(outcome.exit_code, Some(7));
        assert!(!outcome.dry_run);
        let log = fs::read_to_string(&log_path).expect("read log");
        assert!(log.contains("working"));
    }
}
