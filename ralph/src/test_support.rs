//! Test-only helpers: story builders, scratch git repos, and scripted runners.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use serde_json::Map;
use tempfile::TempDir;

use crate::backlog::{BacklogDocument, Story, StoryStatus};
use crate::io::agent::{AgentKind, AgentOutcome, AgentStatus, ExecRequest, Executor};
use crate::io::backlog_store::save_backlog;
use crate::io::config::DEFAULT_BACKLOG_PATH;
use crate::io::gates::{GateRequest, GateRun, QualityGateRunner};

/// Create a deterministic open story with no criteria.
pub fn story(id: &str, depends_on: &[&str]) -> Story {
    Story {
        id: id.to_string(),
        title: format!("{id} title"),
        description: None,
        status: StoryStatus::Open,
        depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
        acceptance_criteria: Vec::new(),
        extra: Map::new(),
    }
}

/// Create a story with an explicit status.
pub fn story_with_status(id: &str, depends_on: &[&str], status: StoryStatus) -> Story {
    Story {
        status,
        ..story(id, depends_on)
    }
}

/// Create an open story with the given acceptance criteria.
pub fn story_with_criteria(id: &str, criteria: &[&str]) -> Story {
    Story {
        acceptance_criteria: criteria.iter().map(|c| c.to_string()).collect(),
        ..story(id, &[])
    }
}

/// `File "<path>" exists with the exact text "<text>"`.
pub fn exact_text(path: &str, text: &str) -> String {
    format!("File \"{path}\" exists with the exact text \"{text}\"")
}

/// Wrap stories in a version-1 document with no quality gates.
pub fn backlog(stories: Vec<Story>) -> BacklogDocument {
    BacklogDocument {
        version: 1,
        project: "test-project".to_string(),
        quality_gates: Vec::new(),
        stories,
        extra: Map::new(),
    }
}

/// Scratch git repository with one initial commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["config", "user.email", "ralph@example.com"])?;
        repo.git(&["config", "user.name", "Ralph Test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write("README.md", "# test project\n")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "--quiet", "--no-verify", "-m", "initial commit"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn backlog_path(&self) -> PathBuf {
        self.root().join(DEFAULT_BACKLOG_PATH)
    }

    /// Write `doc` at the default backlog location.
    pub fn write_backlog(&self, doc: &BacklogDocument) -> Result<()> {
        save_backlog(&self.backlog_path(), doc)
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.root().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Stage and commit everything (setup helper, bypasses the commit manager).
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "--no-verify", "-m", message])?;
        Ok(())
    }

    /// Commit subjects after the initial commit, oldest first.
    pub fn commit_subjects(&self) -> Result<Vec<String>> {
        let out = self.git(&["log", "--reverse", "--format=%s"])?;
        Ok(out.lines().skip(1).map(str::to_string).collect())
    }

    /// Porcelain status lines, untracked files included.
    pub fn status(&self) -> Result<Vec<String>> {
        let out = self.git(&["status", "--porcelain=v1", "-uall"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// One scripted agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedExec {
    /// Write files (relative to the workdir), then exit 0.
    Succeed { files: Vec<(String, String)> },
    /// Exit with a non-zero code without touching the tree.
    Exit { code: i32 },
    TimeOut,
    /// Trip the request's interrupt flag and report the agent as interrupted.
    Interrupt,
    /// Fail the way a missing binary fails to spawn.
    NotFound,
}

impl ScriptedExec {
    pub fn writes(path: &str, contents: &str) -> Self {
        ScriptedExec::Succeed {
            files: vec![(path.to_string(), contents.to_string())],
        }
    }

    pub fn succeed() -> Self {
        ScriptedExec::Succeed { files: Vec::new() }
    }
}

/// Executor that replays scripted outcomes in order and records story ids.
pub struct ScriptedExecutor {
    scripts: RefCell<VecDeque<ScriptedExec>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(scripts: Vec<ScriptedExec>) -> Self {
        Self {
            scripts: RefCell::new(scripts.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Story ids the executor was invoked for, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest) -> Result<AgentOutcome> {
        self.calls.borrow_mut().push(request.story_id.clone());
        let script = self
            .scripts
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted exec left for {}", request.story_id))?;

        let outcome = |status: AgentStatus, exit_code: Option<i32>| AgentOutcome {
            agent: request.agent,
            status,
            exit_code,
            duration_ms: 1,
            dry_run: false,
        };
        let result = match script {
            ScriptedExec::NotFound => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "scripted missing binary",
                ))
                .context("spawn command");
            }
            ScriptedExec::Succeed { files } => {
                for (rel, contents) in files {
                    let path = request.workdir.join(rel);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, contents)?;
                }
                outcome(AgentStatus::Succeeded, Some(0))
            }
            ScriptedExec::Exit { code } => outcome(AgentStatus::ExitedNonZero, Some(code)),
            ScriptedExec::TimeOut => outcome(AgentStatus::TimedOut, None),
            ScriptedExec::Interrupt => {
                request.interrupt.trigger();
                outcome(AgentStatus::Interrupted, None)
            }
        };

        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&request.log_path, format!("scripted {:?}\n", result.status))?;
        Ok(result)
    }

    fn preflight(&self, _agent: AgentKind, _binary_override: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// Gate runner that passes every command except an optional failing one.
pub struct ScriptedGateRunner {
    failing: Option<String>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedGateRunner {
    pub fn passing() -> Self {
        Self {
            failing: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn failing_on(command: &str) -> Self {
        Self {
            failing: Some(command.to_string()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl QualityGateRunner for ScriptedGateRunner {
    fn run(&self, command: &str, _request: &GateRequest) -> Result<GateRun> {
        self.calls.borrow_mut().push(command.to_string());
        let success = self.failing.as_deref() != Some(command);
        Ok(GateRun {
            exit_code: Some(if success { 0 } else { 1 }),
            success,
            timed_out: false,
            log: format!("scripted {command}\n"),
        })
    }
}
