//! Per-iteration artifacts under `.ralph/runs/<run-id>/<iter>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{CommitOutcome, GateReport, IterationResult, VerificationResult};
use crate::error::StoryFailure;
use crate::io::agent::AgentOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iter: u32,
    pub story_id: String,
    pub result: IterationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StoryFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    pub gates: GateReport,
    pub commit: CommitOutcome,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub agent_log_path: PathBuf,
    pub gates_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(runs_dir: &Path, run_id: &str, iter: u32) -> Self {
        let dir = runs_dir.join(run_id).join(iter.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            agent_log_path: dir.join("agent.log"),
            gates_log_path: dir.join("gates.log"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create iteration dir {}", self.dir.display()))
    }

    pub fn write_prompt(&self, prompt: &str) -> Result<()> {
        write_text(&self.prompt_path, prompt)
    }

    pub fn write_meta(&self, meta: &IterationMeta) -> Result<()> {
        write_json(&self.meta_path, meta)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
