//! Loop configuration stored under `.ralph/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RalphError;
use crate::io::agent::AgentKind;

pub const DEFAULT_BACKLOG_PATH: &str = ".agents/tasks/prd.json";
pub const DEFAULT_PROGRESS_PATH: &str = ".ralph/progress.md";
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 60 * 60;
pub const DEFAULT_GATE_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 200_000;
/// Upper bound for any configured timeout (one week).
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Loop configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults, so an
/// absent file and an empty file behave the same.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RalphConfig {
    /// Backlog document, relative to the project root.
    pub backlog_path: String,
    /// Progress log, relative to the project root.
    pub progress_path: String,
    pub agent: AgentConfig,
    pub gates: GatesConfig,
    pub commit: CommitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Backend used when `--agent` is not given.
    pub default: AgentKind,
    pub timeout_secs: u64,
    /// Bytes of agent stdout/stderr kept in `agent.log`.
    pub output_limit_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codex_bin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude_bin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub droid_bin: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default: AgentKind::Codex,
            timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            codex_bin: None,
            claude_bin: None,
            droid_bin: None,
        }
    }
}

impl AgentConfig {
    /// Configured binary override for `agent`.
    pub fn binary_override(&self, agent: AgentKind) -> Option<&str> {
        match agent {
            AgentKind::Codex => self.codex_bin.as_deref(),
            AgentKind::Claude => self.claude_bin.as_deref(),
            AgentKind::Droid => self.droid_bin.as_deref(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatesConfig {
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_GATE_TIMEOUT_SECS,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl GatesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    pub enabled: bool,
    /// Abort the run on a commit error instead of warning and continuing.
    pub fail_on_error: bool,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_on_error: true,
        }
    }
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            backlog_path: DEFAULT_BACKLOG_PATH.to_string(),
            progress_path: DEFAULT_PROGRESS_PATH.to_string(),
            agent: AgentConfig::default(),
            gates: GatesConfig::default(),
            commit: CommitConfig::default(),
        }
    }
}

impl RalphConfig {
    pub fn validate(&self) -> Result<(), RalphError> {
        let invalid = |msg: &str| Err(RalphError::Config(msg.to_string()));
        if self.backlog_path.trim().is_empty() {
            return invalid("backlog_path must be non-empty");
        }
        if self.progress_path.trim().is_empty() {
            return invalid("progress_path must be non-empty");
        }
        if self.agent.timeout_secs == 0 {
            return invalid("agent.timeout_secs must be > 0");
        }
        if self.agent.timeout_secs > MAX_TIMEOUT_SECS {
            return invalid("agent.timeout_secs must be at most one week");
        }
        if self.agent.output_limit_bytes == 0 {
            return invalid("agent.output_limit_bytes must be > 0");
        }
        if self.gates.timeout_secs == 0 {
            return invalid("gates.timeout_secs must be > 0");
        }
        if self.gates.timeout_secs > MAX_TIMEOUT_SECS {
            return invalid("gates.timeout_secs must be at most one week");
        }
        if self.gates.output_limit_bytes == 0 {
            return invalid("gates.output_limit_bytes must be > 0");
        }
        Ok(())
    }

    pub fn backlog_path(&self, root: &Path) -> PathBuf {
        root.join(&self.backlog_path)
    }

    pub fn progress_path(&self, root: &Path) -> PathBuf {
        root.join(&self.progress_path)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RalphConfig::default()`.
pub fn load_config(path: &Path) -> Result<RalphConfig> {
    if !path.exists() {
        return Ok(RalphConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RalphConfig = toml::from_str(&contents)
        .map_err(|err| RalphError::Config(format!("parse {}: {}", path.display(), err.message())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RalphConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf, "toml.tmp")
}

/// Replace `path` with `contents` via a sibling temp file, creating parent directories.
pub fn write_atomic(path: &Path, contents: &str, tmp_extension: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension(tmp_extension);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
