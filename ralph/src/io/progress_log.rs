//! Progress logger: the append-only audit trail of every iteration.
//!
//! The log is Markdown so humans can read it, with a fixed `- Key: value`
//! layout so [`parse_progress`] can read it back.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use regex::Regex;
use tracing::{debug, instrument};

use crate::core::types::{CommitOutcome, GateOutcome, IterationResult};
use crate::io::agent::AgentKind;

pub const PROGRESS_HEADER: &str = "# Ralph Progress Log";

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^## \[(?P<ts>[^\]]+)\] (?P<id>[^:]+): (?P<title>.*)$").expect("heading regex")
});

/// One immutable entry, written once per iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub iteration: u32,
    pub story_id: String,
    pub title: String,
    pub agent: AgentKind,
    pub dry_run: bool,
    pub result: IterationResult,
    /// Why the story failed or the iteration stopped; `None` on pass.
    pub reason: Option<String>,
    pub agent_exit: Option<i32>,
    pub checks_passed: usize,
    pub checks_total: usize,
    /// `criterion (detail)` for each failing check.
    pub failed_checks: Vec<String>,
    pub unchecked: bool,
    pub gates: GateOutcome,
    pub commit: CommitOutcome,
    pub duration_ms: u64,
}

impl ProgressRecord {
    /// Markdown block for this record (ends with a blank line).
    pub fn render(&self) -> String {
        let mut buf = format!(
            "## [{}] {}: {}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.story_id,
            single_line(&self.title)
        );
        let mut line = |key: &str, value: &str| buf.push_str(&format!("- {key}: {value}\n"));
        line("Run", &self.run_id);
        line("Iteration", &self.iteration.to_string());
        line("Agent", self.agent.as_str());
        line("Dry run", yes_no(self.dry_run));
        line("Result", self.result.as_str());
        if let Some(reason) = &self.reason {
            line("Reason", &single_line(reason));
        }
        line(
            "Agent exit",
            &self
                .agent_exit
                .map_or_else(|| "none".to_string(), |code| code.to_string()),
        );
        line(
            "Checks",
            &format!("{}/{} passed", self.checks_passed, self.checks_total),
        );
        if !self.failed_checks.is_empty() {
            let failed = self
                .failed_checks
                .iter()
                .map(|check| single_line(check))
                .collect::<Vec<_>>()
                .join(" | ");
            line("Failed checks", &failed);
        }
        line("Unchecked", yes_no(self.unchecked));
        line("Gates", &self.gates.to_string());
        line("Commit", &single_line(&self.commit.to_string()));
        line("Duration", &format!("{}ms", self.duration_ms));
        buf.push('\n');
        buf
    }
}

/// Append `record`, creating the file (with its header) on first use.
#[instrument(skip_all, fields(path = %path.display(), story_id = %record.story_id))]
pub fn append_progress(path: &Path, record: &ProgressRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create progress dir {}", parent.display()))?;
    }
    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open progress log {}", path.display()))?;

    let mut buf = String::new();
    if needs_header {
        buf.push_str(PROGRESS_HEADER);
        buf.push_str("\n\n");
    }
    buf.push_str(&record.render());
    file.write_all(buf.as_bytes())
        .with_context(|| format!("append progress log {}", path.display()))?;
    debug!(result = %record.result, "progress record appended");
    Ok(())
}

/// A progress block read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub timestamp: DateTime<FixedOffset>,
    pub story_id: String,
    pub title: String,
    /// `- Key: value` lines in file order.
    pub fields: Vec<(String, String)>,
}

impl ProgressEntry {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn result(&self) -> Option<IterationResult> {
        self.field("Result").and_then(IterationResult::parse)
    }

    pub fn agent(&self) -> Option<AgentKind> {
        self.field("Agent").and_then(AgentKind::parse)
    }

    pub fn run_id(&self) -> Option<&str> {
        self.field("Run")
    }

    /// Short SHA if the record shows a commit.
    pub fn commit_sha(&self) -> Option<&str> {
        self.field("Commit").filter(|value| {
            !value.is_empty()
                && value.len() <= 40
                && value.chars().all(|c| c.is_ascii_hexdigit())
        })
    }
}

/// Parse the blocks of a progress log. Text outside blocks is ignored.
pub fn parse_progress(contents: &str) -> Result<Vec<ProgressEntry>> {
    let mut entries: Vec<ProgressEntry> = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if let Some(caps) = HEADING_RE.captures(line) {
            let timestamp = DateTime::parse_from_rfc3339(&caps["ts"])
                .with_context(|| format!("line {}: bad timestamp '{}'", idx + 1, &caps["ts"]))?;
            entries.push(ProgressEntry {
                timestamp,
                story_id: caps["id"].to_string(),
                title: caps["title"].to_string(),
                fields: Vec::new(),
            });
            continue;
        }
        let Some(rest) = line.strip_prefix("- ") else {
            continue;
        };
        let Some(entry) = entries.last_mut() else {
            continue;
        };
        let (key, value) = rest
            .split_once(": ")
            .or_else(|| rest.strip_suffix(':').map(|key| (key, "")))
            .ok_or_else(|| anyhow!("line {}: expected '- Key: value'", idx + 1))?;
        entry.fields.push((key.to_string(), value.to_string()));
    }
    Ok(entries)
}

/// Read and parse the progress log at `path`; a missing file has no entries.
pub fn read_progress(path: &Path) -> Result<Vec<ProgressEntry>> {
    match fs::read_to_string(path) {
        Ok(contents) => parse_progress(&contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err).with_context(|| format!("read progress log {}", path.display())),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
