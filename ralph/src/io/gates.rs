//! Quality gate runner: project-wide shell commands that must pass before a story is done.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{GateOutcome, GateReport, GateResult};
use crate::io::process::{RunLimits, run_command};

#[derive(Debug, Clone)]
pub struct GateRequest {
    pub workdir: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// One gate command's raw execution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRun {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    /// Rendered stdout/stderr for the gate log.
    pub log: String,
}

pub trait QualityGateRunner {
    fn run(&self, command: &str, request: &GateRequest) -> Result<GateRun>;
}

/// Runs each gate through `sh -c` in the working directory.
pub struct ShellGateRunner;

impl QualityGateRunner for ShellGateRunner {
    #[instrument(skip_all, fields(command = %command))]
    fn run(&self, command: &str, request: &GateRequest) -> Result<GateRun> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&request.workdir);
        let output = run_command(
            cmd,
            None,
            &RunLimits {
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
                interrupt: None,
            },
        )
        .with_context(|| format!("run quality gate '{command}'"))?;

        Ok(GateRun {
            exit_code: output.status.code(),
            success: output.status.success() && !output.timed_out,
            timed_out: output.timed_out,
            log: output.render_log("gate"),
        })
    }
}

/// Run every gate in order, stopping at the first failure.
///
/// An empty gate list passes. The combined output of every gate that ran is
/// written to `request.log_path`.
#[instrument(skip_all, fields(gates = commands.len()))]
pub fn run_quality_gates<R: QualityGateRunner>(
    runner: &R,
    commands: &[String],
    request: &GateRequest,
) -> Result<GateReport> {
    let mut results = Vec::new();
    let mut log = String::new();

    for command in commands {
        debug!(command, "running quality gate");
        let run = runner.run(command, request)?;
        log.push_str(&format!("$ {command}\n{}\n", run.log));
        results.push(GateResult {
            command: command.clone(),
            passed: run.success,
            exit_code: run.exit_code,
            timed_out: run.timed_out,
        });
        if !run.success {
            warn!(command, exit_code = ?run.exit_code, timed_out = run.timed_out, "quality gate failed");
            break;
        }
    }

    if !commands.is_empty() {
        write_gate_log(&request.log_path, &log)?;
    }

    let outcome = if results.iter().all(|result| result.passed) {
        GateOutcome::Pass
    } else {
        GateOutcome::Fail
    };
    info!(%outcome, ran = results.len(), "quality gates finished");
    Ok(GateReport { outcome, results })
}

fn write_gate_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create gate log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write gate log {}", path.display()))
}
