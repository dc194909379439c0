//! Helpers for running child processes with timeouts, interrupts, and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::interrupt::Interrupt;

/// How often a waiting child is checked against the interrupt flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long readers may take to drain the pipes once the child has exited.
pub const READER_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Render stdout/stderr as a log body with truncation markers.
    pub fn render_log(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        if self.interrupted {
            buf.push_str(&format!("\n[{label} interrupted]\n"));
        }
        buf
    }
}

/// Limits applied to a child process.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept in memory (the rest is drained and counted).
    pub output_limit_bytes: usize,
    pub interrupt: Option<Interrupt>,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. On unix the child leads its
/// own process group, and the whole group is killed when the timeout elapses or
/// the interrupt flag trips; the caller sees `timed_out` or `interrupted` set.
/// Descendants that keep the output pipes open after the child exits are killed
/// too, so the call never outlives its limits by more than [`READER_GRACE`].
/// Spawn failures are returned as errors with the original `std::io::Error` in
/// the chain.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: &RunLimits,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = limits.output_limit_bytes;
    let stdout_rx = spawn_reader(stdout, limit);
    let stderr_rx = spawn_reader(stderr, limit);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading its stdin closes the pipe early.
        if let Err(e) = child_stdin.write_all(input) {
            warn!(err = %e, "child closed stdin before reading the full input");
        }
    }

    // `None` only when the timeout is too large to represent; such a wait is unbounded.
    let deadline = started.checked_add(limits.timeout);
    let mut timed_out = false;
    let mut interrupted = false;
    let status = loop {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            break kill_and_wait(&mut child)?;
        }
        if limits
            .interrupt
            .as_ref()
            .is_some_and(Interrupt::is_triggered)
        {
            warn!("interrupt requested, killing command");
            interrupted = true;
            break kill_and_wait(&mut child)?;
        }
        let slice = match deadline {
            Some(deadline) => POLL_INTERVAL.min(deadline - now),
            None => POLL_INTERVAL,
        };
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
    };

    let mut stdout_out = recv_output(&stdout_rx, READER_GRACE).context("collect stdout")?;
    let mut stderr_out = recv_output(&stderr_rx, READER_GRACE).context("collect stderr")?;
    if stdout_out.is_none() || stderr_out.is_none() {
        warn!("descendants still hold the output pipes, killing process group");
        kill_group(child.id());
        if stdout_out.is_none() {
            stdout_out = recv_output(&stdout_rx, READER_GRACE).context("collect stdout")?;
        }
        if stderr_out.is_none() {
            stderr_out = recv_output(&stderr_rx, READER_GRACE).context("collect stderr")?;
        }
    }
    if stdout_out.is_none() || stderr_out.is_none() {
        warn!("output pipes still open, dropping the rest of the output");
    }
    let (stdout, stdout_truncated) = stdout_out.unwrap_or_default();
    let (stderr, stderr_truncated) = stderr_out.unwrap_or_default();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, interrupted, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        interrupted,
        elapsed: started.elapsed(),
    })
}

fn kill_and_wait(child: &mut Child) -> Result<ExitStatus> {
    kill_group(child.id());
    // The child may have exited between the last poll and the kill.
    if let Err(e) = child.kill() {
        debug!(err = %e, "kill failed (child already exited?)");
    }
    child.wait().context("wait command after kill")
}

/// SIGKILL the process group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(err = %e, pid, "killpg failed (group already gone?)");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

type ReadResult = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<ReadResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only if the caller gave up on this stream.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// Wait up to `grace` for a reader; `None` means the pipe is still open.
fn recv_output(rx: &Receiver<ReadResult>, grace: Duration) -> Result<Option<(Vec<u8>, usize)>> {
    match rx.recv_timeout(grace) {
        Ok(result) => result.map(Some),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> ReadResult {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// True if `err` was caused by the executable not existing.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}
