//! Autonomous build loop CLI.
//!
//! Reads the story backlog (`.agents/tasks/prd.json` by default), hands the
//! next eligible story to a coding agent, verifies and commits the result,
//! and repeats until the requested count is reached or nothing is eligible.

use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

use ralph::error::RalphError;
use ralph::exit_codes;
use ralph::interrupt::Interrupt;
use ralph::io::agent::{AgentKind, CliExecutor};
use ralph::io::config::{RalphConfig, load_config};
use ralph::io::gates::ShellGateRunner;
use ralph::io::init::{InitOptions, config_path, init_project};
use ralph::logging;
use ralph::looping::{BuildOptions, LoopStop, run_build};
use ralph::select::{NextOutcome, describe_blocked, next_from_root};
use ralph::step::StepOutcome;
use ralph::validate::validate_backlog;

const DRY_RUN_ENV: &str = "RALPH_DRY_RUN";

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "Autonomous build loop over a story backlog"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run up to <COUNT> iterations of the build loop.
    Build {
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
        /// Agent backend (defaults to `agent.default` from config).
        #[arg(long, value_enum)]
        agent: Option<AgentKind>,
        /// Do not create a git commit per completed story.
        #[arg(long)]
        no_commit: bool,
        /// Skip agent processes and report synthetic success (also `RALPH_DRY_RUN=1`).
        #[arg(long)]
        dry_run: bool,
        /// Reset `failed` stories to `open` before selecting.
        #[arg(long)]
        retry_failed: bool,
    },
    /// Print the id of the next eligible story.
    Next,
    /// Check the backlog against schema and invariants and print a summary.
    Validate,
    /// Create `.ralph/`, a default config, and an example backlog.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            process::exit(if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            });
        }
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ralph: {err:#}");
            exit_code_for(&err, exit_codes::INVALID)
        }
    };
    process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = match cli.root {
        Some(root) => root,
        None => env::current_dir()?,
    };
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Validate => cmd_validate(&root),
        Command::Next => cmd_next(&root),
        Command::Build {
            count,
            agent,
            no_commit,
            dry_run,
            retry_failed,
        } => {
            let cfg = load_config(&config_path(&root))?;
            let options = BuildOptions {
                count,
                agent: agent.unwrap_or(cfg.agent.default),
                commit: cfg.commit.enabled && !no_commit,
                dry_run: dry_run || env_flag(DRY_RUN_ENV),
                retry_failed,
            };
            cmd_build(&root, &cfg, &options)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("init: ralph_dir={}", paths.ralph_dir.display());
    println!("init: backlog={}", paths.backlog_display());
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let cfg = load_config(&config_path(root))?;
    let outcome = validate_backlog(root, &cfg)?;
    println!("{}", outcome.summary());
    Ok(exit_codes::OK)
}

fn cmd_next(root: &Path) -> Result<i32> {
    let cfg = load_config(&config_path(root))?;
    match next_from_root(root, &cfg)? {
        NextOutcome::Eligible { id, .. } => {
            println!("{id}");
            Ok(exit_codes::OK)
        }
        NextOutcome::Exhausted => {
            eprintln!("ralph: no open stories left");
            Ok(exit_codes::EXHAUSTED)
        }
        NextOutcome::Deadlocked(blocked) => {
            eprintln!("ralph: every open story is blocked");
            for line in describe_blocked(&blocked) {
                eprintln!("  {line}");
            }
            Ok(exit_codes::DEADLOCKED)
        }
    }
}

fn cmd_build(root: &Path, cfg: &RalphConfig, options: &BuildOptions) -> Result<i32> {
    let interrupt = Interrupt::new();
    install_interrupt_handler(interrupt.clone());

    let result = run_build(
        root,
        cfg,
        options,
        &CliExecutor,
        &ShellGateRunner,
        &interrupt,
        print_iteration,
    );
    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("ralph: build aborted: {err:#}");
            return Ok(exit_code_for(&err, exit_codes::ABORTED));
        }
    };

    println!(
        "build: run_id={} iterations={} completed={} failed={} stop={}",
        summary.run_id,
        summary.iterations,
        summary.completed,
        summary.failed,
        summary.stop.as_str()
    );
    Ok(match &summary.stop {
        LoopStop::Exhausted | LoopStop::Budgeted => exit_codes::OK,
        LoopStop::Deadlocked { blocked } => {
            for line in describe_blocked(blocked) {
                println!("build: blocked {line}");
            }
            exit_codes::DEADLOCKED
        }
        LoopStop::Interrupted { story_id } => {
            if let Some(id) = story_id {
                println!("build: {id} left in_progress");
            }
            exit_codes::INTERRUPTED
        }
    })
}

fn print_iteration(step: &StepOutcome) {
    let mut line = format!(
        "iter {}: {} {} status={} commit={}",
        step.iter, step.story_id, step.result, step.status, step.commit
    );
    if let Some(failure) = &step.failure {
        line.push_str(&format!(" reason=\"{failure}\""));
    }
    if step.unchecked {
        line.push_str(" unchecked");
    }
    println!("{line}");
}

/// Map a run-level error to an exit code; anything untyped gets `fallback`.
fn exit_code_for(err: &anyhow::Error, fallback: i32) -> i32 {
    match err.downcast_ref::<RalphError>() {
        Some(RalphError::Schema { .. } | RalphError::Config(_)) => exit_codes::INVALID,
        Some(
            RalphError::AgentNotFound { .. }
            | RalphError::NotARepository { .. }
            | RalphError::Commit { .. },
        ) => exit_codes::ABORTED,
        None => fallback,
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref().map(str::trim),
        Ok("1" | "true" | "yes")
    )
}

/// First Ctrl-C trips `interrupt`; a second one exits immediately.
fn install_interrupt_handler(interrupt: Interrupt) {
    let spawned = thread::Builder::new()
        .name("ralph-ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(err = %err, "failed to start signal runtime");
                    return;
                }
            };
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if interrupt.is_triggered() {
                        eprintln!("ralph: interrupted again, exiting");
                        process::exit(exit_codes::INTERRUPTED);
                    }
                    eprintln!("ralph: interrupt requested, stopping the current agent");
                    interrupt.trigger();
                }
            });
        });
    if let Err(err) = spawned {
        warn!(err = %err, "failed to install Ctrl-C handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_build_flags() {
        let cli = Cli::parse_from([
            "ralph",
            "build",
            "3",
            "--agent",
            "droid",
            "--no-commit",
            "--retry-failed",
        ]);
        let Command::Build {
            count,
            agent,
            no_commit,
            dry_run,
            retry_failed,
        } = cli.command
        else {
            panic!("expected build");
        };
        assert_eq!(count, 3);
        assert_eq!(agent, Some(AgentKind::Droid));
        assert!(no_commit);
        assert!(!dry_run);
        assert!(retry_failed);
    }

    #[test]
    fn build_rejects_zero_count() {
        assert!(Cli::try_parse_from(["ralph", "build", "0"]).is_err());
    }

    #[test]
    fn parse_init_force_with_root() {
        let cli = Cli::parse_from(["ralph", "init", "--force", "--root", "/tmp/x"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn schema_errors_exit_invalid_and_agent_errors_abort() {
        let schema: anyhow::Error = RalphError::Schema {
            path: PathBuf::from("prd.json"),
            message: "bad".to_string(),
        }
        .into();
        assert_eq!(exit_code_for(&schema, exit_codes::ABORTED), exit_codes::INVALID);

        let missing: anyhow::Error = RalphError::AgentNotFound {
            agent: AgentKind::Codex,
            binary: "codex".to_string(),
        }
        .into();
        assert_eq!(exit_code_for(&missing, exit_codes::INVALID), exit_codes::ABORTED);

        let other = anyhow::anyhow!("disk full");
        assert_eq!(exit_code_for(&other, exit_codes::ABORTED), exit_codes::ABORTED);
    }
}
