//! CLI tests for `ralph init`, `validate`, `next`, and `build`.
//!
//! Spawns the ralph binary and checks exit codes and stdout. Builds run with
//! `RALPH_DRY_RUN=1` so no agent binary is needed.

use std::process::{Command, Output};

use ralph::backlog::{BacklogDocument, StoryStatus};
use ralph::exit_codes;
use ralph::io::backlog_store::load_backlog;
use ralph::test_support::{TestRepo, backlog, story, story_with_status};

fn ralph(repo: &TestRepo, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ralph"))
        .current_dir(repo.root())
        .env("RALPH_DRY_RUN", "1")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("spawn ralph")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn repo_with(doc: &BacklogDocument) -> TestRepo {
    let repo = TestRepo::new().expect("repo");
    repo.write_backlog(doc).expect("backlog");
    repo
}

#[test]
fn init_then_validate_and_next() {
    let repo = TestRepo::new().expect("repo");

    let init = ralph(&repo, &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));
    assert!(repo.root().join(".ralph/config.toml").is_file());

    let validate = ralph(&repo, &["validate"]);
    assert_eq!(validate.status.code(), Some(exit_codes::OK));
    assert!(stdout(&validate).contains("1 stories (1 open"));

    let next = ralph(&repo, &["next"]);
    assert_eq!(next.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&next).trim(), "US-001");

    let again = ralph(&repo, &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn next_exit_codes_distinguish_exhausted_and_deadlocked() {
    let repo = repo_with(&backlog(vec![story_with_status(
        "US-001",
        &[],
        StoryStatus::Done,
    )]));
    assert_eq!(
        ralph(&repo, &["next"]).status.code(),
        Some(exit_codes::EXHAUSTED)
    );

    let repo = repo_with(&backlog(vec![
        story_with_status("US-001", &[], StoryStatus::Failed),
        story("US-002", &["US-001"]),
    ]));
    let next = ralph(&repo, &["next"]);
    assert_eq!(next.status.code(), Some(exit_codes::DEADLOCKED));
    assert!(String::from_utf8_lossy(&next.stderr).contains("US-002 waits on US-001 (failed)"));
}

#[test]
fn dry_run_build_completes_backlog() {
    let repo = repo_with(&backlog(vec![
        story("US-001", &[]),
        story("US-002", &["US-001"]),
    ]));

    let output = ralph(&repo, &["build", "5", "--no-commit", "--agent", "claude"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let out = stdout(&output);
    assert!(out.contains("iter 1: US-001 pass status=done commit=disabled unchecked"));
    assert!(out.contains("iter 2: US-002 pass"));
    assert!(out.contains("stop=exhausted"));

    let doc = load_backlog(&repo.backlog_path()).expect("load");
    assert_eq!(doc.count_status(StoryStatus::Done), 2);
    let progress = repo.read(".ralph/progress.md").expect("progress");
    assert!(progress.starts_with("# Ralph Progress Log"));
    assert!(progress.contains("- Agent: claude"));
    assert!(progress.contains("- Dry run: yes"));
}

#[test]
fn build_budget_exits_ok() {
    let repo = repo_with(&backlog(vec![story("US-001", &[]), story("US-002", &[])]));

    let output = ralph(&repo, &["build", "1", "--no-commit"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("stop=budgeted"));
}

#[test]
fn build_deadlock_exits_nonzero() {
    let repo = repo_with(&backlog(vec![
        story_with_status("US-001", &[], StoryStatus::Failed),
        story("US-002", &["US-001"]),
    ]));

    let output = ralph(&repo, &["build", "3", "--no-commit"]);
    assert_eq!(output.status.code(), Some(exit_codes::DEADLOCKED));
    assert!(stdout(&output).contains("build: blocked US-002 waits on US-001 (failed)"));
}

#[test]
fn invalid_backlog_exits_invalid() {
    let repo = TestRepo::new().expect("repo");
    repo.write(".agents/tasks/prd.json", "{not json")
        .expect("write");

    let output = ralph(&repo, &["build", "1", "--no-commit"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("malformed JSON"));
}

#[test]
fn zero_count_is_a_usage_error() {
    let repo = TestRepo::new().expect("repo");
    assert_eq!(
        ralph(&repo, &["build", "0"]).status.code(),
        Some(exit_codes::INVALID)
    );
}
