//! Loop-level tests for whole `ralph build` runs.
//!
//! These drive `run_build` over scratch git repositories with scripted agents
//! and gates, then check the backlog, the commit history, and the progress log.

use ralph::backlog::{BacklogDocument, StoryStatus};
use ralph::core::types::{CommitOutcome, IterationResult};
use ralph::error::RalphError;
use ralph::interrupt::Interrupt;
use ralph::io::agent::AgentKind;
use ralph::io::backlog_store::load_backlog;
use ralph::io::config::RalphConfig;
use ralph::io::progress_log::read_progress;
use ralph::looping::{BuildOptions, BuildSummary, LoopStop, run_build};
use ralph::step::StepOutcome;
use ralph::test_support::{
    ScriptedExec, ScriptedExecutor, ScriptedGateRunner, TestRepo, backlog, exact_text, story,
    story_with_criteria,
};

fn options(count: u32, commit: bool) -> BuildOptions {
    BuildOptions {
        count,
        agent: AgentKind::Codex,
        commit,
        dry_run: false,
        retry_failed: false,
    }
}

/// Story whose only check is `docs/<id>.txt` containing `<id> complete`.
fn file_story(id: &str, depends_on: &[&str]) -> ralph::backlog::Story {
    let mut s = story_with_criteria(
        id,
        &[
            &exact_text(&format!("docs/{id}.txt"), &format!("{id} complete")),
            "Example: open the file -> see the text",
        ],
    );
    s.depends_on = depends_on.iter().map(|dep| dep.to_string()).collect();
    s
}

fn writes_for(id: &str) -> ScriptedExec {
    ScriptedExec::writes(&format!("docs/{id}.txt"), &format!("{id} complete\n"))
}

fn setup(doc: &BacklogDocument) -> TestRepo {
    let repo = TestRepo::new().expect("repo");
    repo.write_backlog(doc).expect("write backlog");
    repo.commit_all("chore: add backlog").expect("commit backlog");
    repo
}

fn build(
    repo: &TestRepo,
    options: &BuildOptions,
    executor: &ScriptedExecutor,
    gates: &ScriptedGateRunner,
) -> (anyhow::Result<BuildSummary>, Vec<StepOutcome>) {
    let mut steps = Vec::new();
    let result = run_build(
        repo.root(),
        &RalphConfig::default(),
        options,
        executor,
        gates,
        &Interrupt::new(),
        |step| steps.push(step.clone()),
    );
    (result, steps)
}

fn statuses(repo: &TestRepo) -> Vec<(String, StoryStatus)> {
    load_backlog(&repo.backlog_path())
        .expect("load backlog")
        .stories
        .into_iter()
        .map(|story| (story.id, story.status))
        .collect()
}

#[test]
fn single_story_is_done_with_one_commit_and_one_pass_record() {
    let repo = setup(&backlog(vec![file_story("US-001", &[])]));
    let executor = ScriptedExecutor::new(vec![writes_for("US-001")]);

    let (result, steps) = build(
        &repo,
        &options(1, true),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let summary = result.expect("build");

    assert_eq!(summary.stop, LoopStop::Exhausted);
    assert_eq!(summary.completed, 1);
    assert_eq!(steps.len(), 1);
    assert_eq!(
        statuses(&repo),
        vec![("US-001".to_string(), StoryStatus::Done)]
    );
    assert_eq!(
        repo.commit_subjects().expect("log"),
        vec!["chore: add backlog", "feat(US-001): US-001 title"]
    );

    let entries = read_progress(&repo.root().join(".ralph/progress.md")).expect("progress");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].story_id, "US-001");
    assert_eq!(entries[0].result(), Some(IterationResult::Pass));
    assert_eq!(entries[0].agent(), Some(AgentKind::Codex));
    let CommitOutcome::Committed { sha } = &steps[0].commit else {
        panic!("expected a commit, got {:?}", steps[0].commit);
    };
    assert_eq!(entries[0].commit_sha(), Some(sha.as_str()));
    assert_eq!(entries[0].run_id(), Some(summary.run_id.as_str()));
}

#[test]
fn budget_of_one_leaves_dependent_story_open() {
    let repo = setup(&backlog(vec![
        file_story("US-001", &[]),
        file_story("US-002", &["US-001"]),
    ]));
    let executor = ScriptedExecutor::new(vec![writes_for("US-001")]);

    let (result, _) = build(
        &repo,
        &options(1, false),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let summary = result.expect("build");

    assert_eq!(summary.stop, LoopStop::Budgeted);
    assert_eq!(summary.iterations, 1);
    assert_eq!(executor.calls(), vec!["US-001"]);
    assert_eq!(
        statuses(&repo),
        vec![
            ("US-001".to_string(), StoryStatus::Done),
            ("US-002".to_string(), StoryStatus::Open),
        ]
    );
}

#[test]
fn unmet_criterion_fails_story_and_deadlocks_dependents() {
    let repo = setup(&backlog(vec![
        file_story("US-001", &[]),
        file_story("US-002", &["US-001"]),
    ]));
    let executor = ScriptedExecutor::new(vec![ScriptedExec::writes(
        "docs/US-001.txt",
        "something else",
    )]);

    let (result, steps) = build(
        &repo,
        &options(5, true),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let summary = result.expect("build");

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StoryStatus::Failed);
    assert_eq!(steps[0].commit, CommitOutcome::Skipped);
    let LoopStop::Deadlocked { blocked } = &summary.stop else {
        panic!("expected deadlock, got {:?}", summary.stop);
    };
    assert_eq!(blocked[0].id, "US-002");
    assert_eq!(
        blocked[0].waiting_on,
        vec![("US-001".to_string(), StoryStatus::Failed)]
    );
    assert_eq!(repo.commit_subjects().expect("log"), vec!["chore: add backlog"]);

    let entries = read_progress(&repo.root().join(".ralph/progress.md")).expect("progress");
    assert_eq!(entries[0].result(), Some(IterationResult::Fail));
    assert_eq!(entries[0].field("Checks"), Some("0/1 passed"));
    let failed = entries[0].field("Failed checks").expect("failed checks");
    assert!(failed.contains("docs/US-001.txt"));
    assert!(failed.contains("text mismatch"));
}

#[test]
fn failed_story_does_not_stop_independent_stories() {
    let repo = setup(&backlog(vec![
        file_story("US-001", &[]),
        file_story("US-002", &[]),
    ]));
    let executor = ScriptedExecutor::new(vec![ScriptedExec::Exit { code: 1 }, writes_for("US-002")]);

    let (result, _) = build(
        &repo,
        &options(5, true),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let summary = result.expect("build");

    assert_eq!(summary.stop, LoopStop::Exhausted);
    assert_eq!((summary.completed, summary.failed), (1, 1));
    assert_eq!(
        statuses(&repo),
        vec![
            ("US-001".to_string(), StoryStatus::Failed),
            ("US-002".to_string(), StoryStatus::Done),
        ]
    );
}

#[test]
fn gate_failure_fails_story_without_commit() {
    let mut doc = backlog(vec![file_story("US-001", &[])]);
    doc.quality_gates = vec!["cargo fmt --check".to_string(), "cargo test".to_string()];
    let repo = setup(&doc);
    let executor = ScriptedExecutor::new(vec![writes_for("US-001")]);
    let gates = ScriptedGateRunner::failing_on("cargo test");

    let (result, steps) = build(&repo, &options(1, true), &executor, &gates);
    result.expect("build");

    assert_eq!(gates.calls(), vec!["cargo fmt --check", "cargo test"]);
    assert_eq!(steps[0].status, StoryStatus::Failed);
    assert_eq!(repo.commit_subjects().expect("log"), vec!["chore: add backlog"]);
    let entries = read_progress(&repo.root().join(".ralph/progress.md")).expect("progress");
    assert_eq!(entries[0].field("Gates"), Some("fail"));
    assert_eq!(entries[0].field("Checks"), Some("1/1 passed"));
}

#[test]
fn commits_match_stories_reaching_done() {
    let repo = setup(&backlog(vec![
        file_story("US-001", &[]),
        file_story("US-002", &["US-001"]),
        file_story("US-003", &[]),
        file_story("US-004", &["US-003"]),
    ]));
    let executor = ScriptedExecutor::new(vec![
        writes_for("US-001"),
        writes_for("US-002"),
        ScriptedExec::TimeOut,
    ]);

    let (result, steps) = build(
        &repo,
        &options(10, true),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let summary = result.expect("build");

    let done = steps
        .iter()
        .filter(|step| step.status == StoryStatus::Done)
        .count();
    assert_eq!(done, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(
        repo.commit_subjects().expect("log"),
        vec![
            "chore: add backlog",
            "feat(US-001): US-001 title",
            "feat(US-002): US-002 title",
        ]
    );
    assert!(matches!(summary.stop, LoopStop::Deadlocked { .. }));
}

#[test]
fn dry_runs_over_identical_backlogs_agree() {
    let doc = backlog(vec![
        story("US-003", &["US-001"]),
        story("US-001", &[]),
        story("US-002", &["US-001"]),
    ]);
    let run = || {
        let repo = setup(&doc);
        let (result, steps) = build(
            &repo,
            &BuildOptions {
                dry_run: true,
                ..options(10, false)
            },
            &ScriptedExecutor::new(Vec::new()),
            &ScriptedGateRunner::passing(),
        );
        assert_eq!(result.expect("build").stop, LoopStop::Exhausted);
        let order: Vec<String> = steps.into_iter().map(|step| step.story_id).collect();
        (order, statuses(&repo))
    };

    let first = run();
    let second = run();
    assert_eq!(first.0, vec!["US-001", "US-003", "US-002"]);
    assert_eq!(first, second);
}

#[test]
fn interrupted_agent_leaves_story_in_progress() {
    let repo = setup(&backlog(vec![
        file_story("US-001", &[]),
        file_story("US-002", &[]),
    ]));
    let executor = ScriptedExecutor::new(vec![ScriptedExec::Interrupt]);

    let (result, _) = build(
        &repo,
        &options(5, true),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let summary = result.expect("build");

    assert_eq!(
        summary.stop,
        LoopStop::Interrupted {
            story_id: Some("US-001".to_string())
        }
    );
    assert_eq!(executor.calls(), vec!["US-001"]);
    assert_eq!(
        statuses(&repo),
        vec![
            ("US-001".to_string(), StoryStatus::InProgress),
            ("US-002".to_string(), StoryStatus::Open),
        ]
    );
    let entries = read_progress(&repo.root().join(".ralph/progress.md")).expect("progress");
    assert_eq!(entries[0].result(), Some(IterationResult::Interrupted));

    // The next run picks the interrupted story up again.
    let executor = ScriptedExecutor::new(vec![writes_for("US-001"), writes_for("US-002")]);
    let (result, _) = build(
        &repo,
        &options(5, true),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let resumed = result.expect("resume");
    assert_eq!(resumed.stop, LoopStop::Exhausted);
    assert_eq!(executor.calls(), vec!["US-001", "US-002"]);

    let entries = read_progress(&repo.root().join(".ralph/progress.md")).expect("progress");
    assert_eq!(entries.len(), 3);
    assert_ne!(entries[0].run_id(), entries[1].run_id());
    assert!(
        entries[1..]
            .iter()
            .all(|entry| entry.run_id() == Some(resumed.run_id.as_str()))
    );
}

#[test]
fn missing_agent_aborts_run_and_restores_story() {
    let repo = setup(&backlog(vec![
        file_story("US-001", &[]),
        file_story("US-002", &[]),
    ]));
    let executor = ScriptedExecutor::new(vec![ScriptedExec::NotFound]);

    let (result, steps) = build(
        &repo,
        &options(5, true),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let err = result.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<RalphError>(),
        Some(RalphError::AgentNotFound { .. })
    ));
    assert!(steps.is_empty());
    assert_eq!(executor.calls(), vec!["US-001"]);
    assert_eq!(
        statuses(&repo),
        vec![
            ("US-001".to_string(), StoryStatus::Open),
            ("US-002".to_string(), StoryStatus::Open),
        ]
    );
    let entries = read_progress(&repo.root().join(".ralph/progress.md")).expect("progress");
    assert_eq!(entries[0].result(), Some(IterationResult::Aborted));
}

#[test]
fn invalid_backlog_aborts_before_any_iteration() {
    let repo = TestRepo::new().expect("repo");
    repo.write(
        ".agents/tasks/prd.json",
        r#"{"version":1,"project":"p","stories":[{"id":"a","title":"A","dependsOn":["b"]}]}"#,
    )
    .expect("write");
    let executor = ScriptedExecutor::new(Vec::new());

    let (result, _) = build(
        &repo,
        &options(1, false),
        &executor,
        &ScriptedGateRunner::passing(),
    );
    let err = result.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<RalphError>(),
        Some(RalphError::Schema { .. })
    ));
    assert!(executor.calls().is_empty());
    assert!(!repo.root().join(".ralph").exists());
}

#[test]
fn commit_error_can_be_downgraded_to_a_warning() {
    let repo = setup(&backlog(vec![story("US-001", &[]), story("US-002", &[])]));
    let executor = ScriptedExecutor::new(vec![ScriptedExec::succeed(), ScriptedExec::succeed()]);
    let mut cfg = RalphConfig::default();
    cfg.commit.fail_on_error = false;

    let mut steps = Vec::new();
    let summary = run_build(
        repo.root(),
        &cfg,
        &options(5, true),
        &executor,
        &ScriptedGateRunner::passing(),
        &Interrupt::new(),
        |step| steps.push(step.commit.clone()),
    )
    .expect("build");

    assert_eq!(summary.stop, LoopStop::Exhausted);
    assert_eq!(
        steps,
        vec![
            CommitOutcome::Failed {
                message: "nothing to commit".to_string()
            },
            CommitOutcome::Failed {
                message: "nothing to commit".to_string()
            },
        ]
    );
}
