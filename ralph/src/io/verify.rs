//! Acceptance verification: read-only probes of the working tree.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, instrument};

use crate::backlog::Story;
use crate::core::criteria::{Check, Criterion, contained_path, parse_criteria};
use crate::core::types::{CheckOutcome, VerificationResult};

/// Evaluate every machine-checkable criterion of `story` against `workdir`.
///
/// Passes only if all checks pass. A story with notes only passes with an empty
/// `details` list; callers must treat that as an unchecked acceptance.
#[instrument(skip_all, fields(story_id = %story.id))]
pub fn verify(story: &Story, workdir: &Path) -> VerificationResult {
    let criteria = parse_criteria(&story.acceptance_criteria);
    let mut details = Vec::new();
    let mut notes = 0usize;

    for criterion in &criteria {
        match criterion {
            Criterion::Check { raw, check } => details.push(run_check(raw, check, workdir)),
            Criterion::Note { .. } => notes += 1,
        }
    }

    let passed = details.iter().all(|check| check.passed);
    debug!(checks = details.len(), notes, passed, "verification finished");
    VerificationResult {
        passed,
        details,
        notes,
    }
}

fn run_check(raw: &str, check: &Check, workdir: &Path) -> CheckOutcome {
    let outcome = |passed: bool, detail: String| CheckOutcome {
        criterion: raw.to_string(),
        passed,
        detail,
    };
    let rel = check.path();
    let Some(path) = contained_path(workdir, rel) else {
        return outcome(false, format!("path {rel} escapes the working directory"));
    };

    match check {
        Check::Absent { .. } => match fs::symlink_metadata(&path) {
            Err(err) if err.kind() == ErrorKind::NotFound => outcome(true, format!("{rel} absent")),
            Err(err) => outcome(false, format!("cannot stat {rel}: {err}")),
            Ok(_) => outcome(false, format!("{rel} exists but must not")),
        },
        Check::Exists { .. } => {
            if path.is_file() {
                outcome(true, format!("{rel} exists"))
            } else if path.exists() {
                outcome(false, format!("{rel} is not a regular file"))
            } else {
                outcome(false, format!("missing file {rel}"))
            }
        }
        Check::ExactText { text, .. } => match read_file(&path, rel) {
            Ok(contents) => {
                let actual = contents.trim_end_matches(['\n', '\r']);
                if actual == text {
                    outcome(true, format!("{rel} has the expected text"))
                } else {
                    outcome(
                        false,
                        format!("{rel} text mismatch: expected {text:?}, found {actual:?}"),
                    )
                }
            }
            Err(detail) => outcome(false, detail),
        },
        Check::Contains { text, .. } => match read_file(&path, rel) {
            Ok(contents) if contents.contains(text.as_str()) => {
                outcome(true, format!("{rel} contains {text:?}"))
            }
            Ok(_) => outcome(false, format!("{rel} does not contain {text:?}")),
            Err(detail) => outcome(false, detail),
        },
    }
}

fn read_file(path: &Path, rel: &str) -> Result<String, String> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(format!("missing file {rel}")),
        Err(err) => Err(format!("cannot read {rel}: {err}")),
    }
}
