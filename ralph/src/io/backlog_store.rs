//! Backlog load/save with schema + invariant validation.
//!
//! The task store is the only writer of the backlog document. Every load
//! validates fully before returning; every save replaces the file atomically.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::backlog::BacklogDocument;
use crate::core::invariants::validate_invariants;
use crate::error::RalphError;
use crate::io::config::write_atomic;

const BACKLOG_SCHEMA: &str = include_str!("../../schemas/backlog.schema.json");

static VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(BACKLOG_SCHEMA).expect("embedded schema is JSON");
    validator_for(&schema).expect("embedded schema compiles")
});

/// Load and validate the backlog document (schema + invariants).
///
/// Every failure, including a missing file, is a [`RalphError::Schema`] naming
/// the path, so callers can map it to "invalid input" without inspecting causes.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_backlog(path: &Path) -> Result<BacklogDocument> {
    let schema_error = |message: String| RalphError::Schema {
        path: path.to_path_buf(),
        message,
    };

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(schema_error("file not found".to_string()).into());
        }
        Err(err) => return Err(schema_error(format!("read failed: {err}")).into()),
    };
    let value: Value = serde_json::from_str(&contents)
        .map_err(|err| schema_error(format!("malformed JSON: {err}")))?;

    let schema_errors = schema_violations(&value);
    if !schema_errors.is_empty() {
        return Err(schema_error(schema_errors.join("; ")).into());
    }

    let doc: BacklogDocument =
        serde_json::from_value(value).map_err(|err| schema_error(err.to_string()))?;
    let violations = validate_invariants(&doc);
    if !violations.is_empty() {
        return Err(schema_error(violations.join("; ")).into());
    }

    debug!(stories = doc.stories.len(), gates = doc.quality_gates.len(), "backlog loaded");
    Ok(doc)
}

/// Persist the backlog (pretty JSON, trailing newline, temp file + rename).
#[instrument(skip_all, fields(path = %path.display()))]
pub fn save_backlog(path: &Path, doc: &BacklogDocument) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(doc).context("serialize backlog")?;
    buf.push('\n');
    write_atomic(path, &buf, "json.tmp").with_context(|| format!("save backlog {}", path.display()))
}

fn schema_violations(value: &Value) -> Vec<String> {
    if VALIDATOR.is_valid(value) {
        return Vec::new();
    }
    VALIDATOR
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect()
}
