//! Classification of acceptance criteria into machine checks and notes.
//!
//! The grammar is deliberately small. Anything that does not match a check
//! pattern is kept as a note for the agent prompt and never executed.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// A file-system assertion relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Check {
    /// `File "<path>" exists with the exact text "<text>"`
    ExactText { path: String, text: String },
    /// `File "<path>" contains "<text>"`
    Contains { path: String, text: String },
    /// `File "<path>" exists`
    Exists { path: String },
    /// `File "<path>" does not exist`
    Absent { path: String },
}

impl Check {
    pub fn path(&self) -> &str {
        match self {
            Check::ExactText { path, .. }
            | Check::Contains { path, .. }
            | Check::Exists { path }
            | Check::Absent { path } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Example,
    NegativeCase,
    Other,
}

/// One acceptance criterion after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criterion {
    Check { raw: String, check: Check },
    Note { raw: String, kind: NoteKind },
}

impl Criterion {
    pub fn raw(&self) -> &str {
        match self {
            Criterion::Check { raw, .. } | Criterion::Note { raw, .. } => raw,
        }
    }

    pub fn is_check(&self) -> bool {
        matches!(self, Criterion::Check { .. })
    }
}

static EXACT_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^file\s+"([^"]+)"\s+exists\s+with\s+the\s+exact\s+text\s+"(.*)"\.?$"#)
        .expect("exact text pattern")
});
static CONTAINS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^file\s+"([^"]+)"\s+contains\s+"(.*)"\.?$"#).expect("contains pattern")
});
static EXISTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^file\s+"([^"]+)"\s+exists\.?$"#).expect("exists pattern")
});
static ABSENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^file\s+"([^"]+)"\s+does\s+not\s+exist\.?$"#).expect("absent pattern")
});

/// Parse a single criterion string.
pub fn parse_criterion(raw: &str) -> Criterion {
    let trimmed = raw.trim();
    let check = |check: Check| Criterion::Check {
        raw: raw.to_string(),
        check,
    };

    if let Some(caps) = EXACT_TEXT_RE.captures(trimmed) {
        return check(Check::ExactText {
            path: caps[1].to_string(),
            text: caps[2].to_string(),
        });
    }
    if let Some(caps) = CONTAINS_RE.captures(trimmed) {
        return check(Check::Contains {
            path: caps[1].to_string(),
            text: caps[2].to_string(),
        });
    }
    if let Some(caps) = EXISTS_RE.captures(trimmed) {
        return check(Check::Exists {
            path: caps[1].to_string(),
        });
    }
    if let Some(caps) = ABSENT_RE.captures(trimmed) {
        return check(Check::Absent {
            path: caps[1].to_string(),
        });
    }

    let lower = trimmed.to_ascii_lowercase();
    let kind = if lower.starts_with("example:") {
        NoteKind::Example
    } else if lower.starts_with("negative case:") {
        NoteKind::NegativeCase
    } else {
        NoteKind::Other
    };
    Criterion::Note {
        raw: raw.to_string(),
        kind,
    }
}

pub fn parse_criteria(raw: &[String]) -> Vec<Criterion> {
    raw.iter().map(|item| parse_criterion(item)).collect()
}

/// Resolve a check path under `workdir`, rejecting absolute paths and `..`.
pub fn contained_path(workdir: &Path, relative: &str) -> Option<PathBuf> {
    let candidate = Path::new(relative);
    if relative.trim().is_empty() || candidate.is_absolute() {
        return None;
    }
    let mut resolved = workdir.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}
