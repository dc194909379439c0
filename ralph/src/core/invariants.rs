//! Semantic invariants not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};

use crate::backlog::BacklogDocument;

/// Only backlog version understood by this build.
pub const SUPPORTED_VERSION: u32 = 1;

/// Check semantic invariants not expressible in JSON Schema:
/// - Supported `version`
/// - Non-empty, unique story ids, free of `:` and control characters (the
///   progress log heading is `<id>: <title>`)
/// - `dependsOn` references existing ids, never the story itself
/// - No dependency cycles
pub fn validate_invariants(doc: &BacklogDocument) -> Vec<String> {
    let mut errors = Vec::new();

    if doc.version != SUPPORTED_VERSION {
        errors.push(format!(
            "unsupported version {} (expected {SUPPORTED_VERSION})",
            doc.version
        ));
    }

    let mut seen = HashSet::new();
    for (idx, story) in doc.stories.iter().enumerate() {
        if story.id.trim().is_empty() {
            errors.push(format!("stories[{idx}]: id must be non-empty"));
            continue;
        }
        if story.id.contains(':') || story.id.chars().any(char::is_control) {
            errors.push(format!(
                "stories[{idx}]: id {:?} must not contain ':' or control characters",
                story.id
            ));
        }
        if !seen.insert(story.id.as_str()) {
            errors.push(format!("duplicate id '{}'", story.id));
        }
    }

    for story in &doc.stories {
        for dep in &story.depends_on {
            if dep == &story.id {
                errors.push(format!("{}: depends on itself", story.id));
            } else if !seen.contains(dep.as_str()) {
                errors.push(format!("{}: unknown dependency '{}'", story.id, dep));
            }
        }
    }

    if let Some(cycle) = find_cycle(doc) {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    errors
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Return the first dependency cycle found (in document order), closed on its start id.
///
/// Self-dependencies and unknown ids are reported separately and skipped here.
fn find_cycle(doc: &BacklogDocument) -> Option<Vec<String>> {
    let edges: HashMap<&str, Vec<&str>> = doc
        .stories
        .iter()
        .map(|story| {
            let deps = story
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|dep| *dep != story.id)
                .collect();
            (story.id.as_str(), deps)
        })
        .collect();

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for story in &doc.stories {
        let root = story.id.as_str();
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root, Mark::Visiting);
        // Current DFS path: each story with the index of its next dependency to visit.
        let mut path: Vec<(&str, usize)> = vec![(root, 0)];
        while let Some((id, next)) = path.last_mut() {
            let id = *id;
            let deps = edges.get(id).map_or(&[][..], Vec::as_slice);
            let Some(&dep) = deps.get(*next) else {
                marks.insert(id, Mark::Visited);
                path.pop();
                continue;
            };
            *next += 1;

            match marks.get(dep) {
                Some(Mark::Visited) => {}
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|(entry, _)| *entry == dep)?;
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|(entry, _)| entry.to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                // Unknown ids have no edges and are reported separately.
                None if edges.contains_key(dep) => {
                    marks.insert(dep, Mark::Visiting);
                    path.push((dep, 0));
                }
                None => {}
            }
        }
    }
    None
}
