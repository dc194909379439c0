//! Backlog document model (`.agents/tasks/prd.json`).

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a story.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Open,
    InProgress,
    Done,
    Failed,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Open => "open",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Done => "done",
            StoryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of agent-assigned work.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Fields ralph does not interpret, kept so saves round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The persisted backlog: quality gates plus an ordered list of stories.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BacklogDocument {
    pub version: u32,
    pub project: String,
    #[serde(default)]
    pub quality_gates: Vec<String>,
    #[serde(default)]
    pub stories: Vec<Story>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BacklogDocument {
    pub fn story(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|story| story.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<StoryStatus> {
        self.story(id).map(|story| story.status)
    }

    /// In-memory status transition. Persisting is the caller's job.
    pub fn mark_status(&mut self, id: &str, status: StoryStatus) -> Result<StoryStatus> {
        let story = self
            .stories
            .iter_mut()
            .find(|story| story.id == id)
            .ok_or_else(|| anyhow!("unknown story id '{id}'"))?;
        let previous = story.status;
        story.status = status;
        Ok(previous)
    }

    /// Reset every story in `from` to `to`, returning the ids touched in document order.
    pub fn reset_status(&mut self, from: StoryStatus, to: StoryStatus) -> Vec<String> {
        let mut touched = Vec::new();
        for story in &mut self.stories {
            if story.status == from {
                story.status = to;
                touched.push(story.id.clone());
            }
        }
        touched
    }

    pub fn count_status(&self, status: StoryStatus) -> usize {
        self.stories
            .iter()
            .filter(|story| story.status == status)
            .count()
    }
}

/// Starter backlog written by `ralph init`.
pub fn example_backlog(project: &str) -> BacklogDocument {
    BacklogDocument {
        version: 1,
        project: project.to_string(),
        quality_gates: Vec::new(),
        stories: vec![Story {
            id: "US-001".to_string(),
            title: "Create baseline file".to_string(),
            description: Some(
                "As a user, I want a baseline file so the repo has an artifact.".to_string(),
            ),
            status: StoryStatus::Open,
            depends_on: Vec::new(),
            acceptance_criteria: vec![
                "File \"docs/US-001.txt\" exists with the exact text \"US-001 complete\""
                    .to_string(),
                "Example: open docs/US-001.txt -> \"US-001 complete\"".to_string(),
                "Negative case: missing file -> failure".to_string(),
            ],
            extra: Map::new(),
        }],
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_status_defaults_to_open() {
        let raw = r#"{"id":"US-001","title":"t"}"#;
        let story: Story = serde_json::from_str(raw).expect("parse");
        assert_eq!(story.status, StoryStatus::Open);
        assert!(story.depends_on.is_empty());
    }

    #[test]
    fn unknown_fields_survive_serialization() {
        let raw = r#"{"version":1,"project":"p","owner":"me","stories":[{"id":"a","title":"A","status":"in_progress","priority":2}]}"#;
        let doc: BacklogDocument = serde_json::from_str(raw).expect("parse");
        assert_eq!(doc.stories[0].status, StoryStatus::InProgress);

        let value = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(value["owner"], "me");
        assert_eq!(value["stories"][0]["priority"], 2);
        assert_eq!(value["stories"][0]["dependsOn"], serde_json::json!([]));
        assert!(value["stories"][0].get("description").is_none());
    }

    #[test]
    fn mark_status_returns_previous_and_rejects_unknown_ids() {
        let mut doc = example_backlog("demo");
        let previous = doc
            .mark_status("US-001", StoryStatus::InProgress)
            .expect("mark");
        assert_eq!(previous, StoryStatus::Open);
        assert_eq!(doc.status_of("US-001"), Some(StoryStatus::InProgress));

        let err = doc.mark_status("nope", StoryStatus::Done).unwrap_err();
        assert!(err.to_string().contains("unknown story id"));
    }

    #[test]
    fn reset_status_touches_only_matching_stories() {
        let mut doc = example_backlog("demo");
        doc.stories[0].status = StoryStatus::Failed;
        assert_eq!(
            doc.reset_status(StoryStatus::Failed, StoryStatus::Open),
            vec!["US-001".to_string()]
        );
        assert!(
            doc.reset_status(StoryStatus::Failed, StoryStatus::Open)
                .is_empty()
        );
    }
}
