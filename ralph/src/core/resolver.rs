//! Deterministic dependency resolution over the backlog.

use crate::backlog::{BacklogDocument, Story, StoryStatus};

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<'a> {
    /// Next story to work on.
    Eligible(&'a Story),
    /// Nothing left `open` or `in_progress`.
    Exhausted,
    /// Open stories remain but every one is blocked.
    Deadlocked(Vec<BlockedStory>),
}

/// An open story and the dependencies holding it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedStory {
    pub id: String,
    /// `(dependency id, its current status)` for every dependency not yet `done`.
    pub waiting_on: Vec<(String, StoryStatus)>,
}

/// First `open` story (document order) whose dependencies are all `done`.
pub fn next_eligible(doc: &BacklogDocument) -> Option<&Story> {
    doc.stories
        .iter()
        .find(|story| story.status == StoryStatus::Open && dependencies_done(doc, story))
}

/// Like [`next_eligible`], but tells an exhausted backlog apart from a deadlocked one.
pub fn select(doc: &BacklogDocument) -> Selection<'_> {
    if let Some(story) = next_eligible(doc) {
        return Selection::Eligible(story);
    }
    let unfinished = doc
        .stories
        .iter()
        .any(|story| matches!(story.status, StoryStatus::Open | StoryStatus::InProgress));
    if !unfinished {
        return Selection::Exhausted;
    }
    Selection::Deadlocked(blocked_stories(doc))
}

/// True if every dependency of `story` is `done`. Unknown ids count as not done.
pub fn dependencies_done(doc: &BacklogDocument, story: &Story) -> bool {
    story
        .depends_on
        .iter()
        .all(|dep| doc.status_of(dep) == Some(StoryStatus::Done))
}

fn blocked_stories(doc: &BacklogDocument) -> Vec<BlockedStory> {
    doc.stories
        .iter()
        .filter(|story| story.status == StoryStatus::Open)
        .map(|story| BlockedStory {
            id: story.id.clone(),
            waiting_on: story
                .depends_on
                .iter()
                .filter_map(|dep| match doc.status_of(dep) {
                    Some(StoryStatus::Done) => None,
                    Some(status) => Some((dep.clone(), status)),
                    None => Some((dep.clone(), StoryStatus::Open)),
                })
                .collect(),
        })
        .collect()
}
