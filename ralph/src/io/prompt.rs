//! Agent prompt rendering for one story.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::backlog::{BacklogDocument, Story};
use crate::core::criteria::{Criterion, parse_criteria};

const STORY_TEMPLATE: &str = include_str!("prompts/story.md");

#[derive(Debug, Clone, Serialize)]
struct StoryContext<'a> {
    id: &'a str,
    title: &'a str,
    description: Option<&'a str>,
}

/// Render the prompt handed to the agent for `story`.
///
/// Machine checks and descriptive notes are listed separately so the agent can
/// tell what will be verified from what is guidance.
pub fn render_story_prompt(
    doc: &BacklogDocument,
    story: &Story,
    backlog_path: &str,
) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("story", STORY_TEMPLATE)
        .context("load story prompt template")?;

    let criteria = parse_criteria(&story.acceptance_criteria);
    let (checks, notes): (Vec<&Criterion>, Vec<&Criterion>) =
        criteria.iter().partition(|criterion| criterion.is_check());

    let template = env.get_template("story")?;
    let mut rendered = template
        .render(context! {
            project => doc.project.as_str(),
            backlog_path => backlog_path,
            story => StoryContext {
                id: &story.id,
                title: &story.title,
                description: story
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|text| !text.is_empty()),
            },
            checks => checks.iter().map(|c| c.raw()).collect::<Vec<_>>(),
            notes => notes.iter().map(|c| c.raw()).collect::<Vec<_>>(),
            gates => &doc.quality_gates,
        })
        .with_context(|| format!("render prompt for story {}", story.id))?;

    debug!(story_id = %story.id, bytes = rendered.len(), "prompt rendered");
    rendered.push('\n');
    Ok(rendered)
}
