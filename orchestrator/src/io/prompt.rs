//! Prompt rendering for subtask invocations.
//!
//! A mode's own template renders the persona and task; the shared wrapper in
//! `prompts/subtask.md` appends context, earlier outputs and the output contract.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::modes::Mode;
use crate::core::output::required_fields;

const SUBTASK_TEMPLATE: &str = include_str!("prompts/subtask.md");

/// Output of an earlier subtask passed along as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorOutput {
    pub subtask_id: String,
    pub mode_id: String,
    pub output: String,
}

/// Inputs for rendering one subtask prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub mode: &'a Mode,
    pub task: &'a str,
    /// Whole task text when the subtask is one unit of a larger plan.
    pub overall_task: Option<&'a str>,
    pub context: &'a str,
    pub prior_outputs: &'a [PriorOutput],
}

/// Render the full prompt for a subtask.
pub fn render_subtask_prompt(inputs: &PromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    let overall = inputs
        .overall_task
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != inputs.task.trim());
    let context = (!inputs.context.trim().is_empty()).then(|| inputs.context.trim());

    let persona = env
        .render_str(
            &inputs.mode.prompt_template,
            context! {
                task => inputs.task.trim(),
                overall_task => overall,
                context => context,
                prior_outputs => inputs.prior_outputs,
            },
        )
        .with_context(|| format!("render prompt template for mode {}", inputs.mode.id))?;

    let rendered = env
        .render_str(
            SUBTASK_TEMPLATE,
            context! {
                persona => persona.trim(),
                overall_task => overall,
                context => context,
                prior_outputs => inputs.prior_outputs,
                safety_notes => (!inputs.mode.safety_notes.trim().is_empty())
                    .then(|| inputs.mode.safety_notes.trim()),
                required => required_fields(&inputs.mode.output_schema),
            },
        )
        .context("render subtask prompt wrapper")?;
    debug!(mode = %inputs.mode.id, bytes = rendered.len(), "rendered subtask prompt");
    Ok(rendered)
}

/// Cut `text` to at most `limit` bytes on a char boundary, noting the cut.
pub fn truncate_output(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]",
        &text[..end],
        text.len() - end
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mode;

    #[test]
    fn renders_persona_context_and_contract() {
        let mut coder = mode("general_coder");
        coder.prompt_template = "Persona. Task: {{ task }}".to_string();
        coder.safety_notes = "Use diffs.".to_string();
        coder.output_schema = serde_json::json!({
            "type": "object",
            "required": ["summary", "patch"]
        });
        let prior = vec![PriorOutput {
            subtask_id: "1".to_string(),
            mode_id: "architect".to_string(),
            output: "design notes".to_string(),
        }];
        let prompt = render_subtask_prompt(&PromptInputs {
            mode: &coder,
            task: "add a flag",
            overall_task: Some("- design it\n- add a flag"),
            context: "repo is a CLI",
            prior_outputs: &prior,
        })
        .expect("render");

        assert!(prompt.starts_with("Persona. Task: add a flag"));
        assert!(prompt.contains("## Overall task\n- design it"));
        assert!(prompt.contains("## Context\nrepo is a CLI"));
        assert!(prompt.contains("### Subtask 1 (architect)\ndesign notes"));
        assert!(prompt.contains("## Safety\nUse diffs."));
        assert!(prompt.contains("Required fields: summary, patch."));
    }

    #[test]
    fn omits_empty_sections() {
        let coder = mode("general_coder");
        let prompt = render_subtask_prompt(&PromptInputs {
            mode: &coder,
            task: "do it",
            overall_task: Some("do it"),
            context: "  ",
            prior_outputs: &[],
        })
        .expect("render");
        assert!(!prompt.contains("## Overall task"));
        assert!(!prompt.contains("## Context"));
        assert!(!prompt.contains("earlier subtasks"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_output("short", 10), "short");
        let cut = truncate_output("ééé", 3);
        assert_eq!(cut, "é\n[truncated 4 bytes]");
    }
}
