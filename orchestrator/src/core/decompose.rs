//! Deterministic plan construction.
//!
//! A task is split only when its description is a list of two or more items;
//! each item is routed on its own. Otherwise the plan has exactly one subtask.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::modes::{Mode, ModeRegistry};
use crate::core::router::route;
use crate::core::types::{Plan, SafetyLevel, Subtask, Task};

const TITLE_MAX_CHARS: usize = 60;
const RESEARCH_STAGE1: &str = "deep_researcher_stage1";
const RESEARCH_STAGE2: &str = "deep_researcher_stage2_packet";

static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(\S.*)$").expect("list item pattern"));

static READ_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bread[- ]only\b|\bdo not (?:modify|change|edit)\b|\bno (?:file )?changes\b")
        .expect("read-only pattern")
});

/// Build a plan for `task` without contacting any engine.
pub fn build_plan(task: &Task, registry: &ModeRegistry) -> Plan {
    let units = split_units(&task.description);
    let safety_level = safety_from_constraints(&task.constraints);
    let mut notes = Vec::new();
    let mut subtasks = Vec::new();

    for unit in &units {
        let routed = route(unit, task.task_type.as_deref());
        if routed.fallback {
            notes.push(format!(
                "no routing keywords in '{}'; using {}",
                title_of(unit),
                registry.fallback().id
            ));
        }
        let mode = pick_mode(registry, &routed.modes, &mut notes);
        let id = (subtasks.len() + 1).to_string();
        subtasks.push(subtask(&id, unit, mode, safety_level, Vec::new()));

        if mode.id.as_str() == RESEARCH_STAGE1 {
            if let Some(stage2) = registry.get(RESEARCH_STAGE2) {
                let stage2_id = (subtasks.len() + 1).to_string();
                let description = format!("Turn the research findings into a packet: {unit}");
                subtasks.push(subtask(
                    &stage2_id,
                    &description,
                    stage2,
                    safety_level,
                    vec![id],
                ));
            }
        }
    }

    let summary = match subtasks.len() {
        1 => format!("1 subtask for: {}", title_of(&task.description)),
        n => format!("{n} subtasks for: {}", title_of(&task.description)),
    };
    Plan {
        task: task.description.clone(),
        summary,
        subtasks,
        notes,
    }
}

/// First routed mode the registry knows about, or the fallback.
fn pick_mode<'a>(
    registry: &'a ModeRegistry,
    candidates: &[crate::core::types::ModeId],
    notes: &mut Vec<String>,
) -> &'a Mode {
    for candidate in candidates {
        if let Some(mode) = registry.get(candidate.as_str()) {
            return mode;
        }
        notes.push(format!(
            "routed mode '{candidate}' is not in the registry; trying next candidate"
        ));
    }
    registry.fallback()
}

fn subtask(
    id: &str,
    description: &str,
    mode: &Mode,
    safety_level: SafetyLevel,
    depends_on: Vec<String>,
) -> Subtask {
    Subtask {
        id: id.to_string(),
        title: title_of(description),
        description: description.trim().to_string(),
        mode_id: mode.id.clone(),
        engine: mode.preferred_engine,
        reasoning_level: mode.reasoning_level,
        safety_level,
        depends_on,
    }
}

/// Independent work items, when the description is a list of at least two.
pub fn split_units(description: &str) -> Vec<String> {
    let items: Vec<String> = description
        .lines()
        .filter_map(|line| LIST_ITEM_RE.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .collect();
    if items.len() >= 2 {
        items
    } else {
        vec![description.trim().to_string()]
    }
}

/// Constraints asking for no modifications make every subtask read-only.
pub fn safety_from_constraints(constraints: &str) -> SafetyLevel {
    if READ_ONLY_RE.is_match(constraints) {
        SafetyLevel::ReadOnly
    } else {
        SafetyLevel::Low
    }
}

/// First line of `text`, cut to a readable length.
pub fn title_of(text: &str) -> String {
    let first = text.trim().lines().next().unwrap_or_default().trim();
    if first.chars().count() <= TITLE_MAX_CHARS {
        return first.to_string();
    }
    let cut: String = first.chars().take(TITLE_MAX_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invariants::validate_plan;
    use crate::core::types::EngineKind;
    use crate::test_support::sample_registry;

    #[test]
    fn single_unit_task_has_one_subtask() {
        let plan = build_plan(&Task::new("Refactor module X for clarity"), &sample_registry());
        assert_eq!(plan.subtasks.len(), 1);
        let only = &plan.subtasks[0];
        assert_eq!(only.id, "1");
        assert_eq!(only.mode_id.as_str(), "general_coder");
        assert_eq!(only.engine, EngineKind::Codex);
        assert!(plan.notes.iter().any(|n| n.contains("no routing keywords")));
        assert!(validate_plan(&plan).is_empty());
    }

    #[test]
    fn list_items_become_independent_subtasks() {
        let task = Task::new(
            "Please handle these:\n- fix the failing parser test\n- update the docs for the CLI\n3. tidy up imports",
        );
        let plan = build_plan(&task, &sample_registry());
        let modes: Vec<&str> = plan.subtasks.iter().map(|s| s.mode_id.as_str()).collect();
        assert_eq!(modes, vec!["debugger", "editor", "general_coder"]);
        let ids: Vec<&str> = plan.subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(plan.subtasks.iter().all(|s| s.depends_on.is_empty()));
        assert!(plan.summary.starts_with("3 subtasks"));
    }

    #[test]
    fn single_list_item_is_not_split() {
        let units = split_units("Only one thing:\n- rename the flag");
        assert_eq!(units, vec!["Only one thing:\n- rename the flag".to_string()]);
    }

    #[test]
    fn research_adds_dependent_packet_stage() {
        let plan = build_plan(&Task::new("research sources on raft"), &sample_registry());
        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(plan.subtasks[0].mode_id.as_str(), RESEARCH_STAGE1);
        assert_eq!(plan.subtasks[0].engine, EngineKind::Gemini);
        assert_eq!(plan.subtasks[1].mode_id.as_str(), RESEARCH_STAGE2);
        assert_eq!(plan.subtasks[1].depends_on, vec!["1".to_string()]);
        assert!(validate_plan(&plan).is_empty());
    }

    #[test]
    fn read_only_constraints_lower_safety_level() {
        let mut task = Task::new("review the design");
        task.constraints = "Read-only review, do not modify files".to_string();
        let plan = build_plan(&task, &sample_registry());
        assert_eq!(plan.subtasks[0].safety_level, SafetyLevel::ReadOnly);
        assert_eq!(safety_from_constraints("keep it short"), SafetyLevel::Low);
    }

    #[test]
    fn plan_building_is_deterministic() {
        let task = Task::new("- debug login\n- write budget report");
        let registry = sample_registry();
        assert_eq!(build_plan(&task, &registry), build_plan(&task, &registry));
    }

    #[test]
    fn titles_are_truncated() {
        let long = "x".repeat(100);
        let title = title_of(&long);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
        assert!(title.ends_with("..."));
    }
}
