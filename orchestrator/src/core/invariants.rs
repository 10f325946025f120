//! Structural invariants of a [`Plan`].

use std::collections::HashSet;

use crate::core::types::Plan;

/// Check plan invariants:
/// - At least one subtask
/// - No empty or duplicate subtask ids
/// - `depends_on` only names earlier subtasks
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    if plan.subtasks.is_empty() {
        errors.push("plan has no subtasks".to_string());
    }

    let mut seen = HashSet::new();
    for subtask in &plan.subtasks {
        if subtask.id.trim().is_empty() {
            errors.push("subtask with empty id".to_string());
        }
        for dep in &subtask.depends_on {
            if !seen.contains(dep.as_str()) {
                errors.push(format!(
                    "{}: depends on '{}' which is not an earlier subtask",
                    subtask.id, dep
                ));
            }
        }
        if !seen.insert(subtask.id.as_str()) {
            errors.push(format!("duplicate subtask id '{}'", subtask.id));
        }
    }
    errors
}
