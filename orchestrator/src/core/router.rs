//! Deterministic keyword routing from task text to mode identifiers.
//!
//! The table is an ordered list of rules. Earlier rules have priority; the
//! first match is the primary mode. Routing never fails: unmatched text falls
//! back to `general_coder`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::types::{ModeId, ReasoningLevel};

struct RouteRule {
    mode: &'static str,
    reasoning_level: ReasoningLevel,
    keywords: &'static [&'static str],
}

const RULES: &[RouteRule] = &[
    RouteRule {
        mode: "architect",
        reasoning_level: ReasoningLevel::Deep,
        keywords: &["architecture", "design", "adr", "interface", "boundary"],
    },
    RouteRule {
        mode: "debugger",
        reasoning_level: ReasoningLevel::Deep,
        keywords: &["debug", "test", "failing", "stack trace", "regression"],
    },
    RouteRule {
        mode: "deep_researcher_stage1",
        reasoning_level: ReasoningLevel::Deep,
        keywords: &["research", "sources", "citations", "literature"],
    },
    RouteRule {
        mode: "editor",
        reasoning_level: ReasoningLevel::Fast,
        keywords: &["edit", "docs", "formatting", "proofread", "style"],
    },
    RouteRule {
        mode: "financial_planner",
        reasoning_level: ReasoningLevel::Standard,
        keywords: &["finance", "financial", "budget", "cash flow", "roi"],
    },
    RouteRule {
        mode: "latex_guru",
        reasoning_level: ReasoningLevel::Standard,
        keywords: &["latex"],
    },
    RouteRule {
        mode: "therapist",
        reasoning_level: ReasoningLevel::Standard,
        keywords: &["therapy", "cbt", "journal"],
    },
];

/// Keywords match at the start of a word, so "testing" hits `test` but "latest" does not.
static RULE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|rule| {
            let alternatives = rule
                .keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"\b(?:{alternatives})")).expect("route keyword pattern")
        })
        .collect()
});

/// Result of routing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    /// Matching modes in priority order. Never empty.
    pub modes: Vec<ModeId>,
    /// Reasoning tier of the primary rule.
    pub reasoning_level: ReasoningLevel,
    /// True when no rule matched and `general_coder` was chosen.
    pub fallback: bool,
}

impl Route {
    pub fn primary(&self) -> &ModeId {
        &self.modes[0]
    }
}

/// Route `task_text` (and an optional task-type hint) to candidate modes.
pub fn route(task_text: &str, task_type: Option<&str>) -> Route {
    if let Some(hint) = task_type.map(normalize).filter(|h| !h.is_empty()) {
        let hinted = matching_rules(&hint);
        if !hinted.is_empty() {
            return route_from(&hinted);
        }
    }

    let matched = matching_rules(&normalize(task_text));
    if matched.is_empty() {
        return Route {
            modes: vec![ModeId::fallback()],
            reasoning_level: ReasoningLevel::Standard,
            fallback: true,
        };
    }
    route_from(&matched)
}

fn matching_rules(text: &str) -> Vec<&'static RouteRule> {
    RULES
        .iter()
        .zip(RULE_PATTERNS.iter())
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(rule, _)| rule)
        .collect()
}

fn route_from(rules: &[&'static RouteRule]) -> Route {
    Route {
        modes: rules.iter().map(|r| ModeId::new(r.mode)).collect(),
        reasoning_level: rules[0].reasoning_level,
        fallback: false,
    }
}

/// Lowercase and collapse whitespace so multi-word keywords match across line breaks.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
