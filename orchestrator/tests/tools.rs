//! Tool surface tests: input validation and response shapes.

use std::fs;

use orchestrator::core::types::{EngineKind, ReasoningLevel};
use orchestrator::error::EngineError;
use orchestrator::patch_gate::PatchGate;
use orchestrator::test_support::{ScriptedInvoker, orchestrator_at, runs_dir, scratch_tree};
use orchestrator::tools::{TOOL_NAMES, Tools};
use serde_json::{Value, json};

fn tools_at(root: &std::path::Path, invoker: ScriptedInvoker) -> Tools<ScriptedInvoker> {
    Tools::new(orchestrator_at(root, invoker), Vec::new())
}

#[test]
fn every_tool_answers_with_a_summary() {
    let tree = scratch_tree(&[]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());
    let inputs = [
        json!({"task": "fix the failing test"}),
        json!({"subtask": {"description": "x", "mode_id": "nope"}}),
        json!({"patch_text": "not a diff"}),
        json!({"task": "write latex tables"}),
        Value::Null,
        json!({}),
        json!({"prompt": "hi"}),
        json!({"prompt": "hi"}),
        json!({}),
    ];
    for (name, input) in TOOL_NAMES.iter().zip(inputs) {
        let out = tools.call(name, input);
        assert!(
            out["summary"].as_str().is_some_and(|s| !s.is_empty()),
            "{name}: {out}"
        );
    }
}

#[test]
fn unknown_fields_and_tools_are_invalid_requests() {
    let tree = scratch_tree(&[]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());

    let out = tools.call("route_task", json!({"task": "x", "priority": "high"}));
    assert_eq!(out["error_kind"], "invalid_request");

    let out = tools.call("list_modes", json!({"verbose": true}));
    assert_eq!(out["error_kind"], "invalid_request");

    let out = tools.call("delete_everything", json!({}));
    assert_eq!(out["error_kind"], "invalid_request");
    assert!(out["summary"].as_str().expect("summary").contains("orchestrate_task"));
}

#[test]
fn orchestrate_task_defaults_to_plan_only() {
    let tree = scratch_tree(&[]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());

    let out = tools.call("orchestrate_task", json!({"task": "- debug login\n- proofread the docs"}));

    assert_eq!(out["plan_only"], true);
    assert_eq!(out["plan"]["subtasks"].as_array().expect("subtasks").len(), 2);
    assert!(out.get("error_kind").is_none());
    assert_eq!(tools.orchestrator().invoker().call_count(), 0);
    assert!(!runs_dir(tree.path()).exists());
}

#[test]
fn orchestrate_task_executes_when_asked() {
    let tree = scratch_tree(&[]);
    let invoker = ScriptedInvoker::new().reply(r#"{"summary": "done"}"#);
    let tools = tools_at(tree.path(), invoker);

    let out = tools.call(
        "orchestrate_task",
        json!({"task": "Refactor module X", "plan_only": false}),
    );

    assert_eq!(out["plan_only"], false);
    assert_eq!(out["summary"], "1/1 subtasks succeeded");
    let run_id = out["run_id"].as_str().expect("run id");
    assert!(runs_dir(tree.path()).join(run_id).join("result.json").is_file());
}

#[test]
fn run_subtask_surfaces_confirmation_token() {
    let tree = scratch_tree(&[]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());

    let out = tools.call(
        "run_subtask",
        json!({"subtask": {"description": "reflect on my week", "mode_id": "therapist"}}),
    );

    assert_eq!(out["error_kind"], "confirmation_required");
    assert!(out["confirm_token"].as_str().expect("token").starts_with("CONFIRM_"));
    assert_eq!(out["invocation"]["engine"], "gemini_cli");
    assert_eq!(tools.orchestrator().invoker().call_count(), 0);
}

#[test]
fn run_subtask_rejects_unknown_mode() {
    let tree = scratch_tree(&[]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());
    let out = tools.call(
        "run_subtask",
        json!({"subtask": {"description": "x", "mode_id": "astrologer"}}),
    );
    assert_eq!(out["error_kind"], "unknown_mode");
}

#[test]
fn run_subtask_persists_nothing() {
    let tree = scratch_tree(&[]);
    let invoker = ScriptedInvoker::new().reply(r#"{"summary": "ok"}"#);
    let tools = tools_at(tree.path(), invoker);

    let out = tools.call(
        "run_subtask",
        json!({"subtask": {"description": "tidy imports", "mode_id": "general_coder"}}),
    );

    assert_eq!(out["invocation"]["status"], "succeeded");
    assert!(!runs_dir(tree.path()).exists());
    let calls = tools.orchestrator().invoker().calls();
    assert_eq!(calls[0].0, EngineKind::Codex);
}

#[test]
fn apply_patch_round_trip_with_token() {
    let tree = scratch_tree(&[("old.txt", "bye\n")]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());
    let diff = "\
diff --git a/old.txt b/old.txt
deleted file mode 100644
--- a/old.txt
+++ /dev/null
@@ -1 +0,0 @@
-bye
";

    let first = tools.call("apply_patch", json!({"patch_text": diff}));
    assert_eq!(first["error_kind"], "confirmation_required");
    assert_eq!(first["outcome"]["status"], "token_required");
    assert_eq!(first["confirm_token"], PatchGate::token_for(diff));
    assert!(tree.path().join("old.txt").exists());

    let pasted = format!("  {}\n", first["confirm_token"].as_str().expect("token"));
    let second = tools.call(
        "apply_patch",
        json!({"patch_text": diff, "confirm_token": pasted}),
    );
    assert_eq!(second["outcome"]["status"], "applied");
    assert!(second.get("error_kind").is_none());
    assert!(fs::metadata(tree.path().join("old.txt")).is_err());
}

#[test]
fn route_and_list_modes_report_registry_data() {
    let tree = scratch_tree(&[]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());

    let routed = tools.call("route_task", json!({"task": "write a LaTeX table"}));
    assert_eq!(routed["modes"], json!(["latex_guru"]));
    assert_eq!(routed["fallback"], false);

    let hinted = tools.call("route_task", json!({"task": "look at this", "task_type": "debug"}));
    assert_eq!(hinted["modes"][0], "debugger");

    let modes = tools.call("list_modes", Value::Null);
    let ids: Vec<&str> = modes["modes"]
        .as_array()
        .expect("modes")
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert!(ids.contains(&"general_coder"));
    assert!(ids.contains(&"therapist"));
    assert_eq!(modes["version"], 1);
}

#[test]
fn warm_status_lists_slots() {
    let tree = scratch_tree(&[]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());
    let out = tools.call("warm_status", json!({}));
    assert_eq!(out["slots"].as_array().expect("slots").len(), 2);
    assert_eq!(out["summary"], "2/2 engine slots ready");
}

#[test]
fn codex_direct_sends_prompt_without_a_mode() {
    let tree = scratch_tree(&[]);
    let invoker = ScriptedInvoker::new().reply(r#"{"answer": 42}"#);
    let tools = tools_at(tree.path(), invoker);

    let out = tools.call(
        "codex_direct",
        json!({
            "prompt": "what is the answer?",
            "constraints": "be brief",
            "reasoning_level": "deep",
            "model": "gpt-5-codex",
        }),
    );

    assert!(out.get("error_kind").is_none(), "{out}");
    assert_eq!(out["engine"], "codex_cli");
    assert_eq!(out["structured"], json!({"answer": 42}));
    let calls = tools.orchestrator().invoker().calls();
    let (engine, request) = &calls[0];
    assert_eq!(*engine, EngineKind::Codex);
    assert_eq!(request.prompt, "what is the answer?");
    assert_eq!(request.constraints, "be brief");
    assert_eq!(request.reasoning_level, ReasoningLevel::Deep);
    assert_eq!(request.model.as_deref(), Some("gpt-5-codex"));
    assert!(!runs_dir(tree.path()).exists());
}

#[test]
fn gemini_direct_reports_engine_errors_and_rejects_model() {
    let tree = scratch_tree(&[]);
    let invoker = ScriptedInvoker::new().fail(EngineError::Timeout {
        engine: EngineKind::Gemini,
        secs: 5,
    });
    let tools = tools_at(tree.path(), invoker);

    let out = tools.call("gemini_direct", json!({"prompt": "x", "model": "pro"}));
    assert_eq!(out["error_kind"], "invalid_request");
    assert_eq!(tools.orchestrator().invoker().call_count(), 0);

    let out = tools.call("gemini_direct", json!({"prompt": "x"}));
    assert_eq!(out["error_kind"], "engine_timeout");
    assert_eq!(tools.orchestrator().invoker().calls()[0].0, EngineKind::Gemini);

    let out = tools.call("gemini_direct", json!({"prompt": "   "}));
    assert_eq!(out["error_kind"], "invalid_request");
}

#[test]
fn repo_scan_describes_the_working_tree() {
    let tree = scratch_tree(&[
        ("Cargo.toml", "[package]\n"),
        ("src/main.rs", "fn main() {}\n"),
        (".orchestrator/config.toml", ""),
    ]);
    let tools = tools_at(tree.path(), ScriptedInvoker::new());

    let out = tools.call("repo_scan", json!({"max_depth": 2}));

    assert!(out.get("error_kind").is_none(), "{out}");
    assert_eq!(out["scan"]["stack"], json!(["rust"]));
    assert_eq!(out["scan"]["files"], json!(["Cargo.toml", "src/main.rs"]));
    assert_eq!(out["scan"]["key_files"], json!(["Cargo.toml"]));

    let out = tools.call("repo_scan", json!({"include": ["*.rs"]}));
    assert_eq!(out["error_kind"], "invalid_request");
}
