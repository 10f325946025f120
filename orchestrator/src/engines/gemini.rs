//! Gemini adapter: `gemini --experimental-acp` over the Agent Client Protocol.
//!
//! One ACP session is created per warm process and reused for every prompt.

use std::path::Path;

use serde_json::{Value, json};

use super::{
    Decoded, EngineAdapter, EngineRequest, HandshakeStep, SessionState, compose_prompt,
};
use crate::core::types::EngineKind;
use crate::error::EngineError;

const ACP_PROTOCOL_VERSION: u64 = 1;

#[derive(Debug, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl EngineAdapter for GeminiAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Gemini
    }

    fn handshake(&self, cwd: &Path) -> Vec<HandshakeStep> {
        vec![
            HandshakeStep::Call {
                method: "initialize",
                params: json!({
                    "protocolVersion": ACP_PROTOCOL_VERSION,
                    "clientCapabilities": {
                        "fs": {"readTextFile": false, "writeTextFile": false}
                    },
                }),
            },
            HandshakeStep::Call {
                method: "session/new",
                params: json!({"cwd": cwd.display().to_string(), "mcpServers": []}),
            },
        ]
    }

    fn on_handshake_result(
        &self,
        method: &str,
        result: &Value,
        state: &mut SessionState,
    ) -> Result<(), String> {
        if method == "session/new" {
            let id = result
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| "response has no sessionId".to_string())?;
            state.session_id = Some(id.to_string());
        }
        Ok(())
    }

    fn call(&self, request: &EngineRequest, state: &SessionState) -> (&'static str, Value) {
        (
            "session/prompt",
            json!({
                "sessionId": state.session_id.clone().unwrap_or_default(),
                "prompt": [{"type": "text", "text": compose_prompt(request)}],
            }),
        )
    }

    fn answer(&self, method: &str, _params: &Value) -> Result<Value, (i64, String)> {
        match method {
            // File writes only happen through the patch gate.
            "session/request_permission" => Ok(json!({"outcome": {"outcome": "cancelled"}})),
            other => Err((-32601, format!("method not supported: {other}"))),
        }
    }

    fn decode(
        &self,
        result: &Value,
        notifications: &[(String, Value)],
    ) -> Result<Decoded, EngineError> {
        let text: String = notifications
            .iter()
            .filter(|(method, _)| method == "session/update")
            .filter_map(|(_, params)| params.get("update"))
            .filter(|update| {
                update.get("sessionUpdate").and_then(Value::as_str) == Some("agent_message_chunk")
            })
            .filter_map(|update| update.get("content"))
            .filter(|content| content.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|content| content.get("text").and_then(Value::as_str))
            .collect();

        let stop_reason = result
            .get("stopReason")
            .and_then(Value::as_str)
            .unwrap_or("end_turn");
        if matches!(stop_reason, "refusal" | "cancelled") {
            return Err(EngineError::Failed {
                engine: EngineKind::Gemini,
                reason: format!("prompt ended with stopReason {stop_reason}"),
            });
        }
        if text.trim().is_empty() {
            return Err(EngineError::Malformed {
                engine: EngineKind::Gemini,
                reason: format!("no agent message text (stopReason {stop_reason})"),
            });
        }
        Ok(Decoded {
            text,
            structured: None,
        })
    }
}
