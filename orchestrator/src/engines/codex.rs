//! Codex adapter: `codex mcp-server` over MCP (JSON-RPC 2.0).

use std::path::Path;

use serde_json::{Map, Value, json};

use super::{
    Decoded, EngineAdapter, EngineRequest, HandshakeStep, SessionState, compose_prompt, text_items,
};
use crate::core::types::EngineKind;
use crate::error::EngineError;
use crate::io::config::CodexConfig;

const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
const CODEX_TOOL: &str = "codex";

pub struct CodexAdapter {
    cfg: CodexConfig,
}

impl CodexAdapter {
    pub fn new(cfg: CodexConfig) -> Self {
        Self { cfg }
    }

    fn arguments(&self, request: &EngineRequest) -> Value {
        let mut config = Map::new();
        if let Some(effort) = self.cfg.reasoning_effort(request.reasoning_level) {
            config.insert("model_reasoning_effort".to_string(), json!(effort));
        }
        if let Some(verbosity) = self.cfg.verbosity(request.reasoning_level) {
            config.insert("model_verbosity".to_string(), json!(verbosity));
        }
        let mut args = json!({
            "prompt": compose_prompt(request),
            "sandbox": self.cfg.sandbox,
            "approval-policy": self.cfg.approval_policy,
            "cwd": request.cwd.display().to_string(),
            "config": config,
        });
        if let Some(model) = &request.model {
            args["model"] = json!(model);
        }
        args
    }
}

impl EngineAdapter for CodexAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Codex
    }

    fn handshake(&self, _cwd: &Path) -> Vec<HandshakeStep> {
        vec![
            HandshakeStep::Call {
                method: "initialize",
                params: json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            },
            HandshakeStep::Notify {
                method: "notifications/initialized",
                params: json!({}),
            },
        ]
    }

    fn call(&self, request: &EngineRequest, _state: &SessionState) -> (&'static str, Value) {
        (
            "tools/call",
            json!({"name": CODEX_TOOL, "arguments": self.arguments(request)}),
        )
    }

    fn answer(&self, method: &str, _params: &Value) -> Result<Value, (i64, String)> {
        match method {
            // Codex asks before running commands; the sandbox is read-only and
            // every change goes through the patch gate.
            "elicitation/create" => Ok(json!({"decision": "denied"})),
            "ping" => Ok(json!({})),
            other => Err((-32601, format!("method not supported: {other}"))),
        }
    }

    fn decode(
        &self,
        result: &Value,
        _notifications: &[(String, Value)],
    ) -> Result<Decoded, EngineError> {
        let mut text = text_items(result.get("content").unwrap_or(&Value::Null));
        if text.trim().is_empty() {
            if let Some(content) = result
                .get("structuredContent")
                .and_then(|s| s.get("content"))
                .and_then(Value::as_str)
            {
                text = content.to_string();
            }
        }
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(EngineError::Failed {
                engine: EngineKind::Codex,
                reason: if text.trim().is_empty() {
                    "tool call reported an error".to_string()
                } else {
                    text
                },
            });
        }
        if text.trim().is_empty() {
            return Err(EngineError::Malformed {
                engine: EngineKind::Codex,
                reason: "tool result has no text content".to_string(),
            });
        }
        Ok(Decoded {
            text,
            structured: None,
        })
    }
}
