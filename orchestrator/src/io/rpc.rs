//! Line-delimited JSON-RPC 2.0 framing for warm engine processes.
//!
//! One JSON object per line in each direction. Engines may interleave
//! notifications and their own requests with responses.

use serde_json::{Value, json};

/// Error object from a JSON-RPC response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

/// A decoded frame received from an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        id: Value,
        outcome: Result<Value, RpcError>,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// A request initiated by the engine (e.g. a permission prompt).
    Request {
        id: Value,
        method: String,
        params: Value,
    },
}

pub fn request(id: u64, method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
}

pub fn notification(method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string()
}

pub fn response(id: &Value, result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

pub fn error_response(id: &Value, code: i64, message: &str) -> String {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}).to_string()
}

/// Decode one line. Blank lines and non-JSON noise are reported as `Err`.
pub fn parse_frame(line: &str) -> Result<Incoming, String> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|err| format!("invalid json frame: {err}"))?;
    let Value::Object(mut obj) = value else {
        return Err("frame is not a json object".to_string());
    };
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);
    let id = obj.remove("id").filter(|id| !id.is_null());
    let params = obj.remove("params").unwrap_or(Value::Null);

    match (method, id) {
        (Some(method), Some(id)) => Ok(Incoming::Request { id, method, params }),
        (Some(method), None) => Ok(Incoming::Notification { method, params }),
        (None, Some(id)) => {
            if let Some(error) = obj.remove("error") {
                return Ok(Incoming::Response {
                    id,
                    outcome: Err(RpcError {
                        code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                        message: error
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string(),
                        data: error.get("data").cloned(),
                    }),
                });
            }
            Ok(Incoming::Response {
                id,
                outcome: Ok(obj.remove("result").unwrap_or(Value::Null)),
            })
        }
        (None, None) => Err("frame has neither method nor id".to_string()),
    }
}

/// Whether a response id matches the numeric id we sent.
pub fn id_matches(id: &Value, expected: u64) -> bool {
    match id {
        Value::Number(n) => n.as_u64() == Some(expected),
        Value::String(s) => s.parse::<u64>().ok() == Some(expected),
        _ => false,
    }
}
