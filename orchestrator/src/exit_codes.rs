//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded; for `call`, the tool response carries no `error_kind`.
pub const OK: i32 = 0;
/// Command failed due to invalid config, registry, input or other errors.
pub const INVALID: i32 = 1;
/// `call` completed but the tool response reports an `error_kind`.
pub const TOOL_ERROR: i32 = 2;
