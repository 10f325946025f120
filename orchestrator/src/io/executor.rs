//! Invocation seam between the orchestrator and the engines.
//!
//! The [`Invoker`] trait decouples orchestration from the warm process pool.
//! Tests use scripted invokers that return predetermined replies without
//! spawning processes.

use crate::core::types::EngineKind;
use crate::engines::{EngineReply, EngineRequest};
use crate::error::EngineError;
use crate::io::pool::SlotStatus;

/// Abstraction over engine backends.
pub trait Invoker: Send + Sync {
    /// Run one request on `engine`, blocking until it replies, fails or times out.
    fn invoke(&self, engine: EngineKind, request: &EngineRequest)
    -> Result<EngineReply, EngineError>;

    /// Current state of each engine slot.
    fn status(&self) -> Vec<SlotStatus>;
}
