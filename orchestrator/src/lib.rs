//! Multi-engine task orchestrator.
//!
//! Routes a task to modes, decomposes it into a plan, runs each subtask on a
//! warm engine process (Codex over MCP, Gemini over ACP) and gates any diff
//! the engines propose before it touches the working tree. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (routing, planning, diff parsing,
//!   risk, tokens). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, processes, pool, run
//!   artifacts, filesystem writes). Isolated behind traits for tests.
//! - **[`engines`]**: Wire protocol adapters driven over a warm process.
//!
//! [`orchestrate`], [`patch_gate`] and [`tools`] coordinate core logic with
//! I/O to implement the tool surface exposed by the CLI.

pub mod core;
pub mod engines;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod patch_gate;
pub mod record;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
