//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod decompose;
pub mod diff;
pub mod hunks;
pub mod invariants;
pub mod modes;
pub mod output;
pub mod redact;
pub mod risk;
pub mod router;
pub mod slug;
pub mod token;
pub mod types;
