//! Deterministic, pure logic shared by the promotion engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! records and return deterministic outputs suitable for tests.

pub mod dispatch;
pub mod invariants;
pub mod observations;
pub mod transitions;
pub mod types;
