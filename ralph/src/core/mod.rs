//! Deterministic, pure logic shared by the build loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod criteria;
pub mod invariants;
pub mod resolver;
pub mod types;
