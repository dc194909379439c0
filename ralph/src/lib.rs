//! Autonomous build loop over a backlog of user stories.
//!
//! Each iteration selects the next eligible story, hands it to an external
//! coding agent, verifies the result against the story's acceptance criteria,
//! runs the project's quality gates, and records the outcome as a git commit
//! plus a progress log entry. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (dependency resolution, criterion
//!   parsing, backlog invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, agent and gate
//!   processes). Isolated behind traits to enable scripting in tests.
//!
//! Orchestration modules ([`step`], [`looping`], [`select`], [`validate`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod backlog;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod interrupt;
pub mod io;
pub mod logging;
pub mod looping;
pub mod select;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
