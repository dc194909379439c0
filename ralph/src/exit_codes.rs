//! Stable exit codes for ralph CLI commands.

/// Command succeeded; `build` ended `Exhausted` or `Budgeted`.
pub const OK: i32 = 0;
/// Invalid backlog, config, or arguments.
pub const INVALID: i32 = 1;
/// Open stories remain but none is eligible.
pub const DEADLOCKED: i32 = 2;
/// Run-level failure (missing agent, commit error, not a repository).
pub const ABORTED: i32 = 3;
/// `ralph next` found nothing left to do.
pub const EXHAUSTED: i32 = 4;
/// Stopped by Ctrl-C; the story in flight stays `in_progress`.
pub const INTERRUPTED: i32 = 130;
