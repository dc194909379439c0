//! Diagnostic tracing for ralph.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. It is not the audit
//! trail: the progress log (`io/progress_log`) and the per-iteration artifacts
//! (`io/iteration_log`) are always written under `.ralph/`, whatever the filter.

use std::io::{self, IsTerminal};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable.
const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber.
///
/// ```bash
/// RUST_LOG=ralph=debug ralph build 3 --no-commit
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();
}
