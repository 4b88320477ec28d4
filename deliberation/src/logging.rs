//! Stderr tracing for the `deliberation` binary.
//!
//! Useful targets when diagnosing a state directory:
//!
//! - `deliberation::cycle`: phase spans keyed by `cycle_id`, goal admission
//!   and pursuit decisions (`info`), skipped proposals (`debug`).
//! - `deliberation::core::cleaner`: stale actions timed out and locked-goal
//!   overflow (`warn`), a per-cycle cleanup summary (`debug`).
//! - `deliberation::executor` and `deliberation::assessor`: tool dispatch and
//!   failures, assessment fallbacks.
//!
//! Metrics and thought records never go through tracing; the state store
//! appends them to `metrics.jsonl` and `thoughts.jsonl` whatever `RUST_LOG` says.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber: `RUST_LOG` filter, compact lines on stderr.
///
/// ```bash
/// RUST_LOG=deliberation::cycle=debug,deliberation::core::cleaner=info deliberation status
/// ```
pub fn init() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::registry()
        .with(filter_from(directives.as_deref()))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// Filter for the given `RUST_LOG` value; unset or unparsable falls back to `warn`.
fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}
