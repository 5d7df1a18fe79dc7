//! Tracing subscriber setup for binaries embedding the orchestrator.
//!
//! Library code only emits through `tracing`; hosts that want output call
//! [`init_tracing`] once at startup. `RUST_LOG` overrides the default level.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the global tracing subscriber.
///
/// `default_level` applies when `RUST_LOG` is unset. With `json_logs` the
/// output is one JSON object per line, suitable for log shippers.
pub fn init_tracing(default_level: &str, json_logs: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}
