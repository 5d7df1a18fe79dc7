//! Observability signals for session lifecycle and statements.
//!
//! Sessions report start/finish/error through a [`SessionObserver`] rather
//! than emitting events inline; the signals carry statement text and timing
//! and never affect control flow.

use std::time::Duration;

/// Receives lifecycle signals from sessions.
///
/// All methods have no-op defaults so implementors can pick what they need.
pub trait SessionObserver: Send + Sync {
    /// A network exchange (connect, statement, transaction control) started.
    fn on_start(&self, database: &str, operation: &str) {
        let _ = (database, operation);
    }

    /// The exchange finished successfully.
    fn on_finish(&self, database: &str, operation: &str, elapsed: Duration) {
        let _ = (database, operation, elapsed);
    }

    /// The exchange failed.
    fn on_error(&self, database: &str, operation: &str, message: &str) {
        let _ = (database, operation, message);
    }
}

/// Default observer that forwards signals to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_start(&self, database: &str, operation: &str) {
        tracing::debug!(database = %database, operation = %operation, "Start");
    }

    fn on_finish(&self, database: &str, operation: &str, elapsed: Duration) {
        tracing::debug!(
            database = %database,
            operation = %operation,
            elapsed_ms = elapsed.as_millis() as u64,
            "Finish"
        );
    }

    fn on_error(&self, database: &str, operation: &str, message: &str) {
        tracing::warn!(
            database = %database,
            operation = %operation,
            error = %message,
            "Session error"
        );
    }
}

/// Observer that discards all signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
