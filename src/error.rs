//! Error types for the orchestrator.
//!
//! This module defines the error taxonomy using `thiserror`: connection
//! failures, transaction control failures, statement failures (carrying the
//! native driver error), pool exhaustion, and finalization aggregates.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Connection failed for '{database}': {message}")]
    Connection { database: String, message: String },

    #[error("Transaction {operation} failed on '{database}': {message}")]
    Transaction {
        database: String,
        /// "begin", "commit" or "rollback"
        operation: String,
        message: String,
    },

    #[error("Statement failed on '{database}': {message}")]
    Statement {
        database: String,
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        /// True when the driver reported the physical link dead.
        connection_dead: bool,
    },

    #[error("No session available for '{database}' within {waited_ms}ms")]
    PoolExhausted { database: String, waited_ms: u64 },

    #[error("Unknown database '{database}': no pool registered under that name")]
    UnknownDatabase { database: String },

    #[error("Session for '{database}' is {state}, expected {expected}")]
    InvalidState {
        database: String,
        state: String,
        expected: &'static str,
    },

    #[error("Finalization failed for {} database(s): {}", failures.len(), summarize(failures))]
    Finalization { failures: Vec<(String, String)> },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(db, msg)| format!("{db}: {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl TxError {
    /// Create a connection error.
    pub fn connection(database: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            database: database.into(),
            message: message.into(),
        }
    }

    /// Create a transaction control error.
    pub fn transaction(
        database: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transaction {
            database: database.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a statement error.
    pub fn statement(
        database: impl Into<String>,
        message: impl Into<String>,
        sql_state: Option<String>,
        connection_dead: bool,
    ) -> Self {
        Self::Statement {
            database: database.into(),
            message: message.into(),
            sql_state,
            connection_dead,
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(database: impl Into<String>, waited_ms: u64) -> Self {
        Self::PoolExhausted {
            database: database.into(),
            waited_ms,
        }
    }

    /// Create an unknown database error.
    pub fn unknown_database(database: impl Into<String>) -> Self {
        Self::UnknownDatabase {
            database: database.into(),
        }
    }

    /// Create an invalid session state error.
    pub fn invalid_state(
        database: impl Into<String>,
        state: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::InvalidState {
            database: database.into(),
            state: state.into(),
            expected,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify a driver error raised while establishing a connection.
    pub fn from_connect(database: &str, err: sqlx::Error) -> Self {
        Self::connection(database, err.to_string())
    }

    /// Classify a driver error raised by transaction control.
    pub fn from_tx_control(database: &str, operation: &str, err: sqlx::Error) -> Self {
        Self::transaction(database, operation, err.to_string())
    }

    /// Classify a driver error raised by statement execution.
    ///
    /// Database-level errors (syntax, constraint violations) leave the link
    /// usable; I/O and protocol failures mark it dead.
    pub fn from_statement(database: &str, err: sqlx::Error) -> Self {
        let dead = is_fatal_link_error(&err);
        let sql_state = match &err {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
            _ => None,
        };
        let message = match &err {
            sqlx::Error::Database(db_err) => db_err.message().to_string(),
            other => other.to_string(),
        };
        Self::statement(database, message, sql_state, dead)
    }

    /// Whether a statement error left the session unusable.
    pub fn killed_connection(&self) -> bool {
        matches!(
            self,
            Self::Statement {
                connection_dead: true,
                ..
            }
        )
    }
}

/// Whether a sqlx error means the physical connection is gone.
pub fn is_fatal_link_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Result type alias for orchestrator operations.
pub type TxResult<T> = Result<T, TxError>;
