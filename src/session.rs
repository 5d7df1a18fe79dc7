//! Database session: one physical connection with an explicit state machine.
//!
//! States: `Idle -> Connecting -> Connected -> InTransaction -> Executing ->
//! Closed`. Access is strictly sequential; `&mut self` on every operation
//! guarantees at most one statement in flight. Transaction end is always
//! explicit - a session is never returned to a pool mid-transaction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::debug;

use crate::config::DatabaseSettings;
use crate::driver::{Driver, DriverConnection, Row, SqlParam};
use crate::error::{TxError, TxResult};
use crate::observer::SessionObserver;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Pooled, no live link.
    Idle,
    /// Connect in progress.
    Connecting,
    /// Live link, no open transaction.
    Connected,
    /// Live link with an open transaction (write access only).
    InTransaction,
    /// One statement in flight; returns to the prior state.
    Executing,
    /// Terminal. Safe to reach from any state, more than once.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::InTransaction => "in-transaction",
            SessionState::Executing => "executing",
            SessionState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// One live connection to one database, owned exclusively by a single
/// request context (or by its pool while idle).
pub struct Session {
    database: String,
    state: SessionState,
    conn: Option<Box<dyn DriverConnection>>,
    observer: Arc<dyn SessionObserver>,
    connect_timeout: Duration,
    statement_timeout: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.database)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a disconnected session.
    pub fn new(
        database: impl Into<String>,
        observer: Arc<dyn SessionObserver>,
        connect_timeout: Duration,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            database: database.into(),
            state: SessionState::Idle,
            conn: None,
            observer,
            connect_timeout,
            statement_timeout,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connected | SessionState::InTransaction
        )
    }

    pub fn in_transaction(&self) -> bool {
        self.state == SessionState::InTransaction
    }

    /// Establish the physical link. `Idle -> Connecting -> Connected`; any
    /// failure (including the connect timeout) closes the session.
    pub async fn connect(
        &mut self,
        driver: &dyn Driver,
        settings: &DatabaseSettings,
    ) -> TxResult<()> {
        if self.state != SessionState::Idle {
            return Err(TxError::invalid_state(
                &self.database,
                self.state.to_string(),
                "idle",
            ));
        }
        self.state = SessionState::Connecting;
        self.observer.on_start(&self.database, "connect");
        let started = Instant::now();

        match timeout(self.connect_timeout, driver.connect(settings)).await {
            Ok(Ok(conn)) => {
                self.conn = Some(conn);
                self.state = SessionState::Connected;
                self.observer
                    .on_finish(&self.database, "connect", started.elapsed());
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = SessionState::Closed;
                self.observer
                    .on_error(&self.database, "connect", &e.to_string());
                Err(e)
            }
            Err(_) => {
                self.state = SessionState::Closed;
                let err = TxError::connection(
                    &self.database,
                    format!("connect timed out after {:?}", self.connect_timeout),
                );
                self.observer
                    .on_error(&self.database, "connect", &err.to_string());
                Err(err)
            }
        }
    }

    /// Start an explicit transaction. `Connected -> InTransaction`; a
    /// rejected begin closes the session.
    pub async fn begin(&mut self) -> TxResult<()> {
        if self.state != SessionState::Connected {
            return Err(TxError::invalid_state(
                &self.database,
                self.state.to_string(),
                "connected",
            ));
        }
        self.observer.on_start(&self.database, "begin");
        let started = Instant::now();
        let conn = self.conn_mut()?;
        match conn.begin().await {
            Ok(()) => {
                self.state = SessionState::InTransaction;
                self.observer
                    .on_finish(&self.database, "begin", started.elapsed());
                Ok(())
            }
            Err(e) => {
                self.observer
                    .on_error(&self.database, "begin", &e.to_string());
                self.close_link().await;
                Err(e)
            }
        }
    }

    /// Commit the open transaction. `InTransaction -> Connected`.
    pub async fn commit(&mut self) -> TxResult<()> {
        self.end_transaction(true).await
    }

    /// Roll back the open transaction. `InTransaction -> Connected`.
    pub async fn rollback(&mut self) -> TxResult<()> {
        self.end_transaction(false).await
    }

    async fn end_transaction(&mut self, commit: bool) -> TxResult<()> {
        let operation = if commit { "commit" } else { "rollback" };
        if self.state != SessionState::InTransaction {
            return Err(TxError::invalid_state(
                &self.database,
                self.state.to_string(),
                "in-transaction",
            ));
        }
        self.observer.on_start(&self.database, operation);
        let started = Instant::now();
        let conn = self.conn_mut()?;
        let result = if commit {
            conn.commit().await
        } else {
            conn.rollback().await
        };
        match result {
            Ok(()) => {
                self.state = SessionState::Connected;
                self.observer
                    .on_finish(&self.database, operation, started.elapsed());
                Ok(())
            }
            Err(e) => {
                self.observer
                    .on_error(&self.database, operation, &e.to_string());
                self.close_link().await;
                Err(e)
            }
        }
    }

    /// Run a row-returning statement with positional parameters.
    pub async fn query(&mut self, sql: &str, params: &[SqlParam]) -> TxResult<Vec<Row>> {
        let resume = self.enter_executing()?;
        self.observer.on_start(&self.database, sql);
        let started = Instant::now();
        let deadline = self.statement_timeout;
        let result = match self.conn.as_mut() {
            Some(conn) => timeout(deadline, conn.query(sql, params)).await,
            None => {
                return Err(TxError::internal(format!(
                    "session for '{}' lost its connection",
                    self.database
                )));
            }
        };
        self.leave_executing(resume, sql, started, result).await
    }

    /// Run a mutating statement; returns the affected-row count.
    pub async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> TxResult<u64> {
        let resume = self.enter_executing()?;
        self.observer.on_start(&self.database, sql);
        let started = Instant::now();
        let deadline = self.statement_timeout;
        let result = match self.conn.as_mut() {
            Some(conn) => timeout(deadline, conn.execute(sql, params)).await,
            None => {
                return Err(TxError::internal(format!(
                    "session for '{}' lost its connection",
                    self.database
                )));
            }
        };
        self.leave_executing(resume, sql, started, result).await
    }

    /// Health check against the live link.
    pub async fn ping(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await,
            None => false,
        }
    }

    /// Tear down the link. Idempotent; safe from any state.
    pub async fn disconnect(&mut self) {
        if self.conn.is_some() {
            self.observer.on_start(&self.database, "disconnect");
            let started = Instant::now();
            self.close_link().await;
            self.observer
                .on_finish(&self.database, "disconnect", started.elapsed());
        } else {
            self.state = SessionState::Closed;
        }
    }

    fn enter_executing(&mut self) -> TxResult<SessionState> {
        match self.state {
            SessionState::Connected | SessionState::InTransaction if self.conn.is_some() => {
                let prior = self.state;
                self.state = SessionState::Executing;
                Ok(prior)
            }
            _ => Err(TxError::invalid_state(
                &self.database,
                self.state.to_string(),
                "connected or in-transaction",
            )),
        }
    }

    /// Resolve an executed statement: restore the prior state on success or
    /// recoverable failure, close the session when the link is dead or the
    /// statement timed out (the in-flight statement cannot be reclaimed).
    async fn leave_executing<T>(
        &mut self,
        resume: SessionState,
        sql: &str,
        started: Instant,
        result: Result<TxResult<T>, tokio::time::error::Elapsed>,
    ) -> TxResult<T> {
        match result {
            Ok(Ok(value)) => {
                self.state = resume;
                self.observer
                    .on_finish(&self.database, sql, started.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                self.observer.on_error(&self.database, sql, &e.to_string());
                if e.killed_connection() {
                    self.close_link().await;
                } else {
                    self.state = resume;
                }
                Err(e)
            }
            Err(_) => {
                let err = TxError::statement(
                    &self.database,
                    format!("statement timed out after {:?}", self.statement_timeout),
                    None,
                    true,
                );
                self.observer.on_error(&self.database, sql, &err.to_string());
                self.close_link().await;
                Err(err)
            }
        }
    }

    async fn close_link(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
            debug!(database = %self.database, "Session closed");
        }
        self.state = SessionState::Closed;
    }

    fn conn_mut(&mut self) -> TxResult<&mut Box<dyn DriverConnection>> {
        let database = self.database.clone();
        self.conn.as_mut().ok_or_else(|| {
            TxError::internal(format!("session for '{database}' lost its connection"))
        })
    }
}
