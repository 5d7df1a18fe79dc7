//! Bounded session pool, one per database name.
//!
//! A session handed out by `acquire` is exclusively owned by the caller
//! until `release` returns it. The free/loaned bookkeeping here is the only
//! state shared across concurrent requests in the subsystem; it is guarded
//! by a semaphore (capacity) plus a mutex (idle set).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::DatabaseSettings;
use crate::driver::Driver;
use crate::error::{TxError, TxResult};
use crate::observer::SessionObserver;
use crate::session::{Session, SessionState};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub loaned: usize,
    pub max_sessions: usize,
}

struct IdleSession {
    session: Session,
    parked_at: Instant,
}

/// Bounded, reusable set of sessions for one database.
pub struct SessionPool {
    settings: DatabaseSettings,
    driver: Arc<dyn Driver>,
    observer: Arc<dyn SessionObserver>,
    idle: Mutex<Vec<IdleSession>>,
    permits: Semaphore,
    loaned: AtomicUsize,
}

impl SessionPool {
    pub fn new(
        settings: DatabaseSettings,
        driver: Arc<dyn Driver>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let max = settings.pool.max_sessions_or_default() as usize;
        Self {
            settings,
            driver,
            observer,
            idle: Mutex::new(Vec::new()),
            permits: Semaphore::new(max),
            loaned: AtomicUsize::new(0),
        }
    }

    pub fn database(&self) -> &str {
        &self.settings.name
    }

    /// Pre-connect `min_sessions` sessions. Failures are logged, not fatal;
    /// the pool will keep trying lazily on acquire.
    pub async fn warm_up(&self) {
        let min = self.settings.pool.min_sessions_or_default();
        for _ in 0..min {
            match self.new_session().await {
                Ok(session) => {
                    let mut idle = self.idle.lock().await;
                    idle.push(IdleSession {
                        session,
                        parked_at: Instant::now(),
                    });
                }
                Err(e) => {
                    warn!(database = %self.settings.name, error = %e, "Warm-up connect failed");
                    break;
                }
            }
        }
    }

    /// Hand out a connected session, reusing an idle one when possible.
    ///
    /// Blocks up to the configured acquire timeout for a free slot, then
    /// fails with `PoolExhausted`. Idle sessions are health-checked before
    /// reuse; stale or dead ones are discarded and replaced.
    pub async fn acquire(&self) -> TxResult<Session> {
        let wait = self.settings.pool.acquire_timeout();
        let permit = match timeout(wait, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(TxError::internal(format!(
                    "pool for '{}' is shut down",
                    self.settings.name
                )));
            }
            Err(_) => {
                return Err(TxError::pool_exhausted(
                    &self.settings.name,
                    wait.as_millis() as u64,
                ));
            }
        };
        // The permit is restored by release/discard, not by drop.
        permit.forget();

        let idle_timeout = self.settings.pool.idle_timeout();
        loop {
            let candidate = {
                let mut idle = self.idle.lock().await;
                idle.pop()
            };
            let Some(parked) = candidate else { break };

            let mut session = parked.session;
            if parked.parked_at.elapsed() > idle_timeout {
                debug!(database = %self.settings.name, "Discarding idle session past its lifetime");
                session.disconnect().await;
                continue;
            }
            if !session.ping().await {
                debug!(database = %self.settings.name, "Discarding dead idle session");
                session.disconnect().await;
                continue;
            }
            self.loaned.fetch_add(1, Ordering::AcqRel);
            debug!(database = %self.settings.name, "Reusing idle session");
            return Ok(session);
        }

        match self.new_session().await {
            Ok(session) => {
                self.loaned.fetch_add(1, Ordering::AcqRel);
                Ok(session)
            }
            Err(e) => {
                self.permits.add_permits(1);
                Err(e)
            }
        }
    }

    /// Return a session. A healthy `Connected` session goes back to the idle
    /// set; anything else (closed, or still holding a transaction) is
    /// disconnected and discarded rather than pooled.
    pub async fn release(&self, mut session: Session) {
        self.loaned.fetch_sub(1, Ordering::AcqRel);
        if session.state() == SessionState::Connected {
            let mut idle = self.idle.lock().await;
            idle.push(IdleSession {
                session,
                parked_at: Instant::now(),
            });
        } else {
            if session.state() == SessionState::InTransaction {
                warn!(
                    database = %self.settings.name,
                    "Session released mid-transaction, discarding"
                );
            }
            session.disconnect().await;
        }
        self.permits.add_permits(1);
    }

    /// Disconnect and drop every idle session. Loaned sessions stay with
    /// their requests and are discarded on release.
    pub async fn drain(&self) {
        let drained: Vec<IdleSession> = {
            let mut idle = self.idle.lock().await;
            idle.drain(..).collect()
        };
        let count = drained.len();
        for parked in drained {
            let mut session = parked.session;
            session.disconnect().await;
        }
        if count > 0 {
            info!(database = %self.settings.name, sessions = count, "Pool drained");
        }
    }

    /// Current counters.
    pub async fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().await.len();
        PoolStats {
            idle,
            loaned: self.loaned.load(Ordering::Acquire),
            max_sessions: self.settings.pool.max_sessions_or_default() as usize,
        }
    }

    async fn new_session(&self) -> TxResult<Session> {
        let mut session = Session::new(
            self.settings.name.clone(),
            Arc::clone(&self.observer),
            self.settings.pool.connect_timeout(),
            self.settings.pool.statement_timeout(),
        );
        session.connect(&*self.driver, &self.settings).await?;
        Ok(session)
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("database", &self.settings.name)
            .field("max_sessions", &self.settings.pool.max_sessions_or_default())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Engine, PoolOptions};
    use crate::driver::SqlxDriver;
    use crate::observer::NoopObserver;

    fn sqlite_pool(max_sessions: u32, acquire_timeout_secs: u64) -> SessionPool {
        let settings = DatabaseSettings {
            name: "local".to_string(),
            url: "sqlite::memory:".to_string(),
            engine: Engine::Sqlite,
            pool: PoolOptions {
                max_sessions: Some(max_sessions),
                acquire_timeout_secs: Some(acquire_timeout_secs),
                ..PoolOptions::default()
            },
        };
        SessionPool::new(settings, Arc::new(SqlxDriver::new()), Arc::new(NoopObserver))
    }

    #[tokio::test]
    async fn test_acquire_and_release_roundtrip() {
        let pool = sqlite_pool(2, 1);
        let session = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().await.loaned, 1);
        pool.release(session).await;
        let stats = pool.stats().await;
        assert_eq!(stats.loaned, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_released_session_is_reused() {
        let pool = sqlite_pool(1, 1);
        let mut session = pool.acquire().await.unwrap();
        session
            .execute("CREATE TABLE marker (id INTEGER)", &[])
            .await
            .unwrap();
        pool.release(session).await;

        // Same link comes back, so the in-memory table is still there.
        let mut session = pool.acquire().await.unwrap();
        session.query("SELECT id FROM marker", &[]).await.unwrap();
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let pool = sqlite_pool(1, 1);
        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, TxError::PoolExhausted { .. }));
        pool.release(held).await;
    }

    #[tokio::test]
    async fn test_closed_session_is_discarded_not_pooled() {
        let pool = sqlite_pool(1, 1);
        let mut session = pool.acquire().await.unwrap();
        session.disconnect().await;
        pool.release(session).await;
        let stats = pool.stats().await;
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.loaned, 0);

        // The slot is free again.
        let session = pool.acquire().await.unwrap();
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_drain_empties_idle_set() {
        let pool = sqlite_pool(2, 1);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(pool.stats().await.idle, 2);
        pool.drain().await;
        assert_eq!(pool.stats().await.idle, 0);
    }
}
