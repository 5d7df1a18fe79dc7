//! Request-scoped connection and transaction coordination.
//!
//! The pre-stage ([`Coordinator::begin_request`]) fans out across the
//! declared databases, acquiring one session each and opening transactions
//! for write access; it either hands back a fully-populated context or
//! cleans up everything it opened and fails. The post-stage
//! ([`Coordinator::end_request`]) commits or rolls back per the recorded
//! request error and releases every session, aggregating per-database
//! finalization failures without letting any of them block the rest.
//!
//! There is no cross-database atomicity here: the guarantee is "all open or
//! all being rolled back", coordinated best-effort, never two-phase commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::context::{AccessKind, DatabaseDescriptor, RequestContext};
use crate::error::{TxError, TxResult};
use crate::registry::PoolRegistry;
use crate::session::Session;

/// Builds and tears down request transaction contexts.
#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<PoolRegistry>,
}

impl Coordinator {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Acquire one session per declared database, concurrently, beginning a
    /// transaction on each write-access database.
    ///
    /// Either every acquisition succeeds and the populated context is
    /// returned, or every session that was opened is rolled back (write
    /// access) and released before the first error is surfaced. Cleanup is
    /// always awaited to completion; nothing is left half-finished when
    /// this returns. Failures are terminal for the request, never retried.
    pub async fn begin_request(
        &self,
        descriptors: &[DatabaseDescriptor],
    ) -> TxResult<RequestContext> {
        let mut seen = HashSet::new();
        for descriptor in descriptors {
            if !seen.insert(descriptor.name.as_str()) {
                return Err(TxError::invalid_input(format!(
                    "Database '{}' declared more than once",
                    descriptor.name
                )));
            }
        }

        let results = join_all(descriptors.iter().map(|d| self.acquire_one(d))).await;

        let mut sessions = HashMap::with_capacity(descriptors.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok((name, session)) => {
                    sessions.insert(name, session);
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(error) = first_error {
            warn!(error = %error, "Session setup failed, rolling back opened sessions");
            self.abandon(sessions).await;
            return Err(error);
        }

        let context = RequestContext::new(sessions);
        debug!(
            request_id = %context.id(),
            databases = descriptors.len(),
            "All sessions acquired"
        );
        Ok(context)
    }

    /// Finalize a context: commit each open transaction if no error was
    /// recorded, roll back otherwise, and release every session.
    ///
    /// Per-database finalization failures are collected into a single
    /// `Finalization` error; they never prevent the remaining sessions from
    /// being released, and never undo commits that already succeeded on
    /// other databases. A second call on the same context is a no-op.
    pub async fn end_request(&self, context: &mut RequestContext) -> TxResult<()> {
        if context.is_finalized() {
            debug!(request_id = %context.id(), "Context already finalized");
            return Ok(());
        }
        let had_error = context.error().is_some();
        let sessions = context.take_sessions();
        let request_id = context.id();

        let results = join_all(sessions.into_iter().map(|(name, mut session)| async move {
            let mut failure: Option<String> = None;
            if session.in_transaction() {
                let result = if had_error {
                    session.rollback().await
                } else {
                    session.commit().await
                };
                if let Err(e) = result {
                    warn!(database = %name, error = %e, "Finalization failed");
                    failure = Some(e.to_string());
                }
            }
            self.park(&name, session).await;
            (name, failure)
        }))
        .await;

        context.mark_finalized();
        info!(
            request_id = %request_id,
            rolled_back = had_error,
            "All sessions released"
        );

        let failures: Vec<(String, String)> = results
            .into_iter()
            .filter_map(|(name, failure)| failure.map(|message| (name, message)))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TxError::Finalization { failures })
        }
    }

    async fn acquire_one(&self, descriptor: &DatabaseDescriptor) -> TxResult<(String, Session)> {
        let pool = self.registry.get(&descriptor.name).await?;
        let mut session = pool.acquire().await?;
        if descriptor.access == AccessKind::Write {
            if let Err(e) = session.begin().await {
                // A rejected begin closed the session; hand it back so the
                // pool slot is freed.
                pool.release(session).await;
                return Err(e);
            }
        }
        debug!(database = %descriptor.name, access = ?descriptor.access, "Session ready");
        Ok((descriptor.name.clone(), session))
    }

    /// Roll back and release every session opened before a setup failure.
    async fn abandon(&self, sessions: HashMap<String, Session>) {
        join_all(sessions.into_iter().map(|(name, mut session)| async move {
            if session.in_transaction() {
                if let Err(e) = session.rollback().await {
                    warn!(database = %name, error = %e, "Rollback during cleanup failed");
                }
            }
            self.park(&name, session).await;
            debug!(database = %name, "Session cleaned up after setup failure");
        }))
        .await;
    }

    /// Return a session to its pool; sessions for databases that vanished
    /// from the registry are just disconnected.
    async fn park(&self, name: &str, mut session: Session) {
        match self.registry.get(name).await {
            Ok(pool) => pool.release(session).await,
            Err(_) => session.disconnect().await,
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseSettings, Engine, PoolOptions};

    fn sqlite_settings(name: &str) -> DatabaseSettings {
        DatabaseSettings {
            name: name.to_string(),
            url: "sqlite::memory:".to_string(),
            engine: Engine::Sqlite,
            pool: PoolOptions {
                acquire_timeout_secs: Some(1),
                ..PoolOptions::default()
            },
        }
    }

    async fn coordinator(names: &[&str]) -> Coordinator {
        let registry = Arc::new(PoolRegistry::new());
        for name in names {
            registry.register(sqlite_settings(name)).await.unwrap();
        }
        Coordinator::new(registry)
    }

    #[tokio::test]
    async fn test_duplicate_descriptor_rejected() {
        let coordinator = coordinator(&["a"]).await;
        let err = coordinator
            .begin_request(&[
                DatabaseDescriptor::read("a"),
                DatabaseDescriptor::write("a"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_unknown_database_fails_request() {
        let coordinator = coordinator(&["a"]).await;
        let err = coordinator
            .begin_request(&[DatabaseDescriptor::read("missing")])
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::UnknownDatabase { .. }));
    }

    #[tokio::test]
    async fn test_empty_declaration_gives_empty_context() {
        let coordinator = coordinator(&[]).await;
        let mut context = coordinator.begin_request(&[]).await.unwrap();
        assert_eq!(context.databases().count(), 0);
        coordinator.end_request(&mut context).await.unwrap();
    }

    #[tokio::test]
    async fn test_end_request_twice_is_noop() {
        let coordinator = coordinator(&["a"]).await;
        let mut context = coordinator
            .begin_request(&[DatabaseDescriptor::write("a")])
            .await
            .unwrap();
        coordinator.end_request(&mut context).await.unwrap();
        assert!(context.is_finalized());
        coordinator.end_request(&mut context).await.unwrap();
    }
}
