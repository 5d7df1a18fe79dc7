//! Process-wide registry of session pools, keyed by database name.
//!
//! Replaces the ambient global pool map of older designs with an explicit
//! value: initialized once at process start, passed by `Arc`, and drained at
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::DatabaseSettings;
use crate::driver::{Driver, SqlxDriver};
use crate::error::{TxError, TxResult};
use crate::observer::{SessionObserver, TracingObserver};
use crate::pool::{PoolStats, SessionPool};

/// All session pools for the process.
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<SessionPool>>>,
    driver: Arc<dyn Driver>,
    observer: Arc<dyn SessionObserver>,
}

impl PoolRegistry {
    /// Registry backed by the sqlx driver and tracing observability.
    pub fn new() -> Self {
        Self::with_driver(Arc::new(SqlxDriver::new()), Arc::new(TracingObserver))
    }

    /// Registry with a custom driver and observer (test doubles, alternative
    /// engines).
    pub fn with_driver(driver: Arc<dyn Driver>, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            driver,
            observer,
        }
    }

    /// Create one pool per settings entry and warm each up to its minimum.
    pub async fn init(&self, databases: Vec<DatabaseSettings>) -> TxResult<()> {
        for settings in databases {
            self.register(settings).await?;
        }
        let pools = self.pools.read().await;
        for pool in pools.values() {
            pool.warm_up().await;
        }
        info!(databases = pools.len(), "Pool registry initialized");
        Ok(())
    }

    /// Register a pool for one database. Rejects duplicate names.
    pub async fn register(&self, settings: DatabaseSettings) -> TxResult<()> {
        settings.pool.validate()?;
        let mut pools = self.pools.write().await;
        if pools.contains_key(&settings.name) {
            return Err(TxError::config(format!(
                "Database '{}' is already registered",
                settings.name
            )));
        }
        let name = settings.name.clone();
        let pool = Arc::new(SessionPool::new(
            settings,
            Arc::clone(&self.driver),
            Arc::clone(&self.observer),
        ));
        pools.insert(name, pool);
        Ok(())
    }

    /// Look up the pool for a database name.
    pub async fn get(&self, database: &str) -> TxResult<Arc<SessionPool>> {
        let pools = self.pools.read().await;
        pools
            .get(database)
            .cloned()
            .ok_or_else(|| TxError::unknown_database(database))
    }

    /// Registered database names.
    pub async fn database_names(&self) -> Vec<String> {
        let pools = self.pools.read().await;
        pools.keys().cloned().collect()
    }

    /// Stats per database.
    pub async fn stats(&self) -> HashMap<String, PoolStats> {
        let pools = self.pools.read().await;
        let mut out = HashMap::with_capacity(pools.len());
        for (name, pool) in pools.iter() {
            out.insert(name.clone(), pool.stats().await);
        }
        out
    }

    /// Drain every pool. Called once at process stop.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<SessionPool>> = {
            let mut pools = self.pools.write().await;
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in drained {
            pool.drain().await;
        }
        info!("All pools shut down");
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Engine, PoolOptions};

    fn sqlite_settings(name: &str) -> DatabaseSettings {
        DatabaseSettings {
            name: name.to_string(),
            url: "sqlite::memory:".to_string(),
            engine: Engine::Sqlite,
            pool: PoolOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_unknown_database() {
        let registry = PoolRegistry::new();
        let err = registry.get("nonexistent").await.unwrap_err();
        assert!(matches!(err, TxError::UnknownDatabase { .. }));
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = PoolRegistry::new();
        registry.register(sqlite_settings("a")).await.unwrap();
        let pool = registry.get("a").await.unwrap();
        assert_eq!(pool.database(), "a");
    }

    #[tokio::test]
    async fn test_register_duplicate_rejected() {
        let registry = PoolRegistry::new();
        registry.register(sqlite_settings("a")).await.unwrap();
        let err = registry.register(sqlite_settings("a")).await.unwrap_err();
        assert!(matches!(err, TxError::Config { .. }));
    }

    #[tokio::test]
    async fn test_init_registers_all() {
        let registry = PoolRegistry::new();
        registry
            .init(vec![sqlite_settings("a"), sqlite_settings("b")])
            .await
            .unwrap();
        let mut names = registry.database_names().await;
        names.sort();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_shutdown_empties_registry() {
        let registry = PoolRegistry::new();
        registry.register(sqlite_settings("a")).await.unwrap();
        registry.shutdown().await;
        assert!(registry.database_names().await.is_empty());
    }
}
