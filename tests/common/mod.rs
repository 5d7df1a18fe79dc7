//! Shared test driver with scriptable failures.
//!
//! Records every driver-level event (connect, begin, commit, rollback,
//! close) so tests can assert exactly which operations ran per database.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use multidb::{DatabaseSettings, Driver, DriverConnection, Row, SqlParam, TxError, TxResult};

/// Which operations should fail, per database name.
#[derive(Debug, Default)]
pub struct Script {
    pub fail_connect: HashSet<String>,
    pub fail_begin: HashSet<String>,
    pub fail_commit: HashSet<String>,
    pub fail_rollback: HashSet<String>,
}

impl Script {
    pub fn fail_connect(mut self, database: &str) -> Self {
        self.fail_connect.insert(database.to_string());
        self
    }

    pub fn fail_begin(mut self, database: &str) -> Self {
        self.fail_begin.insert(database.to_string());
        self
    }

    pub fn fail_commit(mut self, database: &str) -> Self {
        self.fail_commit.insert(database.to_string());
        self
    }

    pub fn fail_rollback(mut self, database: &str) -> Self {
        self.fail_rollback.insert(database.to_string());
        self
    }
}

pub struct ScriptedDriver {
    script: Arc<Script>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDriver {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == event)
            .count()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn connect(&self, settings: &DatabaseSettings) -> TxResult<Box<dyn DriverConnection>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("connect {}", settings.name));
        if self.script.fail_connect.contains(&settings.name) {
            return Err(TxError::connection(
                &settings.name,
                "scripted connect failure",
            ));
        }
        Ok(Box::new(ScriptedConnection {
            database: settings.name.clone(),
            script: Arc::clone(&self.script),
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedConnection {
    database: String,
    script: Arc<Script>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnection {
    fn record(&self, operation: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{operation} {}", self.database));
    }
}

#[async_trait]
impl DriverConnection for ScriptedConnection {
    async fn begin(&mut self) -> TxResult<()> {
        self.record("begin");
        if self.script.fail_begin.contains(&self.database) {
            return Err(TxError::transaction(
                &self.database,
                "begin",
                "scripted begin failure",
            ));
        }
        Ok(())
    }

    async fn commit(&mut self) -> TxResult<()> {
        self.record("commit");
        if self.script.fail_commit.contains(&self.database) {
            return Err(TxError::transaction(
                &self.database,
                "commit",
                "scripted commit failure",
            ));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> TxResult<()> {
        self.record("rollback");
        if self.script.fail_rollback.contains(&self.database) {
            return Err(TxError::transaction(
                &self.database,
                "rollback",
                "scripted rollback failure",
            ));
        }
        Ok(())
    }

    async fn query(&mut self, _sql: &str, _params: &[SqlParam]) -> TxResult<Vec<Row>> {
        self.record("query");
        Ok(Vec::new())
    }

    async fn execute(&mut self, _sql: &str, _params: &[SqlParam]) -> TxResult<u64> {
        self.record("execute");
        Ok(1)
    }

    async fn ping(&mut self) -> bool {
        true
    }

    async fn close(self: Box<Self>) {
        self.record("close");
    }
}
