//! Driver seam between the orchestrator and database engines.
//!
//! A [`Driver`] opens physical connections; a [`DriverConnection`] is one
//! live link exposing transaction control and statement execution. The
//! session layer never touches engine types directly, so alternative engines
//! (or test doubles) plug in behind these traits.

pub mod sqlx_driver;

use async_trait::async_trait;

use crate::config::DatabaseSettings;
use crate::error::TxResult;

pub use sqlx_driver::SqlxDriver;

/// One decoded result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Positional statement parameter.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

/// Opens connections for one engine family.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Establish a new physical connection.
    async fn connect(&self, settings: &DatabaseSettings) -> TxResult<Box<dyn DriverConnection>>;
}

/// One live connection. Access is strictly sequential (`&mut self`): at most
/// one statement is in flight at a time.
#[async_trait]
pub trait DriverConnection: Send {
    /// Start an explicit transaction.
    async fn begin(&mut self) -> TxResult<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> TxResult<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> TxResult<()>;

    /// Run a row-returning statement with positional parameters.
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> TxResult<Vec<Row>>;

    /// Run a mutating statement; returns the affected-row count.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> TxResult<u64>;

    /// Whether the physical link is still alive.
    async fn ping(&mut self) -> bool;

    /// Tear down the link. Infallible; errors are logged and swallowed.
    async fn close(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_param_from_conversions() {
        assert_eq!(SqlParam::from(7_i64), SqlParam::Int(7));
        assert_eq!(SqlParam::from(true), SqlParam::Bool(true));
        assert_eq!(SqlParam::from("x"), SqlParam::Text("x".to_string()));
    }

    #[test]
    fn test_sql_param_deserializes_untagged() {
        let params: Vec<SqlParam> = serde_json::from_str(r#"[1, "two", 3.5, null]"#).unwrap();
        assert_eq!(params[0], SqlParam::Int(1));
        assert_eq!(params[1], SqlParam::Text("two".to_string()));
        assert_eq!(params[2], SqlParam::Float(3.5));
        assert_eq!(params[3], SqlParam::Null);
    }
}
