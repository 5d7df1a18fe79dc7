//! sqlx-backed driver implementation.
//!
//! Uses database-specific connections (PgConnection, MySqlConnection,
//! SqliteConnection) rather than `AnyConnection` to keep full type support.
//! Transaction control is issued as raw statements so the session state
//! machine owns begin/commit/rollback explicitly.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlArguments, MySqlConnection, MySqlRow};
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, MySql, Postgres, Row as SqlxRow, Sqlite, TypeInfo};
use tracing::debug;

use crate::config::{DatabaseSettings, Engine};
use crate::driver::{Driver, DriverConnection, Row, SqlParam};
use crate::error::{TxError, TxResult};

/// Driver over sqlx for PostgreSQL, MySQL and SQLite.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxDriver;

impl SqlxDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for SqlxDriver {
    async fn connect(&self, settings: &DatabaseSettings) -> TxResult<Box<dyn DriverConnection>> {
        let conn = match settings.engine {
            Engine::Postgres => Conn::Postgres(
                PgConnection::connect(&settings.url)
                    .await
                    .map_err(|e| TxError::from_connect(&settings.name, e))?,
            ),
            Engine::MySql => Conn::MySql(
                MySqlConnection::connect(&settings.url)
                    .await
                    .map_err(|e| TxError::from_connect(&settings.name, e))?,
            ),
            Engine::Sqlite => Conn::Sqlite(
                SqliteConnection::connect(&settings.url)
                    .await
                    .map_err(|e| TxError::from_connect(&settings.name, e))?,
            ),
        };
        debug!(database = %settings.name, engine = %settings.engine, "Driver connection established");
        Ok(Box::new(SqlxConnection {
            database: settings.name.clone(),
            conn,
        }))
    }
}

enum Conn {
    Postgres(PgConnection),
    MySql(MySqlConnection),
    Sqlite(SqliteConnection),
}

/// One live sqlx connection to one database.
pub struct SqlxConnection {
    database: String,
    conn: Conn,
}

impl SqlxConnection {
    /// Run a parameterless control statement.
    async fn raw(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        match &mut self.conn {
            Conn::Postgres(c) => sqlx::query(sql).execute(c).await.map(|_| ()),
            Conn::MySql(c) => sqlx::query(sql).execute(c).await.map(|_| ()),
            Conn::Sqlite(c) => sqlx::query(sql).execute(c).await.map(|_| ()),
        }
    }

    fn begin_statement(&self) -> &'static str {
        match self.conn {
            Conn::MySql(_) => "START TRANSACTION",
            _ => "BEGIN",
        }
    }
}

#[async_trait]
impl DriverConnection for SqlxConnection {
    async fn begin(&mut self) -> TxResult<()> {
        let stmt = self.begin_statement();
        self.raw(stmt)
            .await
            .map_err(|e| TxError::from_tx_control(&self.database, "begin", e))
    }

    async fn commit(&mut self) -> TxResult<()> {
        self.raw("COMMIT")
            .await
            .map_err(|e| TxError::from_tx_control(&self.database, "commit", e))
    }

    async fn rollback(&mut self) -> TxResult<()> {
        self.raw("ROLLBACK")
            .await
            .map_err(|e| TxError::from_tx_control(&self.database, "rollback", e))
    }

    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> TxResult<Vec<Row>> {
        let rows = match &mut self.conn {
            Conn::Postgres(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                let rows: Vec<PgRow> = query
                    .fetch_all(c)
                    .await
                    .map_err(|e| TxError::from_statement(&self.database, e))?;
                rows.iter().map(pg_row_to_json).collect()
            }
            Conn::MySql(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                let rows: Vec<MySqlRow> = query
                    .fetch_all(c)
                    .await
                    .map_err(|e| TxError::from_statement(&self.database, e))?;
                rows.iter().map(mysql_row_to_json).collect()
            }
            Conn::Sqlite(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                let rows: Vec<SqliteRow> = query
                    .fetch_all(c)
                    .await
                    .map_err(|e| TxError::from_statement(&self.database, e))?;
                rows.iter().map(sqlite_row_to_json).collect()
            }
        };
        Ok(rows)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> TxResult<u64> {
        let affected = match &mut self.conn {
            Conn::Postgres(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query
                    .execute(c)
                    .await
                    .map_err(|e| TxError::from_statement(&self.database, e))?
                    .rows_affected()
            }
            Conn::MySql(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                query
                    .execute(c)
                    .await
                    .map_err(|e| TxError::from_statement(&self.database, e))?
                    .rows_affected()
            }
            Conn::Sqlite(c) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query
                    .execute(c)
                    .await
                    .map_err(|e| TxError::from_statement(&self.database, e))?
                    .rows_affected()
            }
        };
        Ok(affected)
    }

    async fn ping(&mut self) -> bool {
        match &mut self.conn {
            Conn::Postgres(c) => c.ping().await.is_ok(),
            Conn::MySql(c) => c.ping().await.is_ok(),
            Conn::Sqlite(c) => c.ping().await.is_ok(),
        }
    }

    async fn close(self: Box<Self>) {
        let database = self.database;
        let result = match self.conn {
            Conn::Postgres(c) => c.close().await,
            Conn::MySql(c) => c.close().await,
            Conn::Sqlite(c) => c.close().await,
        };
        if let Err(e) = result {
            debug!(database = %database, error = %e, "Error while closing connection");
        }
    }
}

/// Bind a parameter to a PostgreSQL query.
fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.as_str()),
        SqlParam::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

/// Bind a parameter to a MySQL query.
fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.as_str()),
        SqlParam::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.as_str()),
        // SQLite has no native JSON type, store as text
        SqlParam::Json(v) => query.bind(v.to_string()),
    }
}

fn pg_row_to_json(row: &PgRow) -> Row {
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let value = match col.type_info().name() {
            "INT2" => decode(row.try_get::<Option<i16>, _>(idx).map(|v| v.map(i64::from))),
            "INT4" => decode(row.try_get::<Option<i32>, _>(idx).map(|v| v.map(i64::from))),
            "INT8" => decode(row.try_get::<Option<i64>, _>(idx)),
            "FLOAT4" => decode(row.try_get::<Option<f32>, _>(idx).map(|v| v.map(f64::from))),
            "FLOAT8" => decode(row.try_get::<Option<f64>, _>(idx)),
            "BOOL" => decode(row.try_get::<Option<bool>, _>(idx)),
            "JSON" | "JSONB" => decode(row.try_get::<Option<JsonValue>, _>(idx)),
            _ => decode(row.try_get::<Option<String>, _>(idx)),
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

fn mysql_row_to_json(row: &MySqlRow) -> Row {
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let name = col.type_info().name().to_uppercase();
        let value = if name.contains("INT") {
            decode(row.try_get::<Option<i64>, _>(idx))
        } else if name == "FLOAT" || name == "DOUBLE" {
            decode(row.try_get::<Option<f64>, _>(idx))
        } else if name == "BOOLEAN" {
            decode(row.try_get::<Option<bool>, _>(idx))
        } else if name == "JSON" {
            decode(row.try_get::<Option<JsonValue>, _>(idx))
        } else {
            decode(row.try_get::<Option<String>, _>(idx))
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

fn sqlite_row_to_json(row: &SqliteRow) -> Row {
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let value = match col.type_info().name() {
            "INTEGER" => decode(row.try_get::<Option<i64>, _>(idx)),
            "REAL" => decode(row.try_get::<Option<f64>, _>(idx)),
            "BOOLEAN" => decode(row.try_get::<Option<bool>, _>(idx)),
            _ => decode(row.try_get::<Option<String>, _>(idx)),
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

/// Undecodable values degrade to null rather than failing the row.
fn decode<T: Into<JsonValue>>(value: Result<Option<T>, sqlx::Error>) -> JsonValue {
    match value {
        Ok(Some(v)) => v.into(),
        Ok(None) => JsonValue::Null,
        Err(_) => JsonValue::Null,
    }
}
