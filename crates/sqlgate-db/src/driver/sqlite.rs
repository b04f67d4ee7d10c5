//! Embedded single-file driver (`SQLite`).
//!
//! Holds at most one connection, opened on first use with WAL journaling
//! and foreign-key enforcement. Statements outside a transaction commit
//! immediately; concurrent callers serialize on the connection.

use std::path::Path;
use std::str::FromStr;

use sqlgate_types::{Record, Value};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Executor, Row, Sqlite, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::{PoolStatus, bind_values, to_u32};
use crate::config::SqliteConfig;
use crate::error::DbError;

/// Driver for the embedded-file dialect.
pub struct SqliteDriver {
    config: SqliteConfig,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteDriver {
    /// Create a driver. The database file is not touched until first use.
    pub const fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            pool: Mutex::const_new(None),
        }
    }

    /// The configuration this driver was built from.
    pub const fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Open the connection now.
    pub async fn init(&self) -> Result<(), DbError> {
        self.pool().await.map(drop)
    }

    /// Close the connection. The next call reopens it.
    pub async fn close(&self) {
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(path = %self.config.path.display(), "SQLite connection closed");
        }
    }

    /// Run a statement and commit it.
    pub async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let pool = self.pool().await?;
        execute_on(&pool, sql, args).await
    }

    /// Fetch the first row of a query.
    pub async fn fetchone(&self, sql: &str, args: &[Value]) -> Result<Option<Record>, DbError> {
        let pool = self.pool().await?;
        fetchone_on(&pool, sql, args).await
    }

    /// Fetch every row of a query.
    pub async fn fetchall(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, DbError> {
        let pool = self.pool().await?;
        fetchall_on(&pool, sql, args).await
    }

    /// Begin a transaction on the single connection.
    ///
    /// Other callers wait for the connection until it commits or rolls back.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, Sqlite>, DbError> {
        let pool = self.pool().await?;
        Ok(pool.begin().await?)
    }

    /// Pool occupancy, or `None` before the connection is opened.
    pub async fn pool_status(&self) -> Option<PoolStatus> {
        let guard = self.pool.lock().await;
        guard.as_ref().map(|pool| PoolStatus {
            open: pool.size(),
            idle: to_u32(pool.num_idle()),
            max: 1,
        })
    }

    async fn pool(&self) -> Result<SqlitePool, DbError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }
        let pool = self.connect().await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn connect(&self) -> Result<SqlitePool, DbError> {
        let options = if self.config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            create_parent_dir(&self.config.path).await?;
            SqliteConnectOptions::new()
                .filename(&self.config.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        }
        .foreign_keys(true);

        // One connection that never expires: an in-memory database lives
        // exactly as long as its connection.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .acquire_timeout(self.config.acquire_timeout())
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        tracing::info!(path = %self.config.path.display(), "Opened SQLite connection");
        Ok(pool)
    }
}

async fn create_parent_dir(path: &Path) -> Result<(), DbError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| DbError::Connection(Box::new(e)))
}

pub(crate) async fn execute_on<'e, E>(executor: E, sql: &str, args: &[Value]) -> Result<u64, DbError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = bind_values(sqlx::query(sql), args, || None::<String>)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn fetchone_on<'e, E>(
    executor: E,
    sql: &str,
    args: &[Value],
) -> Result<Option<Record>, DbError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = bind_values(sqlx::query(sql), args, || None::<String>)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(decode_row).transpose()
}

pub(crate) async fn fetchall_on<'e, E>(
    executor: E,
    sql: &str,
    args: &[Value],
) -> Result<Vec<Record>, DbError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = bind_values(sqlx::query(sql), args, || None::<String>)
        .fetch_all(executor)
        .await?;
    rows.iter().map(decode_row).collect()
}

/// Convert a row using each value's storage class.
///
/// Integers in a column declared `BOOLEAN` come back as [`Value::Bool`].
fn decode_row(row: &SqliteRow) -> Result<Record, DbError> {
    let mut record = Record::with_capacity(row.columns().len());
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_owned();
            match storage.as_str() {
                "INTEGER" => {
                    let n: i64 = row.try_get_unchecked(index)?;
                    if column.type_info().name() == "BOOLEAN" {
                        Value::Bool(n != 0)
                    } else {
                        Value::Int(n)
                    }
                }
                "REAL" => Value::Float(row.try_get_unchecked(index)?),
                "BLOB" => Value::Bytes(row.try_get_unchecked(index)?),
                _ => Value::Text(row.try_get_unchecked(index)?),
            }
        };
        record.push(column.name(), value);
    }
    Ok(record)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn driver() -> SqliteDriver {
        SqliteDriver::new(SqliteConfig::in_memory())
    }

    #[tokio::test]
    async fn decodes_storage_classes() {
        let d = driver();
        let row = d
            .fetchone("SELECT 1 AS i, 2.5 AS f, 'x' AS t, x'0102' AS b, NULL AS n", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("i"), Some(&Value::Int(1)));
        assert_eq!(row.get("f"), Some(&Value::Float(2.5)));
        assert_eq!(row.get("t"), Some(&Value::Text("x".to_owned())));
        assert_eq!(row.get("b"), Some(&Value::Bytes(vec![1, 2])));
        assert_eq!(row.get("n"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn boolean_columns_decode_as_bool() {
        let d = driver();
        d.execute("CREATE TABLE flags (id INTEGER PRIMARY KEY, on_off BOOLEAN)", &[])
            .await
            .unwrap();
        d.execute(
            "INSERT INTO flags (id, on_off) VALUES (?1, ?2)",
            &[Value::Int(1), Value::Bool(true)],
        )
        .await
        .unwrap();
        let row = d
            .fetchone("SELECT on_off FROM flags WHERE id = ?1", &[Value::Int(1)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("on_off"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn memory_database_survives_between_calls() {
        let d = driver();
        d.execute("CREATE TABLE t (v TEXT)", &[]).await.unwrap();
        d.execute("INSERT INTO t VALUES (?1)", &[Value::from("a")])
            .await
            .unwrap();
        let rows = d.fetchall("SELECT v FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(d.pool_status().await.map(|s| s.max), Some(1));
    }

    #[tokio::test]
    async fn close_then_reopen() {
        let d = driver();
        d.init().await.unwrap();
        d.close().await;
        assert!(d.pool_status().await.is_none());
        assert!(d.fetchone("SELECT 1 AS one", &[]).await.unwrap().is_some());
    }
}
