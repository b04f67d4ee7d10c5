//! Backend drivers.
//!
//! A [`Driver`] implements the fixed capability set
//! {`init`, `close`, `execute`, `fetchone`, `fetchall`, `transaction`}
//! against one engine. Drivers receive SQL that is already in their
//! positional syntax plus the matching argument list, and always hand back
//! [`Record`]s.
//!
//! ```text
//! Driver
//!   |-- Sqlite    one lazily opened connection, BEGIN/COMMIT on it
//!   |-- Postgres  bounded sqlx pool, native transactions
//!   |-- Cli       bounded pool of blocking connections, offloaded calls
//!   +-- Disabled  fails fast
//! ```

pub mod cli;
pub mod disabled;
#[cfg(feature = "odbc")]
pub mod odbc;
pub mod postgres;
pub mod sqlite;

use sqlgate_types::{DialectKind, Record, Value};
use sqlx::query::Query;
use sqlx::{Encode, Type};

use crate::config::DatabaseConfig;
use crate::error::DbError;

pub use cli::{CliConnection, CliConnector, CliDriver, CliTransaction};
pub use disabled::DisabledDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

/// Snapshot of a driver's connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    /// Connections currently open (idle plus borrowed).
    pub open: u32,
    /// Open connections not currently borrowed.
    pub idle: u32,
    /// Upper bound on borrowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Connections currently borrowed by callers.
    pub const fn in_use(&self) -> u32 {
        self.open.saturating_sub(self.idle)
    }
}

/// The active backend. Exactly one per [`Database`](crate::Database).
pub enum Driver {
    /// Embedded single-file engine.
    Sqlite(SqliteDriver),
    /// Dollar-parameter client-server engine.
    Postgres(PostgresDriver),
    /// Call-level-interface client-server engine.
    Cli(CliDriver),
    /// No backend.
    Disabled(DisabledDriver),
}

impl Driver {
    /// Build the driver selected by `config`.
    ///
    /// Nothing is opened here; connections are created on first use or by
    /// [`Driver::init`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the selected dialect's settings are
    /// invalid, and [`DbError::Connection`] if the ODBC dialect is selected
    /// in a build without the `odbc` feature.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DbError> {
        config.validate()?;
        let driver = match config.dialect {
            DialectKind::EmbeddedFile => Self::Sqlite(SqliteDriver::new(config.sqlite.clone())),
            DialectKind::ClientServerDollar => {
                Self::Postgres(PostgresDriver::new(config.postgres.clone()))
            }
            DialectKind::ClientServerCli => Self::Cli(odbc_driver(config)?),
            DialectKind::Disabled => Self::Disabled(DisabledDriver),
        };
        Ok(driver)
    }

    /// The dialect this driver speaks.
    pub const fn dialect(&self) -> DialectKind {
        match self {
            Self::Sqlite(_) => DialectKind::EmbeddedFile,
            Self::Postgres(_) => DialectKind::ClientServerDollar,
            Self::Cli(_) => DialectKind::ClientServerCli,
            Self::Disabled(_) => DialectKind::Disabled,
        }
    }

    /// Create connection resources now instead of on first use. Idempotent.
    pub async fn init(&self) -> Result<(), DbError> {
        match self {
            Self::Sqlite(d) => d.init().await,
            Self::Postgres(d) => d.init().await,
            Self::Cli(d) => d.init().await,
            Self::Disabled(d) => d.init(),
        }
    }

    /// Release every connection. A later call opens fresh ones.
    pub async fn close(&self) {
        match self {
            Self::Sqlite(d) => d.close().await,
            Self::Postgres(d) => d.close().await,
            Self::Cli(d) => d.close().await,
            Self::Disabled(_) => {}
        }
    }

    /// Run a statement, returning the affected-row count.
    pub async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        match self {
            Self::Sqlite(d) => d.execute(sql, args).await,
            Self::Postgres(d) => d.execute(sql, args).await,
            Self::Cli(d) => d.execute(sql, args).await,
            Self::Disabled(d) => d.execute(sql, args),
        }
    }

    /// Run a query, returning its first row.
    pub async fn fetchone(&self, sql: &str, args: &[Value]) -> Result<Option<Record>, DbError> {
        match self {
            Self::Sqlite(d) => d.fetchone(sql, args).await,
            Self::Postgres(d) => d.fetchone(sql, args).await,
            Self::Cli(d) => d.fetchone(sql, args).await,
            Self::Disabled(d) => d.fetchone(sql, args),
        }
    }

    /// Run a query, returning every row.
    pub async fn fetchall(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, DbError> {
        match self {
            Self::Sqlite(d) => d.fetchall(sql, args).await,
            Self::Postgres(d) => d.fetchall(sql, args).await,
            Self::Cli(d) => d.fetchall(sql, args).await,
            Self::Disabled(d) => d.fetchall(sql, args),
        }
    }

    /// Borrow a connection and open a transaction on it.
    pub async fn transaction(&self) -> Result<DriverTransaction, DbError> {
        match self {
            Self::Sqlite(d) => Ok(DriverTransaction::Sqlite(d.begin().await?)),
            Self::Postgres(d) => Ok(DriverTransaction::Postgres(d.begin().await?)),
            Self::Cli(d) => Ok(DriverTransaction::Cli(d.begin().await?)),
            Self::Disabled(d) => Err(d.transaction()),
        }
    }

    /// Current pool occupancy, if the driver has opened its pool.
    pub async fn pool_status(&self) -> Option<PoolStatus> {
        match self {
            Self::Sqlite(d) => d.pool_status().await,
            Self::Postgres(d) => d.pool_status().await,
            Self::Cli(d) => Some(d.pool_status()),
            Self::Disabled(_) => None,
        }
    }
}

#[cfg(feature = "odbc")]
fn odbc_driver(config: &DatabaseConfig) -> Result<CliDriver, DbError> {
    let connector = odbc::OdbcConnector::new(
        config.mssql.connection_string(),
        config.mssql.query_timeout(),
    );
    Ok(CliDriver::new(std::sync::Arc::new(connector), &config.mssql))
}

#[cfg(not(feature = "odbc"))]
fn odbc_driver(_config: &DatabaseConfig) -> Result<CliDriver, DbError> {
    Err(DbError::connection(
        "the mssql dialect needs sqlgate-db built with the `odbc` feature",
    ))
}

/// A transaction bound to one borrowed connection.
///
/// Dropping it without [`commit`](Self::commit) rolls back and releases the
/// connection.
pub enum DriverTransaction {
    /// `SQLite` transaction on the single connection.
    Sqlite(sqlx::Transaction<'static, sqlx::Sqlite>),
    /// `PostgreSQL` transaction on a pooled connection.
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
    /// ODBC transaction on a pooled blocking connection.
    Cli(CliTransaction),
}

impl DriverTransaction {
    /// Run a statement inside the transaction.
    pub async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        match self {
            Self::Sqlite(tx) => sqlite::execute_on(&mut **tx, sql, args).await,
            Self::Postgres(tx) => postgres::execute_on(&mut **tx, sql, args).await,
            Self::Cli(tx) => tx.execute(sql, args).await,
        }
    }

    /// Run a query inside the transaction, returning its first row.
    pub async fn fetchone(&mut self, sql: &str, args: &[Value]) -> Result<Option<Record>, DbError> {
        match self {
            Self::Sqlite(tx) => sqlite::fetchone_on(&mut **tx, sql, args).await,
            Self::Postgres(tx) => postgres::fetchone_on(&mut **tx, sql, args).await,
            Self::Cli(tx) => tx.fetchone(sql, args).await,
        }
    }

    /// Run a query inside the transaction, returning every row.
    pub async fn fetchall(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Record>, DbError> {
        match self {
            Self::Sqlite(tx) => sqlite::fetchall_on(&mut **tx, sql, args).await,
            Self::Postgres(tx) => postgres::fetchall_on(&mut **tx, sql, args).await,
            Self::Cli(tx) => tx.fetchall(sql, args).await,
        }
    }

    /// Commit and release the connection.
    pub async fn commit(self) -> Result<(), DbError> {
        match self {
            Self::Sqlite(tx) => Ok(tx.commit().await?),
            Self::Postgres(tx) => Ok(tx.commit().await?),
            Self::Cli(tx) => tx.commit().await,
        }
    }

    /// Roll back and release the connection.
    pub async fn rollback(self) -> Result<(), DbError> {
        match self {
            Self::Sqlite(tx) => Ok(tx.rollback().await?),
            Self::Postgres(tx) => Ok(tx.rollback().await?),
            Self::Cli(tx) => tx.rollback().await,
        }
    }
}

/// Bind `args` to a sqlx query in order. `null` produces the value bound
/// for [`Value::Null`], since engines differ in how a typeless NULL is sent.
pub(crate) fn bind_values<'q, DB, N>(
    mut query: Query<'q, DB, <DB as sqlx::Database>::Arguments<'q>>,
    args: &'q [Value],
    null: impl Fn() -> N,
) -> Query<'q, DB, <DB as sqlx::Database>::Arguments<'q>>
where
    DB: sqlx::Database,
    N: Encode<'q, DB> + Type<DB> + 'q,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    for arg in args {
        query = match arg {
            Value::Null => query.bind(null()),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
        };
    }
    query
}

/// Pool sizes are small; saturate rather than fail on conversion.
pub(crate) fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
