//! The [`Database`] facade: the single entry point of the data layer.
//!
//! Every statement is written once with `:name` placeholders. The facade
//! translates it for the active dialect, dispatches it to the driver and
//! hands back [`Record`]s, so callers never see engine types.

use std::sync::Arc;

use futures::future::BoxFuture;
use sqlgate_types::{DialectKind, Params, Record};

use crate::config::{DatabaseConfig, MssqlConfig, PostgresConfig, SqliteConfig};
use crate::driver::{
    CliConnector, CliDriver, DisabledDriver, Driver, DriverTransaction, PoolStatus,
    PostgresDriver, SqliteDriver,
};
use crate::error::DbError;
use crate::translate::{Translated, translate};

/// Dialect-independent access to one relational backend.
///
/// Construct once at startup and share by reference or [`Arc`]. Connections
/// are opened lazily and released by [`Database::close`].
pub struct Database {
    driver: Driver,
}

impl Database {
    /// Build the backend selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] for invalid settings and
    /// [`DbError::Connection`] when the ODBC dialect is selected in a build
    /// without the `odbc` feature.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DbError> {
        let driver = Driver::from_config(config)?;
        tracing::info!(dialect = %driver.dialect(), "Database configured");
        Ok(Self { driver })
    }

    /// A database whose every operation fails with
    /// [`DbError::BackendDisabled`].
    pub const fn disabled() -> Self {
        Self {
            driver: Driver::Disabled(DisabledDriver),
        }
    }

    /// An embedded-file database.
    pub const fn sqlite(config: SqliteConfig) -> Self {
        Self {
            driver: Driver::Sqlite(SqliteDriver::new(config)),
        }
    }

    /// A dollar-parameter client-server database.
    pub const fn postgres(config: PostgresConfig) -> Self {
        Self {
            driver: Driver::Postgres(PostgresDriver::new(config)),
        }
    }

    /// A call-level-interface database over a caller-supplied connector.
    pub fn with_cli_connector(connector: Arc<dyn CliConnector>, config: &MssqlConfig) -> Self {
        Self {
            driver: Driver::Cli(CliDriver::new(connector, config)),
        }
    }

    /// The active dialect.
    pub const fn dialect(&self) -> DialectKind {
        self.driver.dialect()
    }

    pub(crate) const fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Open connection resources now rather than on first use. Idempotent.
    pub async fn init(&self) -> Result<(), DbError> {
        self.driver.init().await
    }

    /// Release every connection. Later calls reconnect.
    pub async fn close(&self) {
        self.driver.close().await;
    }

    /// Run a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &Params) -> Result<u64, DbError> {
        let t = self.translate(sql, params)?;
        self.driver.execute(&t.sql, &t.args).await
    }

    /// Run a query, returning its first row if any.
    pub async fn fetchone(&self, sql: &str, params: &Params) -> Result<Option<Record>, DbError> {
        let t = self.translate(sql, params)?;
        self.driver.fetchone(&t.sql, &t.args).await
    }

    /// Run a query, returning every row.
    pub async fn fetchall(&self, sql: &str, params: &Params) -> Result<Vec<Record>, DbError> {
        let t = self.translate(sql, params)?;
        self.driver.fetchall(&t.sql, &t.args).await
    }

    /// Open a transaction on a borrowed connection.
    ///
    /// The connection stays borrowed until the returned [`Transaction`] is
    /// committed, rolled back or dropped. Dropping it rolls back.
    pub async fn transaction(&self) -> Result<Transaction, DbError> {
        let inner = self.driver.transaction().await?;
        tracing::debug!(dialect = %self.dialect(), "Transaction started");
        Ok(Transaction {
            inner: Some(inner),
            dialect: self.dialect(),
        })
    }

    /// Run `f` in a transaction: commit if it returns `Ok`, roll back if it
    /// returns `Err`.
    ///
    /// ```no_run
    /// # async fn demo(db: &sqlgate_db::Database) -> Result<(), sqlgate_db::DbError> {
    /// use sqlgate_types::params;
    ///
    /// let moved = db
    ///     .run_in_transaction(|tx| {
    ///         Box::pin(async move {
    ///             tx.execute("UPDATE users SET is_banned = :b WHERE id = :id",
    ///                 &params! { "b" => true, "id" => 1 }).await
    ///         })
    ///     })
    ///     .await?;
    /// # let _ = moved;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_in_transaction<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, DbError>>,
    {
        let mut tx = self.transaction().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Current pool occupancy, or `None` before any connection is opened
    /// and for the disabled dialect.
    pub async fn pool_status(&self) -> Option<PoolStatus> {
        self.driver.pool_status().await
    }

    fn translate(&self, sql: &str, params: &Params) -> Result<Translated, DbError> {
        let t = translate(self.dialect(), sql, Some(params))?;
        tracing::debug!(dialect = %self.dialect(), args = t.args.len(), "Dispatching statement");
        Ok(t)
    }
}

/// A transaction on one borrowed connection.
///
/// Statements run through the same named-parameter translation as
/// [`Database`]. Call [`commit`](Self::commit) to keep the work; dropping
/// the transaction rolls it back.
pub struct Transaction {
    inner: Option<DriverTransaction>,
    dialect: DialectKind,
}

impl Transaction {
    /// The dialect of the owning database.
    pub const fn dialect(&self) -> DialectKind {
        self.dialect
    }

    /// Run a statement inside the transaction.
    pub async fn execute(&mut self, sql: &str, params: &Params) -> Result<u64, DbError> {
        let t = translate(self.dialect, sql, Some(params))?;
        self.inner()?.execute(&t.sql, &t.args).await
    }

    /// Run a query inside the transaction, returning its first row.
    pub async fn fetchone(&mut self, sql: &str, params: &Params) -> Result<Option<Record>, DbError> {
        let t = translate(self.dialect, sql, Some(params))?;
        self.inner()?.fetchone(&t.sql, &t.args).await
    }

    /// Run a query inside the transaction, returning every row.
    pub async fn fetchall(&mut self, sql: &str, params: &Params) -> Result<Vec<Record>, DbError> {
        let t = translate(self.dialect, sql, Some(params))?;
        self.inner()?.fetchall(&t.sql, &t.args).await
    }

    /// Commit and release the connection.
    pub async fn commit(mut self) -> Result<(), DbError> {
        match self.inner.take() {
            Some(inner) => inner.commit().await,
            None => Err(finished()),
        }
    }

    /// Roll back and release the connection.
    pub async fn rollback(mut self) -> Result<(), DbError> {
        match self.inner.take() {
            Some(inner) => inner.rollback().await,
            None => Err(finished()),
        }
    }

    fn inner(&mut self) -> Result<&mut DriverTransaction, DbError> {
        self.inner.as_mut().ok_or_else(finished)
    }
}

fn finished() -> DbError {
    DbError::query("transaction already finished")
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::warn!(dialect = %self.dialect, "Transaction dropped without commit, rolling back");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sqlgate_types::{Value, params};

    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn disabled_fails_fast() {
        let db = Database::disabled();
        let p = params! { "id" => 1 };
        for result in [
            db.execute("DELETE FROM t WHERE id = :id", &p).await.map(drop),
            db.fetchone("SELECT * FROM t WHERE id = :id", &p).await.map(drop),
            db.fetchall("SELECT * FROM t", &Params::new()).await.map(drop),
            db.transaction().await.map(drop),
        ] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::BackendDisabled);
        }
    }

    #[tokio::test]
    async fn disabled_still_validates_parameters() {
        let db = Database::disabled();
        let err = db.execute("SELECT :missing", &Params::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Translation);
    }

    #[tokio::test]
    async fn run_in_transaction_commits_on_ok() {
        let db = Database::sqlite(SqliteConfig::in_memory());
        db.execute("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER)", &Params::new())
            .await
            .unwrap();
        let inserted = db
            .run_in_transaction(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO kv (k, v) VALUES (:k, :v)", &params! { "k" => "a", "v" => 1 })
                        .await
                })
            })
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        let row = db
            .fetchone("SELECT v FROM kv WHERE k = :k", &params! { "k" => "a" })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("v"), Some(&Value::Int(1)));
    }
}
