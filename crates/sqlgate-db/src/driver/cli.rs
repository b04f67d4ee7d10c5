//! Call-level-interface client-server driver.
//!
//! The engine is reached through a blocking API, so every call is handed to
//! tokio's blocking thread pool and never runs on an async worker. Blocking
//! connections live in a small pool bounded by a semaphore sized to the
//! configured maximum.
//!
//! ```text
//! acquire permit ──> pop idle / connect ──> PooledConnection
//!                                                |
//!                        spawn_blocking(call) <──+
//!                                                |
//!            drop: rollback if mid-transaction ──+──> idle (or discard)
//! ```
//!
//! A caller that is cancelled or times out stops waiting, but the blocking
//! work it started runs to completion. The connection and its permit go
//! back to the pool when that work finishes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sqlgate_types::{Record, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{PoolStatus, to_u32};
use crate::config::MssqlConfig;
use crate::error::{BoxError, DbError};

/// A blocking connection to a call-level-interface engine.
///
/// Implementations run on blocking worker threads only.
pub trait CliConnection: Send {
    /// Run a statement, returning the affected-row count.
    ///
    /// `timeout` is the statement deadline to hand to the engine.
    fn execute(&mut self, sql: &str, args: &[Value], timeout: Duration) -> Result<u64, BoxError>;

    /// Run a query, returning at most `limit` rows (all rows when `None`).
    fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        timeout: Duration,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, BoxError>;

    /// Switch autocommit on or off.
    fn set_autocommit(&mut self, enabled: bool) -> Result<(), BoxError>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<(), BoxError>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<(), BoxError>;
}

/// Opens blocking connections.
pub trait CliConnector: Send + Sync + 'static {
    /// Open a new connection with autocommit on.
    fn connect(&self) -> Result<Box<dyn CliConnection>, BoxError>;
}

struct PoolState {
    idle: Vec<Box<dyn CliConnection>>,
    open: u32,
    /// Bumped by `close`; connections checked out under an older
    /// generation are discarded on return.
    generation: u64,
}

struct BlockingPool {
    connector: Arc<dyn CliConnector>,
    state: Mutex<PoolState>,
    permits: Arc<Semaphore>,
    min: u32,
    max: u32,
}

impl BlockingPool {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn permit(&self, wait: Duration) -> Result<OwnedSemaphorePermit, DbError> {
        tokio::time::timeout(wait, Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|elapsed| DbError::Connection(Box::new(elapsed)))?
            .map_err(|closed| DbError::Connection(Box::new(closed)))
    }

    async fn acquire(self: &Arc<Self>, wait: Duration) -> Result<PooledConnection, DbError> {
        let permit = self.permit(wait).await?;

        // An empty idle list reserves a slot in `open` before connecting.
        let (idle, generation) = {
            let mut state = self.lock();
            let idle = state.idle.pop();
            if idle.is_none() {
                state.open = state.open.saturating_add(1);
            }
            (idle, state.generation)
        };

        let conn = match idle {
            Some(conn) => conn,
            None => self.connect_reserved().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            generation,
            in_transaction: false,
            dirty: false,
            _permit: permit,
        })
    }

    /// Open a connection for a slot already counted in `open`. The slot is
    /// given back if connecting fails or the caller stops waiting.
    async fn connect_reserved(self: &Arc<Self>) -> Result<Box<dyn CliConnection>, DbError> {
        let mut reservation = Reservation {
            pool: self,
            pending: true,
        };
        let pool = Arc::clone(self);
        let conn = tokio::task::spawn_blocking(move || pool.connector.connect())
            .await
            .map_err(|e| DbError::Connection(Box::new(e)))?
            .map_err(DbError::Connection)?;
        reservation.pending = false;
        tracing::debug!(open = self.lock().open, "Opened ODBC connection");
        Ok(conn)
    }

    /// Open connections until `min` are open. Each one is opened under a
    /// permit and a reserved slot, like any other acquisition, so racing
    /// callers never push `open` past `max`.
    async fn fill_to_min(self: &Arc<Self>, wait: Duration) -> Result<(), DbError> {
        loop {
            let _permit = self.permit(wait).await?;
            {
                let mut state = self.lock();
                if state.open >= self.min {
                    return Ok(());
                }
                state.open = state.open.saturating_add(1);
            }
            let conn = self.connect_reserved().await?;
            self.lock().idle.push(conn);
        }
    }

    fn release(&self, conn: Box<dyn CliConnection>, generation: u64, dirty: bool) {
        let mut state = self.lock();
        if dirty || generation != state.generation {
            state.open = state.open.saturating_sub(1);
            drop(state);
            drop(conn);
        } else {
            state.idle.push(conn);
        }
    }

    fn drain(&self) -> Vec<Box<dyn CliConnection>> {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        let drained = std::mem::take(&mut state.idle);
        state.open = state.open.saturating_sub(to_u32(drained.len()));
        drained
    }

    fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            open: state.open,
            idle: to_u32(state.idle.len()),
            max: self.max,
        }
    }
}

/// A slot in `open` held for a connection being opened.
struct Reservation<'a> {
    pool: &'a BlockingPool,
    pending: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.pending {
            let mut state = self.pool.lock();
            state.open = state.open.saturating_sub(1);
        }
    }
}

/// A borrowed connection. Returns itself and its permit to the pool on
/// drop, rolling back first if a transaction is still open.
struct PooledConnection {
    conn: Option<Box<dyn CliConnection>>,
    pool: Arc<BlockingPool>,
    generation: u64,
    in_transaction: bool,
    dirty: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn connection(&mut self) -> Result<&mut (dyn CliConnection + 'static), BoxError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| "connection already released".into())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if self.in_transaction {
            let reset = conn.rollback().and_then(|()| conn.set_autocommit(true));
            if let Err(e) = reset {
                tracing::warn!(error = %e, "Discarding ODBC connection that failed to roll back");
                self.dirty = true;
            }
        }
        self.pool.release(conn, self.generation, self.dirty);
    }
}

/// Driver for the call-level-interface dialect.
pub struct CliDriver {
    pool: Arc<BlockingPool>,
    timeout: Duration,
}

impl CliDriver {
    /// Create a driver over `connector`, sized and timed by `config`.
    pub fn new(connector: Arc<dyn CliConnector>, config: &MssqlConfig) -> Self {
        let max = config.pool_max.max(1);
        Self {
            pool: Arc::new(BlockingPool {
                connector,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                    generation: 0,
                }),
                permits: Arc::new(Semaphore::new(usize::try_from(max).unwrap_or(1))),
                min: config.pool_min.min(max),
                max,
            }),
            timeout: config.query_timeout(),
        }
    }

    /// Open the configured minimum number of connections.
    pub async fn init(&self) -> Result<(), DbError> {
        self.pool.fill_to_min(self.timeout).await?;
        tracing::info!(
            min_connections = self.pool.min,
            max_connections = self.pool.max,
            "ODBC pool ready"
        );
        Ok(())
    }

    /// Close idle connections. Borrowed ones are closed when returned.
    pub async fn close(&self) {
        let drained = self.pool.drain();
        let count = drained.len();
        if tokio::task::spawn_blocking(move || drop(drained)).await.is_err() {
            tracing::warn!("ODBC connection teardown panicked");
        }
        tracing::info!(closed = count, "ODBC pool closed");
    }

    /// Run a statement with autocommit.
    pub async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let (sql, args) = (sql.to_owned(), args.to_vec());
        self.call(move |conn, timeout| conn.execute(&sql, &args, timeout))
            .await
    }

    /// Fetch the first row of a query.
    pub async fn fetchone(&self, sql: &str, args: &[Value]) -> Result<Option<Record>, DbError> {
        let (sql, args) = (sql.to_owned(), args.to_vec());
        let rows = self
            .call(move |conn, timeout| conn.query(&sql, &args, timeout, Some(1)))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Fetch every row of a query.
    pub async fn fetchall(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, DbError> {
        let (sql, args) = (sql.to_owned(), args.to_vec());
        self.call(move |conn, timeout| conn.query(&sql, &args, timeout, None))
            .await
    }

    /// Borrow a connection and turn autocommit off on it.
    pub async fn begin(&self) -> Result<CliTransaction, DbError> {
        let guard = self.pool.acquire(self.timeout).await?;
        let mut tx = CliTransaction {
            conn: Some(guard),
            timeout: self.timeout,
        };
        tx.call(|conn, _| conn.set_autocommit(false), true).await?;
        Ok(tx)
    }

    /// Pool occupancy.
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    async fn call<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut dyn CliConnection, Duration) -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.pool.acquire(self.timeout).await?;
        let timeout = self.timeout;
        let work = tokio::task::spawn_blocking(move || f(guard.connection()?, timeout));
        match tokio::time::timeout(timeout, work).await {
            Err(_elapsed) => Err(DbError::Timeout { after: timeout }),
            Ok(Err(join)) => Err(DbError::Query(Box::new(join))),
            Ok(Ok(result)) => result.map_err(DbError::Query),
        }
    }
}

/// A transaction on one borrowed blocking connection.
///
/// Dropped without commit, the connection is rolled back on a blocking
/// thread and returned to the pool.
pub struct CliTransaction {
    conn: Option<PooledConnection>,
    timeout: Duration,
}

impl CliTransaction {
    /// Run a statement inside the transaction.
    pub async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let (sql, args) = (sql.to_owned(), args.to_vec());
        self.call(move |conn, timeout| conn.execute(&sql, &args, timeout), true)
            .await
    }

    /// Fetch the first row of a query inside the transaction.
    pub async fn fetchone(&mut self, sql: &str, args: &[Value]) -> Result<Option<Record>, DbError> {
        let (sql, args) = (sql.to_owned(), args.to_vec());
        let rows = self
            .call(
                move |conn, timeout| conn.query(&sql, &args, timeout, Some(1)),
                true,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Fetch every row of a query inside the transaction.
    pub async fn fetchall(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Record>, DbError> {
        let (sql, args) = (sql.to_owned(), args.to_vec());
        self.call(
            move |conn, timeout| conn.query(&sql, &args, timeout, None),
            true,
        )
        .await
    }

    /// Commit, restore autocommit and release the connection.
    pub async fn commit(mut self) -> Result<(), DbError> {
        self.call(
            |conn, _| {
                conn.commit()?;
                conn.set_autocommit(true)
            },
            false,
        )
        .await
    }

    /// Roll back, restore autocommit and release the connection.
    pub async fn rollback(mut self) -> Result<(), DbError> {
        self.call(
            |conn, _| {
                conn.rollback()?;
                conn.set_autocommit(true)
            },
            false,
        )
        .await
    }

    /// Run `f` on the transaction's connection in the blocking pool.
    ///
    /// `in_transaction` is the state the connection is left in when `f`
    /// succeeds. If the deadline passes the connection stays with the
    /// abandoned work and is rolled back when it finishes.
    async fn call<T, F>(&mut self, f: F, in_transaction: bool) -> Result<T, DbError>
    where
        F: FnOnce(&mut dyn CliConnection, Duration) -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self
            .conn
            .take()
            .ok_or_else(|| DbError::query("transaction connection was lost to an earlier timeout"))?;
        let timeout = self.timeout;
        let work = tokio::task::spawn_blocking(move || {
            guard.in_transaction = true;
            let result = guard.connection().and_then(|conn| f(conn, timeout));
            if result.is_ok() {
                guard.in_transaction = in_transaction;
            }
            (guard, result)
        });
        match tokio::time::timeout(timeout, work).await {
            Err(_elapsed) => Err(DbError::Timeout { after: timeout }),
            Ok(Err(join)) => Err(DbError::Query(Box::new(join))),
            Ok(Ok((guard, result))) => {
                self.conn = Some(guard);
                result.map_err(DbError::Query)
            }
        }
    }
}

impl Drop for CliTransaction {
    fn drop(&mut self) {
        let Some(guard) = self.conn.take() else {
            return;
        };
        if !guard.in_transaction {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(guard));
            }
            Err(_) => drop(guard),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct NullConnection;

    impl CliConnection for NullConnection {
        fn execute(&mut self, _: &str, _: &[Value], _: Duration) -> Result<u64, BoxError> {
            Ok(1)
        }

        fn query(
            &mut self,
            _: &str,
            _: &[Value],
            _: Duration,
            _: Option<usize>,
        ) -> Result<Vec<Record>, BoxError> {
            Ok(Vec::new())
        }

        fn set_autocommit(&mut self, _: bool) -> Result<(), BoxError> {
            Ok(())
        }

        fn commit(&mut self) -> Result<(), BoxError> {
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
        delay: Duration,
    }

    impl CliConnector for CountingConnector {
        fn connect(&self) -> Result<Box<dyn CliConnection>, BoxError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(Box::new(NullConnection))
        }
    }

    struct FailingConnector;

    impl CliConnector for FailingConnector {
        fn connect(&self) -> Result<Box<dyn CliConnection>, BoxError> {
            Err("login failed".into())
        }
    }

    fn config(min: u32, max: u32) -> MssqlConfig {
        MssqlConfig {
            pool_min: min,
            pool_max: max,
            ..MssqlConfig::default()
        }
    }

    #[tokio::test]
    async fn connections_are_reused() {
        let connector = Arc::new(CountingConnector::default());
        let driver = CliDriver::new(connector.clone(), &config(0, 4));
        for _ in 0..5 {
            driver.execute("UPDATE t SET a = 1", &[]).await.unwrap();
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        let status = driver.pool_status();
        assert_eq!((status.open, status.idle, status.in_use()), (1, 1, 0));
    }

    #[tokio::test]
    async fn init_fills_to_min_and_is_idempotent() {
        let connector = Arc::new(CountingConnector::default());
        let driver = CliDriver::new(connector.clone(), &config(3, 5));
        driver.init().await.unwrap();
        driver.init().await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        assert_eq!(driver.pool_status().idle, 3);
    }

    #[tokio::test]
    async fn close_drops_idle_connections_and_reopens_later() {
        let connector = Arc::new(CountingConnector::default());
        let driver = CliDriver::new(connector.clone(), &config(2, 2));
        driver.init().await.unwrap();
        driver.close().await;
        assert_eq!(driver.pool_status().open, 0);
        driver.execute("SELECT 1", &[]).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn init_racing_first_use_stays_within_max() {
        let connector = Arc::new(CountingConnector {
            delay: Duration::from_millis(30),
            ..CountingConnector::default()
        });
        let driver = CliDriver::new(connector.clone(), &config(2, 2));

        let (init, a, b, c) = tokio::join!(
            driver.init(),
            driver.execute("SELECT 1", &[]),
            driver.execute("SELECT 1", &[]),
            driver.execute("SELECT 1", &[]),
        );
        init.unwrap();
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert!(connector.connects.load(Ordering::SeqCst) <= 2);
        let status = driver.pool_status();
        assert!(status.open <= 2, "{status:?}");
        assert_eq!(status.in_use(), 0);
    }

    #[tokio::test]
    async fn failed_connect_gives_its_slot_back() {
        let driver = CliDriver::new(Arc::new(FailingConnector), &config(1, 1));
        assert!(driver.init().await.is_err());
        assert!(driver.execute("SELECT 1", &[]).await.is_err());
        assert_eq!(driver.pool_status().open, 0);
    }
}
