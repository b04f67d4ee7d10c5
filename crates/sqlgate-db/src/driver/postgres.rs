//! Dollar-parameter client-server driver (`PostgreSQL`).
//!
//! Uses [`sqlx`] with runtime query construction, so no live database is
//! needed at build time. The pool is created on first use and shared by
//! every caller; each statement or transaction borrows one connection and
//! returns it when done, including on error and cancellation.

use sqlgate_types::{Record, Value};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgTypeInfo,
};
use sqlx::query::Query;
use sqlx::{Column, Encode, Executor, Postgres, Row, Type, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::{PoolStatus, bind_values, to_u32};
use crate::config::{ConfigError, PostgresConfig};
use crate::error::DbError;

/// Driver for the dollar-parameter dialect.
pub struct PostgresDriver {
    config: PostgresConfig,
    pool: Mutex<Option<PgPool>>,
}

impl PostgresDriver {
    /// Create a driver. No connection is made until first use.
    pub const fn new(config: PostgresConfig) -> Self {
        Self {
            config,
            pool: Mutex::const_new(None),
        }
    }

    /// The configuration this driver was built from.
    pub const fn config(&self) -> &PostgresConfig {
        &self.config
    }

    /// Create the pool now.
    pub async fn init(&self) -> Result<(), DbError> {
        self.pool().await.map(drop)
    }

    /// Close every pooled connection gracefully.
    pub async fn close(&self) {
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!("PostgreSQL pool closed");
        }
    }

    /// Run a statement on a pooled connection.
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

    /// Borrow a connection and begin a transaction on it.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, Postgres>, DbError> {
        let pool = self.pool().await?;
        Ok(pool.begin().await?)
    }

    /// Pool occupancy, or `None` before the pool is created.
    pub async fn pool_status(&self) -> Option<PoolStatus> {
        let guard = self.pool.lock().await;
        guard.as_ref().map(|pool| PoolStatus {
            open: pool.size(),
            idle: to_u32(pool.num_idle()),
            max: self.config.pool_max,
        })
    }

    async fn pool(&self) -> Result<PgPool, DbError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }
        let pool = self.connect().await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn connect(&self) -> Result<PgPool, DbError> {
        let connect_options: PgConnectOptions =
            self.config
                .connection_url()
                .parse()
                .map_err(|e: sqlx::Error| ConfigError::Invalid {
                    field: "postgres.url",
                    reason: e.to_string(),
                })?;

        let pool = PgPoolOptions::new()
            .min_connections(self.config.pool_min)
            .max_connections(self.config.pool_max)
            .acquire_timeout(self.config.acquire_timeout())
            .idle_timeout(self.config.idle_timeout())
            .connect_with(connect_options)
            .await?;

        tracing::info!(
            min_connections = self.config.pool_min,
            max_connections = self.config.pool_max,
            "Connected to PostgreSQL"
        );

        Ok(pool)
    }
}

/// A NULL parameter declared with OID 0, so the server infers its type
/// from the statement instead of rejecting a text NULL in a typed column.
#[derive(Debug, Clone, Copy)]
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Build a bound query. Statements carrying a NULL are not cached: the
/// parameter types the server inferred for them would be reused for later
/// calls with concrete values.
fn bound<'q>(sql: &'q str, args: &'q [Value]) -> Query<'q, Postgres, PgArguments> {
    let has_null = args.iter().any(Value::is_null);
    bind_values(sqlx::query(sql).persistent(!has_null), args, || UntypedNull)
}

pub(crate) async fn execute_on<'e, E>(
    executor: E,
    sql: &str,
    args: &[Value],
) -> Result<u64, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = bound(sql, args)
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
    E: Executor<'e, Database = Postgres>,
{
    let row = bound(sql, args)
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
    E: Executor<'e, Database = Postgres>,
{
    let rows = bound(sql, args)
        .fetch_all(executor)
        .await?;
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &PgRow) -> Result<Record, DbError> {
    let mut record = Record::with_capacity(row.columns().len());
    for column in row.columns() {
        let index = column.ordinal();
        let value = decode_column(row, index, column.type_info().name())?;
        record.push(column.name(), value);
    }
    Ok(record)
}

/// Map one column to a [`Value`] by its declared type.
///
/// Temporal, numeric, UUID and JSON types are rendered as text. Unknown
/// types are read as text when the wire format allows it.
fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value, DbError> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get(index)?),
        "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(index)?)),
        "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(index)?)),
        "INT8" => Value::Int(row.try_get(index)?),
        "OID" => Value::Int(i64::from(row.try_get::<sqlx::postgres::types::Oid, _>(index)?.0)),
        "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => Value::Float(row.try_get(index)?),
        "BYTEA" => Value::Bytes(row.try_get(index)?),
        "NUMERIC" => Value::Text(row.try_get::<rust_decimal::Decimal, _>(index)?.to_string()),
        "UUID" => Value::Text(row.try_get::<uuid::Uuid, _>(index)?.to_string()),
        "TIMESTAMPTZ" => Value::Text(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::Text(row.try_get::<chrono::NaiveDateTime, _>(index)?.to_string()),
        "DATE" => Value::Text(row.try_get::<chrono::NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::Text(row.try_get::<chrono::NaiveTime, _>(index)?.to_string()),
        "JSON" | "JSONB" => Value::Text(row.try_get::<serde_json::Value, _>(index)?.to_string()),
        "VOID" => Value::Null,
        other => match row.try_get_unchecked::<String, _>(index) {
            Ok(text) => Value::Text(text),
            Err(e) => {
                return Err(DbError::query(format!(
                    "cannot decode column {index} of type {other}: {e}"
                )));
            }
        },
    };
    Ok(value)
}
