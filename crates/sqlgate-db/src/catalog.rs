//! Schema introspection and bulk administration.
//!
//! Catalog queries differ per dialect; results are normalized so callers
//! get the same shapes everywhere. Bulk operations interpolate table names
//! into DDL, so they only ever use names returned by
//! [`Database::list_tables`], quoted for the dialect.

use serde::Serialize;
use sqlgate_types::{DialectKind, Params, Record, Value, params};

use crate::error::DbError;
use crate::facade::Database;

/// One column of a table, as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type, in the engine's spelling.
    pub data_type: String,
}

/// Columns of a table in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    /// Table name.
    pub table: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
}

/// A table a bulk operation could not process.
#[derive(Debug, Serialize)]
pub struct TableFailure {
    /// Table name.
    pub table: String,
    /// Why it failed.
    #[serde(serialize_with = "serialize_error")]
    pub error: DbError,
}

fn serialize_error<S: serde::Serializer>(error: &DbError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

/// Outcome of a bulk drop or clear. Processing continues past failures.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    /// Tables processed successfully.
    pub succeeded: Vec<String>,
    /// Tables that failed, with their errors.
    pub failed: Vec<TableFailure>,
}

impl BatchReport {
    /// True if every table was processed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Quote `name` as an identifier for `dialect`.
pub fn quote_identifier(dialect: DialectKind, name: &str) -> String {
    match dialect {
        DialectKind::ClientServerDollar => format!("public.\"{}\"", name.replace('"', "\"\"")),
        DialectKind::ClientServerCli => format!("[{}]", name.replace(']', "]]")),
        DialectKind::EmbeddedFile | DialectKind::Disabled => {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }
}

fn text_column(record: &Record, column: &str) -> Result<String, DbError> {
    record
        .get(column)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| DbError::SchemaIntrospection(format!("catalog row has no text `{column}`")))
}

impl Database {
    /// User tables, sorted ascending.
    ///
    /// Engine-internal tables (`sqlite_*`) are excluded.
    pub async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let sql = match self.dialect() {
            DialectKind::EmbeddedFile => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
            }
            DialectKind::ClientServerDollar => {
                "SELECT table_name::text AS name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE'"
            }
            DialectKind::ClientServerCli => "SELECT name FROM sys.tables",
            DialectKind::Disabled => return Err(DbError::BackendDisabled),
        };
        let rows = self.fetchall(sql, &Params::new()).await?;
        let mut tables = rows
            .iter()
            .map(|row| text_column(row, "name"))
            .collect::<Result<Vec<_>, _>>()?;
        tables.sort();
        Ok(tables)
    }

    /// Columns of `table` in ordinal order.
    ///
    /// `table` is bound as a parameter, never interpolated.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::SchemaIntrospection`] if the table does not exist.
    pub async fn table_schema(&self, table: &str) -> Result<TableSchema, DbError> {
        let sql = match self.dialect() {
            DialectKind::EmbeddedFile => {
                "SELECT name, type AS data_type FROM pragma_table_info(:table) ORDER BY cid"
            }
            DialectKind::ClientServerDollar => {
                "SELECT column_name::text AS name, data_type::text AS data_type \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = :table \
                 ORDER BY ordinal_position"
            }
            DialectKind::ClientServerCli => {
                "SELECT c.name AS name, t.name AS data_type \
                 FROM sys.columns c JOIN sys.types t ON c.user_type_id = t.user_type_id \
                 WHERE c.object_id = OBJECT_ID(:table) ORDER BY c.column_id"
            }
            DialectKind::Disabled => return Err(DbError::BackendDisabled),
        };
        let rows = self.fetchall(sql, &params! { "table" => table }).await?;
        if rows.is_empty() {
            return Err(DbError::SchemaIntrospection(format!(
                "table `{table}` not found"
            )));
        }
        let columns = rows
            .iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: text_column(row, "name")?,
                    data_type: text_column(row, "data_type").unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(TableSchema {
            table: table.to_owned(),
            columns,
        })
    }

    /// Drop every table from [`list_tables`](Self::list_tables).
    pub async fn drop_all_tables(&self) -> Result<BatchReport, DbError> {
        let dialect = self.dialect();
        self.for_each_table("drop", |table| {
            let quoted = quote_identifier(dialect, table);
            if dialect == DialectKind::ClientServerDollar {
                format!("DROP TABLE IF EXISTS {quoted} CASCADE")
            } else {
                format!("DROP TABLE IF EXISTS {quoted}")
            }
        })
        .await
    }

    /// Delete every row of every table from
    /// [`list_tables`](Self::list_tables).
    pub async fn clear_all_tables(&self) -> Result<BatchReport, DbError> {
        let dialect = self.dialect();
        self.for_each_table("clear", |table| {
            format!("DELETE FROM {}", quote_identifier(dialect, table))
        })
        .await
    }

    /// Run `statement` for every table, retrying failures in further passes
    /// while each pass makes progress. Foreign keys make the order matter:
    /// a parent table only empties or drops once its children have.
    async fn for_each_table<F>(&self, action: &str, statement: F) -> Result<BatchReport, DbError>
    where
        F: Fn(&str) -> String,
    {
        let mut pending = self.list_tables().await?;
        let mut report = BatchReport::default();
        let mut pass = 1_u32;
        loop {
            let done_before = report.succeeded.len();
            let mut failed = Vec::new();
            for table in pending {
                // Identifiers are already quoted; nothing for the translator.
                let sql = statement(&table);
                match self.driver().execute(&sql, &[]).await {
                    Ok(_) => report.succeeded.push(table),
                    Err(error) => failed.push(TableFailure { table, error }),
                }
            }
            if failed.is_empty() || report.succeeded.len() == done_before {
                report.failed = failed;
                break;
            }
            tracing::debug!(action, pass, remaining = failed.len(), "Retrying tables");
            pending = failed.into_iter().map(|f| f.table).collect();
            pass = pass.saturating_add(1);
        }
        for failure in &report.failed {
            tracing::warn!(
                table = %failure.table,
                action,
                error = %failure.error,
                "Table operation failed"
            );
        }
        tracing::info!(
            action,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Bulk table operation finished"
        );
        Ok(report)
    }
}
