//! Subcommand implementations.
//!
//! Each command returns its printable output so `main` owns stdout and
//! tests can assert on text.

use serde_json::json;
use sqlgate_db::catalog::quote_identifier;
use sqlgate_db::{BatchReport, Database, DialectKind, Params, ensure_schema, params};

use crate::cli::Command;
use crate::error::AdminError;
use crate::render::{self, OutputFormat};

/// Rows shown by `schema`.
const PREVIEW_ROWS: i64 = 10;

/// Run `command` against `db`.
pub async fn run(db: &Database, command: &Command, format: OutputFormat) -> Result<String, AdminError> {
    match command {
        Command::Tables => tables(db, format).await,
        Command::Schema { table } => schema(db, table, format).await,
        Command::Sql { sql, max_rows } => sql_statement(db, sql, *max_rows, format).await,
        Command::DropAll { confirm } => bulk(db, Bulk::Drop, confirm.as_deref(), format).await,
        Command::ClearAll { confirm } => bulk(db, Bulk::Clear, confirm.as_deref(), format).await,
        Command::InitSchema => {
            ensure_schema(db).await?;
            Ok(format!("Schema ensured for {}.", db.dialect()))
        }
        Command::Status => status(db, format).await,
    }
}

async fn tables(db: &Database, format: OutputFormat) -> Result<String, AdminError> {
    let tables = db.list_tables().await?;
    if format.is_json() {
        return render::json(&tables, format);
    }
    if tables.is_empty() {
        return Ok("No tables.".to_owned());
    }
    Ok(render::grid(
        ["table"],
        tables.into_iter().map(|t| vec![t]),
        format,
    ))
}

async fn schema(db: &Database, table: &str, format: OutputFormat) -> Result<String, AdminError> {
    // Only names the catalog reports are ever interpolated.
    if !db.list_tables().await?.iter().any(|t| t == table) {
        return Err(AdminError::Rejected(format!("table `{table}` not found")));
    }
    let schema = db.table_schema(table).await?;
    let rows = db
        .fetchall(&preview_sql(db.dialect(), table), &params! { "n" => PREVIEW_ROWS })
        .await?;

    if format.is_json() {
        return render::json(
            &json!({ "table": schema.table, "columns": schema.columns, "rows": rows }),
            format,
        );
    }
    let columns = render::grid(
        ["column", "type"],
        schema
            .columns
            .iter()
            .map(|c| vec![c.name.clone(), c.data_type.clone()]),
        format,
    );
    if rows.is_empty() {
        return Ok(format!("{columns}\n\nNo rows."));
    }
    Ok(format!("{columns}\n\n{}", render::records(&rows, format)?))
}

fn preview_sql(dialect: DialectKind, table: &str) -> String {
    let quoted = quote_identifier(dialect, table);
    if dialect == DialectKind::ClientServerCli {
        format!("SELECT TOP (:n) * FROM {quoted}")
    } else {
        format!("SELECT * FROM {quoted} LIMIT :n")
    }
}

/// Whether `sql` returns rows rather than a count.
fn is_query(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    keyword.eq_ignore_ascii_case("select") || keyword.eq_ignore_ascii_case("with")
}

async fn sql_statement(
    db: &Database,
    sql: &str,
    max_rows: usize,
    format: OutputFormat,
) -> Result<String, AdminError> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(AdminError::Rejected("usage: sql <SQL>".to_owned()));
    }
    if sql.contains(';') {
        return Err(AdminError::Rejected(
            "multiple statements are not allowed".to_owned(),
        ));
    }

    if !is_query(sql) {
        let affected = db.execute(sql, &Params::new()).await?;
        if format.is_json() {
            return render::json(&json!({ "affected_rows": affected }), format);
        }
        return Ok(format!("Affected rows: {affected}"));
    }

    let rows = db.fetchall(sql, &Params::new()).await?;
    if rows.is_empty() && !format.is_json() {
        return Ok("No rows returned.".to_owned());
    }
    if rows.len() > max_rows && !format.is_json() {
        tracing::info!(rows = rows.len(), max_rows, "Result too large for a table, printing JSON lines");
        return render::records(&rows, OutputFormat::JsonLine);
    }
    render::records(&rows, format)
}

#[derive(Debug, Clone, Copy)]
enum Bulk {
    Drop,
    Clear,
}

impl Bulk {
    const fn word(self) -> &'static str {
        match self {
            Self::Drop => "DROP",
            Self::Clear => "CLEAR",
        }
    }

    const fn verb(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Clear => "delete every row of",
        }
    }
}

/// Token that confirms a bulk operation over `count` tables. It changes
/// whenever the table set grows or shrinks.
fn confirmation_token(action: Bulk, count: usize) -> String {
    format!("{}-{count}", action.word())
}

async fn bulk(
    db: &Database,
    action: Bulk,
    confirm: Option<&str>,
    format: OutputFormat,
) -> Result<String, AdminError> {
    let tables = db.list_tables().await?;
    let expected = confirmation_token(action, tables.len());

    let Some(token) = confirm else {
        return Ok(format!(
            "WARNING: this will {} all {} tables ({}).\nTo confirm, re-run with --confirm {expected}",
            action.verb(),
            tables.len(),
            tables.join(", "),
        ));
    };
    if token != expected {
        return Err(AdminError::Rejected(format!(
            "confirmation token {token:?} does not match the current tables; run without --confirm for a new one"
        )));
    }

    tracing::warn!(action = action.word(), tables = tables.len(), "Running confirmed bulk operation");
    let report = match action {
        Bulk::Drop => db.drop_all_tables().await?,
        Bulk::Clear => db.clear_all_tables().await?,
    };
    render_report(&report, format)
}

fn render_report(report: &BatchReport, format: OutputFormat) -> Result<String, AdminError> {
    if format.is_json() {
        return render::json(report, format);
    }
    let ok = report
        .succeeded
        .iter()
        .map(|t| vec![t.clone(), "ok".to_owned(), String::new()]);
    let failed = report.failed.iter().map(|f| {
        vec![
            f.table.clone(),
            "failed".to_owned(),
            crate::error::truncate(&f.error.to_string(), crate::error::MAX_ERROR_CHARS),
        ]
    });
    Ok(render::grid(["table", "status", "error"], ok.chain(failed), format))
}

async fn status(db: &Database, format: OutputFormat) -> Result<String, AdminError> {
    let pool = db.pool_status().await;
    if format.is_json() {
        return render::json(&json!({ "dialect": db.dialect(), "pool": pool }), format);
    }
    let cell = |f: fn(&sqlgate_db::PoolStatus) -> u32| {
        pool.as_ref().map_or_else(|| "-".to_owned(), |p| f(p).to_string())
    };
    Ok(render::grid(
        ["dialect", "open", "idle", "in use", "max"],
        [vec![
            db.dialect().to_string(),
            cell(|p| p.open),
            cell(|p| p.idle),
            cell(sqlgate_db::PoolStatus::in_use),
            cell(|p| p.max),
        ]],
        format,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sqlgate_db::SqliteConfig;

    use super::*;

    async fn seeded() -> Database {
        let db = Database::sqlite(SqliteConfig::in_memory());
        ensure_schema(&db).await.unwrap();
        db.execute(
            "INSERT INTO users (id, username) VALUES (:id, :name)",
            &params! { "id" => 1, "name" => "ann" },
        )
        .await
        .unwrap();
        db
    }

    #[test]
    fn query_detection() {
        assert!(is_query("  SELECT 1"));
        assert!(is_query("with x as (select 1) select * from x"));
        assert!(!is_query("UPDATE users SET is_admin = 1"));
        assert!(!is_query("sel"));
    }

    #[test]
    fn preview_uses_dialect_row_limit() {
        assert_eq!(
            preview_sql(DialectKind::EmbeddedFile, "users"),
            "SELECT * FROM \"users\" LIMIT :n"
        );
        assert_eq!(
            preview_sql(DialectKind::ClientServerCli, "users"),
            "SELECT TOP (:n) * FROM [users]"
        );
    }

    #[tokio::test]
    async fn tables_lists_bot_tables() {
        let db = seeded().await;
        let out = run(&db, &Command::Tables, OutputFormat::Json).await.unwrap();
        let names: Vec<String> = serde_json::from_str(&out).unwrap();
        assert_eq!(names, ["sponsor_verifications", "users"]);
    }

    #[tokio::test]
    async fn schema_shows_columns_and_rows() {
        let db = seeded().await;
        let command = Command::Schema {
            table: "users".to_owned(),
        };
        let out = run(&db, &command, OutputFormat::Markdown).await.unwrap();
        assert!(out.contains("referred_by"));
        assert!(out.contains("ann"));
    }

    #[tokio::test]
    async fn schema_rejects_unknown_tables() {
        let db = seeded().await;
        let command = Command::Schema {
            table: "users; DROP TABLE users".to_owned(),
        };
        let err = run(&db, &command, OutputFormat::Table).await.unwrap_err();
        assert!(matches!(err, AdminError::Rejected(_)));
    }

    #[tokio::test]
    async fn sql_rejects_multiple_statements() {
        let db = seeded().await;
        let command = Command::Sql {
            sql: "DELETE FROM users; DROP TABLE users".to_owned(),
            max_rows: 200,
        };
        let err = run(&db, &command, OutputFormat::Table).await.unwrap_err();
        assert!(matches!(err, AdminError::Rejected(_)));
        assert_eq!(db.list_tables().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sql_reports_affected_rows_and_selects() {
        let db = seeded().await;
        let update = Command::Sql {
            sql: "UPDATE users SET is_admin = 1".to_owned(),
            max_rows: 200,
        };
        assert_eq!(
            run(&db, &update, OutputFormat::Table).await.unwrap(),
            "Affected rows: 1"
        );

        let select = Command::Sql {
            sql: "SELECT id, is_admin FROM users".to_owned(),
            max_rows: 200,
        };
        let out = run(&db, &select, OutputFormat::Markdown).await.unwrap();
        assert!(out.contains("is_admin"));
        assert!(out.contains("true"));

        let empty = Command::Sql {
            sql: "SELECT id FROM users WHERE id = 0".to_owned(),
            max_rows: 200,
        };
        assert_eq!(
            run(&db, &empty, OutputFormat::Table).await.unwrap(),
            "No rows returned."
        );
    }

    #[tokio::test]
    async fn large_results_switch_to_json_lines() {
        let db = seeded().await;
        for id in 2..=4 {
            db.execute("INSERT INTO users (id) VALUES (:id)", &params! { "id" => id })
                .await
                .unwrap();
        }
        let command = Command::Sql {
            sql: "SELECT id FROM users ORDER BY id".to_owned(),
            max_rows: 2,
        };
        let out = run(&db, &command, OutputFormat::Table).await.unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines, [r#"{"id":1}"#, r#"{"id":2}"#, r#"{"id":3}"#, r#"{"id":4}"#]);
    }

    #[tokio::test]
    async fn drop_all_requires_the_current_token() {
        let db = seeded().await;

        let warning = run(&db, &Command::DropAll { confirm: None }, OutputFormat::Table)
            .await
            .unwrap();
        assert!(warning.contains("--confirm DROP-2"));
        assert_eq!(db.list_tables().await.unwrap().len(), 2);

        let wrong = Command::DropAll {
            confirm: Some("CLEAR-2".to_owned()),
        };
        assert!(run(&db, &wrong, OutputFormat::Table).await.is_err());
        assert_eq!(db.list_tables().await.unwrap().len(), 2);

        let confirmed = Command::DropAll {
            confirm: Some("DROP-2".to_owned()),
        };
        let out = run(&db, &confirmed, OutputFormat::Json).await.unwrap();
        let report: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(report["succeeded"].as_array().unwrap().len(), 2);
        assert!(db.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_all_keeps_tables() {
        let db = seeded().await;
        let command = Command::ClearAll {
            confirm: Some("CLEAR-2".to_owned()),
        };
        let out = run(&db, &command, OutputFormat::Markdown).await.unwrap();
        assert!(out.contains("users"));
        assert_eq!(db.list_tables().await.unwrap().len(), 2);
        assert!(
            db.fetchall("SELECT id FROM users", &Params::new())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn disabled_backend_surfaces_as_database_error() {
        let db = Database::disabled();
        let err = run(&db, &Command::Tables, OutputFormat::Table).await.unwrap_err();
        assert!(matches!(err, AdminError::Db { .. }));
        assert!(
            run(&db, &Command::InitSchema, OutputFormat::Table)
                .await
                .unwrap()
                .contains("none")
        );
    }

    #[tokio::test]
    async fn status_reports_pool() {
        let db = seeded().await;
        let out = run(&db, &Command::Status, OutputFormat::Json).await.unwrap();
        let status: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(status["dialect"], "sqlite");
        assert_eq!(status["pool"]["max"], 1);
    }
}
