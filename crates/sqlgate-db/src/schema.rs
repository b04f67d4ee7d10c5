//! Schema bootstrap for the bot's own tables.
//!
//! Every statement is idempotent, so [`ensure_schema`] is safe to run on
//! each start.

use sqlgate_types::{DialectKind, Params};

use crate::error::DbError;
use crate::facade::Database;

const SQLITE: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (\
        id BIGINT PRIMARY KEY, \
        username TEXT NULL, \
        is_admin BOOLEAN NOT NULL DEFAULT 0, \
        is_banned BOOLEAN NOT NULL DEFAULT 0, \
        referred_by BIGINT NULL)",
    "CREATE TABLE IF NOT EXISTS sponsor_verifications (\
        id INTEGER PRIMARY KEY AUTOINCREMENT, \
        user_id BIGINT NOT NULL, \
        channels_missing TEXT NULL, \
        policy TEXT NOT NULL, \
        success BOOLEAN NOT NULL)",
];

const POSTGRES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (\
        id BIGINT PRIMARY KEY, \
        username TEXT NULL, \
        is_admin BOOLEAN NOT NULL DEFAULT FALSE, \
        is_banned BOOLEAN NOT NULL DEFAULT FALSE, \
        referred_by BIGINT NULL)",
    "CREATE TABLE IF NOT EXISTS sponsor_verifications (\
        id BIGSERIAL PRIMARY KEY, \
        user_id BIGINT NOT NULL, \
        channels_missing TEXT NULL, \
        policy TEXT NOT NULL, \
        success BOOLEAN NOT NULL)",
];

const MSSQL: &[&str] = &[
    "IF OBJECT_ID('dbo.users', 'U') IS NULL CREATE TABLE dbo.users (\
        id BIGINT PRIMARY KEY, \
        username NVARCHAR(255) NULL, \
        is_admin BIT NOT NULL DEFAULT 0, \
        is_banned BIT NOT NULL DEFAULT 0, \
        referred_by BIGINT NULL)",
    "IF OBJECT_ID('dbo.sponsor_verifications', 'U') IS NULL \
     CREATE TABLE dbo.sponsor_verifications (\
        id BIGINT IDENTITY(1,1) PRIMARY KEY, \
        user_id BIGINT NOT NULL, \
        channels_missing NVARCHAR(1024) NULL, \
        policy NVARCHAR(50) NOT NULL, \
        success BIT NOT NULL)",
];

/// DDL for `dialect`, in execution order.
pub const fn statements(dialect: DialectKind) -> &'static [&'static str] {
    match dialect {
        DialectKind::EmbeddedFile => SQLITE,
        DialectKind::ClientServerDollar => POSTGRES,
        DialectKind::ClientServerCli => MSSQL,
        DialectKind::Disabled => &[],
    }
}

/// Create `users` and `sponsor_verifications` if they are missing.
///
/// Does nothing for the disabled dialect.
pub async fn ensure_schema(db: &Database) -> Result<(), DbError> {
    if db.dialect().is_disabled() {
        return Ok(());
    }
    let ddl = statements(db.dialect());
    for statement in ddl {
        db.execute(statement, &Params::new()).await?;
    }
    tracing::info!(dialect = %db.dialect(), tables = ddl.len(), "Schema ensured");
    Ok(())
}
