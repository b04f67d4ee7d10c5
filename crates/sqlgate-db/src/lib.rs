//! Dialect-abstracting data-access layer.
//!
//! SQL is written once with `:name` placeholders and runs unchanged against
//! an embedded `SQLite` file, a `PostgreSQL` server or (with the `odbc`
//! feature) SQL Server over ODBC. A fourth, disabled backend fails every
//! operation fast.
//!
//! # Architecture
//!
//! ```text
//! caller
//!   |-- Users / SponsorVerifications (models)
//!   |       +-- Mapper (TableDef -> parameterized SQL)
//!   +-----------+
//!               v
//!          Database (facade)
//!               |-- translate   :name -> ?N / $N / ?
//!               +-- Driver
//!                     |-- Sqlite    single connection, WAL
//!                     |-- Postgres  sqlx pool
//!                     |-- Cli       blocking pool on spawn_blocking
//!                     +-- Disabled  BackendDisabled
//! ```
//!
//! # Modules
//!
//! - [`facade`] -- [`Database`] and [`Transaction`]
//! - [`translate`] -- named-parameter translation
//! - [`driver`] -- per-engine drivers
//! - [`catalog`] -- table listing, schema introspection, bulk drop/clear
//! - [`mapper`] -- single-table record mapper
//! - [`models`] -- `users` and `sponsor_verifications` repositories
//! - [`schema`] -- idempotent schema bootstrap
//! - [`config`] -- typed configuration with environment overrides
//! - [`error`] -- shared error types

pub mod catalog;
pub mod config;
pub mod driver;
pub mod error;
pub mod facade;
pub mod mapper;
pub mod models;
pub mod schema;
pub mod translate;

// Re-export primary types for convenience.
pub use catalog::{BatchReport, ColumnInfo, TableFailure, TableSchema};
pub use config::{ConfigError, DatabaseConfig, MssqlConfig, PostgresConfig, SqliteConfig};
pub use driver::{CliConnection, CliConnector, PoolStatus};
pub use error::{BoxError, DbError, ErrorKind};
pub use facade::{Database, Transaction};
pub use mapper::{Mapper, Order, SelectOptions, TableDef};
pub use schema::ensure_schema;
pub use sqlgate_types::{DialectKind, Params, Record, Value, params};
pub use translate::{Translated, TranslationError, translate};
