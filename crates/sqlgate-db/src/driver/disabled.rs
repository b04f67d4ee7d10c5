//! The `none` dialect: no backend, every data operation fails fast.

use sqlgate_types::{Record, Value};

use crate::error::DbError;

/// Driver that performs no I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledDriver;

impl DisabledDriver {
    /// Nothing to open.
    #[allow(clippy::unused_self)]
    pub const fn init(self) -> Result<(), DbError> {
        Ok(())
    }

    /// Always [`DbError::BackendDisabled`].
    #[allow(clippy::unused_self)]
    pub const fn execute(self, _sql: &str, _args: &[Value]) -> Result<u64, DbError> {
        Err(DbError::BackendDisabled)
    }

    /// Always [`DbError::BackendDisabled`].
    #[allow(clippy::unused_self)]
    pub const fn fetchone(self, _sql: &str, _args: &[Value]) -> Result<Option<Record>, DbError> {
        Err(DbError::BackendDisabled)
    }

    /// Always [`DbError::BackendDisabled`].
    #[allow(clippy::unused_self)]
    pub const fn fetchall(self, _sql: &str, _args: &[Value]) -> Result<Vec<Record>, DbError> {
        Err(DbError::BackendDisabled)
    }

    /// The error a transaction request yields.
    #[allow(clippy::unused_self)]
    pub const fn transaction(self) -> DbError {
        DbError::BackendDisabled
    }
}
