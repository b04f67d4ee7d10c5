//! Error types for the data layer.
//!
//! Every fallible operation returns [`DbError`]. Engine errors are carried
//! as their original error value (never flattened or swallowed) so that
//! privileged callers can inspect them; [`DbError::user_message`] gives the
//! generic text that is safe to show to everyone else.

use std::time::Duration;

use crate::config::ConfigError;
use crate::translate::TranslationError;

/// Boxed engine error, as produced by the ODBC layer or a test connector.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The named-parameter SQL could not be rewritten for the dialect.
    #[error("translation error: {0}")]
    Translation(#[from] TranslationError),

    /// A connection could not be established or acquired from the pool.
    #[error("connection error: {0}")]
    Connection(#[source] BoxError),

    /// The engine rejected the statement or a row could not be decoded.
    #[error("query error: {0}")]
    Query(#[source] BoxError),

    /// The statement did not complete within the configured deadline.
    #[error("query timed out after {}ms", .after.as_millis())]
    Timeout {
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// The data layer is configured with the disabled dialect.
    #[error("database is disabled (dialect `none`)")]
    BackendDisabled,

    /// Catalog lookup returned something unusable (unknown table, missing
    /// catalog column).
    #[error("schema introspection error: {0}")]
    SchemaIntrospection(String),

    /// The record mapper refused to build a statement.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed named-parameter usage.
    Translation,
    /// Cannot acquire or establish a connection.
    Connection,
    /// Engine rejected the statement, or it timed out.
    Query,
    /// Disabled dialect.
    BackendDisabled,
    /// Catalog lookup failure.
    SchemaIntrospection,
    /// Mapper precondition violated.
    Mapping,
    /// Invalid configuration.
    Config,
}

impl DbError {
    /// Build a [`DbError::Connection`] from a message.
    pub fn connection(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Connection(message.into())
    }

    /// Build a [`DbError::Query`] from a message.
    pub fn query(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Query(message.into())
    }

    /// Classify the error. Timeouts count as query errors.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Translation(_) => ErrorKind::Translation,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Query(_) | Self::Timeout { .. } => ErrorKind::Query,
            Self::BackendDisabled => ErrorKind::BackendDisabled,
            Self::SchemaIntrospection(_) => ErrorKind::SchemaIntrospection,
            Self::Mapping(_) => ErrorKind::Mapping,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Generic failure text for non-privileged users.
    ///
    /// Never contains engine error text, SQL or table names.
    pub const fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::BackendDisabled => "This feature is unavailable right now.",
            ErrorKind::Connection => "The service is temporarily unavailable. Please try again later.",
            ErrorKind::Translation
            | ErrorKind::Query
            | ErrorKind::SchemaIntrospection
            | ErrorKind::Mapping
            | ErrorKind::Config => "The operation could not be completed.",
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(_)
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection(Box::new(err)),
            _ => Self::Query(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_connection_errors() {
        assert_eq!(
            DbError::from(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            DbError::from(sqlx::Error::RowNotFound).kind(),
            ErrorKind::Query
        );
    }

    #[test]
    fn timeout_is_a_query_error() {
        let err = DbError::Timeout {
            after: Duration::from_secs(3),
        };
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(err.to_string(), "query timed out after 3000ms");
    }

    #[test]
    fn user_message_hides_engine_text() {
        let err = DbError::query("relation \"secret_table\" does not exist");
        assert!(!err.user_message().contains("secret_table"));
        assert_eq!(
            DbError::BackendDisabled.user_message(),
            "This feature is unavailable right now."
        );
    }
}
