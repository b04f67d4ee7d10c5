//! Error types for the admin binary.
//!
//! [`AdminError`] wraps every failure `main` can report. Messages may echo
//! SQL or engine text, so they are shortened with [`AdminError::truncated`]
//! before printing.

use std::path::PathBuf;

use sqlgate_db::{ConfigError, DbError};

/// Longest error message printed, in characters.
pub const MAX_ERROR_CHARS: usize = 200;

/// Top-level error for the admin binary.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// The configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    ConfigRead {
        /// The file that was opened.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`crate::config::AdminConfig`].
    #[error("failed to parse config YAML: {source}")]
    ConfigYaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },

    /// Overrides or validation rejected the configuration.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A database operation failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying database error.
        #[from]
        source: DbError,
    },

    /// The command was refused before touching the database.
    #[error("{0}")]
    Rejected(String),

    /// Output could not be serialized.
    #[error("output error: {source}")]
    Render {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl AdminError {
    /// The message cut to [`MAX_ERROR_CHARS`] characters, with `...`
    /// appended when something was removed.
    pub fn truncated(&self) -> String {
        truncate(&self.to_string(), MAX_ERROR_CHARS)
    }
}

/// Cut `message` to `max` characters on a char boundary.
pub fn truncate(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", message.get(..cut).unwrap_or(message)),
        None => message.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_are_untouched() {
        assert_eq!(truncate("boom", 200), "boom");
        assert_eq!(truncate(&"x".repeat(200), 200), "x".repeat(200));
    }

    #[test]
    fn long_messages_keep_the_first_characters() {
        let cut = truncate(&"é".repeat(250), 200);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn admin_errors_truncate_their_display() {
        let err = AdminError::Rejected("y".repeat(500));
        assert_eq!(err.truncated().chars().count(), MAX_ERROR_CHARS + 3);
    }
}
