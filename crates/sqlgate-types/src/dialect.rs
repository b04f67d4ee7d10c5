//! Backend dialect selector.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// The SQL backend a data layer instance talks to.
///
/// Chosen once when the facade is constructed and never changed afterwards.
/// The serialized tags (`sqlite`, `postgres`, `mssql`, `none`) are the ones
/// used in configuration files and the `DB_TYPE` environment variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialectKind {
    /// Embedded single-file engine (`SQLite`), `?N` placeholders.
    #[default]
    #[serde(rename = "sqlite", alias = "embedded", alias = "embedded_file")]
    EmbeddedFile,
    /// Client-server engine with `$N` placeholders (`PostgreSQL`).
    #[serde(rename = "postgres", alias = "postgresql", alias = "pg")]
    ClientServerDollar,
    /// Client-server engine reached through ODBC (SQL Server), `?` placeholders.
    #[serde(rename = "mssql", alias = "odbc", alias = "cli")]
    ClientServerCli,
    /// No backend; every operation fails fast.
    #[serde(rename = "none", alias = "disabled")]
    Disabled,
}

impl DialectKind {
    /// Every dialect, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::EmbeddedFile,
        Self::ClientServerDollar,
        Self::ClientServerCli,
        Self::Disabled,
    ];

    /// Canonical configuration tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::EmbeddedFile => "sqlite",
            Self::ClientServerDollar => "postgres",
            Self::ClientServerCli => "mssql",
            Self::Disabled => "none",
        }
    }

    /// Whether this is the no-op dialect.
    pub const fn is_disabled(self) -> bool {
        matches!(self, Self::Disabled)
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A dialect tag that does not name any supported backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown database dialect: {0:?} (expected sqlite, postgres, mssql or none)")]
pub struct ParseDialectError(pub String);

impl FromStr for DialectKind {
    type Err = ParseDialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "embedded" | "embedded_file" => Ok(Self::EmbeddedFile),
            "postgres" | "postgresql" | "pg" => Ok(Self::ClientServerDollar),
            "mssql" | "odbc" | "cli" => Ok(Self::ClientServerCli),
            "none" | "disabled" => Ok(Self::Disabled),
            _ => Err(ParseDialectError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_from_str() {
        for kind in DialectKind::ALL {
            assert_eq!(kind.tag().parse::<DialectKind>(), Ok(kind));
        }
    }

    #[test]
    fn parsing_is_case_insensitive_and_accepts_aliases() {
        assert_eq!("PostgreSQL".parse(), Ok(DialectKind::ClientServerDollar));
        assert_eq!(" odbc ".parse(), Ok(DialectKind::ClientServerCli));
        assert_eq!("disabled".parse(), Ok(DialectKind::Disabled));
        assert!("oracle".parse::<DialectKind>().is_err());
    }

    #[test]
    fn deserializes_from_config_tag() {
        let kind: DialectKind = serde_json::from_str(r#""pg""#).unwrap_or_default();
        assert_eq!(kind, DialectKind::ClientServerDollar);
    }
}
