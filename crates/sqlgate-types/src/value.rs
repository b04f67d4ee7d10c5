//! Dynamically typed SQL values.
//!
//! [`Value`] is the single currency for both directions of the data layer:
//! callers bind parameters as values, and every driver decodes result
//! columns into values before rows reach the facade.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A single SQL value, independent of the backend that produced or
/// consumes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    #[default]
    Null,
    /// Boolean (`BOOLEAN`, `BIT`).
    Bool(bool),
    /// Signed 64-bit integer (all integer widths widen to this).
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Text of any character type.
    Text(String),
    /// Raw bytes (`BLOB`, `BYTEA`, `VARBINARY`).
    Bytes(Vec<u8>),
}

impl Value {
    /// Whether this value is SQL `NULL`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view of the value. Booleans map to `0`/`1`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Boolean view of the value.
    ///
    /// Engines without a native boolean type (`SQLite`, ODBC text results)
    /// hand back integers or `"0"`/`"1"` strings; those are accepted too.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Text(s) => match s.trim() {
                "1" | "true" | "TRUE" | "t" => Some(true),
                "0" | "false" | "FALSE" | "f" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Float view of the value. Integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String slice view of a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Generates lossless `From` conversions into a [`Value`] variant.
macro_rules! impl_from {
    ($variant:ident: $($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )+
    };
}

impl_from!(Bool: bool);
impl_from!(Int: i8, i16, i32, i64, u8, u16, u32);
impl_from!(Float: f32, f64);
impl_from!(Text: String, &str, &String);
impl_from!(Bytes: Vec<u8>, &[u8]);

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_none_is_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_owned()));
    }

    #[test]
    fn bool_views_accept_engine_encodings() {
        assert_eq!(Value::Int(1).as_bool(), Some(true));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::Text("1".to_owned()).as_bool(), Some(true));
        assert_eq!(Value::Text("maybe".to_owned()).as_bool(), None);
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn serializes_untagged() {
        let json = serde_json::to_string(&vec![
            Value::Null,
            Value::Int(7),
            Value::Text("a".to_owned()),
        ])
        .unwrap_or_default();
        assert_eq!(json, r#"[null,7,"a"]"#);
    }
}
