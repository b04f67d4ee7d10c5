//! Shared type definitions for the sqlgate data-access layer.
//!
//! Everything that crosses the facade boundary lives here so consumers never
//! see driver-specific types: bound parameter values, the uniform result
//! record, the named-parameter mapping and the dialect selector.
//!
//! # Modules
//!
//! - [`value`] -- Dynamically typed SQL values used for binding and results
//! - [`record`] -- Ordered column-name to value rows returned by every driver
//! - [`params`] -- Named-parameter mappings and the [`params!`] macro
//! - [`dialect`] -- The backend dialect selector

pub mod dialect;
pub mod params;
pub mod record;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use dialect::{DialectKind, ParseDialectError};
pub use params::Params;
pub use record::Record;
pub use value::Value;
