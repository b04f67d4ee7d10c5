//! Output rendering.
//!
//! Result columns are only known at run time, so grids are assembled with
//! tabled's [`Builder`] rather than `#[derive(Tabled)]`.

use clap::ValueEnum;
use serde::Serialize;
use sqlgate_types::Record;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::error::AdminError;

/// How command output is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Bordered table.
    #[default]
    Table,
    /// Markdown table.
    Markdown,
    /// Pretty-printed JSON document.
    Json,
    /// One compact JSON object per line.
    JsonLine,
}

impl OutputFormat {
    /// Whether this is one of the JSON variants.
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::JsonLine)
    }
}

/// Render `rows` under `header` as a grid. Only meaningful for the table
/// formats; JSON callers serialize their own values.
pub fn grid<I, R, C>(header: I, rows: R, format: OutputFormat) -> String
where
    I: IntoIterator<Item = C>,
    R: IntoIterator<Item = Vec<String>>,
    C: Into<String>,
{
    let mut builder = Builder::default();
    builder.push_record(header.into_iter().map(Into::into));
    for row in rows {
        builder.push_record(row);
    }
    let mut table = builder.build();
    if format == OutputFormat::Markdown {
        table.with(Style::markdown());
    } else {
        table.with(Style::rounded());
    }
    table.to_string()
}

/// Render query results. Column names come from the first row.
pub fn records(rows: &[Record], format: OutputFormat) -> Result<String, AdminError> {
    if format.is_json() {
        return json(rows, format);
    }
    let header: Vec<String> = rows
        .first()
        .map(|row| row.columns().map(str::to_owned).collect())
        .unwrap_or_default();
    let body = rows
        .iter()
        .map(|row| row.values().map(ToString::to_string).collect());
    Ok(grid(header, body, format))
}

/// Serialize `value` for a JSON format. A sequence in `json-line` mode
/// prints one element per line.
pub fn json<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String, AdminError> {
    if format != OutputFormat::JsonLine {
        return Ok(serde_json::to_string_pretty(value)?);
    }
    match serde_json::to_value(value)? {
        serde_json::Value::Array(items) => {
            let lines = items
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(lines.join("\n"))
        }
        other => Ok(serde_json::to_string(&other)?),
    }
}
