//! Single-table record mapper.
//!
//! A [`TableDef`] declares a table's name, primary key and columns once.
//! [`Mapper`] builds parameterized SELECT, INSERT, UPDATE and DELETE
//! statements from it and runs them through the [`Database`] facade.
//!
//! Every identifier in the generated SQL comes from the `TableDef`. Column
//! names supplied by callers are only used to look up the declared column
//! (ASCII case-insensitively); values are always bound as parameters.

use sqlgate_types::{DialectKind, Params, Record, Value};

use crate::error::DbError;
use crate::facade::Database;

/// Parameter name used for row limits.
const LIMIT_PARAM: &str = "_limit";

/// Static description of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: &'static str,
    /// Primary key column.
    pub primary_key: &'static str,
    /// All columns, primary key included.
    pub columns: &'static [&'static str],
}

impl TableDef {
    /// Declare a table.
    pub const fn new(
        name: &'static str,
        primary_key: &'static str,
        columns: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            primary_key,
            columns,
        }
    }

    /// The declared spelling of `column`, if the table has it.
    pub fn column(&self, column: &str) -> Option<&'static str> {
        self.columns
            .iter()
            .copied()
            .find(|declared| declared.eq_ignore_ascii_case(column))
    }

    /// A mapper for this table over `db`.
    pub const fn mapper<'db>(&'static self, db: &'db Database) -> Mapper<'db> {
        Mapper { db, table: self }
    }

    fn resolve(&self, column: &str) -> Result<&'static str, DbError> {
        self.column(column).ok_or_else(|| {
            DbError::Mapping(format!("table `{}` has no column `{column}`", self.name))
        })
    }

    /// Re-key `params` by declared column name.
    fn resolve_params(&self, params: &Params) -> Result<Vec<(&'static str, Value)>, DbError> {
        let mut resolved: Vec<(&'static str, Value)> = Vec::with_capacity(params.len());
        for (name, value) in params.iter() {
            let column = self.resolve(name)?;
            if resolved.iter().any(|(c, _)| *c == column) {
                return Err(DbError::Mapping(format!(
                    "column `{column}` given more than once"
                )));
            }
            resolved.push((column, value.clone()));
        }
        Ok(resolved)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Options for [`Mapper::select`].
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Equality filters, combined with AND.
    pub filters: Params,
    /// Columns to return; all when `None`.
    pub columns: Option<Vec<String>>,
    /// Maximum number of rows.
    pub limit: Option<u32>,
    /// Sort keys, applied in order.
    pub order_by: Vec<(String, Order)>,
}

impl SelectOptions {
    /// Options with the given filters and nothing else.
    pub fn filtered(filters: Params) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    /// Limit the number of rows.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add a sort key.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    /// Return only `columns`.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// A statement ready for the facade.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub(crate) sql: String,
    pub(crate) params: Params,
}

fn where_clause(filters: &[(&'static str, Value)], params: &mut Params) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = filters
        .iter()
        .map(|(column, value)| {
            params.insert(*column, value.clone());
            format!("{column} = :{column}")
        })
        .collect();
    format!(" WHERE {}", terms.join(" AND "))
}

pub(crate) fn build_select(
    table: &TableDef,
    dialect: DialectKind,
    options: &SelectOptions,
) -> Result<Statement, DbError> {
    let projection = match &options.columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|c| table.resolve(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", "),
        _ => "*".to_owned(),
    };

    let mut params = Params::new();
    let filters = table.resolve_params(&options.filters)?;
    let where_sql = where_clause(&filters, &mut params);

    let mut order_sql = String::new();
    for (i, (column, order)) in options.order_by.iter().enumerate() {
        order_sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
        order_sql.push_str(table.resolve(column)?);
        order_sql.push(' ');
        order_sql.push_str(order.keyword());
    }

    let top = match options.limit {
        Some(limit) => {
            params.insert(LIMIT_PARAM, i64::from(limit));
            dialect == DialectKind::ClientServerCli
        }
        None => false,
    };

    let sql = if top {
        format!(
            "SELECT TOP (:{LIMIT_PARAM}) {projection} FROM {}{where_sql}{order_sql}",
            table.name
        )
    } else if options.limit.is_some() {
        format!(
            "SELECT {projection} FROM {}{where_sql}{order_sql} LIMIT :{LIMIT_PARAM}",
            table.name
        )
    } else {
        format!("SELECT {projection} FROM {}{where_sql}{order_sql}", table.name)
    };
    Ok(Statement { sql, params })
}

pub(crate) fn build_insert(table: &TableDef, values: &Params) -> Result<Statement, DbError> {
    if values.is_empty() {
        return Err(DbError::Mapping(format!(
            "insert into `{}` needs at least one value",
            table.name
        )));
    }
    let values = table.resolve_params(values)?;
    let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
    let markers: Vec<String> = columns.iter().map(|c| format!(":{c}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        markers.join(", ")
    );
    Ok(Statement {
        sql,
        params: values.into_iter().collect(),
    })
}

pub(crate) fn build_update(
    table: &TableDef,
    filters: &Params,
    values: &Params,
) -> Result<Statement, DbError> {
    if values.is_empty() {
        return Err(DbError::Mapping(format!(
            "update of `{}` needs at least one value",
            table.name
        )));
    }
    if filters.is_empty() {
        return Err(DbError::Mapping(format!(
            "update of `{}` needs at least one filter",
            table.name
        )));
    }
    let values = table.resolve_params(values)?;
    let filters = table.resolve_params(filters)?;
    if let Some((column, _)) = filters
        .iter()
        .find(|(f, _)| values.iter().any(|(v, _)| v == f))
    {
        return Err(DbError::Mapping(format!(
            "column `{column}` is both filtered on and updated"
        )));
    }

    let mut params = Params::new();
    let assignments: Vec<String> = values
        .iter()
        .map(|(column, value)| {
            params.insert(*column, value.clone());
            format!("{column} = :{column}")
        })
        .collect();
    let where_sql = where_clause(&filters, &mut params);
    let sql = format!(
        "UPDATE {} SET {}{where_sql}",
        table.name,
        assignments.join(", ")
    );
    Ok(Statement { sql, params })
}

pub(crate) fn build_delete(table: &TableDef, filters: &Params) -> Result<Statement, DbError> {
    if filters.is_empty() {
        return Err(DbError::Mapping(format!(
            "delete from `{}` needs at least one filter",
            table.name
        )));
    }
    let filters = table.resolve_params(filters)?;
    let mut params = Params::new();
    let where_sql = where_clause(&filters, &mut params);
    Ok(Statement {
        sql: format!("DELETE FROM {}{where_sql}", table.name),
        params,
    })
}

/// Single-table access over a [`Database`].
#[derive(Clone, Copy)]
pub struct Mapper<'db> {
    db: &'db Database,
    table: &'static TableDef,
}

impl<'db> Mapper<'db> {
    /// A mapper for `table` over `db`.
    pub const fn new(db: &'db Database, table: &'static TableDef) -> Self {
        Self { db, table }
    }

    /// The mapped table.
    pub const fn table(&self) -> &'static TableDef {
        self.table
    }

    /// The underlying database.
    pub const fn database(&self) -> &'db Database {
        self.db
    }

    /// First row matching every filter.
    pub async fn get(&self, filters: &Params) -> Result<Option<Record>, DbError> {
        let options = SelectOptions::filtered(filters.clone()).limit(1);
        let stmt = build_select(self.table, self.db.dialect(), &options)?;
        self.db.fetchone(&stmt.sql, &stmt.params).await
    }

    /// Row whose primary key equals `value`.
    pub async fn get_by_pk(&self, value: impl Into<Value>) -> Result<Option<Record>, DbError> {
        let mut filters = Params::new();
        filters.insert(self.table.primary_key, value);
        self.get(&filters).await
    }

    /// Whether any row matches every filter.
    pub async fn exists(&self, filters: &Params) -> Result<bool, DbError> {
        let options = SelectOptions::filtered(filters.clone())
            .columns([self.table.primary_key])
            .limit(1);
        let stmt = build_select(self.table, self.db.dialect(), &options)?;
        Ok(self.db.fetchone(&stmt.sql, &stmt.params).await?.is_some())
    }

    /// Insert one row, returning the affected-row count.
    pub async fn insert(&self, values: &Params) -> Result<u64, DbError> {
        let stmt = build_insert(self.table, values)?;
        self.db.execute(&stmt.sql, &stmt.params).await
    }

    /// Update rows matching `filters`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Mapping`] without touching the engine if
    /// `filters` or `values` is empty, or if they share a column.
    pub async fn update(&self, filters: &Params, values: &Params) -> Result<u64, DbError> {
        let stmt = build_update(self.table, filters, values)?;
        self.db.execute(&stmt.sql, &stmt.params).await
    }

    /// Delete rows matching `filters`. Empty filters are rejected.
    pub async fn delete(&self, filters: &Params) -> Result<u64, DbError> {
        let stmt = build_delete(self.table, filters)?;
        self.db.execute(&stmt.sql, &stmt.params).await
    }

    /// Rows matching `options`.
    pub async fn select(&self, options: &SelectOptions) -> Result<Vec<Record>, DbError> {
        let stmt = build_select(self.table, self.db.dialect(), options)?;
        self.db.fetchall(&stmt.sql, &stmt.params).await
    }
}
