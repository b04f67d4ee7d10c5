//! ODBC connector for the call-level-interface dialect (SQL Server).
//!
//! Built only with the `odbc` feature, since it links the system driver
//! manager. Connections are blocking and are driven from
//! [`CliDriver`](super::CliDriver) on blocking worker threads.

use std::sync::OnceLock;
use std::time::Duration;

use odbc_api::buffers::TextRowSet;
use odbc_api::parameter::InputParameter;
use odbc_api::{Bit, Connection, ConnectionOptions, Cursor, DataType, Environment, IntoParameter};
use sqlgate_types::{Record, Value};

use super::cli::{CliConnection, CliConnector};
use crate::error::BoxError;

/// Rows fetched per round trip.
const BATCH_SIZE: usize = 256;

/// Upper bound on a single text cell, in bytes.
const MAX_TEXT_LEN: usize = 8192;

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

fn environment() -> Result<&'static Environment, BoxError> {
    if let Some(env) = ENVIRONMENT.get() {
        return Ok(env);
    }
    let env = Environment::new()?;
    Ok(ENVIRONMENT.get_or_init(|| env))
}

/// Opens ODBC connections from a connection string.
pub struct OdbcConnector {
    connection_string: String,
    login_timeout: Duration,
}

impl OdbcConnector {
    /// Create a connector for `connection_string`. Logins give up after
    /// `login_timeout`.
    pub const fn new(connection_string: String, login_timeout: Duration) -> Self {
        Self {
            connection_string,
            login_timeout,
        }
    }
}

impl CliConnector for OdbcConnector {
    fn connect(&self) -> Result<Box<dyn CliConnection>, BoxError> {
        let login_timeout_sec = u32::try_from(self.login_timeout.as_secs()).unwrap_or(u32::MAX);
        let options = ConnectionOptions {
            login_timeout_sec: Some(login_timeout_sec),
        };
        let conn = environment()?.connect_with_connection_string(&self.connection_string, options)?;
        Ok(Box::new(OdbcConnection {
            conn,
            lock_timeout: None,
        }))
    }
}

struct OdbcConnection {
    conn: Connection<'static>,
    /// Lock timeout last set on the session.
    lock_timeout: Option<Duration>,
}

impl OdbcConnection {
    /// Make the server give up waiting on locks after `timeout`. Only
    /// issued when the timeout differs from the one already in effect.
    fn apply_timeout(&mut self, timeout: Duration) -> Result<(), BoxError> {
        if self.lock_timeout == Some(timeout) {
            return Ok(());
        }
        self.conn.execute(&lock_timeout_statement(timeout), ())?;
        self.lock_timeout = Some(timeout);
        Ok(())
    }
}

fn lock_timeout_statement(timeout: Duration) -> String {
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    format!("SET LOCK_TIMEOUT {millis}")
}

fn parameters(args: &[Value]) -> Vec<Box<dyn InputParameter>> {
    args.iter()
        .map(|arg| -> Box<dyn InputParameter> {
            match arg {
                Value::Null => Box::new(None::<String>.into_parameter()),
                Value::Bool(b) => Box::new(Bit::from_bool(*b)),
                Value::Int(i) => Box::new(*i),
                Value::Float(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.clone().into_parameter()),
                Value::Bytes(b) => Box::new(b.clone().into_parameter()),
            }
        })
        .collect()
}

/// Convert one text cell using the column's reported type.
fn cell_value(text: Option<&str>, data_type: DataType) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    match data_type {
        DataType::Bit => Value::Bool(text == "1"),
        DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt => text
            .parse()
            .map_or_else(|_| Value::Text(text.to_owned()), Value::Int),
        DataType::Real | DataType::Float { .. } | DataType::Double => text
            .parse()
            .map_or_else(|_| Value::Text(text.to_owned()), Value::Float),
        _ => Value::Text(text.to_owned()),
    }
}

fn read_rows(mut cursor: impl Cursor, limit: Option<usize>) -> Result<Vec<Record>, BoxError> {
    let names = cursor.column_names()?.collect::<Result<Vec<String>, _>>()?;
    let mut types = Vec::with_capacity(names.len());
    for index in 1..=names.len() {
        types.push(cursor.col_data_type(u16::try_from(index)?)?);
    }

    let batch_size = limit.map_or(BATCH_SIZE, |l| l.clamp(1, BATCH_SIZE));
    let buffer = TextRowSet::for_cursor(batch_size, &mut cursor, Some(MAX_TEXT_LEN))?;
    let mut row_set = cursor.bind_buffer(buffer)?;

    let mut records = Vec::new();
    while let Some(batch) = row_set.fetch()? {
        for row in 0..batch.num_rows() {
            if limit.is_some_and(|l| records.len() >= l) {
                return Ok(records);
            }
            let mut record = Record::with_capacity(names.len());
            for (col, (name, data_type)) in names.iter().zip(&types).enumerate() {
                let text = batch.at_as_str(col, row)?;
                record.push(name.as_str(), cell_value(text, *data_type));
            }
            records.push(record);
        }
    }
    Ok(records)
}

impl CliConnection for OdbcConnection {
    fn execute(&mut self, sql: &str, args: &[Value], timeout: Duration) -> Result<u64, BoxError> {
        self.apply_timeout(timeout)?;
        let params = parameters(args);
        let mut statement = self.conn.preallocate()?;
        statement.execute(sql, params.as_slice())?;
        let count = statement.row_count()?.unwrap_or(0);
        Ok(u64::try_from(count)?)
    }

    fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        timeout: Duration,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, BoxError> {
        self.apply_timeout(timeout)?;
        let params = parameters(args);
        match self.conn.execute(sql, params.as_slice())? {
            Some(cursor) => read_rows(cursor, limit),
            None => Ok(Vec::new()),
        }
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<(), BoxError> {
        Ok(self.conn.set_autocommit(enabled)?)
    }

    fn commit(&mut self) -> Result<(), BoxError> {
        Ok(self.conn.commit()?)
    }

    fn rollback(&mut self) -> Result<(), BoxError> {
        Ok(self.conn.rollback()?)
    }
}
