//! SQLite connection provider.
//!
//! One shared `rusqlite` connection behind a mutex; every statement runs on
//! the blocking pool so async callers never stall the runtime.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::dialect::Engine;
use crate::error::{TableError, TableResult};
use crate::provider::{ConnectionProvider, Session};
use crate::statement::Statement;
use crate::value::{Row, Value};

/// SQLite provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// How long a statement waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl SqliteConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    pub fn validate(&self) -> TableResult<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(TableError::invalid("db_path must not be empty"));
        }
        Ok(())
    }
}

/// [`ConnectionProvider`] over a single SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteProvider {
    /// Open (or create) the database file named by `config`.
    pub fn open(config: &SqliteConfig) -> TableResult<Self> {
        config.validate()?;
        let started_at = Instant::now();
        let connection = Connection::open(&config.db_path)
            .and_then(|conn| configure(conn, config.busy_timeout_ms))
            .map_err(|err| {
                error!(
                    mode = "file",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "sqlite open failed"
                );
                TableError::Connection(err.to_string())
            })?;
        info!(
            mode = "file",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "sqlite database opened"
        );
        Ok(Self::from_connection(connection))
    }

    pub fn open_in_memory() -> TableResult<Self> {
        let connection = Connection::open_in_memory()
            .and_then(|conn| configure(conn, default_busy_timeout_ms()))
            .map_err(|err| TableError::Connection(err.to_string()))?;
        info!(mode = "memory", "sqlite database opened");
        Ok(Self::from_connection(connection))
    }

    /// Wrap a connection the host has already configured.
    pub fn from_connection(connection: Connection) -> Self {
        Self {
            connection: Arc::new(Mutex::new(connection)),
        }
    }
}

/// Session settings shared by every connection this module opens.
fn configure(conn: Connection, busy_timeout_ms: u64) -> rusqlite::Result<Connection> {
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

#[async_trait]
impl ConnectionProvider for SqliteProvider {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn acquire(&self) -> TableResult<Box<dyn Session>> {
        Ok(Box::new(SqliteSession {
            connection: Arc::clone(&self.connection),
        }))
    }
}

struct SqliteSession {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteSession {
    async fn run<T, F>(&self, statement: &Statement, work: F) -> TableResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &Statement) -> rusqlite::Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        let statement = statement.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connection
                .lock()
                .map_err(|_| TableError::Connection("sqlite connection poisoned".to_string()))?;
            work(&*conn, &statement).map_err(classify)
        })
        .await?
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn query(&mut self, statement: &Statement) -> TableResult<Vec<Row>> {
        self.run(statement, |conn, statement| {
            let mut stmt = conn.prepare(&statement.sql)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
            let mut result = Vec::new();
            while let Some(row) = rows.next()? {
                let mut columns = Vec::with_capacity(names.len());
                for (index, name) in names.iter().enumerate() {
                    columns.push((name.clone(), from_sql(row.get_ref(index)?)));
                }
                result.push(Row::from_columns(columns));
            }
            Ok(result)
        })
        .await
    }

    async fn execute(&mut self, statement: &Statement) -> TableResult<u64> {
        self.run(statement, |conn, statement| {
            let affected = conn.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
            Ok(affected as u64)
        })
        .await
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Boolean(value) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*value))),
            Value::Integer(value) => ToSqlOutput::Owned(SqlValue::Integer(*value)),
            Value::Real(value) => ToSqlOutput::Owned(SqlValue::Real(*value)),
            Value::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Value::Timestamp(value) => ToSqlOutput::Owned(SqlValue::Text(value.to_rfc3339())),
            Value::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
        })
    }
}

/// SQLite has five storage classes; booleans and timestamps come back as
/// integers and text. TEXT holding invalid UTF-8 comes back unchanged as a blob.
fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::Blob(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

fn classify(err: rusqlite::Error) -> TableError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.clone().unwrap_or_else(|| err.to_string());
            if failure.code == ErrorCode::ConstraintViolation {
                TableError::Conflict(message)
            } else if message.contains("no such table") || message.contains("unknown database") {
                TableError::NotFound(message)
            } else if message.contains("no such column") || message.contains("has no column named")
            {
                TableError::InvalidArgument(message)
            } else {
                TableError::Connection(message)
            }
        }
        _ => TableError::Connection(err.to_string()),
    }
}
