//! PostgreSQL connection provider (feature `postgres`).
//!
//! Pooled synchronous clients driven from the blocking pool. Parameters are
//! encoded against the prepared statement's declared types, so a text key
//! such as `"1"` binds against an `integer` column the way the other engines
//! coerce it.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::error::SqlState;
use postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use postgres::{Client, NoTls};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use tracing::info;

use crate::dialect::Engine;
use crate::error::{TableError, TableResult};
use crate::provider::{ConnectionProvider, Session};
use crate::statement::Statement;
use crate::value::{Row, Value};

type Manager = PostgresConnectionManager<NoTls>;
type BoxError = Box<dyn StdError + Sync + Send>;

/// Postgres provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PostgresConfig {
    /// Postgres connection string. Never logged.
    pub connection: String,
    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Statement timeout in milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    16
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

impl PostgresConfig {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }

    pub fn validate(&self) -> TableResult<()> {
        if self.connection.trim().is_empty() {
            return Err(TableError::invalid("postgres connection string must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(TableError::invalid("max_connections must be greater than zero"));
        }
        Ok(())
    }
}

/// [`ConnectionProvider`] backed by an r2d2 pool of `postgres` clients.
pub struct PostgresProvider {
    pool: Option<Pool<Manager>>,
}

impl Drop for PostgresProvider {
    fn drop(&mut self) {
        // r2d2 joins its reaper on drop; keep that off async worker threads.
        if let Some(pool) = self.pool.take() {
            let _ = std::thread::spawn(move || drop(pool));
        }
    }
}

impl PostgresProvider {
    /// Build the pool. Blocks while the initial connections are established.
    pub fn connect(config: &PostgresConfig) -> TableResult<Self> {
        config.validate()?;
        let mut pg_config = config
            .connection
            .parse::<postgres::Config>()
            .map_err(|err| {
                TableError::invalid(format!("invalid postgres connection string: {err}"))
            })?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        let options = format!("-c statement_timeout={}", config.statement_timeout_ms);
        pg_config.options(&options);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(PostgresConnectionManager::new(pg_config, NoTls))
            .map_err(|err| TableError::Connection(err.to_string()))?;
        info!(max_connections = config.max_connections, "postgres pool ready");
        Ok(Self { pool: Some(pool) })
    }
}

#[async_trait]
impl ConnectionProvider for PostgresProvider {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn acquire(&self) -> TableResult<Box<dyn Session>> {
        let pool = self
            .pool
            .clone()
            .ok_or_else(|| TableError::Connection("postgres provider closed".to_string()))?;
        let client = tokio::task::spawn_blocking(move || pool.get())
            .await?
            .map_err(|err| TableError::Connection(err.to_string()))?;
        Ok(Box::new(PostgresSession {
            client: Some(client),
        }))
    }
}

struct PostgresSession {
    client: Option<PooledConnection<Manager>>,
}

impl PostgresSession {
    async fn run<T, F>(&mut self, statement: &Statement, work: F) -> TableResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Client, &Statement) -> TableResult<T> + Send + 'static,
    {
        let mut client = self.client.take().ok_or_else(|| {
            TableError::Connection("postgres session is no longer usable".to_string())
        })?;
        let statement = statement.clone();
        let (client, result) = tokio::task::spawn_blocking(move || {
            let result = work(&mut *client, &statement);
            (client, result)
        })
        .await?;
        self.client = Some(client);
        result
    }
}

#[async_trait]
impl Session for PostgresSession {
    async fn query(&mut self, statement: &Statement) -> TableResult<Vec<Row>> {
        self.run(statement, |client, statement| {
            let prepared = client.prepare(&statement.sql).map_err(classify)?;
            let params = bind(statement, prepared.params())?;
            let rows = client
                .query(&prepared, &param_refs(&params))
                .map_err(classify)?;
            rows.iter()
                .map(|row| {
                    let columns = row
                        .columns()
                        .iter()
                        .enumerate()
                        .map(|(index, column)| {
                            let value = read_column(row, index, column.type_(), column.name())?;
                            Ok((column.name().to_string(), value))
                        })
                        .collect::<TableResult<Vec<_>>>()?;
                    Ok(Row::from_columns(columns))
                })
                .collect()
        })
        .await
    }

    async fn execute(&mut self, statement: &Statement) -> TableResult<u64> {
        self.run(statement, |client, statement| {
            let prepared = client.prepare(&statement.sql).map_err(classify)?;
            let params = bind(statement, prepared.params())?;
            client
                .execute(&prepared, &param_refs(&params))
                .map_err(classify)
        })
        .await
    }
}

/// A dynamic value encoded against the server-declared parameter type.
#[derive(Debug)]
struct PgParam(Value);

/// Every parameter is encoded once here so a value that cannot be bound is
/// rejected before anything is sent to the server.
fn bind(statement: &Statement, types: &[Type]) -> TableResult<Vec<PgParam>> {
    if types.len() != statement.params.len() {
        return Err(TableError::invalid(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            statement.params.len()
        )));
    }
    let mut scratch = BytesMut::new();
    statement
        .params
        .iter()
        .zip(types)
        .enumerate()
        .map(|(index, (value, ty))| {
            let param = PgParam(value.clone());
            if !PgParam::accepts(ty) {
                return Err(TableError::invalid(format!(
                    "parameter {} has unsupported postgres type `{ty}`",
                    index + 1
                )));
            }
            scratch.clear();
            param.to_sql(ty, &mut scratch).map_err(|err| {
                TableError::invalid(format!(
                    "parameter {} ({}) cannot be bound as `{ty}`: {err}",
                    index + 1,
                    value.type_name()
                ))
            })?;
            Ok(param)
        })
        .collect()
}

fn param_refs(params: &[PgParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|param| param as &(dyn ToSql + Sync)).collect()
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match &self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Boolean(value) if *ty == Type::BOOL => value.to_sql(ty, out),
            Value::Boolean(value) if is_json(ty) => encode_text(&value.to_string(), ty, out),
            Value::Boolean(value) => encode_integer(i64::from(*value), ty, out),
            Value::Integer(value) => encode_integer(*value, ty, out),
            Value::Real(value) => match *ty {
                Type::FLOAT4 => (*value as f32).to_sql(ty, out),
                Type::FLOAT8 => value.to_sql(ty, out),
                _ => encode_text(&value.to_string(), ty, out),
            },
            Value::Text(value) => encode_text(value, ty, out),
            Value::Timestamp(value) => match *ty {
                Type::TIMESTAMPTZ => value.to_sql(ty, out),
                Type::TIMESTAMP => value.naive_utc().to_sql(ty, out),
                Type::DATE => value.date_naive().to_sql(ty, out),
                Type::TIME => value.naive_utc().time().to_sql(ty, out),
                _ => encode_text(&value.to_rfc3339(), ty, out),
            },
            Value::Blob(value) if *ty == Type::BYTEA => value.as_slice().to_sql(ty, out),
            Value::Blob(_) => Err(format!("binary data cannot be bound as `{ty}`").into()),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::BOOL
                | Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::OID
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::NUMERIC
                | Type::BYTEA
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::TIME
                | Type::UUID
                | Type::JSON
                | Type::JSONB
        ) || is_enum(ty)
            || <String as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn is_enum(ty: &Type) -> bool {
    matches!(ty.kind(), Kind::Enum(_))
}

fn encode_integer(value: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::INT8 => value.to_sql(ty, out),
        Type::OID => u32::try_from(value)?.to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(value).to_sql(ty, out),
        Type::BOOL => (value != 0).to_sql(ty, out),
        _ => encode_text(&value.to_string(), ty, out),
    }
}

fn encode_text(value: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    let trimmed = value.trim();
    match *ty {
        Type::INT2 => trimmed.parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => trimmed.parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => trimmed.parse::<i64>()?.to_sql(ty, out),
        Type::OID => trimmed.parse::<u32>()?.to_sql(ty, out),
        Type::FLOAT4 => trimmed.parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => trimmed.parse::<f64>()?.to_sql(ty, out),
        Type::NUMERIC => trimmed.parse::<Decimal>()?.to_sql(ty, out),
        Type::BOOL => trimmed.parse::<bool>()?.to_sql(ty, out),
        Type::TIMESTAMPTZ => trimmed.parse::<DateTime<Utc>>()?.to_sql(ty, out),
        Type::TIMESTAMP => parse_naive_datetime(trimmed)?.to_sql(ty, out),
        Type::DATE => trimmed.parse::<NaiveDate>()?.to_sql(ty, out),
        Type::TIME => trimmed.parse::<NaiveTime>()?.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(trimmed)?.to_sql(ty, out),
        // Plain text that is not a JSON document is stored as a JSON string.
        Type::JSON | Type::JSONB => serde_json::from_str::<JsonValue>(value)
            .unwrap_or_else(|_| JsonValue::String(value.to_string()))
            .to_sql(ty, out),
        Type::BYTEA => Err("text cannot be bound as `bytea`".into()),
        // Text-like and enum types share the text wire format.
        _ if <String as ToSql>::accepts(ty) || is_enum(ty) => {
            out.extend_from_slice(value.as_bytes());
            Ok(IsNull::No)
        }
        _ => Err(format!("text cannot be bound as `{ty}`").into()),
    }
}

fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime, BoxError> {
    if let Ok(parsed) = value.parse::<NaiveDateTime>() {
        return Ok(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(parsed);
    }
    Ok(value.parse::<DateTime<Utc>>()?.naive_utc())
}

/// Binary `interval`: microseconds, days, months.
struct PgInterval {
    micros: i64,
    days: i32,
    months: i32,
}

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() != 16 {
            return Err(format!("interval payload has {} bytes, expected 16", raw.len()).into());
        }
        Ok(Self {
            micros: i64::from_be_bytes(raw[0..8].try_into()?),
            days: i32::from_be_bytes(raw[8..12].try_into()?),
            months: i32::from_be_bytes(raw[12..16].try_into()?),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

impl PgInterval {
    /// ISO 8601 duration, which postgres also accepts as input.
    fn to_iso8601(&self) -> String {
        let mut out = String::from("P");
        let (years, months) = (self.months / 12, self.months % 12);
        if years != 0 {
            out.push_str(&format!("{years}Y"));
        }
        if months != 0 {
            out.push_str(&format!("{months}M"));
        }
        if self.days != 0 {
            out.push_str(&format!("{}D", self.days));
        }
        let hours = self.micros / 3_600_000_000;
        let minutes = (self.micros % 3_600_000_000) / 60_000_000;
        let micros = self.micros % 60_000_000;
        if hours != 0 || minutes != 0 || micros != 0 || out.len() == 1 {
            out.push('T');
            if hours != 0 {
                out.push_str(&format!("{hours}H"));
            }
            if minutes != 0 {
                out.push_str(&format!("{minutes}M"));
            }
            if micros != 0 || out.ends_with('T') {
                let seconds = micros / 1_000_000;
                let fraction = (micros % 1_000_000).abs();
                if fraction == 0 {
                    out.push_str(&format!("{seconds}S"));
                } else {
                    let sign = if micros < 0 && seconds == 0 { "-" } else { "" };
                    let fraction = format!("{fraction:06}");
                    out.push_str(&format!(
                        "{sign}{seconds}.{}S",
                        fraction.trim_end_matches('0')
                    ));
                }
            }
        }
        out
    }
}

/// Enum labels travel as their UTF-8 text in both wire formats.
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        is_enum(ty)
    }
}

/// Types without a native [`Value`] counterpart (numeric, uuid, json,
/// time, interval, enums) come back as their canonical text.
fn read_column(row: &postgres::Row, index: usize, ty: &Type, name: &str) -> TableResult<Value> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(index).map(Value::from),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .map(|v| Value::from(v.map(i64::from))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .map(|v| Value::from(v.map(i64::from))),
        Type::INT8 => row.try_get::<_, Option<i64>>(index).map(Value::from),
        Type::OID => row
            .try_get::<_, Option<u32>>(index)
            .map(|v| Value::from(v.map(i64::from))),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)
            .map(|v| Value::from(v.map(f64::from))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(index).map(Value::from),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(index)
            .map(|v| Value::from(v.map(|decimal| decimal.to_string()))),
        Type::TIMESTAMPTZ => row.try_get::<_, Option<DateTime<Utc>>>(index).map(Value::from),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map(|v| Value::from(v.map(|naive| naive.and_utc()))),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(index)
            .map(|v| Value::from(v.map(|date| date.to_string()))),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(index)
            .map(|v| Value::from(v.map(|time| time.to_string()))),
        Type::INTERVAL => row
            .try_get::<_, Option<PgInterval>>(index)
            .map(|v| Value::from(v.map(|interval| interval.to_iso8601()))),
        Type::UUID => row
            .try_get::<_, Option<Uuid>>(index)
            .map(|v| Value::from(v.map(|uuid| uuid.to_string()))),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<JsonValue>>(index)
            .map(|v| Value::from(v.map(|json| json.to_string()))),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(index).map(Value::from),
        _ if is_enum(ty) => row
            .try_get::<_, Option<EnumLabel>>(index)
            .map(|v| Value::from(v.map(|label| label.0))),
        _ if <String as FromSql<'_>>::accepts(ty) => {
            row.try_get::<_, Option<String>>(index).map(Value::from)
        }
        _ => {
            return Err(TableError::UnsupportedOperation(format!(
                "column `{name}` has unsupported postgres type `{ty}`"
            )))
        }
    };
    value.map_err(|err| {
        TableError::UnsupportedOperation(format!(
            "column `{name}` of type `{ty}` could not be decoded: {err}"
        ))
    })
}

fn classify(err: postgres::Error) -> TableError {
    let message = err
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string());
    match err.code() {
        Some(code) if code.code().starts_with("23") => TableError::Conflict(message),
        Some(code)
            if *code == SqlState::UNDEFINED_TABLE || *code == SqlState::INVALID_SCHEMA_NAME =>
        {
            TableError::NotFound(message)
        }
        Some(code) if *code == SqlState::UNDEFINED_COLUMN => TableError::InvalidArgument(message),
        Some(code) if *code == SqlState::INVALID_TEXT_REPRESENTATION => {
            TableError::InvalidArgument(message)
        }
        Some(code) if *code == SqlState::QUERY_CANCELED => TableError::Cancelled,
        _ => TableError::Connection(message),
    }
}
