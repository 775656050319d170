//! Uniform connection diagnostics across engines.
//!
//! Each engine runs one metadata query whose columns are aliased to the
//! shared labels below; the per-engine normalizer then copies only
//! whitelisted columns into [`DiagnosticInfo`]. Anything else the engine
//! returns is dropped, which keeps credentials and connection strings out.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::dialect::Engine;
use crate::value::{Row, Value};

/// Stable diagnostic vocabulary. Additive only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKey {
    Provider,
    Database,
    Version,
    Host,
    Port,
    StartTime,
    ConnectedUser,
    SessionId,
}

impl DiagnosticKey {
    pub const ALL: [DiagnosticKey; 8] = [
        DiagnosticKey::Provider,
        DiagnosticKey::Database,
        DiagnosticKey::Version,
        DiagnosticKey::Host,
        DiagnosticKey::Port,
        DiagnosticKey::StartTime,
        DiagnosticKey::ConnectedUser,
        DiagnosticKey::SessionId,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKey::Provider => "provider",
            DiagnosticKey::Database => "database",
            DiagnosticKey::Version => "version",
            DiagnosticKey::Host => "host",
            DiagnosticKey::Port => "port",
            DiagnosticKey::StartTime => "startTime",
            DiagnosticKey::ConnectedUser => "connectedUser",
            DiagnosticKey::SessionId => "sessionId",
        }
    }

    /// Column alias used by every engine's metadata query.
    fn column(self) -> Option<&'static str> {
        match self {
            DiagnosticKey::Provider => None,
            DiagnosticKey::Database => Some("database_name"),
            DiagnosticKey::Version => Some("version"),
            DiagnosticKey::Host => Some("host"),
            DiagnosticKey::Port => Some("port"),
            DiagnosticKey::StartTime => Some("start_time"),
            DiagnosticKey::ConnectedUser => Some("connected_user"),
            DiagnosticKey::SessionId => Some("session_id"),
        }
    }
}

impl fmt::Display for DiagnosticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic values keyed by [`DiagnosticKey`]. Absent keys are omitted,
/// never filled with placeholders.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DiagnosticInfo {
    entries: BTreeMap<DiagnosticKey, String>,
}

impl DiagnosticInfo {
    pub fn get(&self, key: DiagnosticKey) -> Option<&str> {
        self.entries.get(&key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DiagnosticKey, &str)> {
        self.entries.iter().map(|(key, value)| (*key, value.as_str()))
    }

    fn insert(&mut self, key: DiagnosticKey, value: String) {
        let value = value.trim();
        if !value.is_empty() {
            self.entries.insert(key, value.to_string());
        }
    }
}

/// Metadata query for `engine`, or `None` when the engine has no support.
pub fn metadata_query(engine: Engine) -> Option<&'static str> {
    match engine {
        Engine::SqlServer => Some(
            "SELECT DB_NAME() AS database_name, @@VERSION AS version, \
             CAST(SERVERPROPERTY('MachineName') AS nvarchar(128)) AS host, \
             (SELECT TOP (1) local_tcp_port FROM sys.dm_exec_connections \
             WHERE session_id = @@SPID) AS port, \
             (SELECT sqlserver_start_time FROM sys.dm_os_sys_info) AS start_time, \
             SUSER_SNAME() AS connected_user, @@SPID AS session_id",
        ),
        Engine::Postgres => Some(
            "SELECT current_database()::text AS database_name, version() AS version, \
             host(inet_server_addr()) AS host, inet_server_port() AS port, \
             pg_postmaster_start_time() AS start_time, current_user::text AS connected_user, \
             pg_backend_pid() AS session_id",
        ),
        Engine::MySql => Some(
            "SELECT DATABASE() AS database_name, VERSION() AS version, @@hostname AS host, \
             @@port AS port, DATE_SUB(NOW(), INTERVAL (SELECT VARIABLE_VALUE \
             FROM performance_schema.global_status \
             WHERE VARIABLE_NAME = 'Uptime') SECOND) AS start_time, \
             CURRENT_USER() AS connected_user, CONNECTION_ID() AS session_id",
        ),
        Engine::Sqlite => Some(
            "SELECT sqlite_version() AS version, \
             (SELECT file FROM pragma_database_list WHERE name = 'main') AS database_name",
        ),
        Engine::Ansi => None,
    }
}

/// Map one metadata row from `engine` onto the diagnostic vocabulary.
pub fn normalize(engine: Engine, row: &Row) -> DiagnosticInfo {
    let mut info = DiagnosticInfo::default();
    info.insert(DiagnosticKey::Provider, engine.display_name().to_string());
    for key in DiagnosticKey::ALL {
        let Some(column) = key.column() else {
            continue;
        };
        if let Some(value) = row.get(column).and_then(render) {
            info.insert(key, value);
        }
    }

    match engine {
        Engine::SqlServer => normalize_sql_server(&mut info),
        Engine::Postgres => normalize_postgres(&mut info),
        Engine::MySql | Engine::Sqlite | Engine::Ansi => {}
    }
    info
}

/// `@@VERSION` spans several lines; the first names the product and build.
fn normalize_sql_server(info: &mut DiagnosticInfo) {
    if let Some(version) = info.get(DiagnosticKey::Version) {
        let first = version.lines().next().unwrap_or_default().to_string();
        info.insert(DiagnosticKey::Version, first);
    }
}

/// `version()` appends platform and compiler details after " on ".
fn normalize_postgres(info: &mut DiagnosticInfo) {
    if let Some(version) = info.get(DiagnosticKey::Version) {
        let short = version.split(" on ").next().unwrap_or(version).to_string();
        info.insert(DiagnosticKey::Version, short);
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Blob(_) => None,
        other => Some(other.to_string()),
    }
}
