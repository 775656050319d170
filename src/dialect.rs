//! Per-engine SQL dialects.
//!
//! # Intention
//!
//! - Engines form a closed set; each maps to one immutable [`Dialect`] value.
//! - All identifier text reaching SQL goes through [`Dialect::quote_identifier`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TableError, TableResult};
use crate::table::{validate_identifier, TableRef};

/// Supported database engines. Configuration names parse through
/// [`FromStr`], case-insensitively and with the usual aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Engine {
    SqlServer,
    Postgres,
    MySql,
    Sqlite,
    /// Generic ANSI SQL for engines without a dedicated profile.
    Ansi,
}

impl Engine {
    pub const ALL: [Engine; 5] = [
        Engine::SqlServer,
        Engine::Postgres,
        Engine::MySql,
        Engine::Sqlite,
        Engine::Ansi,
    ];

    pub fn dialect(self) -> Dialect {
        match self {
            Engine::SqlServer => Dialect {
                engine: self,
                quote: QuoteStyle::Brackets,
                default_schema: Some("dbo"),
                placeholder: PlaceholderStyle::AtNumbered,
                limit: LimitStyle::Top,
            },
            Engine::Postgres => Dialect {
                engine: self,
                quote: QuoteStyle::DoubleQuote,
                default_schema: Some("public"),
                placeholder: PlaceholderStyle::DollarNumbered,
                limit: LimitStyle::Limit,
            },
            Engine::MySql => Dialect {
                engine: self,
                quote: QuoteStyle::Backtick,
                default_schema: None,
                placeholder: PlaceholderStyle::QuestionMark,
                limit: LimitStyle::Limit,
            },
            Engine::Sqlite => Dialect {
                engine: self,
                quote: QuoteStyle::DoubleQuote,
                default_schema: None,
                placeholder: PlaceholderStyle::QuestionNumbered,
                limit: LimitStyle::Limit,
            },
            Engine::Ansi => Dialect {
                engine: self,
                quote: QuoteStyle::DoubleQuote,
                default_schema: None,
                placeholder: PlaceholderStyle::QuestionMark,
                limit: LimitStyle::FetchFirst,
            },
        }
    }

    /// Human-readable provider name, reported in diagnostics.
    pub fn display_name(self) -> &'static str {
        match self {
            Engine::SqlServer => "SQL Server",
            Engine::Postgres => "PostgreSQL",
            Engine::MySql => "MySQL",
            Engine::Sqlite => "SQLite",
            Engine::Ansi => "ANSI SQL",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Engine::SqlServer => "sqlserver",
            Engine::Postgres => "postgres",
            Engine::MySql => "mysql",
            Engine::Sqlite => "sqlite",
            Engine::Ansi => "ansi",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Engine {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlserver" | "sql_server" | "mssql" => Ok(Engine::SqlServer),
            "postgres" | "postgresql" | "pg" => Ok(Engine::Postgres),
            "mysql" | "mariadb" => Ok(Engine::MySql),
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            "ansi" => Ok(Engine::Ansi),
            other => Err(TableError::invalid(format!(
                "unknown engine `{other}`; expected sqlserver|postgres|mysql|sqlite|ansi"
            ))),
        }
    }
}

impl TryFrom<String> for Engine {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// `[name]`, closing bracket doubled.
    Brackets,
    /// `"name"`, quote doubled.
    DoubleQuote,
    /// `` `name` ``, backtick doubled.
    Backtick,
}

impl QuoteStyle {
    fn delimiters(self) -> (char, char) {
        match self {
            QuoteStyle::Brackets => ('[', ']'),
            QuoteStyle::DoubleQuote => ('"', '"'),
            QuoteStyle::Backtick => ('`', '`'),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `@p1`, `@p2`, ...
    AtNumbered,
    /// `$1`, `$2`, ...
    DollarNumbered,
    /// `?1`, `?2`, ...
    QuestionNumbered,
    /// `?` positional
    QuestionMark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `SELECT TOP (n) ...`
    Top,
    /// `... LIMIT n`
    Limit,
    /// `... FETCH FIRST n ROWS ONLY`
    FetchFirst,
}

/// Engine-specific SQL rules. Pure, cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    engine: Engine,
    quote: QuoteStyle,
    default_schema: Option<&'static str>,
    placeholder: PlaceholderStyle,
    limit: LimitStyle,
}

impl Dialect {
    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn limit_style(&self) -> LimitStyle {
        self.limit
    }

    pub fn default_schema(&self) -> Option<&'static str> {
        self.default_schema
    }

    /// Quote a validated identifier. Rejects anything outside the safe grammar.
    pub fn quote_identifier(&self, name: &str) -> TableResult<String> {
        validate_identifier(name)?;
        let (open, close) = self.quote.delimiters();
        let mut quoted = String::with_capacity(name.len() + 2);
        quoted.push(open);
        for ch in name.chars() {
            if ch == close {
                quoted.push(close);
            }
            quoted.push(ch);
        }
        quoted.push(close);
        Ok(quoted)
    }

    /// Inverse of [`Dialect::quote_identifier`].
    pub fn unquote_identifier(&self, quoted: &str) -> TableResult<String> {
        let (open, close) = self.quote.delimiters();
        let inner = quoted
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
            .ok_or_else(|| {
                TableError::invalid(format!(
                    "`{quoted}` is not a quoted {} identifier",
                    self.engine
                ))
            })?;
        let doubled = format!("{close}{close}");
        let name = inner.replace(&doubled, &close.to_string());
        validate_identifier(&name)?;
        Ok(name)
    }

    /// Schema-qualified, quoted table name. Engines without a default schema
    /// emit the bare table unless the caller named one.
    pub fn qualified_name(&self, table: &TableRef) -> TableResult<String> {
        let table_name = self.quote_identifier(table.name())?;
        match table.schema().or(self.default_schema) {
            Some(schema) => Ok(format!("{}.{}", self.quote_identifier(schema)?, table_name)),
            None => Ok(table_name),
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self.placeholder {
            PlaceholderStyle::AtNumbered => format!("@p{index}"),
            PlaceholderStyle::DollarNumbered => format!("${index}"),
            PlaceholderStyle::QuestionNumbered => format!("?{index}"),
            PlaceholderStyle::QuestionMark => "?".to_string(),
        }
    }

    /// Row-limit clause for `n` rows. Where it goes depends on [`Dialect::limit_style`].
    pub fn limit_clause(&self, n: u32) -> String {
        match self.limit {
            LimitStyle::Top => format!("TOP ({n})"),
            LimitStyle::Limit => format!("LIMIT {n}"),
            LimitStyle::FetchFirst => format!("FETCH FIRST {n} ROWS ONLY"),
        }
    }
}
