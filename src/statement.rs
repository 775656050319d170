//! Parameterized statement assembly.
//!
//! Names reach the SQL text only through the dialect's quoting; values reach
//! the engine only as bound parameters.

use crate::dialect::{Dialect, LimitStyle};
use crate::error::{TableError, TableResult};
use crate::table::{FilterCriterion, TableRef};
use crate::value::{Row, Value};

/// Row cap applied to unbounded reads.
pub const DEFAULT_ROW_LIMIT: u32 = 1000;

/// SQL text with its ordered bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Read rows, optionally filtered by one key.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOperation {
    pub table: TableRef,
    pub filter: Option<FilterCriterion>,
    /// Applied only to unfiltered reads; `None` means the default cap.
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateOperation {
    pub table: TableRef,
    pub data: Row,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    pub table: TableRef,
    pub filter: FilterCriterion,
    pub updates: Row,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOperation {
    pub table: TableRef,
    pub filter: FilterCriterion,
}

/// Single-column, single-row read of `column` where the filter matches.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupOperation {
    pub table: TableRef,
    pub column: String,
    pub filter: FilterCriterion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrudOperation {
    Create(CreateOperation),
    Read(ReadOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
    Lookup(LookupOperation),
}

impl CrudOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            CrudOperation::Create(_) => "create",
            CrudOperation::Read(_) => "read",
            CrudOperation::Update(_) => "update",
            CrudOperation::Delete(_) => "delete",
            CrudOperation::Lookup(_) => "lookup",
        }
    }

    pub fn table(&self) -> &TableRef {
        match self {
            CrudOperation::Create(op) => &op.table,
            CrudOperation::Read(op) => &op.table,
            CrudOperation::Update(op) => &op.table,
            CrudOperation::Delete(op) => &op.table,
            CrudOperation::Lookup(op) => &op.table,
        }
    }
}

/// Resolve a caller-supplied limit to the row cap actually applied.
///
/// Limits past `u32::MAX` are clamped to it.
pub fn resolve_limit(limit: Option<i64>, default_limit: u32) -> TableResult<u32> {
    match limit {
        None => Ok(default_limit),
        Some(n) if n <= 0 => Err(TableError::invalid(format!(
            "limit must be greater than zero, got {n}"
        ))),
        Some(n) => Ok(u32::try_from(n).unwrap_or(u32::MAX)),
    }
}

/// Builds statements for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    dialect: Dialect,
    default_limit: u32,
}

impl StatementBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            default_limit: DEFAULT_ROW_LIMIT,
        }
    }

    pub fn with_default_limit(mut self, default_limit: u32) -> Self {
        self.default_limit = default_limit;
        self
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn build(&self, op: &CrudOperation) -> TableResult<Statement> {
        match op {
            CrudOperation::Read(read) => match &read.filter {
                Some(filter) => self.select_by_key(&read.table, filter),
                None => self.select_all(&read.table, read.limit),
            },
            CrudOperation::Create(create) => self.insert(&create.table, &create.data),
            CrudOperation::Update(update) => {
                self.update(&update.table, &update.filter, &update.updates)
            }
            CrudOperation::Delete(delete) => self.delete(&delete.table, &delete.filter),
            CrudOperation::Lookup(lookup) => {
                self.select_column(&lookup.table, &lookup.column, &lookup.filter)
            }
        }
    }

    pub fn select_all(&self, table: &TableRef, limit: Option<i64>) -> TableResult<Statement> {
        let limit = resolve_limit(limit, self.default_limit)?;
        let from = self.dialect.qualified_name(table)?;
        Ok(Statement {
            sql: self.limited_select("*", &from, "", limit),
            params: Vec::new(),
        })
    }

    /// Every matching row; the key is not assumed unique.
    pub fn select_by_key(
        &self,
        table: &TableRef,
        filter: &FilterCriterion,
    ) -> TableResult<Statement> {
        let from = self.dialect.qualified_name(table)?;
        let column = self.dialect.quote_identifier(&filter.column)?;
        Ok(Statement {
            sql: format!(
                "SELECT * FROM {from} WHERE {column} = {}",
                self.dialect.placeholder(1)
            ),
            params: vec![filter.value.clone()],
        })
    }

    pub fn select_column(
        &self,
        table: &TableRef,
        column: &str,
        filter: &FilterCriterion,
    ) -> TableResult<Statement> {
        let from = self.dialect.qualified_name(table)?;
        let selected = self.dialect.quote_identifier(column)?;
        let key = self.dialect.quote_identifier(&filter.column)?;
        let predicate = format!("WHERE {key} = {}", self.dialect.placeholder(1));
        Ok(Statement {
            sql: self.limited_select(&selected, &from, &predicate, 1),
            params: vec![filter.value.clone()],
        })
    }

    pub fn insert(&self, table: &TableRef, data: &Row) -> TableResult<Statement> {
        if data.is_empty() {
            return Err(TableError::invalid("insert data must not be empty"));
        }
        let into = self.dialect.qualified_name(table)?;
        let mut columns = Vec::with_capacity(data.len());
        let mut placeholders = Vec::with_capacity(data.len());
        let mut params = Vec::with_capacity(data.len());
        for (index, (name, value)) in data.iter().enumerate() {
            columns.push(self.dialect.quote_identifier(name)?);
            placeholders.push(self.dialect.placeholder(index + 1));
            params.push(value.clone());
        }
        Ok(Statement {
            sql: format!(
                "INSERT INTO {into} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        })
    }

    pub fn update(
        &self,
        table: &TableRef,
        filter: &FilterCriterion,
        updates: &Row,
    ) -> TableResult<Statement> {
        if updates.is_empty() {
            return Err(TableError::invalid("update data must not be empty"));
        }
        let target = self.dialect.qualified_name(table)?;
        let mut assignments = Vec::with_capacity(updates.len());
        let mut params = Vec::with_capacity(updates.len() + 1);
        for (index, (name, value)) in updates.iter().enumerate() {
            assignments.push(format!(
                "{} = {}",
                self.dialect.quote_identifier(name)?,
                self.dialect.placeholder(index + 1)
            ));
            params.push(value.clone());
        }
        let key = self.dialect.quote_identifier(&filter.column)?;
        let key_placeholder = self.dialect.placeholder(params.len() + 1);
        params.push(filter.value.clone());
        Ok(Statement {
            sql: format!(
                "UPDATE {target} SET {} WHERE {key} = {key_placeholder}",
                assignments.join(", ")
            ),
            params,
        })
    }

    pub fn delete(&self, table: &TableRef, filter: &FilterCriterion) -> TableResult<Statement> {
        let target = self.dialect.qualified_name(table)?;
        let key = self.dialect.quote_identifier(&filter.column)?;
        Ok(Statement {
            sql: format!(
                "DELETE FROM {target} WHERE {key} = {}",
                self.dialect.placeholder(1)
            ),
            params: vec![filter.value.clone()],
        })
    }

    fn limited_select(&self, columns: &str, from: &str, predicate: &str, limit: u32) -> String {
        let clause = self.dialect.limit_clause(limit);
        let mut sql = match self.dialect.limit_style() {
            LimitStyle::Top => format!("SELECT {clause} {columns} FROM {from}"),
            LimitStyle::Limit | LimitStyle::FetchFirst => format!("SELECT {columns} FROM {from}"),
        };
        if !predicate.is_empty() {
            sql.push(' ');
            sql.push_str(predicate);
        }
        if self.dialect.limit_style() != LimitStyle::Top {
            sql.push(' ');
            sql.push_str(&clause);
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Engine;

    fn usuarios() -> TableRef {
        TableRef::new("usuarios", None).unwrap()
    }

    #[test]
    fn resolve_limit_defaults_and_rejects_non_positive() {
        assert_eq!(resolve_limit(None, DEFAULT_ROW_LIMIT).unwrap(), 1000);
        assert_eq!(resolve_limit(Some(5), DEFAULT_ROW_LIMIT).unwrap(), 5);
        assert!(matches!(
            resolve_limit(Some(0), DEFAULT_ROW_LIMIT),
            Err(TableError::InvalidArgument(_))
        ));
        assert!(resolve_limit(Some(-3), DEFAULT_ROW_LIMIT).is_err());
        assert_eq!(resolve_limit(Some(5_000_000_000), DEFAULT_ROW_LIMIT).unwrap(), u32::MAX);
        assert_eq!(resolve_limit(Some(i64::MAX), DEFAULT_ROW_LIMIT).unwrap(), u32::MAX);
    }

    #[test]
    fn select_all_places_limit_per_dialect() {
        let sql = |engine: Engine| {
            StatementBuilder::new(engine.dialect())
                .select_all(&usuarios(), None)
                .unwrap()
                .sql
        };
        assert_eq!(sql(Engine::SqlServer), "SELECT TOP (1000) * FROM [dbo].[usuarios]");
        assert_eq!(sql(Engine::Postgres), "SELECT * FROM \"public\".\"usuarios\" LIMIT 1000");
        assert_eq!(sql(Engine::MySql), "SELECT * FROM `usuarios` LIMIT 1000");
        assert_eq!(
            sql(Engine::Ansi),
            "SELECT * FROM \"usuarios\" FETCH FIRST 1000 ROWS ONLY"
        );
    }

    #[test]
    fn lookup_selects_single_column_single_row() {
        let builder = StatementBuilder::new(Engine::SqlServer.dialect());
        let filter = FilterCriterion::new("username", "juan").unwrap();
        let stmt = builder
            .build(&CrudOperation::Lookup(LookupOperation {
                table: usuarios(),
                column: "password_hash".to_string(),
                filter,
            }))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT TOP (1) [password_hash] FROM [dbo].[usuarios] WHERE [username] = @p1"
        );
        assert_eq!(stmt.params, vec![Value::from("juan")]);
    }

    #[test]
    fn update_binds_key_after_assignments() {
        let builder = StatementBuilder::new(Engine::Postgres.dialect());
        let updates = Row::new().with_value("name", "Ana").with_value("age", 31);
        let filter = FilterCriterion::new("id", 4).unwrap();
        let stmt = builder.update(&usuarios(), &filter, &updates).unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"public\".\"usuarios\" SET \"name\" = $1, \"age\" = $2 WHERE \"id\" = $3"
        );
        assert_eq!(
            stmt.params,
            vec![Value::from("Ana"), Value::from(31), Value::from(4)]
        );
    }

    #[test]
    fn empty_write_data_is_rejected() {
        let builder = StatementBuilder::new(Engine::MySql.dialect());
        let filter = FilterCriterion::new("id", 1).unwrap();
        assert!(builder.insert(&usuarios(), &Row::new()).is_err());
        assert!(builder.update(&usuarios(), &filter, &Row::new()).is_err());
    }
}
