//! Repository engine: the public table access contract.
//!
//! # Invariants
//!
//! - Arguments are validated and the statement fully built before a session
//!   is acquired. Rejected input never reaches the engine.
//! - "Nothing matched" is an empty result or a zero count, never an error.
//! - Each call is one round-trip; nothing here holds mutable state.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cipher::{FieldCipher, FieldCipherAdapter};
use crate::config::RepositoryConfig;
use crate::diagnostics::{self, DiagnosticInfo};
use crate::dialect::{Dialect, Engine};
use crate::error::{TableError, TableResult};
use crate::provider::{ConnectionProvider, Session};
use crate::statement::{
    CreateOperation, CrudOperation, DeleteOperation, LookupOperation, ReadOperation, Statement,
    StatementBuilder, UpdateOperation,
};
use crate::table::{validate_identifier, EncryptableFieldSet, FilterCriterion, TableRef};
use crate::value::{Row, Value};

/// Provider-agnostic table operations.
#[async_trait]
pub trait TableAccess: Send + Sync {
    /// Up to `limit` rows (default cap when `None`).
    async fn fetch_rows(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: Option<i64>,
    ) -> TableResult<Vec<Row>>;

    /// Every row whose `key_column` equals `value`.
    async fn fetch_by_key(
        &self,
        table: &str,
        schema: Option<&str>,
        key_column: &str,
        value: Value,
    ) -> TableResult<Vec<Row>>;

    /// Insert one row, encrypting `encrypt_fields` first.
    async fn create(
        &self,
        table: &str,
        schema: Option<&str>,
        data: &Row,
        encrypt_fields: Option<&str>,
    ) -> TableResult<bool>;

    /// Returns the affected-row count.
    async fn update(
        &self,
        table: &str,
        schema: Option<&str>,
        key_column: &str,
        key_value: Value,
        data: &Row,
        encrypt_fields: Option<&str>,
    ) -> TableResult<u64>;

    /// Returns the affected-row count.
    async fn delete(
        &self,
        table: &str,
        schema: Option<&str>,
        key_column: &str,
        key_value: Value,
    ) -> TableResult<u64>;

    /// Stored hash for `user_value`, or `None` when the user is absent.
    async fn fetch_password_hash(
        &self,
        table: &str,
        schema: Option<&str>,
        user_column: &str,
        hash_column: &str,
        user_value: Value,
    ) -> TableResult<Option<String>>;

    async fn fetch_diagnostics(&self) -> TableResult<DiagnosticInfo>;
}

/// [`TableAccess`] over any [`ConnectionProvider`].
#[derive(Clone)]
pub struct TableRepository {
    builder: StatementBuilder,
    provider: Arc<dyn ConnectionProvider>,
    cipher: Option<FieldCipherAdapter>,
}

impl std::fmt::Debug for TableRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRepository")
            .field("engine", &self.engine())
            .field("cipher", &self.cipher.is_some())
            .finish()
    }
}

impl TableRepository {
    /// Dialect follows the provider's engine.
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            builder: StatementBuilder::new(provider.engine().dialect()),
            provider,
            cipher: None,
        }
    }

    /// Rejects a config that is invalid or names a different engine.
    pub fn with_config(
        config: &RepositoryConfig,
        provider: Arc<dyn ConnectionProvider>,
    ) -> TableResult<Self> {
        config.validate()?;
        if config.engine != provider.engine() {
            return Err(TableError::invalid(format!(
                "configured engine `{}` does not match provider engine `{}`",
                config.engine,
                provider.engine()
            )));
        }
        let mut repo = Self::new(provider);
        repo.builder = repo.builder.with_default_limit(config.default_limit);
        Ok(repo)
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn FieldCipher>) -> Self {
        self.cipher = Some(FieldCipherAdapter::new(cipher));
        self
    }

    pub fn engine(&self) -> Engine {
        self.builder.dialect().engine()
    }

    pub fn dialect(&self) -> &Dialect {
        self.builder.dialect()
    }

    /// Like [`TableAccess::fetch_rows`], decrypting `decrypt_fields` in each row.
    pub async fn fetch_rows_decrypted(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: Option<i64>,
        decrypt_fields: Option<&str>,
    ) -> TableResult<Vec<Row>> {
        let fields = self.cipher_fields(decrypt_fields)?;
        let rows = self.fetch_rows(table, schema, limit).await?;
        self.decrypt_rows(rows, &fields)
    }

    /// Like [`TableAccess::fetch_by_key`], decrypting `decrypt_fields` in each row.
    pub async fn fetch_by_key_decrypted(
        &self,
        table: &str,
        schema: Option<&str>,
        key_column: &str,
        value: Value,
        decrypt_fields: Option<&str>,
    ) -> TableResult<Vec<Row>> {
        let fields = self.cipher_fields(decrypt_fields)?;
        let rows = self.fetch_by_key(table, schema, key_column, value).await?;
        self.decrypt_rows(rows, &fields)
    }

    /// Build the statement for `op` without touching a connection.
    pub fn prepare(&self, op: &CrudOperation) -> TableResult<Statement> {
        self.builder.build(op)
    }

    fn cipher_fields(&self, field_list: Option<&str>) -> TableResult<EncryptableFieldSet> {
        let fields = EncryptableFieldSet::from_option(field_list)?;
        if !fields.is_empty() && self.cipher.is_none() {
            return Err(TableError::UnsupportedOperation(
                "field encryption requested but no cipher is configured".to_string(),
            ));
        }
        Ok(fields)
    }

    fn encrypt_row(&self, data: &Row, field_list: Option<&str>) -> TableResult<Row> {
        let fields = self.cipher_fields(field_list)?;
        match &self.cipher {
            Some(cipher) if !fields.is_empty() => cipher.encrypt_fields(data, &fields),
            _ => Ok(data.clone()),
        }
    }

    fn decrypt_rows(&self, rows: Vec<Row>, fields: &EncryptableFieldSet) -> TableResult<Vec<Row>> {
        match &self.cipher {
            Some(cipher) if !fields.is_empty() => rows
                .iter()
                .map(|row| cipher.decrypt_fields(row, fields))
                .collect(),
            _ => Ok(rows),
        }
    }

    async fn run_query(
        &self,
        op: &str,
        table: &str,
        statement: &Statement,
    ) -> TableResult<Vec<Row>> {
        let started_at = Instant::now();
        let mut session = self.acquire(op, table).await?;
        match session.query(statement).await {
            Ok(rows) => {
                debug!(
                    engine = %self.engine(),
                    operation = op,
                    table,
                    rows = rows.len(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "query completed"
                );
                Ok(rows)
            }
            Err(err) => Err(self.log_failure(op, table, err)),
        }
    }

    async fn run_execute(&self, op: &str, table: &str, statement: &Statement) -> TableResult<u64> {
        let started_at = Instant::now();
        let mut session = self.acquire(op, table).await?;
        match session.execute(statement).await {
            Ok(affected) => {
                debug!(
                    engine = %self.engine(),
                    operation = op,
                    table,
                    rows = affected,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "statement executed"
                );
                Ok(affected)
            }
            Err(err) => Err(self.log_failure(op, table, err)),
        }
    }

    async fn acquire(&self, op: &str, table: &str) -> TableResult<Box<dyn Session>> {
        self.provider
            .acquire()
            .await
            .map_err(|err| self.log_failure(op, table, err))
    }

    fn log_failure(&self, op: &str, table: &str, err: TableError) -> TableError {
        warn!(
            engine = %self.engine(),
            operation = op,
            table,
            error_kind = err.kind(),
            error = %err,
            "table operation failed"
        );
        err
    }
}

#[async_trait]
impl TableAccess for TableRepository {
    async fn fetch_rows(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: Option<i64>,
    ) -> TableResult<Vec<Row>> {
        let op = CrudOperation::Read(ReadOperation {
            table: TableRef::new(table, schema)?,
            filter: None,
            limit,
        });
        let statement = self.prepare(&op)?;
        self.run_query(op.kind(), table, &statement).await
    }

    async fn fetch_by_key(
        &self,
        table: &str,
        schema: Option<&str>,
        key_column: &str,
        value: Value,
    ) -> TableResult<Vec<Row>> {
        let op = CrudOperation::Read(ReadOperation {
            table: TableRef::new(table, schema)?,
            filter: Some(FilterCriterion::new(key_column, value)?),
            limit: None,
        });
        let statement = self.prepare(&op)?;
        self.run_query(op.kind(), table, &statement).await
    }

    async fn create(
        &self,
        table: &str,
        schema: Option<&str>,
        data: &Row,
        encrypt_fields: Option<&str>,
    ) -> TableResult<bool> {
        let table_ref = TableRef::new(table, schema)?;
        if data.is_empty() {
            return Err(TableError::invalid("create requires at least one column"));
        }
        let op = CrudOperation::Create(CreateOperation {
            table: table_ref,
            data: self.encrypt_row(data, encrypt_fields)?,
        });
        let statement = self.prepare(&op)?;
        let affected = self.run_execute(op.kind(), table, &statement).await?;
        Ok(affected > 0)
    }

    async fn update(
        &self,
        table: &str,
        schema: Option<&str>,
        key_column: &str,
        key_value: Value,
        data: &Row,
        encrypt_fields: Option<&str>,
    ) -> TableResult<u64> {
        let table_ref = TableRef::new(table, schema)?;
        let filter = FilterCriterion::new(key_column, key_value)?;
        if data.is_empty() {
            return Err(TableError::invalid("update requires at least one column"));
        }
        let op = CrudOperation::Update(UpdateOperation {
            table: table_ref,
            filter,
            updates: self.encrypt_row(data, encrypt_fields)?,
        });
        let statement = self.prepare(&op)?;
        self.run_execute(op.kind(), table, &statement).await
    }

    async fn delete(
        &self,
        table: &str,
        schema: Option<&str>,
        key_column: &str,
        key_value: Value,
    ) -> TableResult<u64> {
        let op = CrudOperation::Delete(DeleteOperation {
            table: TableRef::new(table, schema)?,
            filter: FilterCriterion::new(key_column, key_value)?,
        });
        let statement = self.prepare(&op)?;
        self.run_execute(op.kind(), table, &statement).await
    }

    async fn fetch_password_hash(
        &self,
        table: &str,
        schema: Option<&str>,
        user_column: &str,
        hash_column: &str,
        user_value: Value,
    ) -> TableResult<Option<String>> {
        validate_identifier(hash_column)?;
        let op = CrudOperation::Lookup(LookupOperation {
            table: TableRef::new(table, schema)?,
            column: hash_column.to_string(),
            filter: FilterCriterion::new(user_column, user_value)?,
        });
        let statement = self.prepare(&op)?;
        let rows = self.run_query(op.kind(), table, &statement).await?;
        let hash = rows
            .first()
            .and_then(|row| row.get(hash_column))
            .and_then(|value| match value {
                Value::Null => None,
                other => Some(other.to_string()),
            });
        Ok(hash)
    }

    async fn fetch_diagnostics(&self) -> TableResult<DiagnosticInfo> {
        let engine = self.engine();
        let sql = diagnostics::metadata_query(engine).ok_or_else(|| {
            TableError::UnsupportedOperation(format!(
                "{} does not expose connection metadata",
                engine.display_name()
            ))
        })?;
        let statement = Statement {
            sql: sql.to_string(),
            params: Vec::new(),
        };
        let rows = self.run_query("diagnostics", "", &statement).await?;
        let row = rows.into_iter().next().unwrap_or_default();
        Ok(diagnostics::normalize(engine, &row))
    }
}
