//! Provider-agnostic table access for the Runar ecosystem.
//!
//! # Intention
//!
//! - One CRUD contract over any relational table on any supported engine.
//! - Callers never see dialect, schema-naming convention, or wire protocol.
//! - Identifiers are validated and quoted structurally; values are always bound.
//!
//! # Architectural Boundaries
//!
//! - Connections come from a [`ConnectionProvider`]; pooling and transport live there.
//! - The cryptographic primitive comes from a [`FieldCipher`]; this crate only
//!   decides which fields it touches.
//! - No presentation, schema migration, or cross-call transactions.

pub mod cipher;
pub mod config;
pub mod diagnostics;
pub mod dialect;
pub mod error;
#[cfg(feature = "postgres")]
pub mod pg;
pub mod provider;
pub mod repository;
pub mod sqlite;
pub mod statement;
pub mod table;
pub mod value;

pub use cipher::{FieldCipher, FieldCipherAdapter};
pub use config::RepositoryConfig;
pub use diagnostics::{DiagnosticInfo, DiagnosticKey};
pub use dialect::{Dialect, Engine};
pub use error::{TableError, TableResult};
pub use provider::{ConnectionProvider, Session};
pub use repository::{TableAccess, TableRepository};
pub use sqlite::{SqliteConfig, SqliteProvider};
pub use statement::{CrudOperation, Statement, StatementBuilder, DEFAULT_ROW_LIMIT};
pub use table::{EncryptableFieldSet, FilterCriterion, TableRef};
pub use value::{Row, Value};
