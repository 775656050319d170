//! Seam to the connection/transport layer.
//!
//! Pooling, TLS, timeouts and cancellation policy belong to the provider.
//! Dropping a returned future abandons the call; providers must finish or
//! discard a statement atomically and never leave it half-bound.

use async_trait::async_trait;

use crate::dialect::Engine;
use crate::error::TableResult;
use crate::statement::Statement;
use crate::value::Row;

/// Supplies live sessions for one engine.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Engine whose dialect statements must be written in.
    fn engine(&self) -> Engine;

    async fn acquire(&self) -> TableResult<Box<dyn Session>>;
}

/// A single checked-out connection.
#[async_trait]
pub trait Session: Send {
    /// Run a row-returning statement.
    async fn query(&mut self, statement: &Statement) -> TableResult<Vec<Row>>;

    /// Run a write and return the affected-row count the engine reports.
    async fn execute(&mut self, statement: &Statement) -> TableResult<u64>;
}
