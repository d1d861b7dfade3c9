// ============================================================================
// Relational Unit of Work
// ============================================================================
//
// True ACID transactions with a selectable isolation level and access mode.
//
// The driver is consumed through three traits:
// - QueryEngine: operations, implemented by both connection and transaction
// - RelationalConnection: opens transactions
// - RelationalTransaction: commit / rollback
//
// ============================================================================

pub mod engine;
pub mod manager;
pub mod transaction;

pub use engine::Engine;
pub use manager::TransactionManager;
pub use transaction::Transaction;

use crate::context::Context;
use crate::core::{Result, Row, TxOptions, Value};
use async_trait::async_trait;

/// One statement of a batch sent with [`QueryEngine::send_batch`]
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Operation surface shared by raw connections and open transactions.
///
/// Code written against this trait never needs to know whether it runs
/// inside a unit of work.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Fetch at most one row.
    async fn query_row(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<Option<Row>>;

    /// Fetch all rows.
    async fn query(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement that returns no rows, yielding the affected row count.
    async fn execute(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<u64>;

    /// Send several statements in one round trip, yielding per-statement row counts.
    async fn send_batch(&self, ctx: &Context, batch: &[Statement]) -> Result<Vec<u64>>;

    /// Bulk-load rows into `table`.
    async fn copy_from(
        &self,
        ctx: &Context,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64>;
}

#[async_trait]
pub trait RelationalConnection: QueryEngine {
    type Transaction: RelationalTransaction;

    async fn begin_unit(&self, ctx: &Context, options: TxOptions) -> Result<Self::Transaction>;
}

#[async_trait]
pub trait RelationalTransaction: QueryEngine + 'static {
    async fn commit(&self, ctx: &Context) -> Result<()>;

    async fn rollback(&self, ctx: &Context) -> Result<()>;
}
