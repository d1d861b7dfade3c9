use super::{QueryEngine, RelationalTransaction, Statement};
use crate::context::Context;
use crate::core::{Result, Row, TxOptions, UnitId, UnitState, Value};
use crate::unit::UnitCell;
use async_trait::async_trait;
use std::sync::Arc;

/// An open relational transaction managed by [`TransactionManager`].
///
/// Cloning shares the same transaction. Commit and rollback are reserved to
/// the manager that opened it; once finalized, every operation fails with
/// `UnitError::Finalized`.
///
/// [`TransactionManager`]: super::TransactionManager
pub struct Transaction<T> {
    inner: Arc<TransactionInner<T>>,
}

struct TransactionInner<T> {
    driver: T,
    options: TxOptions,
    cell: UnitCell,
}

impl<T> Clone for Transaction<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RelationalTransaction> Transaction<T> {
    pub(crate) fn new(driver: T, options: TxOptions) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                driver,
                options,
                cell: UnitCell::new(),
            }),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.cell.id()
    }

    /// Options the transaction was opened with
    pub fn options(&self) -> TxOptions {
        self.inner.options
    }

    /// Finalization path taken by the manager.
    ///
    /// `Committed` means a commit was issued, not that it succeeded: a failed
    /// commit still leaves the transaction `Committed` and the failure is
    /// reported by the manager as `UnitError::Commit`.
    pub fn state(&self) -> UnitState {
        self.inner.cell.state()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Finalization is claimed before the driver call; a second commit or a
    /// rollback is refused while this one is in flight.
    pub(crate) async fn commit(&self, ctx: &Context) -> Result<()> {
        self.inner.cell.finish(UnitState::Committed)?;
        self.inner.driver.commit(ctx).await
    }

    pub(crate) async fn rollback(&self, ctx: &Context) -> Result<()> {
        self.inner.cell.finish(UnitState::RolledBack)?;
        self.inner.driver.rollback(ctx).await
    }

    fn ready(&self, ctx: &Context) -> Result<&T> {
        self.inner.cell.ensure_open()?;
        ctx.check()?;
        Ok(&self.inner.driver)
    }
}

impl<T> std::fmt::Debug for Transaction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.cell.id())
            .field("options", &self.inner.options)
            .field("state", &self.inner.cell.state())
            .finish()
    }
}

#[async_trait]
impl<T: RelationalTransaction> QueryEngine for Transaction<T> {
    async fn query_row(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        self.ready(ctx)?.query_row(ctx, sql, params).await
    }

    async fn query(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ready(ctx)?.query(ctx, sql, params).await
    }

    async fn execute(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<u64> {
        self.ready(ctx)?.execute(ctx, sql, params).await
    }

    async fn send_batch(&self, ctx: &Context, batch: &[Statement]) -> Result<Vec<u64>> {
        self.ready(ctx)?.send_batch(ctx, batch).await
    }

    async fn copy_from(
        &self,
        ctx: &Context,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        self.ready(ctx)?.copy_from(ctx, table, columns, rows).await
    }
}
