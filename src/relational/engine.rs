use super::{QueryEngine, RelationalConnection, Statement, Transaction};
use crate::context::{Context, scope};
use crate::core::{Result, Row, Value};
use async_trait::async_trait;

/// What to issue relational operations against for a given context:
/// the open transaction if there is one, the raw connection otherwise.
pub enum Engine<'a, C: RelationalConnection> {
    Connection(&'a C),
    Transaction(Transaction<C::Transaction>),
}

impl<'a, C: RelationalConnection> Engine<'a, C> {
    pub fn resolve(conn: &'a C, ctx: &Context) -> Self {
        match scope::unit_from_context::<Transaction<C::Transaction>>(ctx) {
            Some(tx) => Engine::Transaction(tx),
            None => Engine::Connection(conn),
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, Engine::Transaction(_))
    }

    pub fn transaction(&self) -> Option<&Transaction<C::Transaction>> {
        match self {
            Engine::Transaction(tx) => Some(tx),
            Engine::Connection(_) => None,
        }
    }
}

impl<C: RelationalConnection> std::fmt::Debug for Engine<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Connection(_) => f.write_str("Engine::Connection"),
            Engine::Transaction(tx) => f.debug_tuple("Engine::Transaction").field(tx).finish(),
        }
    }
}

#[async_trait]
impl<C: RelationalConnection> QueryEngine for Engine<'_, C> {
    async fn query_row(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        match self {
            Engine::Connection(conn) => {
                ctx.check()?;
                conn.query_row(ctx, sql, params).await
            }
            Engine::Transaction(tx) => tx.query_row(ctx, sql, params).await,
        }
    }

    async fn query(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self {
            Engine::Connection(conn) => {
                ctx.check()?;
                conn.query(ctx, sql, params).await
            }
            Engine::Transaction(tx) => tx.query(ctx, sql, params).await,
        }
    }

    async fn execute(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<u64> {
        match self {
            Engine::Connection(conn) => {
                ctx.check()?;
                conn.execute(ctx, sql, params).await
            }
            Engine::Transaction(tx) => tx.execute(ctx, sql, params).await,
        }
    }

    async fn send_batch(&self, ctx: &Context, batch: &[Statement]) -> Result<Vec<u64>> {
        match self {
            Engine::Connection(conn) => {
                ctx.check()?;
                conn.send_batch(ctx, batch).await
            }
            Engine::Transaction(tx) => tx.send_batch(ctx, batch).await,
        }
    }

    async fn copy_from(
        &self,
        ctx: &Context,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        match self {
            Engine::Connection(conn) => {
                ctx.check()?;
                conn.copy_from(ctx, table, columns, rows).await
            }
            Engine::Transaction(tx) => tx.copy_from(ctx, table, columns, rows).await,
        }
    }
}
