use super::{Document, DocumentEngine, DocumentSession, TransactionBody};
use crate::context::Context;
use crate::core::{Result, UnitId, UnitState};
use crate::unit::UnitCell;
use async_trait::async_trait;
use std::sync::Arc;

/// A document session inside a transaction run by [`SessionManager`].
///
/// [`SessionManager`]: super::SessionManager
pub struct SessionUnit<S> {
    inner: Arc<SessionInner<S>>,
}

struct SessionInner<S> {
    session: S,
    cell: UnitCell,
}

impl<S> Clone for SessionUnit<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DocumentSession> SessionUnit<S> {
    pub(crate) fn new(session: S) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                session,
                cell: UnitCell::new(),
            }),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.cell.id()
    }

    pub fn state(&self) -> UnitState {
        self.inner.cell.state()
    }

    pub(crate) async fn run_transaction(
        &self,
        ctx: &Context,
        body: &mut TransactionBody<'_>,
    ) -> Result<()> {
        self.inner.cell.ensure_open()?;
        self.inner.session.with_transaction(ctx, body).await
    }

    pub(crate) fn finish(&self, state: UnitState) -> Result<()> {
        self.inner.cell.finish(state)
    }

    pub(crate) async fn end(&self, ctx: &Context) {
        self.inner.session.end_session(ctx).await
    }

    fn ready(&self, ctx: &Context) -> Result<&S> {
        self.inner.cell.ensure_open()?;
        ctx.check()?;
        Ok(&self.inner.session)
    }
}

impl<S> std::fmt::Debug for SessionUnit<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionUnit")
            .field("id", &self.inner.cell.id())
            .field("state", &self.inner.cell.state())
            .finish()
    }
}

#[async_trait]
impl<S: DocumentSession> DocumentEngine for SessionUnit<S> {
    async fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> Result<()> {
        self.ready(ctx)?.insert_one(ctx, collection, document).await
    }

    async fn find_one(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>> {
        self.ready(ctx)?.find_one(ctx, collection, filter).await
    }

    async fn find(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Vec<Document>> {
        self.ready(ctx)?.find(ctx, collection, filter).await
    }

    async fn update_many(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<u64> {
        self.ready(ctx)?
            .update_many(ctx, collection, filter, update)
            .await
    }

    async fn delete_many(&self, ctx: &Context, collection: &str, filter: &Document) -> Result<u64> {
        self.ready(ctx)?.delete_many(ctx, collection, filter).await
    }
}
