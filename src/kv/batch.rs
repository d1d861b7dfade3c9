use super::{Command, CommandEngine, Pipeline, Reply};
use crate::context::Context;
use crate::core::{Result, UnitId, UnitState};
use crate::unit::UnitCell;
use async_trait::async_trait;
use std::sync::Arc;

/// A pipeline opened by [`PipelineManager`] for the duration of a callback.
///
/// Commands sent through it are queued and answered with `Reply::Queued`;
/// their real replies come back from the manager after exec.
///
/// [`PipelineManager`]: super::PipelineManager
pub struct Batch<P> {
    inner: Arc<BatchInner<P>>,
}

struct BatchInner<P> {
    pipeline: P,
    atomic: bool,
    cell: UnitCell,
}

impl<P> Clone for Batch<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Pipeline> Batch<P> {
    pub(crate) fn new(pipeline: P, atomic: bool) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                pipeline,
                atomic,
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

    pub fn is_atomic(&self) -> bool {
        self.inner.atomic
    }

    /// Commands queued so far
    pub fn len(&self) -> usize {
        self.inner.pipeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) async fn exec(&self, ctx: &Context) -> Result<Vec<Reply>> {
        self.inner.cell.finish(UnitState::Executed)?;
        self.inner.pipeline.exec(ctx).await
    }

    pub(crate) fn discard(&self) -> Result<()> {
        self.inner.cell.finish(UnitState::Discarded)?;
        self.inner.pipeline.discard()
    }

    fn ready(&self, ctx: &Context) -> Result<&P> {
        self.inner.cell.ensure_open()?;
        ctx.check()?;
        Ok(&self.inner.pipeline)
    }
}

impl<P> std::fmt::Debug for Batch<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.inner.cell.id())
            .field("atomic", &self.inner.atomic)
            .field("state", &self.inner.cell.state())
            .finish()
    }
}

#[async_trait]
impl<P: Pipeline> CommandEngine for Batch<P> {
    async fn send(&self, ctx: &Context, command: Command) -> Result<Reply> {
        self.ready(ctx)?.send(ctx, command).await
    }
}
