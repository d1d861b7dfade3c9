use super::{Batch, Engine, KeyValueClient, Reply};
use crate::config::{DiscardFailurePolicy, UnitConfig};
use crate::context::{Context, scope};
use crate::core::{Result, UnitError};
use crate::unit::guarded;
use std::future::Future;
use tracing::{Instrument, debug, info_span, warn};

/// Value returned by a batch callback together with the exec replies.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<T> {
    pub value: T,
    /// One reply per queued command, in issue order. Empty when the call
    /// joined an enclosing batch, which executes the commands itself.
    pub replies: Vec<Reply>,
}

/// Runs callbacks against a command pipeline.
///
/// This is the weakest of the unit-of-work guarantees. A failing callback
/// sends nothing, but once exec starts nothing can be undone: an atomic
/// pipeline applies as one block yet keeps the commands that succeeded when
/// another fails at runtime, and a plain pipeline may stop part way through.
/// Reads issued inside the callback only return `Reply::Queued`.
pub struct PipelineManager<C> {
    client: C,
    config: UnitConfig,
}

impl<C: KeyValueClient> PipelineManager<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            config: UnitConfig::default(),
        }
    }

    pub fn with_config(client: C, config: UnitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    pub fn engine(&self, ctx: &Context) -> Engine<'_, C> {
        Engine::resolve(&self.client, ctx)
    }

    /// Queues the callback's commands in a transactional pipeline.
    pub async fn run_atomic_batch<F, Fut, T>(&self, ctx: &Context, f: F) -> Result<BatchResult<T>>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(ctx, true, f).await
    }

    /// Queues the callback's commands in a plain pipeline.
    pub async fn run_batch<F, Fut, T>(&self, ctx: &Context, f: F) -> Result<BatchResult<T>>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(ctx, false, f).await
    }

    async fn run<F, Fut, T>(&self, ctx: &Context, atomic: bool, f: F) -> Result<BatchResult<T>>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(active) = scope::unit_from_context::<Batch<C::Pipeline>>(ctx) {
            debug!(
                unit = %active.id(),
                active_atomic = active.is_atomic(),
                requested_atomic = atomic,
                "joining open batch"
            );
            let value = f(ctx.clone()).await?;
            return Ok(BatchResult {
                value,
                replies: Vec::new(),
            });
        }

        ctx.check().map_err(|e| UnitError::Begin(Box::new(e)))?;
        let pipeline = if atomic {
            self.client.atomic_pipeline()
        } else {
            self.client.pipeline()
        };
        let batch = Batch::new(pipeline, atomic);
        let unit_ctx = scope::with_unit(ctx, batch.clone());

        let span = info_span!("unit_of_work", backend = "kv", unit = %batch.id(), atomic);

        async move {
            debug!("batch opened");
            let outcome = match guarded(async move { f(unit_ctx).await }).await {
                Ok(_) if ctx.is_done() => Err(ctx.err().unwrap_or(UnitError::Cancelled)),
                other => other,
            };
            match outcome {
                Ok(value) => {
                    let queued = batch.len();
                    let replies = batch.exec(ctx).await.map_err(|e| {
                        warn!(error = %e, queued, "batch exec failed");
                        UnitError::Exec(Box::new(e))
                    })?;
                    debug!(queued, "batch executed");
                    Ok(BatchResult { value, replies })
                }
                Err(cause) => {
                    warn!(error = %cause, queued = batch.len(), "discarding batch");
                    if let Err(e) = batch.discard() {
                        match self.config.discard_failure_policy {
                            DiscardFailurePolicy::Log => {
                                warn!(error = %e, "batch discard failed")
                            }
                            DiscardFailurePolicy::Ignore => {}
                        }
                    }
                    Err(UnitError::Discarded(Box::new(cause)))
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl<C: KeyValueClient + Clone> Clone for PipelineManager<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
        }
    }
}
