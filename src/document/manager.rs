use super::{DocumentClient, Engine, SessionUnit};
use crate::config::UnitConfig;
use crate::context::{Context, scope};
use crate::core::{Result, UnitError, UnitState};
use crate::unit::{guarded, panic_message};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use tracing::{Instrument, debug, info_span, warn};

/// Runs callbacks inside document-store session transactions.
///
/// Commit, abort and retries are decided by the backend session; this
/// manager opens the session, exposes it to the callback through the context
/// and always ends it. Because the backend may re-run the callback after a
/// transient failure, the callback is `FnMut` and should be safe to repeat.
pub struct SessionManager<C> {
    client: C,
    config: UnitConfig,
}

impl<C: DocumentClient> SessionManager<C> {
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

    pub async fn run_unit<F, Fut, T>(&self, ctx: &Context, mut f: F) -> Result<T>
    where
        F: FnMut(Context) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        if let Some(active) = scope::unit_from_context::<SessionUnit<C::Session>>(ctx) {
            debug!(unit = %active.id(), "joining open session transaction");
            return f(ctx.clone()).await;
        }

        ctx.check().map_err(|e| UnitError::Begin(Box::new(e)))?;
        let session = self.client.start_session(ctx).await.map_err(|e| {
            warn!(error = %e, "failed to start session");
            UnitError::Begin(Box::new(e))
        })?;
        let unit = SessionUnit::new(session);

        let span = info_span!("unit_of_work", backend = "document", unit = %unit.id());

        async move {
            debug!("session started");
            let value: Mutex<Option<T>> = Mutex::new(None);
            let failure: Mutex<Option<UnitError>> = Mutex::new(None);

            let mut body = |session_ctx: Context| {
                let unit_ctx = scope::with_unit(&session_ctx, unit.clone());
                let call = std::panic::catch_unwind(AssertUnwindSafe(|| f(unit_ctx)));
                let value = &value;
                let failure = &failure;
                async move {
                    *value.lock()? = None;
                    *failure.lock()? = None;

                    let outcome = match call {
                        Ok(fut) => guarded(fut).await,
                        Err(payload) => Err(UnitError::Panic(panic_message(payload.as_ref()))),
                    };
                    match outcome {
                        Ok(v) => {
                            *value.lock()? = Some(v);
                            Ok(())
                        }
                        Err(e) => {
                            // The backend only needs the retry signal; the
                            // original error is handed back to the caller.
                            let signal = UnitError::Backend {
                                message: e.to_string(),
                                transient: e.is_transient(),
                            };
                            *failure.lock()? = Some(e);
                            Err(signal)
                        }
                    }
                }
                .boxed()
            };

            let run = AssertUnwindSafe(unit.run_transaction(ctx, &mut body))
                .catch_unwind()
                .await;
            unit.end(&ctx.detached()).await;
            debug!("session ended");

            let value = value.into_inner().unwrap_or_else(|e| e.into_inner());
            let failure = failure.into_inner().unwrap_or_else(|e| e.into_inner());

            let (state, result) = match run {
                Err(payload) => (
                    UnitState::RolledBack,
                    Err(UnitError::Panic(panic_message(payload.as_ref()))),
                ),
                Ok(Ok(())) => match value {
                    Some(v) => (UnitState::Committed, Ok(v)),
                    None => (
                        UnitState::RolledBack,
                        Err(UnitError::backend(
                            "session reported success without running the transaction",
                        )),
                    ),
                },
                Ok(Err(e)) => match (failure, value) {
                    (Some(original), _) => (UnitState::RolledBack, Err(original)),
                    (None, Some(_)) => (UnitState::RolledBack, Err(UnitError::Commit(Box::new(e)))),
                    (None, None) => (UnitState::RolledBack, Err(UnitError::Begin(Box::new(e)))),
                },
            };

            if let Err(e) = unit.finish(state) {
                warn!(error = %e, "session unit finalized twice");
            }
            match &result {
                Ok(_) => debug!("session transaction committed"),
                Err(e) => warn!(error = %e, "session transaction aborted"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

impl<C: DocumentClient + Clone> Clone for SessionManager<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
        }
    }
}
