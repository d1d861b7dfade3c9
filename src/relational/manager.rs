use super::{Engine, RelationalConnection, Transaction};
use crate::config::UnitConfig;
use crate::context::{Context, scope};
use crate::core::{AccessMode, IsolationLevel, Result, TxOptions, UnitError};
use crate::unit::{guarded, rollback_failure};
use std::future::Future;
use tracing::{Instrument, debug, info_span, warn};

/// Runs callbacks inside relational transactions.
///
/// A call made with a context that already carries a transaction opened by a
/// manager over the same connection type joins that transaction: no second
/// `BEGIN`, no second commit or rollback, and the outer isolation level and
/// access mode stay in force.
///
/// # Examples
///
/// ```ignore
/// let manager = TransactionManager::new(pool);
///
/// manager
///     .serializable(&ctx, |ctx| async move {
///         let engine = manager.engine(&ctx);
///         engine.execute(&ctx, "UPDATE accounts SET balance = balance - 10 WHERE id = $1", &[1.into()]).await?;
///         engine.execute(&ctx, "UPDATE accounts SET balance = balance + 10 WHERE id = $1", &[2.into()]).await?;
///         Ok(())
///     })
///     .await?;
/// ```
pub struct TransactionManager<C> {
    conn: C,
    config: UnitConfig,
}

impl<C: RelationalConnection> TransactionManager<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            config: UnitConfig::default(),
        }
    }

    pub fn with_config(conn: C, config: UnitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { conn, config })
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    /// Handle to issue operations against for `ctx`.
    pub fn engine(&self, ctx: &Context) -> Engine<'_, C> {
        Engine::resolve(&self.conn, ctx)
    }

    /// Runs `f` with the configured default isolation level and access mode.
    pub async fn run_unit<F, Fut, T>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_unit_with(ctx, self.config.default_options(), f)
            .await
    }

    pub async fn read_committed<F, Fut, T>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let options = TxOptions::new(IsolationLevel::ReadCommitted, self.config.default_access);
        self.run_unit_with(ctx, options, f).await
    }

    pub async fn repeatable_read<F, Fut, T>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let options = TxOptions::new(IsolationLevel::RepeatableRead, self.config.default_access);
        self.run_unit_with(ctx, options, f).await
    }

    pub async fn serializable<F, Fut, T>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let options = TxOptions::new(IsolationLevel::Serializable, self.config.default_access);
        self.run_unit_with(ctx, options, f).await
    }

    /// Runs `f` in a read-only transaction at the default isolation level.
    pub async fn read_only<F, Fut, T>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let options = TxOptions::new(self.config.default_isolation, AccessMode::ReadOnly);
        self.run_unit_with(ctx, options, f).await
    }

    /// Runs `f` inside a transaction opened with `options`.
    ///
    /// - `f` returns `Ok`: the transaction is committed; a commit failure is
    ///   returned as `UnitError::Commit`. If `ctx` was cancelled meanwhile,
    ///   the transaction is rolled back instead and the commit error carries
    ///   the cancellation.
    /// - `f` returns `Err` or panics: the transaction is rolled back and the
    ///   callback's error (or `UnitError::Panic`) is returned. A failed rollback
    ///   is reported according to the configured `RollbackErrorPolicy`.
    pub async fn run_unit_with<F, Fut, T>(&self, ctx: &Context, options: TxOptions, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(active) = scope::unit_from_context::<Transaction<C::Transaction>>(ctx) {
            debug!(
                unit = %active.id(),
                active = %active.options(),
                requested = %options,
                "joining open transaction"
            );
            return f(ctx.clone()).await;
        }

        ctx.check().map_err(|e| UnitError::Begin(Box::new(e)))?;
        let driver = self.conn.begin_unit(ctx, options).await.map_err(|e| {
            warn!(error = %e, "failed to begin transaction");
            UnitError::Begin(Box::new(e))
        })?;
        let tx = Transaction::new(driver, options);

        let span = info_span!(
            "unit_of_work",
            backend = "relational",
            unit = %tx.id(),
            isolation = %options.isolation,
            access = %options.access
        );

        async move {
            debug!("transaction opened");
            let unit_ctx = scope::with_unit(ctx, tx.clone());
            let outcome = guarded(async move { f(unit_ctx).await }).await;

            match outcome {
                Ok(value) => {
                    if let Some(cancelled) = ctx.err() {
                        let err = UnitError::Commit(Box::new(cancelled));
                        return Err(self.abort(&tx, ctx, err).await);
                    }
                    match tx.commit(ctx).await {
                        Ok(()) => {
                            debug!("transaction committed");
                            Ok(value)
                        }
                        Err(e) => {
                            warn!(error = %e, "commit failed");
                            Err(UnitError::Commit(Box::new(e)))
                        }
                    }
                }
                Err(err) => Err(self.abort(&tx, ctx, err).await),
            }
        }
        .instrument(span)
        .await
    }

    async fn abort(
        &self,
        tx: &Transaction<C::Transaction>,
        ctx: &Context,
        original: UnitError,
    ) -> UnitError {
        debug!(error = %original, "rolling back transaction");
        match tx.rollback(&ctx.detached()).await {
            Ok(()) => original,
            Err(rollback) => {
                warn!(error = %rollback, original = %original, "rollback failed");
                rollback_failure(self.config.rollback_error_policy, rollback, original)
            }
        }
    }
}

impl<C: RelationalConnection + Clone> Clone for TransactionManager<C> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Row, UnitState, Value};
    use crate::relational::{QueryEngine, RelationalTransaction, Statement};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct LogConnection {
        log: Log,
    }

    struct LogTransaction {
        log: Log,
    }

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    macro_rules! logging_engine {
        ($ty:ty, $prefix:expr) => {
            #[async_trait]
            impl QueryEngine for $ty {
                async fn query_row(&self, _: &Context, sql: &str, _: &[Value]) -> Result<Option<Row>> {
                    push(&self.log, format!("{}query_row {}", $prefix, sql));
                    Ok(None)
                }
                async fn query(&self, _: &Context, sql: &str, _: &[Value]) -> Result<Vec<Row>> {
                    push(&self.log, format!("{}query {}", $prefix, sql));
                    Ok(Vec::new())
                }
                async fn execute(&self, _: &Context, sql: &str, _: &[Value]) -> Result<u64> {
                    push(&self.log, format!("{}execute {}", $prefix, sql));
                    Ok(1)
                }
                async fn send_batch(&self, _: &Context, batch: &[Statement]) -> Result<Vec<u64>> {
                    push(&self.log, format!("{}send_batch {}", $prefix, batch.len()));
                    Ok(vec![1; batch.len()])
                }
                async fn copy_from(&self, _: &Context, table: &str, _: &[String], rows: &[Row]) -> Result<u64> {
                    push(&self.log, format!("{}copy_from {}", $prefix, table));
                    Ok(rows.len() as u64)
                }
            }
        };
    }

    logging_engine!(LogConnection, "conn:");
    logging_engine!(LogTransaction, "tx:");

    #[async_trait]
    impl RelationalConnection for LogConnection {
        type Transaction = LogTransaction;

        async fn begin_unit(&self, _: &Context, options: TxOptions) -> Result<LogTransaction> {
            push(&self.log, format!("begin {}", options));
            Ok(LogTransaction {
                log: self.log.clone(),
            })
        }
    }

    #[async_trait]
    impl RelationalTransaction for LogTransaction {
        async fn commit(&self, _: &Context) -> Result<()> {
            push(&self.log, "commit");
            Ok(())
        }

        async fn rollback(&self, _: &Context) -> Result<()> {
            push(&self.log, "rollback");
            Ok(())
        }
    }

    fn manager() -> (TransactionManager<LogConnection>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let conn = LogConnection { log: log.clone() };
        (TransactionManager::new(conn), log)
    }

    #[tokio::test]
    async fn test_engine_outside_unit_is_connection() {
        let (tm, log) = manager();
        let ctx = Context::background();

        let engine = tm.engine(&ctx);
        assert!(!engine.is_transaction());
        engine.execute(&ctx, "SELECT 1", &[]).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["conn:execute SELECT 1"]);
    }

    #[tokio::test]
    async fn test_engine_inside_unit_is_transaction() {
        let (tm, log) = manager();
        let tm = &tm;

        tm.run_unit(&Context::background(), |ctx| async move {
            let engine = tm.engine(&ctx);
            assert!(engine.is_transaction());
            engine.execute(&ctx, "INSERT", &[]).await?;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["begin READ COMMITTED READ WRITE", "tx:execute INSERT", "commit"]
        );
    }

    #[tokio::test]
    async fn test_shortcuts_forward_options() {
        let (tm, log) = manager();
        let ctx = Context::background();

        tm.repeatable_read(&ctx, |_| async { Ok(()) }).await.unwrap();
        tm.serializable(&ctx, |_| async { Ok(()) }).await.unwrap();
        tm.read_only(&ctx, |_| async { Ok(()) }).await.unwrap();
        tm.read_committed(&ctx, |_| async { Ok(()) }).await.unwrap();

        let begins: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("begin"))
            .cloned()
            .collect();
        assert_eq!(
            begins,
            vec![
                "begin REPEATABLE READ READ WRITE",
                "begin SERIALIZABLE READ WRITE",
                "begin READ COMMITTED READ ONLY",
                "begin READ COMMITTED READ WRITE",
            ]
        );
    }

    #[tokio::test]
    async fn test_escaped_transaction_is_unusable() {
        let (tm, _log) = manager();
        let tm = &tm;

        let leaked = tm
            .run_unit(&Context::background(), |ctx| async move {
                Ok(tm.engine(&ctx).transaction().cloned())
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(leaked.state(), UnitState::Committed);
        let err = leaked
            .execute(&Context::background(), "DELETE", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, UnitError::Finalized(UnitState::Committed)));
    }

    #[tokio::test]
    async fn test_returns_callback_value() {
        let (tm, _log) = manager();
        let total = tm
            .run_unit(&Context::background(), |_| async { Ok(40 + 2) })
            .await
            .unwrap();
        assert_eq!(total, 42);
    }
}
