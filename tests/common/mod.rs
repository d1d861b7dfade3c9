// Shared fixtures for the integration tests
//
// RecordingDb is a relational driver that logs every call and keeps a single
// table of rows: statements starting with INSERT store their params as a row.
// Transactions buffer rows and publish them on commit.

#![allow(dead_code)]

use async_trait::async_trait;
use scopedtx::kv::{Command, CommandEngine, KeyValueClient, Pipeline, Reply};
use scopedtx::memory::{MemoryKvStore, MemoryPipeline};
use scopedtx::{
    Context, QueryEngine, RelationalConnection, RelationalTransaction, Result, Row, Statement,
    TxOptions, UnitError, Value,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Begin,
    Execute,
    Commit,
    Rollback,
}

#[derive(Default)]
struct DbInner {
    log: Mutex<Vec<String>>,
    faults: Mutex<HashSet<Fault>>,
    rows: Mutex<Vec<Row>>,
}

#[derive(Clone, Default)]
pub struct RecordingDb {
    inner: Arc<DbInner>,
}

impl RecordingDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fault: Fault) {
        self.inner.faults.lock().unwrap().insert(fault);
    }

    pub fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| e.as_str() == entry).count()
    }

    /// Committed rows
    pub fn rows(&self) -> Vec<Row> {
        self.inner.rows.lock().unwrap().clone()
    }

    fn record(&self, entry: impl Into<String>) {
        self.inner.log.lock().unwrap().push(entry.into());
    }

    fn check(&self, fault: Fault) -> Result<()> {
        if self.inner.faults.lock().unwrap().contains(&fault) {
            return Err(UnitError::backend(format!("injected {:?} failure", fault)));
        }
        Ok(())
    }
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start().to_uppercase().starts_with("INSERT")
}

#[async_trait]
impl QueryEngine for RecordingDb {
    async fn query_row(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(ctx, sql, params).await?.into_iter().next())
    }

    async fn query(&self, _ctx: &Context, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.record(format!("conn: query {}", sql));
        Ok(self.rows())
    }

    async fn execute(&self, _ctx: &Context, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(format!("conn: execute {}", sql));
        self.check(Fault::Execute)?;
        if is_insert(sql) {
            self.inner.rows.lock().unwrap().push(params.to_vec());
            return Ok(1);
        }
        Ok(0)
    }

    async fn send_batch(&self, ctx: &Context, batch: &[Statement]) -> Result<Vec<u64>> {
        let mut counts = Vec::with_capacity(batch.len());
        for statement in batch {
            counts.push(self.execute(ctx, &statement.sql, &statement.params).await?);
        }
        Ok(counts)
    }

    async fn copy_from(
        &self,
        _ctx: &Context,
        table: &str,
        _columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        self.record(format!("conn: copy {}", table));
        self.inner.rows.lock().unwrap().extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl RelationalConnection for RecordingDb {
    type Transaction = RecordingTx;

    async fn begin_unit(&self, _ctx: &Context, options: TxOptions) -> Result<RecordingTx> {
        self.record(format!("begin {}", options));
        self.check(Fault::Begin)?;
        Ok(RecordingTx {
            db: self.clone(),
            pending: Mutex::new(Vec::new()),
        })
    }
}

pub struct RecordingTx {
    db: RecordingDb,
    pending: Mutex<Vec<Row>>,
}

#[async_trait]
impl QueryEngine for RecordingTx {
    async fn query_row(&self, ctx: &Context, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(ctx, sql, params).await?.into_iter().next())
    }

    async fn query(&self, _ctx: &Context, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.db.record(format!("tx: query {}", sql));
        let mut rows = self.db.rows();
        rows.extend(self.pending.lock().unwrap().iter().cloned());
        Ok(rows)
    }

    async fn execute(&self, _ctx: &Context, sql: &str, params: &[Value]) -> Result<u64> {
        self.db.record(format!("tx: execute {}", sql));
        self.db.check(Fault::Execute)?;
        if is_insert(sql) {
            self.pending.lock().unwrap().push(params.to_vec());
            return Ok(1);
        }
        Ok(0)
    }

    async fn send_batch(&self, ctx: &Context, batch: &[Statement]) -> Result<Vec<u64>> {
        let mut counts = Vec::with_capacity(batch.len());
        for statement in batch {
            counts.push(self.execute(ctx, &statement.sql, &statement.params).await?);
        }
        Ok(counts)
    }

    async fn copy_from(
        &self,
        _ctx: &Context,
        table: &str,
        _columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        self.db.record(format!("tx: copy {}", table));
        self.pending.lock().unwrap().extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl RelationalTransaction for RecordingTx {
    async fn commit(&self, _ctx: &Context) -> Result<()> {
        self.db.record("commit");
        self.db.check(Fault::Commit)?;
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        self.db.inner.rows.lock().unwrap().extend(pending);
        Ok(())
    }

    async fn rollback(&self, _ctx: &Context) -> Result<()> {
        self.db.record("rollback");
        self.db.check(Fault::Rollback)?;
        self.pending.lock().unwrap().clear();
        Ok(())
    }
}

pub fn row(id: i64, name: &str) -> Row {
    vec![Value::from(id), Value::from(name)]
}

/// Key-value client whose pipelines always fail to discard.
#[derive(Clone, Default)]
pub struct StuckDiscardKv {
    pub store: MemoryKvStore,
}

pub struct StuckPipeline(MemoryPipeline);

#[async_trait]
impl CommandEngine for StuckDiscardKv {
    async fn send(&self, ctx: &Context, command: Command) -> Result<Reply> {
        self.store.send(ctx, command).await
    }
}

impl KeyValueClient for StuckDiscardKv {
    type Pipeline = StuckPipeline;

    fn pipeline(&self) -> StuckPipeline {
        StuckPipeline(self.store.pipeline())
    }

    fn atomic_pipeline(&self) -> StuckPipeline {
        StuckPipeline(self.store.atomic_pipeline())
    }
}

#[async_trait]
impl CommandEngine for StuckPipeline {
    async fn send(&self, ctx: &Context, command: Command) -> Result<Reply> {
        self.0.send(ctx, command).await
    }
}

#[async_trait]
impl Pipeline for StuckPipeline {
    async fn exec(&self, ctx: &Context) -> Result<Vec<Reply>> {
        self.0.exec(ctx).await
    }

    fn discard(&self) -> Result<()> {
        Err(UnitError::backend("connection reset during DISCARD"))
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}
