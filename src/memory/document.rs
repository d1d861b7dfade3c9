// ============================================================================
// In-Memory Document Store
// ============================================================================
//
// Collections of JSON documents kept in persistent (im) maps so that a
// session transaction snapshots the whole store in O(1).
//
// Transactions are optimistic: writes go to the snapshot and are published
// on commit if no other write landed since the snapshot was taken.
// Otherwise the commit fails with a transient write conflict and
// `with_transaction` re-runs the body according to its RetryPolicy.
//
// ============================================================================

use crate::config::RetryPolicy;
use crate::context::Context;
use crate::core::{Result, UnitError};
use crate::document::{Document, DocumentClient, DocumentEngine, DocumentSession, TransactionBody};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

type Collections = im::HashMap<String, im::Vector<Document>>;

#[derive(Clone, Default)]
struct StoreState {
    version: u64,
    collections: Collections,
}

struct StoreInner {
    state: Mutex<StoreState>,
    retry: RetryPolicy,
    commits: AtomicU64,
    conflicts: AtomicU64,
    open_sessions: AtomicUsize,
}

#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<StoreInner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::default())
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                retry,
                commits: AtomicU64::new(0),
                conflicts: AtomicU64::new(0),
                open_sessions: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of published writes, transactional or not
    pub async fn version(&self) -> u64 {
        self.inner.state.lock().await.version
    }

    pub fn committed_transactions(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn write_conflicts(&self) -> u64 {
        self.inner.conflicts.load(Ordering::SeqCst)
    }

    /// Sessions started and not yet ended
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    pub async fn count(&self, collection: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.collections.get(collection).map_or(0, |docs| docs.len())
    }

    async fn snapshot(&self) -> (u64, Collections) {
        let state = self.inner.state.lock().await;
        (state.version, state.collections.clone())
    }

    async fn write<R>(&self, op: impl FnOnce(&mut Collections) -> Result<(R, bool)>) -> Result<R> {
        let mut state = self.inner.state.lock().await;
        let (result, changed) = op(&mut state.collections)?;
        if changed {
            state.version += 1;
        }
        Ok(result)
    }

    async fn publish(&self, txn: TxnState) -> Result<()> {
        if !txn.dirty {
            return Ok(());
        }
        let mut state = self.inner.state.lock().await;
        if state.version != txn.base_version {
            self.inner.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(UnitError::transient(format!(
                "Write conflict: snapshot at version {}, store at version {}",
                txn.base_version, state.version
            )));
        }
        state.collections = txn.working;
        state.version += 1;
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentEngine for MemoryDocumentStore {
    async fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> Result<()> {
        ctx.check()?;
        self.write(|c| insert(c, collection, document).map(|()| ((), true)))
            .await
    }

    async fn find_one(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>> {
        ctx.check()?;
        let (_, collections) = self.snapshot().await;
        Ok(select(&collections, collection, filter)?.into_iter().next())
    }

    async fn find(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Vec<Document>> {
        ctx.check()?;
        let (_, collections) = self.snapshot().await;
        select(&collections, collection, filter)
    }

    async fn update_many(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<u64> {
        ctx.check()?;
        self.write(|c| update_matching(c, collection, filter, update).map(|n| (n, n > 0)))
            .await
    }

    async fn delete_many(&self, ctx: &Context, collection: &str, filter: &Document) -> Result<u64> {
        ctx.check()?;
        self.write(|c| delete_matching(c, collection, filter).map(|n| (n, n > 0)))
            .await
    }
}

#[async_trait]
impl DocumentClient for MemoryDocumentStore {
    type Session = MemorySession;

    async fn start_session(&self, ctx: &Context) -> Result<MemorySession> {
        ctx.check()?;
        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            store: self.clone(),
            txn: Mutex::new(None),
            ended: AtomicBool::new(false),
        })
    }
}

struct TxnState {
    base_version: u64,
    working: Collections,
    dirty: bool,
}

/// Session on a [`MemoryDocumentStore`].
///
/// Outside `with_transaction`, operations go straight to the store.
pub struct MemorySession {
    store: MemoryDocumentStore,
    txn: Mutex<Option<TxnState>>,
    ended: AtomicBool,
}

impl MemorySession {
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub async fn in_transaction(&self) -> bool {
        self.txn.lock().await.is_some()
    }

    fn ensure_live(&self, ctx: &Context) -> Result<()> {
        if self.is_ended() {
            return Err(UnitError::backend("Session has ended"));
        }
        ctx.check()
    }

    async fn start_transaction(&self) -> Result<()> {
        let mut txn = self.txn.lock().await;
        if txn.is_some() {
            return Err(UnitError::backend("Transaction already in progress"));
        }
        let (base_version, working) = self.store.snapshot().await;
        *txn = Some(TxnState {
            base_version,
            working,
            dirty: false,
        });
        Ok(())
    }

    /// Publishes the transaction's writes if the body succeeded.
    async fn finish_attempt(&self, outcome: Result<()>) -> Result<()> {
        let txn = self.txn.lock().await.take();
        match (outcome, txn) {
            (Ok(()), Some(txn)) => self.store.publish(txn).await,
            (Ok(()), None) => Err(UnitError::backend("Transaction state lost")),
            (Err(e), _) => Err(e),
        }
    }

    async fn write<R>(&self, op: impl FnOnce(&mut Collections) -> Result<(R, bool)>) -> Result<R> {
        let mut txn = self.txn.lock().await;
        match txn.as_mut() {
            Some(txn) => {
                let (result, changed) = op(&mut txn.working)?;
                txn.dirty |= changed;
                Ok(result)
            }
            None => {
                drop(txn);
                self.store.write(op).await
            }
        }
    }

    async fn read(&self) -> Collections {
        let txn = self.txn.lock().await;
        match txn.as_ref() {
            Some(txn) => txn.working.clone(),
            None => {
                drop(txn);
                self.store.snapshot().await.1
            }
        }
    }
}

#[async_trait]
impl DocumentEngine for MemorySession {
    async fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> Result<()> {
        self.ensure_live(ctx)?;
        self.write(|c| insert(c, collection, document).map(|()| ((), true)))
            .await
    }

    async fn find_one(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>> {
        self.ensure_live(ctx)?;
        let collections = self.read().await;
        Ok(select(&collections, collection, filter)?.into_iter().next())
    }

    async fn find(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Vec<Document>> {
        self.ensure_live(ctx)?;
        let collections = self.read().await;
        select(&collections, collection, filter)
    }

    async fn update_many(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<u64> {
        self.ensure_live(ctx)?;
        self.write(|c| update_matching(c, collection, filter, update).map(|n| (n, n > 0)))
            .await
    }

    async fn delete_many(&self, ctx: &Context, collection: &str, filter: &Document) -> Result<u64> {
        self.ensure_live(ctx)?;
        self.write(|c| delete_matching(c, collection, filter).map(|n| (n, n > 0)))
            .await
    }
}

#[async_trait]
impl DocumentSession for MemorySession {
    async fn with_transaction(&self, ctx: &Context, body: &mut TransactionBody<'_>) -> Result<()> {
        let retry = self.store.inner.retry.clone();
        let mut attempt = 1usize;
        loop {
            self.ensure_live(ctx)?;
            self.start_transaction().await?;

            let outcome = body(ctx.clone()).await;
            match self.finish_attempt(outcome).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && retry.should_retry(attempt) => {
                    let backoff = retry.backoff(attempt);
                    debug!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying document transaction"
                    );
                    ctx.run(async {
                        tokio::time::sleep(backoff).await;
                        Ok(())
                    })
                    .await?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn end_session(&self, _ctx: &Context) {
        self.txn.lock().await.take();
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.store.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Document operations on a collection map
// ============================================================================

fn as_object<'a>(doc: &'a Document, what: &str) -> Result<&'a Map<String, Value>> {
    doc.as_object()
        .ok_or_else(|| UnitError::backend(format!("{} must be a JSON object", what)))
}

fn matches(doc: &Document, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

fn insert(collections: &mut Collections, collection: &str, document: Document) -> Result<()> {
    as_object(&document, "Document")?;
    collections
        .entry(collection.to_string())
        .or_default()
        .push_back(document);
    Ok(())
}

fn select(collections: &Collections, collection: &str, filter: &Document) -> Result<Vec<Document>> {
    let filter = as_object(filter, "Filter")?;
    Ok(collections
        .get(collection)
        .map(|docs| docs.iter().filter(|d| matches(d, filter)).cloned().collect())
        .unwrap_or_default())
}

fn apply_update(doc: &mut Document, update: &Map<String, Value>) -> Result<()> {
    let Some(target) = doc.as_object_mut() else {
        return Err(UnitError::backend("Stored document is not an object"));
    };
    for (operator, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| UnitError::backend(format!("{} expects an object", operator)))?;
        match operator.as_str() {
            "$set" => {
                for (field, value) in fields {
                    target.insert(field.clone(), value.clone());
                }
            }
            "$inc" => {
                for (field, delta) in fields {
                    let delta = delta
                        .as_i64()
                        .ok_or_else(|| UnitError::backend(format!("$inc.{} must be an integer", field)))?;
                    let current = match target.get(field) {
                        None | Some(Value::Null) => 0,
                        Some(value) => value.as_i64().ok_or_else(|| {
                            UnitError::backend(format!("Cannot $inc non-integer field '{}'", field))
                        })?,
                    };
                    let next = current.checked_add(delta).ok_or_else(|| {
                        UnitError::backend(format!("$inc.{} would overflow", field))
                    })?;
                    target.insert(field.clone(), Value::from(next));
                }
            }
            other => {
                return Err(UnitError::backend(format!("Unsupported update operator '{}'", other)));
            }
        }
    }
    Ok(())
}

fn update_matching(
    collections: &mut Collections,
    collection: &str,
    filter: &Document,
    update: &Document,
) -> Result<u64> {
    let filter = as_object(filter, "Filter")?;
    let update = as_object(update, "Update")?;
    let Some(docs) = collections.get_mut(collection) else {
        return Ok(0);
    };

    let mut updated = docs.clone();
    let mut count = 0;
    for doc in updated.iter_mut() {
        if matches(doc, filter) {
            apply_update(doc, update)?;
            count += 1;
        }
    }
    *docs = updated;
    Ok(count)
}

fn delete_matching(collections: &mut Collections, collection: &str, filter: &Document) -> Result<u64> {
    let filter = as_object(filter, "Filter")?;
    let Some(docs) = collections.get_mut(collection) else {
        return Ok(0);
    };

    let before = docs.len();
    docs.retain(|doc| !matches(doc, filter));
    Ok((before - docs.len()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_direct_operations() {
        let store = MemoryDocumentStore::new();
        let ctx = Context::background();

        store
            .insert_one(&ctx, "users", json!({"name": "alice", "age": 30}))
            .await
            .unwrap();
        store
            .insert_one(&ctx, "users", json!({"name": "bob", "age": 25}))
            .await
            .unwrap();

        let bob = store
            .find_one(&ctx, "users", &json!({"name": "bob"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob["age"], 25);

        let updated = store
            .update_many(&ctx, "users", &json!({}), &json!({"$inc": {"age": 1}}))
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let deleted = store
            .delete_many(&ctx, "users", &json!({"age": 31}))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count("users").await, 1);
        assert_eq!(store.version().await, 4);
    }

    #[tokio::test]
    async fn test_invalid_documents_rejected() {
        let store = MemoryDocumentStore::new();
        let ctx = Context::background();

        assert!(store.insert_one(&ctx, "c", json!([1, 2])).await.is_err());
        assert!(store.find(&ctx, "c", &json!("x")).await.is_err());

        store.insert_one(&ctx, "c", json!({"n": "a"})).await.unwrap();
        assert!(
            store
                .update_many(&ctx, "c", &json!({}), &json!({"$inc": {"n": 1}}))
                .await
                .is_err()
        );
        assert!(
            store
                .update_many(&ctx, "c", &json!({}), &json!({"$rename": {"n": "m"}}))
                .await
                .is_err()
        );

        store
            .insert_one(&ctx, "counters", json!({"n": i64::MAX}))
            .await
            .unwrap();
        let err = store
            .update_many(&ctx, "counters", &json!({}), &json!({"$inc": {"n": 1}}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("would overflow"));
        let stored = store
            .find_one(&ctx, "counters", &json!({}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["n"], i64::MAX);
    }

    #[tokio::test]
    async fn test_session_transaction_is_isolated_until_commit() {
        let store = MemoryDocumentStore::new();
        let ctx = Context::background();
        let session = store.start_session(&ctx).await.unwrap();

        session.start_transaction().await.unwrap();
        session
            .insert_one(&ctx, "orders", json!({"id": 1}))
            .await
            .unwrap();

        assert_eq!(session.find(&ctx, "orders", &json!({})).await.unwrap().len(), 1);
        assert_eq!(store.count("orders").await, 0);

        session.finish_attempt(Ok(())).await.unwrap();
        assert_eq!(store.count("orders").await, 1);
        assert_eq!(store.committed_transactions(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_conflicts() {
        let store = MemoryDocumentStore::new();
        let ctx = Context::background();
        let session = store.start_session(&ctx).await.unwrap();

        session.start_transaction().await.unwrap();
        session.insert_one(&ctx, "orders", json!({"id": 1})).await.unwrap();
        store.insert_one(&ctx, "orders", json!({"id": 2})).await.unwrap();

        let err = session.finish_attempt(Ok(())).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.write_conflicts(), 1);
        assert_eq!(store.count("orders").await, 1);
    }

    #[tokio::test]
    async fn test_ended_session_rejects_operations() {
        let store = MemoryDocumentStore::new();
        let ctx = Context::background();
        let session = store.start_session(&ctx).await.unwrap();

        assert_eq!(store.open_sessions(), 1);
        session.end_session(&ctx).await;
        session.end_session(&ctx).await;
        assert!(session.is_ended());
        assert_eq!(store.open_sessions(), 0);
        assert!(session.find(&ctx, "c", &json!({})).await.is_err());
    }
}
