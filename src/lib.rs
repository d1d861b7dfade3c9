// ============================================================================
// scopedtx Library
// ============================================================================

//! Context-scoped units of work for relational, document and key-value stores.
//!
//! A manager opens a unit (transaction, session or pipeline), binds it into a
//! [`Context`] and runs a callback with that context. Repository code asks the
//! manager for an `Engine` from whatever context it receives and gets the
//! active unit inside a callback or the plain handle outside of one, so the
//! same code runs transactionally or not depending on who calls it.
//!
//! ```
//! use scopedtx::{CommandEngine, Context, MemoryKvStore, PipelineManager, Reply};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> scopedtx::Result<()> {
//! let store = MemoryKvStore::new();
//! let manager = PipelineManager::new(store.clone());
//! let ctx = Context::background();
//!
//! let tm = &manager;
//! let batch = manager
//!     .run_atomic_batch(&ctx, move |ctx| async move {
//!         let engine = tm.engine(&ctx);
//!         engine.incr_by(&ctx, "visits", 1).await?;
//!         engine.sadd(&ctx, "visitors", &["alice"]).await?;
//!         Ok("recorded")
//!     })
//!     .await?;
//!
//! assert_eq!(batch.value, "recorded");
//! assert_eq!(batch.replies, vec![Reply::Integer(1), Reply::Integer(1)]);
//! assert_eq!(store.stats().round_trips, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod core;
pub mod document;
pub mod kv;
pub mod memory;
pub mod relational;
mod unit;

pub use config::{DiscardFailurePolicy, RetryPolicy, RollbackErrorPolicy, UnitConfig};
pub use context::{CancelHandle, Context, ContextKey};
pub use crate::core::{
    AccessMode, IsolationLevel, Phase, Result, Row, TxOptions, UnitError, UnitId, UnitState, Value,
};

pub use document::{DocumentClient, DocumentEngine, DocumentSession, SessionManager};
pub use kv::{BatchResult, Command, CommandEngine, KeyValueClient, Pipeline, PipelineManager, Reply};
pub use memory::{MemoryDocumentStore, MemoryKvStats, MemoryKvStore};
pub use relational::{
    QueryEngine, RelationalConnection, RelationalTransaction, Statement, TransactionManager,
};
