// ============================================================================
// Document Unit of Work
// ============================================================================
//
// Session-backed multi-document transactions. Commit, abort and retry of
// transient failures belong to the backend session (`with_transaction`);
// the manager owns the session lifecycle and the ambient scope.
//
// ============================================================================

pub mod engine;
pub mod manager;
pub mod session;

pub use engine::Engine;
pub use manager::SessionManager;
pub use session::SessionUnit;

use crate::context::Context;
use crate::core::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// Documents, filters and updates are JSON objects.
pub type Document = serde_json::Value;

/// Callback a session runs inside its transaction; may run more than once.
pub type TransactionBody<'a> = dyn FnMut(Context) -> BoxFuture<'a, Result<()>> + Send + 'a;

/// Operation surface shared by clients and sessions.
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    async fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> Result<()>;

    async fn find_one(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>>;

    async fn find(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Vec<Document>>;

    /// Applies `update` (`$set` / `$inc` operators) to every match.
    async fn update_many(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<u64>;

    async fn delete_many(&self, ctx: &Context, collection: &str, filter: &Document) -> Result<u64>;
}

#[async_trait]
pub trait DocumentClient: DocumentEngine {
    type Session: DocumentSession;

    async fn start_session(&self, ctx: &Context) -> Result<Self::Session>;
}

#[async_trait]
pub trait DocumentSession: DocumentEngine + 'static {
    /// Runs `body` inside a transaction on this session.
    ///
    /// The session commits when `body` succeeds and aborts otherwise; it may
    /// re-run `body` after a transient failure.
    async fn with_transaction(&self, ctx: &Context, body: &mut TransactionBody<'_>) -> Result<()>;

    async fn end_session(&self, ctx: &Context);
}
