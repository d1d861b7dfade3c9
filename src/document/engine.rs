use super::{Document, DocumentClient, DocumentEngine, SessionUnit};
use crate::context::{Context, scope};
use crate::core::Result;
use async_trait::async_trait;

/// The session of the running transaction, or the client outside of one.
pub enum Engine<'a, C: DocumentClient> {
    Client(&'a C),
    Session(SessionUnit<C::Session>),
}

impl<'a, C: DocumentClient> Engine<'a, C> {
    pub fn resolve(client: &'a C, ctx: &Context) -> Self {
        match scope::unit_from_context::<SessionUnit<C::Session>>(ctx) {
            Some(session) => Engine::Session(session),
            None => Engine::Client(client),
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, Engine::Session(_))
    }
}

impl<C: DocumentClient> std::fmt::Debug for Engine<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Client(_) => f.write_str("Engine::Client"),
            Engine::Session(session) => f.debug_tuple("Engine::Session").field(session).finish(),
        }
    }
}

#[async_trait]
impl<C: DocumentClient> DocumentEngine for Engine<'_, C> {
    async fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> Result<()> {
        match self {
            Engine::Client(client) => {
                ctx.check()?;
                client.insert_one(ctx, collection, document).await
            }
            Engine::Session(session) => session.insert_one(ctx, collection, document).await,
        }
    }

    async fn find_one(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>> {
        match self {
            Engine::Client(client) => {
                ctx.check()?;
                client.find_one(ctx, collection, filter).await
            }
            Engine::Session(session) => session.find_one(ctx, collection, filter).await,
        }
    }

    async fn find(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
    ) -> Result<Vec<Document>> {
        match self {
            Engine::Client(client) => {
                ctx.check()?;
                client.find(ctx, collection, filter).await
            }
            Engine::Session(session) => session.find(ctx, collection, filter).await,
        }
    }

    async fn update_many(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<u64> {
        match self {
            Engine::Client(client) => {
                ctx.check()?;
                client.update_many(ctx, collection, filter, update).await
            }
            Engine::Session(session) => session.update_many(ctx, collection, filter, update).await,
        }
    }

    async fn delete_many(&self, ctx: &Context, collection: &str, filter: &Document) -> Result<u64> {
        match self {
            Engine::Client(client) => {
                ctx.check()?;
                client.delete_many(ctx, collection, filter).await
            }
            Engine::Session(session) => session.delete_many(ctx, collection, filter).await,
        }
    }
}
