use super::{Batch, Command, CommandEngine, KeyValueClient, Reply};
use crate::context::{Context, scope};
use crate::core::Result;
use async_trait::async_trait;

/// The pipeline of the running batch, or the client outside of one.
///
/// Inside a batch, commands are queued rather than answered.
pub enum Engine<'a, C: KeyValueClient> {
    Client(&'a C),
    Batch(Batch<C::Pipeline>),
}

impl<'a, C: KeyValueClient> Engine<'a, C> {
    pub fn resolve(client: &'a C, ctx: &Context) -> Self {
        match scope::unit_from_context::<Batch<C::Pipeline>>(ctx) {
            Some(batch) => Engine::Batch(batch),
            None => Engine::Client(client),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Engine::Batch(_))
    }
}

impl<C: KeyValueClient> std::fmt::Debug for Engine<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Client(_) => f.write_str("Engine::Client"),
            Engine::Batch(batch) => f.debug_tuple("Engine::Batch").field(batch).finish(),
        }
    }
}

#[async_trait]
impl<C: KeyValueClient> CommandEngine for Engine<'_, C> {
    async fn send(&self, ctx: &Context, command: Command) -> Result<Reply> {
        match self {
            Engine::Client(client) => {
                ctx.check()?;
                client.send(ctx, command).await
            }
            Engine::Batch(batch) => batch.send(ctx, command).await,
        }
    }
}
