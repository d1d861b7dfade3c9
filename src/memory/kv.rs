// ============================================================================
// In-Memory Key-Value Store
// ============================================================================
//
// Typed keys (strings, hashes, sets; integers are strings that parse) with
// pipelines that queue commands locally until exec.
//
// - Atomic pipelines apply every command under one lock.
// - Plain pipelines take the lock per command, so other clients interleave.
// - A command against a key of the wrong type answers `Reply::Error` and the
//   rest of the pipeline still applies.
//
// ============================================================================

use crate::context::Context;
use crate::core::{Result, UnitError};
use crate::kv::{Command, CommandEngine, KeyValueClient, Pipeline, Reply};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

/// Counters for observing what reached the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryKvStats {
    /// Direct sends plus pipeline execs
    pub round_trips: u64,
    pub commands: u64,
    /// Write commands that changed or created data
    pub writes: u64,
}

#[derive(Default)]
struct KvInner {
    data: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    round_trips: AtomicU64,
    commands: AtomicU64,
    writes: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<KvInner>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MemoryKvStats {
        MemoryKvStats {
            round_trips: self.inner.round_trips.load(Ordering::SeqCst),
            commands: self.inner.commands.load(Ordering::SeqCst),
            writes: self.inner.writes.load(Ordering::SeqCst),
        }
    }

    pub fn key_count(&self) -> usize {
        self.inner
            .data
            .lock()
            .map(|data| data.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    /// Simulates a lost connection: sends and execs fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn round_trip(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(UnitError::transient("Connection refused"));
        }
        self.inner.round_trips.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_locked(&self, data: &mut HashMap<String, Entry>, command: &Command) -> Reply {
        trace!(command = %command, "applying command");
        self.inner.commands.fetch_add(1, Ordering::SeqCst);
        let (reply, wrote) = apply(data, command);
        if wrote {
            self.inner.writes.fetch_add(1, Ordering::SeqCst);
        }
        reply
    }

    fn apply_one(&self, command: &Command) -> Result<Reply> {
        let mut data = self.inner.data.lock()?;
        Ok(self.apply_locked(&mut data, command))
    }

    fn apply_all(&self, commands: &[Command]) -> Result<Vec<Reply>> {
        let mut data = self.inner.data.lock()?;
        Ok(commands
            .iter()
            .map(|command| self.apply_locked(&mut data, command))
            .collect())
    }
}

#[async_trait]
impl CommandEngine for MemoryKvStore {
    async fn send(&self, ctx: &Context, command: Command) -> Result<Reply> {
        self.round_trip(ctx)?;
        self.apply_one(&command)
    }
}

impl KeyValueClient for MemoryKvStore {
    type Pipeline = MemoryPipeline;

    fn pipeline(&self) -> MemoryPipeline {
        MemoryPipeline::new(self.clone(), false)
    }

    fn atomic_pipeline(&self) -> MemoryPipeline {
        MemoryPipeline::new(self.clone(), true)
    }
}

pub struct MemoryPipeline {
    store: MemoryKvStore,
    atomic: bool,
    queue: Mutex<Vec<Command>>,
    closed: AtomicBool,
}

impl MemoryPipeline {
    fn new(store: MemoryKvStore, atomic: bool) -> Self {
        Self {
            store,
            atomic,
            queue: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    fn close(&self) -> Result<Vec<Command>> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(UnitError::backend("Pipeline already closed"));
        }
        Ok(std::mem::take(&mut *self.queue.lock()?))
    }
}

#[async_trait]
impl CommandEngine for MemoryPipeline {
    async fn send(&self, ctx: &Context, command: Command) -> Result<Reply> {
        ctx.check()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(UnitError::backend("Pipeline already closed"));
        }
        let mut queue = self.queue.lock()?;
        queue.push(command);
        Ok(Reply::Queued(queue.len() - 1))
    }
}

#[async_trait]
impl Pipeline for MemoryPipeline {
    async fn exec(&self, ctx: &Context) -> Result<Vec<Reply>> {
        ctx.check()?;
        let commands = self.close()?;
        self.store.round_trip(ctx)?;

        if self.atomic {
            self.store.apply_all(&commands)
        } else {
            commands
                .iter()
                .map(|command| self.store.apply_one(command))
                .collect()
        }
    }

    fn discard(&self) -> Result<()> {
        self.close().map(|_| ())
    }

    fn len(&self) -> usize {
        self.queue
            .lock()
            .map(|queue| queue.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}

/// Applies one command; the flag reports whether data changed.
fn apply(data: &mut HashMap<String, Entry>, command: &Command) -> (Reply, bool) {
    match command {
        Command::Get { key } => match data.get(key) {
            None => (Reply::Nil, false),
            Some(Entry::Str(value)) => (Reply::Bulk(value.clone()), false),
            Some(_) => (Reply::Error(WRONGTYPE.to_string()), false),
        },
        Command::Set { key, value } => {
            data.insert(key.clone(), Entry::Str(value.clone()));
            (Reply::Ok, true)
        }
        Command::Del { keys } => {
            let removed = keys.iter().filter(|k| data.remove(*k).is_some()).count();
            (Reply::Integer(removed as i64), removed > 0)
        }
        Command::IncrBy { key, delta } => {
            let current = match data.get(key) {
                None => 0,
                Some(Entry::Str(value)) => match value.parse::<i64>() {
                    Ok(n) => n,
                    Err(_) => {
                        return (
                            Reply::Error("ERR value is not an integer or out of range".into()),
                            false,
                        );
                    }
                },
                Some(_) => return (Reply::Error(WRONGTYPE.to_string()), false),
            };
            match current.checked_add(*delta) {
                Some(next) => {
                    data.insert(key.clone(), Entry::Str(next.to_string()));
                    (Reply::Integer(next), true)
                }
                None => (Reply::Error("ERR increment or decrement would overflow".into()), false),
            }
        }
        Command::HSet { key, field, value } => {
            let entry = data
                .entry(key.clone())
                .or_insert_with(|| Entry::Hash(HashMap::new()));
            match entry {
                Entry::Hash(hash) => {
                    let added = hash.insert(field.clone(), value.clone()).is_none();
                    (Reply::Integer(added as i64), true)
                }
                _ => (Reply::Error(WRONGTYPE.to_string()), false),
            }
        }
        Command::HGet { key, field } => match data.get(key) {
            None => (Reply::Nil, false),
            Some(Entry::Hash(hash)) => match hash.get(field) {
                Some(value) => (Reply::Bulk(value.clone()), false),
                None => (Reply::Nil, false),
            },
            Some(_) => (Reply::Error(WRONGTYPE.to_string()), false),
        },
        Command::SAdd { key, members } => {
            let entry = data
                .entry(key.clone())
                .or_insert_with(|| Entry::Set(BTreeSet::new()));
            match entry {
                Entry::Set(set) => {
                    let added = members.iter().filter(|m| set.insert((*m).clone())).count();
                    (Reply::Integer(added as i64), added > 0)
                }
                _ => (Reply::Error(WRONGTYPE.to_string()), false),
            }
        }
        Command::SMembers { key } => match data.get(key) {
            None => (Reply::Array(Vec::new()), false),
            Some(Entry::Set(set)) => (
                Reply::Array(set.iter().cloned().map(Reply::Bulk).collect()),
                false,
            ),
            Some(_) => (Reply::Error(WRONGTYPE.to_string()), false),
        },
    }
}
