// ============================================================================
// Request Context
// ============================================================================
//
// Immutable, request-scoped context threaded through every unit-of-work call.
// Carries typed extension values, a cancellation token and an optional deadline.
// Deriving a child never mutates the parent; a child value shadows the parent's.
//
// ============================================================================

pub mod scope;

use crate::core::{Result, UnitError};
use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Typed key for a value stored in a [`Context`].
///
/// The key type itself is the lookup key, so two keys with the same value type
/// never observe each other's values.
pub trait ContextKey: 'static {
    type Value: Clone + Send + Sync + 'static;
}

#[derive(Clone)]
pub struct Context {
    values: im::HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

/// Cancels the context returned alongside it by [`Context::with_cancel`]
/// and every context derived from that one.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Context {
    /// Root context: no values, never cancelled, no deadline.
    pub fn background() -> Self {
        Self {
            values: im::HashMap::new(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_value<K: ContextKey>(&self, value: K::Value) -> Self {
        let value: Arc<dyn Any + Send + Sync> = Arc::new(value);
        Self {
            values: self.values.update(TypeId::of::<K>(), value),
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }

    pub fn value<K: ContextKey>(&self) -> Option<K::Value> {
        self.values
            .get(&TypeId::of::<K>())
            .and_then(|value| value.downcast_ref::<K::Value>())
            .cloned()
    }

    pub fn contains<K: ContextKey>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<K>())
    }

    /// Derives a context that can be cancelled independently of its parent.
    ///
    /// Cancelling the parent still cancels the child.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = self.cancel.child_token();
        let child = Self {
            values: self.values.clone(),
            cancel: token.clone(),
            deadline: self.deadline,
        };
        (child, CancelHandle { token })
    }

    /// Derives a context that expires at `deadline`, or at the parent's
    /// deadline when that one is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            values: self.values.clone(),
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Same values, but detached from the parent's cancellation and deadline.
    ///
    /// Used for cleanup work (rollback, end session) that must run even when
    /// the caller gave up.
    pub fn detached(&self) -> Self {
        Self {
            values: self.values.clone(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, `None` while it is still live.
    pub fn err(&self) -> Option<UnitError> {
        if self.cancel.is_cancelled() {
            return Some(UnitError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(UnitError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Runs `fut` unless the context finishes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.done() => Err(self.err().unwrap_or(UnitError::Cancelled)),
            result = fut => result,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}
