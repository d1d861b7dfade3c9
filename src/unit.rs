// ============================================================================
// Unit Finalization Core
// ============================================================================
//
// Shared by the relational, document and key-value managers:
// - UnitCell: Open -> terminal state machine, finalized exactly once
// - guarded(): panic boundary around the user callback
// - rollback_failure(): error precedence when cleanup itself fails
//
// ============================================================================

use crate::config::RollbackErrorPolicy;
use crate::core::{Result, UnitError, UnitId, UnitState};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

#[derive(Debug)]
pub(crate) struct UnitCell {
    id: UnitId,
    state: Mutex<UnitState>,
}

impl UnitCell {
    pub(crate) fn new() -> Self {
        Self {
            id: UnitId::next(),
            state: Mutex::new(UnitState::Open),
        }
    }

    pub(crate) fn id(&self) -> UnitId {
        self.id
    }

    pub(crate) fn state(&self) -> UnitState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fails with `Finalized` once the unit left `Open`.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.state() {
            UnitState::Open => Ok(()),
            state => Err(UnitError::Finalized(state)),
        }
    }

    /// Claims the single finalization of this unit.
    ///
    /// The terminal state records which path was taken, whether or not the
    /// backend call that follows succeeds.
    pub(crate) fn finish(&self, next: UnitState) -> Result<()> {
        let mut state = self.state.lock()?;
        if !state.is_open() {
            return Err(UnitError::Finalized(*state));
        }
        *state = next;
        Ok(())
    }
}

/// Runs a callback future, turning a panic into `UnitError::Panic`.
pub(crate) async fn guarded<Fut, T>(fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(UnitError::Panic(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub(crate) fn rollback_failure(
    policy: RollbackErrorPolicy,
    rollback: UnitError,
    original: UnitError,
) -> UnitError {
    let cause = match policy {
        RollbackErrorPolicy::Join => Some(Box::new(original)),
        RollbackErrorPolicy::Overwrite => None,
    };
    UnitError::Rollback {
        source: Box::new(rollback),
        cause,
    }
}
