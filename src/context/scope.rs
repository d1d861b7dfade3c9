//! Ambient unit-of-work scope.
//!
//! A manager binds the unit it opened into the context it hands to the
//! callback; nested calls and engine resolution find it there. Each unit type
//! gets its own key, so a relational transaction is never mistaken for a
//! key-value pipeline.

use super::{Context, ContextKey};
use std::marker::PhantomData;

pub struct UnitKey<U>(PhantomData<fn() -> U>);

impl<U: Clone + Send + Sync + 'static> ContextKey for UnitKey<U> {
    type Value = U;
}

pub fn with_unit<U: Clone + Send + Sync + 'static>(ctx: &Context, unit: U) -> Context {
    ctx.with_value::<UnitKey<U>>(unit)
}

pub fn unit_from_context<U: Clone + Send + Sync + 'static>(ctx: &Context) -> Option<U> {
    ctx.value::<UnitKey<U>>()
}

pub fn has_unit<U: Clone + Send + Sync + 'static>(ctx: &Context) -> bool {
    ctx.contains::<UnitKey<U>>()
}
