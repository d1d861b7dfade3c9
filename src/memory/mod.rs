//! In-memory backends implementing the document and key-value collaborator
//! traits, for tests and embedded use.

pub mod document;
pub mod kv;

pub use document::{MemoryDocumentStore, MemorySession};
pub use kv::{MemoryKvStats, MemoryKvStore, MemoryPipeline};
