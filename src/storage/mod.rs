// ============================================================================
// Storage
// ============================================================================
//
// Reference backend for the physical-store and query contracts. Rows live in
// memory, one table per entity, keyed by primary-key text.
//
// ============================================================================

pub mod memory;

pub use memory::{MemoryStore, StoreOpCounts};
