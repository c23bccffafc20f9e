// ============================================================================
// EntityValue Library
// ============================================================================

pub mod audit;
pub mod context;
pub mod core;
pub mod lifecycle;
pub mod prelude;
pub mod record;
pub mod relation;
pub mod schema;
pub mod sequence;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use crate::core::{EntityError, FieldType, FieldValue, Result, StoreError};
pub use crate::context::{EntityConfig, EntityContext, UserContext};
pub use crate::record::{Record, RecordState};
pub use crate::schema::{EntityDefinition, FieldInfo, RelationshipInfo, SchemaProvider, SchemaRegistry};

// Re-export the lifecycle API
pub use crate::lifecycle::{StoreCheck, check_against_store, create, create_or_update, delete, refresh, update};
pub use crate::relation::{RelatedQuery, find_related, find_related_count, find_related_one};

pub use crate::storage::MemoryStore;
pub use crate::transaction::TransactionCache;
