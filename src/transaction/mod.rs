// ============================================================================
// Transaction-Scoped Write Cache
// ============================================================================
//
// While a transaction is active the lifecycle offers every operation to the
// write cache first. When the cache absorbs it, the physical store is not
// called; the cache performs the write itself at commit.
//
// ============================================================================

pub mod cache;
pub mod change;
pub mod lock;
pub mod state;

pub use cache::{FlushSummary, TransactionCache};
pub use change::{Change, Folded};
pub use lock::RecordLockTracker;
pub use state::{TransactionId, TransactionState};

use crate::core::{FieldMap, Result};
use crate::record::Record;
use crate::schema::EntityDefinition;
use async_trait::async_trait;

/// Outcome of a refresh offered to the write cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedRow {
    /// Row as seen by this transaction, staged writes applied.
    Found(FieldMap),
    /// Deleted earlier in this transaction.
    Deleted,
    /// Unknown to the cache; read the physical store.
    NotCached,
}

/// Each write returns `true` when the cache absorbed it.
#[async_trait]
pub trait TransactionWriteCache: Send + Sync {
    async fn create(&self, record: &Record) -> Result<bool>;

    async fn update(&self, record: &Record, changed: &FieldMap) -> Result<bool>;

    async fn delete(&self, record: &Record) -> Result<bool>;

    async fn refresh(&self, definition: &EntityDefinition, key: &FieldMap) -> Result<CachedRow>;

    /// Offers a row freshly read from the physical store.
    async fn one_put(&self, record: &Record);
}
