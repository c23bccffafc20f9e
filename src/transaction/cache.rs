use super::change::{Change, Folded};
use super::state::{TransactionId, TransactionState};
use super::{CachedRow, TransactionWriteCache};
use crate::context::PhysicalStore;
use crate::core::{EntityError, FieldMap, Result};
use crate::record::Record;
use crate::schema::EntityDefinition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};

/// (entity name, primary-key text)
type CacheKey = (String, String);

/// Counts of physical writes performed by a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

struct CacheInner {
    state: TransactionState,
    /// First-staged order of keys.
    order: Vec<CacheKey>,
    staged: HashMap<CacheKey, Change>,
    /// Rows read or written in this transaction.
    rows: HashMap<CacheKey, FieldMap>,
}

impl CacheInner {
    fn stage(&mut self, key: CacheKey, folded: Folded) {
        match folded {
            Folded::Staged(change) => {
                if !self.order.contains(&key) {
                    self.order.push(key.clone());
                }
                self.staged.insert(key, change);
            }
            Folded::Nothing => {
                self.order.retain(|k| k != &key);
                self.staged.remove(&key);
            }
        }
    }
}

/// Transaction-scoped write cache
///
/// Absorbs create/update/delete while the transaction is active and performs
/// the physical writes on [`flush`](Self::flush), one per key.
pub struct TransactionCache {
    id: TransactionId,
    store: Arc<dyn PhysicalStore>,
    inner: Mutex<CacheInner>,
}

fn record_key(record: &Record) -> CacheKey {
    (record.entity_name().to_string(), record.primary_key_text())
}

impl TransactionCache {
    pub fn new(store: Arc<dyn PhysicalStore>) -> Self {
        Self {
            id: TransactionId::new(),
            store,
            inner: Mutex::new(CacheInner {
                state: TransactionState::Active,
                order: Vec::new(),
                staged: HashMap::new(),
                rows: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub async fn state(&self) -> TransactionState {
        self.inner.lock().await.state
    }

    pub async fn staged_count(&self) -> usize {
        self.inner.lock().await.staged.len()
    }

    /// Staged changes in first-staged order.
    pub async fn staged_changes(&self) -> Vec<Change> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|key| inner.staged.get(key).cloned())
            .collect()
    }

    /// Performs every staged write against the physical store.
    ///
    /// A store failure aborts the transaction; writes already flushed are
    /// left to the store's own transaction handling.
    pub async fn flush(&self) -> Result<FlushSummary> {
        let span = info_span!("entity.txcache.flush", txn = %self.id);
        async {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_active() {
                return Err(EntityError::Transaction(format!(
                    "Cannot flush: transaction {} is {}",
                    self.id, inner.state
                )));
            }

            let order = std::mem::take(&mut inner.order);
            let mut staged = std::mem::take(&mut inner.staged);
            inner.rows.clear();

            let mut summary = FlushSummary::default();
            for key in order {
                let Some(change) = staged.remove(&key) else {
                    continue;
                };
                if let Err(err) = self.apply(&change, &mut summary).await {
                    inner.state = TransactionState::Aborted;
                    event!(Level::ERROR, error = %err, "transaction cache flush failed");
                    return Err(err);
                }
            }

            inner.state = TransactionState::Committed;
            event!(
                Level::DEBUG,
                creates = summary.creates,
                updates = summary.updates,
                deletes = summary.deletes,
                "transaction cache flushed"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn apply(&self, change: &Change, summary: &mut FlushSummary) -> Result<()> {
        let store = &self.store;
        match change {
            Change::Create {
                definition,
                key,
                fields,
            } => {
                store
                    .create_extended(definition, key, fields)
                    .await
                    .map_err(|e| EntityError::persistence("creating", change.entity_name(), key, e))?;
                summary.creates += 1;
            }
            Change::Update {
                definition,
                key,
                changed,
            } => {
                store
                    .update_extended(definition, key, changed)
                    .await
                    .map_err(|e| EntityError::persistence("updating", change.entity_name(), key, e))?;
                summary.updates += 1;
            }
            Change::Delete { definition, key } => {
                store
                    .delete_extended(definition, key)
                    .await
                    .map_err(|e| EntityError::persistence("deleting", change.entity_name(), key, e))?;
                summary.deletes += 1;
            }
            Change::Replace {
                definition,
                key,
                fields,
            } => {
                store
                    .delete_extended(definition, key)
                    .await
                    .map_err(|e| EntityError::persistence("deleting", change.entity_name(), key, e))?;
                store
                    .create_extended(definition, key, fields)
                    .await
                    .map_err(|e| EntityError::persistence("creating", change.entity_name(), key, e))?;
                summary.deletes += 1;
                summary.creates += 1;
            }
        }
        Ok(())
    }

    /// Discards every staged write.
    pub async fn rollback(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_active() {
            return Err(EntityError::Transaction(format!(
                "Cannot rollback: transaction {} is {}",
                self.id, inner.state
            )));
        }
        let discarded = inner.staged.len();
        inner.order.clear();
        inner.staged.clear();
        inner.rows.clear();
        inner.state = TransactionState::Aborted;
        event!(Level::DEBUG, txn = %self.id, discarded, "transaction cache rolled back");
        Ok(discarded)
    }
}

#[async_trait]
impl TransactionWriteCache for TransactionCache {
    async fn create(&self, record: &Record) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_active() {
            return Ok(false);
        }
        let key = record_key(record);
        let fields = record.set_values();
        let folded = match inner.staged.get(&key).cloned() {
            Some(existing) => existing.then_create(fields.clone())?,
            None => Folded::Staged(Change::Create {
                definition: record.definition().clone(),
                key: record.primary_key(),
                fields: fields.clone(),
            }),
        };
        inner.stage(key.clone(), folded);
        inner.rows.insert(key, fields);
        Ok(true)
    }

    async fn update(&self, record: &Record, changed: &FieldMap) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_active() {
            return Ok(false);
        }
        let key = record_key(record);
        let folded = match inner.staged.get(&key).cloned() {
            Some(existing) => existing.then_update(changed.clone())?,
            None => Folded::Staged(Change::Update {
                definition: record.definition().clone(),
                key: record.primary_key(),
                changed: changed.clone(),
            }),
        };
        inner.stage(key.clone(), folded);
        if let Some(row) = inner.rows.get_mut(&key) {
            row.extend(changed.clone());
        }
        Ok(true)
    }

    async fn delete(&self, record: &Record) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_active() {
            return Ok(false);
        }
        let key = record_key(record);
        let folded = match inner.staged.get(&key).cloned() {
            Some(existing) => existing.then_delete(),
            None => Folded::Staged(Change::Delete {
                definition: record.definition().clone(),
                key: record.primary_key(),
            }),
        };
        inner.stage(key.clone(), folded);
        inner.rows.remove(&key);
        Ok(true)
    }

    async fn refresh(&self, definition: &EntityDefinition, key: &FieldMap) -> Result<CachedRow> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_active() {
            return Ok(CachedRow::NotCached);
        }
        let cache_key = (definition.entity_name().to_string(), definition.primary_key_text(key));

        let staged_update = match inner.staged.get(&cache_key) {
            Some(Change::Delete { .. }) => return Ok(CachedRow::Deleted),
            Some(Change::Create { fields, .. }) | Some(Change::Replace { fields, .. }) => {
                return Ok(CachedRow::Found(fields.clone()));
            }
            Some(Change::Update { changed, .. }) => Some(changed.clone()),
            None => None,
        };

        match staged_update {
            Some(changed) => {
                let base = match inner.rows.get(&cache_key) {
                    Some(row) => Some(row.clone()),
                    None => self
                        .store
                        .refresh_extended(definition, key)
                        .await
                        .map_err(|e| {
                            EntityError::persistence("finding", definition.entity_name(), key, e)
                        })?,
                };
                let Some(mut row) = base else {
                    return Ok(CachedRow::Deleted);
                };
                row.extend(changed);
                inner.rows.insert(cache_key, row.clone());
                Ok(CachedRow::Found(row))
            }
            None => Ok(inner
                .rows
                .get(&cache_key)
                .cloned()
                .map(CachedRow::Found)
                .unwrap_or(CachedRow::NotCached)),
        }
    }

    async fn one_put(&self, record: &Record) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_active() {
            inner.rows.insert(record_key(record), record.set_values());
        }
    }
}
