use crate::context::{EntityFind, PhysicalStore, QueryStore};
use crate::core::{FieldMap, FieldValue, StoreError, StoreResult};
use crate::schema::EntityDefinition;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// pk text -> row
type Table = BTreeMap<String, FieldMap>;

/// Snapshot of the physical operations a store has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOpCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub refreshes: usize,
    pub finds: usize,
}

impl StoreOpCounts {
    /// Physical writes only.
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Default)]
struct OpCounters {
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    refreshes: AtomicUsize,
    finds: AtomicUsize,
}

impl OpCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn snapshot(&self) -> StoreOpCounts {
        StoreOpCounts {
            creates: self.creates.load(AtomicOrdering::Relaxed),
            updates: self.updates.load(AtomicOrdering::Relaxed),
            deletes: self.deletes.load(AtomicOrdering::Relaxed),
            refreshes: self.refreshes.load(AtomicOrdering::Relaxed),
            finds: self.finds.load(AtomicOrdering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.creates,
            &self.updates,
            &self.deletes,
            &self.refreshes,
            &self.finds,
        ] {
            counter.store(0, AtomicOrdering::Relaxed);
        }
    }
}

/// In-memory physical store and query backend.
///
/// Each entity gets its own table handle so readers of one entity never wait
/// on writers of another.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    counters: OpCounters,
    /// Error returned by the next write, for failure-path tests.
    fail_next: Mutex<Option<StoreError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn table(&self, entity_name: &str) -> Arc<RwLock<Table>> {
        if let Some(table) = self.tables.read().await.get(entity_name) {
            return table.clone();
        }
        self.tables
            .write()
            .await
            .entry(entity_name.to_string())
            .or_default()
            .clone()
    }

    /// Inserts or overwrites a row without counting it as an operation.
    pub async fn seed(&self, definition: &EntityDefinition, row: FieldMap) {
        let key = definition.primary_key_text(&row);
        let table = self.table(definition.entity_name()).await;
        table.write().await.insert(key, row);
    }

    pub async fn row(&self, definition: &EntityDefinition, key: &FieldMap) -> Option<FieldMap> {
        let table = self.table(definition.entity_name()).await;
        let row = table.read().await.get(&definition.primary_key_text(key)).cloned();
        row
    }

    /// Rows of one entity in key order.
    pub async fn rows(&self, entity_name: &str) -> Vec<FieldMap> {
        let table = self.table(entity_name).await;
        let rows = table.read().await.values().cloned().collect();
        rows
    }

    pub async fn row_count(&self, entity_name: &str) -> usize {
        let table = self.table(entity_name).await;
        let count = table.read().await.len();
        count
    }

    pub fn op_counts(&self) -> StoreOpCounts {
        self.counters.snapshot()
    }

    pub fn reset_op_counts(&self) {
        self.counters.reset();
    }

    /// Makes the next create, update or delete fail with `error`.
    pub fn fail_next_write(&self, error: StoreError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    fn take_failure(&self) -> StoreResult<()> {
        match self.fail_next.lock() {
            Ok(mut slot) => slot.take().map_or(Ok(()), Err),
            Err(poisoned) => Err(StoreError::Backend(poisoned.to_string())),
        }
    }
}

fn describe(definition: &EntityDefinition, key: &FieldMap) -> String {
    format!("{} [{}]", definition.entity_name(), definition.primary_key_text(key))
}

/// A `Null` condition also matches a missing column.
fn row_matches(row: &FieldMap, conditions: &FieldMap) -> bool {
    conditions.iter().all(|(name, expected)| match row.get(name) {
        Some(actual) => actual == expected,
        None => expected.is_null(),
    })
}

/// Orders by each field in turn; a leading `-` sorts that field descending.
fn compare_rows(a: &FieldMap, b: &FieldMap, order_by: &[String]) -> Ordering {
    static NULL: FieldValue = FieldValue::Null;
    for spec in order_by {
        let (name, descending) = match spec.strip_prefix('-') {
            Some(name) => (name, true),
            None => (spec.as_str(), false),
        };
        let left = a.get(name).unwrap_or(&NULL);
        let right = b.get(name).unwrap_or(&NULL);
        let ord = if descending {
            right.compare(left)
        } else {
            left.compare(right)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl PhysicalStore for MemoryStore {
    async fn create_extended(
        &self,
        definition: &EntityDefinition,
        key: &FieldMap,
        fields: &FieldMap,
    ) -> StoreResult<()> {
        self.take_failure()?;
        OpCounters::bump(&self.counters.creates);
        let table = self.table(definition.entity_name()).await;
        let mut table = table.write().await;
        let pk_text = definition.primary_key_text(key);
        if table.contains_key(&pk_text) {
            return Err(StoreError::DuplicateKey(describe(definition, key)));
        }
        let mut row = fields.clone();
        row.extend(key.clone());
        table.insert(pk_text, row);
        Ok(())
    }

    async fn update_extended(
        &self,
        definition: &EntityDefinition,
        key: &FieldMap,
        changed: &FieldMap,
    ) -> StoreResult<()> {
        self.take_failure()?;
        OpCounters::bump(&self.counters.updates);
        let table = self.table(definition.entity_name()).await;
        let mut table = table.write().await;
        let row = table
            .get_mut(&definition.primary_key_text(key))
            .ok_or_else(|| StoreError::RowNotFound(describe(definition, key)))?;
        row.extend(changed.clone());
        Ok(())
    }

    async fn delete_extended(&self, definition: &EntityDefinition, key: &FieldMap) -> StoreResult<()> {
        self.take_failure()?;
        OpCounters::bump(&self.counters.deletes);
        let table = self.table(definition.entity_name()).await;
        let mut table = table.write().await;
        table
            .remove(&definition.primary_key_text(key))
            .map(|_| ())
            .ok_or_else(|| StoreError::RowNotFound(describe(definition, key)))
    }

    async fn refresh_extended(
        &self,
        definition: &EntityDefinition,
        key: &FieldMap,
    ) -> StoreResult<Option<FieldMap>> {
        OpCounters::bump(&self.counters.refreshes);
        let table = self.table(definition.entity_name()).await;
        let row = table.read().await.get(&definition.primary_key_text(key)).cloned();
        Ok(row)
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    async fn find_list(&self, find: &EntityFind) -> StoreResult<Vec<FieldMap>> {
        OpCounters::bump(&self.counters.finds);
        let table = self.table(&find.entity_name).await;
        let mut rows: Vec<FieldMap> = table
            .read()
            .await
            .values()
            .filter(|row| row_matches(row, &find.conditions))
            .cloned()
            .collect();
        if !find.order_by.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &find.order_by));
        }
        Ok(rows)
    }
}
