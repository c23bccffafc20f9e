use crate::context::AuditLogSink;
use crate::core::{FieldMap, FieldValue, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One field change of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub changed_entity_name: String,
    pub changed_field_name: String,
    /// First primary-key field value.
    pub pk_primary_value: Option<FieldValue>,
    /// Second primary-key field value.
    pub pk_secondary_value: Option<FieldValue>,
    /// Remaining key parts as `name:'value'` joined by commas.
    pub pk_rest_combined_value: Option<String>,
    /// Every primary-key field by name.
    pub primary_key: FieldMap,
    pub old_value_text: Option<String>,
    pub new_value_text: Option<String>,
    pub change_reason: Option<String>,
    pub changed_date: DateTime<Utc>,
    pub changed_by_user_id: Option<String>,
    pub changed_in_visit_id: Option<String>,
    pub artifact_stack: String,
}

/// Audit sink keeping entries in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn entries_for(&self, entity_name: &str, field_name: &str) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.changed_entity_name == entity_name && e.changed_field_name == field_name)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// JSON array of every entry.
    pub async fn to_json(&self) -> Result<String> {
        let entries = self.entries.lock().await;
        Ok(serde_json::to_string(&*entries)?)
    }
}

#[async_trait]
impl AuditLogSink for MemoryAuditLog {
    async fn write(&self, entry: AuditLogEntry) -> Result<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}
