#![allow(dead_code)]

use async_trait::async_trait;
use entityvalue::audit::MemoryAuditLog;
use entityvalue::context::{EntityAction, EntityCache, EntityHooks};
use entityvalue::core::FieldMap;
use entityvalue::schema::{AuditLogMode, FieldDefault};
use entityvalue::{
    EntityContext, EntityDefinition, FieldInfo, FieldType, FieldValue, MemoryStore, Record,
    RelationshipInfo, Result, SchemaProvider, SchemaRegistry,
};
use std::sync::{Arc, Mutex};

/// Party with dependents, products with a create-only field and an FK,
/// and a create-only entity.
pub fn registry() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::new()
            .with(
                EntityDefinition::builder("Party")
                    .pk("partyId", FieldType::Text)
                    .field(FieldInfo::new("name", FieldType::Text).audit(AuditLogMode::Always))
                    .field(FieldInfo::new("nickname", FieldType::Text).audit(AuditLogMode::Always))
                    .field(FieldInfo::new("amount", FieldType::Decimal).audit(AuditLogMode::Always))
                    .field(FieldInfo::new("statusId", FieldType::Text).audit(AuditLogMode::UpdatesOnly))
                    .field(FieldInfo::new("comments", FieldType::Text))
                    .last_updated_stamp("lastUpdatedStamp")
                    .optimistic_lock(true)
                    .relationship(RelationshipInfo::many("contacts", "PartyContact").key("partyId", "partyId"))
                    .relationship(RelationshipInfo::many("roles", "PartyRole").key("partyId", "partyId"))
                    .build()
                    .unwrap(),
            )
            .with(
                EntityDefinition::builder("PartyContact")
                    .pk("partyId", FieldType::Text)
                    .pk("contactSeq", FieldType::Text)
                    .field(FieldInfo::new("kind", FieldType::Text))
                    .relationship(RelationshipInfo::one("party", "Party").key("partyId", "partyId"))
                    .build()
                    .unwrap(),
            )
            .with(
                EntityDefinition::builder("PartyRole")
                    .pk("partyId", FieldType::Text)
                    .pk("roleTypeId", FieldType::Text)
                    .relationship(RelationshipInfo::one("party", "Party").key("partyId", "partyId"))
                    .build()
                    .unwrap(),
            )
            .with(
                EntityDefinition::builder("ProductCategory")
                    .pk("categoryId", FieldType::Text)
                    .field(
                        FieldInfo::new("description", FieldType::Text)
                            .default_value(FieldDefault::Literal("Auto-created".into())),
                    )
                    .relationship(RelationshipInfo::many("products", "Product").key("categoryId", "categoryId"))
                    .build()
                    .unwrap(),
            )
            .with(
                EntityDefinition::builder("Product")
                    .pk("productId", FieldType::Text)
                    .field(FieldInfo::new("name", FieldType::Text))
                    .field(FieldInfo::new("createdBy", FieldType::Text).create_only())
                    .field(FieldInfo::new("categoryId", FieldType::Text))
                    .field(FieldInfo::new("price", FieldType::Decimal))
                    .relationship(
                        RelationshipInfo::one("category", "ProductCategory").key("categoryId", "categoryId"),
                    )
                    .build()
                    .unwrap(),
            )
            .with(
                EntityDefinition::builder("ContactMech")
                    .pk("contactMechId", FieldType::Text)
                    .field(FieldInfo::new("infoString", FieldType::Text))
                    .create_only(true)
                    .build()
                    .unwrap(),
            ),
    )
}

pub struct Harness {
    pub schema: Arc<SchemaRegistry>,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            schema: registry(),
            store: Arc::new(MemoryStore::new()),
            audit: Arc::new(MemoryAuditLog::new()),
        }
    }

    /// Context over the memory store with the audit sink attached.
    pub fn context(&self) -> EntityContext {
        EntityContext::new(self.schema.clone(), self.store.clone(), self.store.clone())
            .with_audit_sink(self.audit.clone())
    }

    pub fn definition(&self, entity_name: &str) -> Arc<EntityDefinition> {
        self.schema.require(entity_name).unwrap()
    }

    pub fn record(&self, entity_name: &str) -> Record {
        Record::new(self.definition(entity_name))
    }

    pub async fn seed(&self, entity_name: &str, entries: &[(&str, FieldValue)]) {
        self.store.seed(&self.definition(entity_name), map(entries)).await;
    }

    /// Stored row by primary key.
    pub async fn stored(&self, entity_name: &str, key: &[(&str, FieldValue)]) -> Option<FieldMap> {
        self.store.row(&self.definition(entity_name), &map(key)).await
    }

    /// Reads a record the way a find would return it.
    pub async fn load(&self, entity_name: &str, key: &[(&str, FieldValue)]) -> Record {
        let row = self.stored(entity_name, key).await.unwrap();
        Record::from_store(self.definition(entity_name), &row)
    }
}

pub fn map(entries: &[(&str, FieldValue)]) -> FieldMap {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn text(value: &str) -> FieldValue {
    FieldValue::from(value)
}

/// Hook calls as (entity, action, is_before), in call order.
#[derive(Default)]
pub struct RecordingHooks {
    pub calls: Mutex<Vec<(String, EntityAction, bool)>>,
    /// Field set to this value by every before-update hook.
    pub before_update_set: Option<(String, FieldValue)>,
}

impl RecordingHooks {
    pub fn calls(&self) -> Vec<(String, EntityAction, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntityHooks for RecordingHooks {
    async fn run(
        &self,
        entity_name: &str,
        record: &mut Record,
        operation: EntityAction,
        is_before: bool,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((entity_name.to_string(), operation, is_before));
        if let (EntityAction::Update, true, Some((field, value))) =
            (operation, is_before, &self.before_update_set)
        {
            record.set(field, value.clone())?;
        }
        Ok(())
    }
}

/// Cache invalidations as (entity, pk text, is_create).
#[derive(Default)]
pub struct RecordingCache {
    invalidated: Mutex<Vec<(String, String, bool)>>,
}

impl RecordingCache {
    pub fn invalidated(&self) -> Vec<(String, String, bool)> {
        self.invalidated.lock().unwrap().clone()
    }
}

impl EntityCache for RecordingCache {
    fn invalidate(&self, record: &Record, is_create: bool) {
        self.invalidated.lock().unwrap().push((
            record.entity_name().to_string(),
            record.primary_key_text(),
            is_create,
        ));
    }
}
