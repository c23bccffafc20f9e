use super::{FieldInfo, RelationshipInfo};
use crate::core::{EntityError, FieldMap, FieldType, FieldValue, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_LAST_UPDATED_STAMP: &str = "lastUpdatedStamp";

/// Which authorization checks the entity skips. Skipped actions are still
/// pushed onto the authorization context, just without a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthorizeSkip {
    pub create: bool,
    pub view: bool,
    /// Skip every action, including update and delete.
    pub all: bool,
}

/// Schema definition for one entity.
///
/// Built once and shared behind an `Arc` by every record of the entity; the
/// name-to-slot lookup table lives here and is never copied per record.
#[derive(Debug)]
pub struct EntityDefinition {
    entity_name: String,
    short_alias: Option<String>,
    fields: Vec<FieldInfo>,
    field_index: HashMap<String, usize>,
    pk_indexes: Vec<usize>,
    non_pk_indexes: Vec<usize>,
    relationships: Vec<RelationshipInfo>,
    last_updated_stamp: Option<usize>,
    optimistic_lock: bool,
    create_only: bool,
    authorize_skip: AuthorizeSkip,
    sequence_primary_prefix: Option<String>,
    sequence_secondary_padded_length: Option<usize>,
}

impl EntityDefinition {
    pub fn builder(entity_name: impl Into<String>) -> EntityDefinitionBuilder {
        EntityDefinitionBuilder::new(entity_name)
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn short_alias(&self) -> Option<&str> {
        self.short_alias.as_deref()
    }

    /// True when `names` contains the entity's full name or short alias.
    pub fn is_named_in(&self, names: &HashSet<String>) -> bool {
        names.contains(&self.entity_name)
            || self.short_alias.as_ref().is_some_and(|alias| names.contains(alias))
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_info(&self, name: &str) -> Option<&FieldInfo> {
        self.field_index.get(name).map(|idx| &self.fields[*idx])
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    pub fn field_at(&self, index: usize) -> &FieldInfo {
        &self.fields[index]
    }

    pub fn is_field(&self, name: &str) -> bool {
        self.field_index.contains_key(name)
    }

    pub fn is_pk_field(&self, name: &str) -> bool {
        self.field_info(name).is_some_and(|fi| fi.is_pk)
    }

    pub fn pk_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.pk_indexes.iter().map(|idx| &self.fields[*idx])
    }

    pub fn pk_field_names(&self) -> Vec<&str> {
        self.pk_fields().map(|fi| fi.name.as_str()).collect()
    }

    pub fn pk_count(&self) -> usize {
        self.pk_indexes.len()
    }

    /// Combined key text for a key map: single key as plain text, parts
    /// joined by `::` otherwise.
    pub fn primary_key_text(&self, key: &FieldMap) -> String {
        self.pk_fields()
            .map(|fi| {
                key.get(&fi.name)
                    .and_then(FieldValue::to_plain_string)
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join("::")
    }

    pub fn non_pk_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.non_pk_indexes.iter().map(|idx| &self.fields[*idx])
    }

    pub fn relationships(&self) -> &[RelationshipInfo] {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipInfo> {
        self.relationships.iter().find(|rel| rel.matches_name(name))
    }

    pub fn last_updated_stamp(&self) -> Option<&FieldInfo> {
        self.last_updated_stamp.map(|idx| &self.fields[idx])
    }

    pub fn optimistic_lock(&self) -> bool {
        self.optimistic_lock
    }

    pub fn is_create_only(&self) -> bool {
        self.create_only
    }

    pub fn authorize_skip(&self) -> AuthorizeSkip {
        self.authorize_skip
    }

    pub fn has_field_defaults(&self) -> bool {
        self.fields.iter().any(|fi| fi.default.is_some())
    }

    pub fn has_create_only_fields(&self) -> bool {
        self.fields.iter().any(|fi| fi.create_only)
    }

    pub fn needs_audit_log(&self) -> bool {
        self.fields.iter().any(|fi| fi.audit_log.is_enabled())
    }

    pub fn sequence_primary_prefix(&self) -> Option<&str> {
        self.sequence_primary_prefix.as_deref()
    }

    pub fn sequence_secondary_padded_length(&self) -> Option<usize> {
        self.sequence_secondary_padded_length
    }
}

pub struct EntityDefinitionBuilder {
    entity_name: String,
    short_alias: Option<String>,
    fields: Vec<FieldInfo>,
    relationships: Vec<RelationshipInfo>,
    optimistic_lock: bool,
    create_only: bool,
    authorize_skip: AuthorizeSkip,
    sequence_primary_prefix: Option<String>,
    sequence_secondary_padded_length: Option<usize>,
}

impl EntityDefinitionBuilder {
    fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            short_alias: None,
            fields: Vec::new(),
            relationships: Vec::new(),
            optimistic_lock: false,
            create_only: false,
            authorize_skip: AuthorizeSkip::default(),
            sequence_primary_prefix: None,
            sequence_secondary_padded_length: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.short_alias = Some(alias.into());
        self
    }

    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn pk(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field(FieldInfo::new(name, field_type).primary_key())
    }

    /// Declares the last-modification timestamp field.
    pub fn last_updated_stamp(self, name: impl Into<String>) -> Self {
        self.field(FieldInfo::new(name, FieldType::Timestamp).last_updated_stamp())
    }

    pub fn relationship(mut self, relationship: RelationshipInfo) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn optimistic_lock(mut self, enabled: bool) -> Self {
        self.optimistic_lock = enabled;
        self
    }

    /// Marks the whole entity create-only: no field changes on update, no delete.
    pub fn create_only(mut self, enabled: bool) -> Self {
        self.create_only = enabled;
        self
    }

    pub fn authorize_skip(mut self, skip: AuthorizeSkip) -> Self {
        self.authorize_skip = skip;
        self
    }

    pub fn sequence_primary_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sequence_primary_prefix = Some(prefix.into());
        self
    }

    pub fn sequence_secondary_padded_length(mut self, length: usize) -> Self {
        self.sequence_secondary_padded_length = Some(length);
        self
    }

    pub fn build(self) -> Result<EntityDefinition> {
        let invalid = |msg: String| EntityError::Configuration(msg);

        let mut fields = self.fields;
        let mut field_index = HashMap::with_capacity(fields.len());
        let mut pk_indexes = Vec::new();
        let mut non_pk_indexes = Vec::new();
        let mut last_updated_stamp = None;

        for (idx, field) in fields.iter_mut().enumerate() {
            field.index = idx;
            if self.create_only {
                field.create_only = true;
            }
            if field_index.insert(field.name.clone(), idx).is_some() {
                return Err(invalid(format!(
                    "Duplicate field '{}' in entity {}",
                    field.name, self.entity_name
                )));
            }
            if field.is_pk {
                pk_indexes.push(idx);
            } else {
                non_pk_indexes.push(idx);
            }
            if field.is_last_updated_stamp {
                if last_updated_stamp.is_some() || field.field_type != FieldType::Timestamp {
                    return Err(invalid(format!(
                        "Entity {} must declare at most one TIMESTAMP last-updated field",
                        self.entity_name
                    )));
                }
                last_updated_stamp = Some(idx);
            }
        }

        if self.optimistic_lock && last_updated_stamp.is_none() {
            return Err(invalid(format!(
                "Entity {} uses optimistic locking but has no last-updated field",
                self.entity_name
            )));
        }

        for rel in &self.relationships {
            if rel.key_map.is_empty() {
                return Err(EntityError::InvalidRelationship {
                    entity: self.entity_name.clone(),
                    relationship: rel.name.clone(),
                    reason: "no key-map entries".to_string(),
                });
            }
            if let Some(missing) = rel.key_map.keys().find(|f| !field_index.contains_key(*f)) {
                return Err(EntityError::InvalidRelationship {
                    entity: self.entity_name.clone(),
                    relationship: rel.name.clone(),
                    reason: format!("key field '{}' is not a field of the entity", missing),
                });
            }
        }

        Ok(EntityDefinition {
            entity_name: self.entity_name,
            short_alias: self.short_alias,
            fields,
            field_index,
            pk_indexes,
            non_pk_indexes,
            relationships: self.relationships,
            last_updated_stamp,
            optimistic_lock: self.optimistic_lock,
            create_only: self.create_only,
            authorize_skip: self.authorize_skip,
            sequence_primary_prefix: self.sequence_primary_prefix,
            sequence_secondary_padded_length: self.sequence_secondary_padded_length,
        })
    }

    pub fn build_shared(self) -> Result<Arc<EntityDefinition>> {
        self.build().map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AuditLogMode, RelationshipInfo};

    fn order() -> EntityDefinition {
        EntityDefinition::builder("OrderHeader")
            .pk("orderId", FieldType::Text)
            .field(FieldInfo::new("statusId", FieldType::Text).audit(AuditLogMode::Always))
            .field(FieldInfo::new("grandTotal", FieldType::Decimal))
            .last_updated_stamp(DEFAULT_LAST_UPDATED_STAMP)
            .optimistic_lock(true)
            .build()
            .unwrap()
    }

    #[test]
    fn test_field_slots_are_stable() {
        let ed = order();
        assert_eq!(ed.field_index("orderId"), Some(0));
        assert_eq!(ed.field_index("lastUpdatedStamp"), Some(3));
        assert_eq!(ed.pk_field_names(), vec!["orderId"]);
        assert_eq!(ed.non_pk_fields().count(), 3);
        assert!(ed.needs_audit_log());
        assert!(!ed.has_field_defaults());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = EntityDefinition::builder("Dup")
            .pk("id", FieldType::Text)
            .field(FieldInfo::new("id", FieldType::Text))
            .build()
            .unwrap_err();
        assert!(matches!(err, EntityError::Configuration(_)));
    }

    #[test]
    fn test_optimistic_lock_requires_stamp() {
        let err = EntityDefinition::builder("NoStamp")
            .pk("id", FieldType::Text)
            .optimistic_lock(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, EntityError::Configuration(_)));
    }

    #[test]
    fn test_relationship_key_fields_must_exist() {
        let err = EntityDefinition::builder("OrderItem")
            .pk("orderItemId", FieldType::Text)
            .relationship(RelationshipInfo::one("order", "OrderHeader").key("orderId", "orderId"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EntityError::InvalidRelationship { .. }));
    }

    #[test]
    fn test_create_only_entity_marks_every_field() {
        let ed = EntityDefinition::builder("Ledger")
            .pk("id", FieldType::Text)
            .field(FieldInfo::new("amount", FieldType::Decimal))
            .create_only(true)
            .build()
            .unwrap();
        assert!(ed.fields().iter().all(|fi| fi.create_only));
        assert!(ed.is_create_only());
    }
}
