// ============================================================================
// Schema / Metadata
// ============================================================================
//
// Entity definitions are loaded up front and shared read-only by every
// record. The lifecycle engine only reads them through `SchemaProvider`.
//
// ============================================================================

pub mod entity;
pub mod field;
pub mod relationship;

pub use entity::{AuthorizeSkip, DEFAULT_LAST_UPDATED_STAMP, EntityDefinition, EntityDefinitionBuilder};
pub use field::{AuditLogMode, FieldDefault, FieldInfo, FieldReadPath};
pub use relationship::{RelationshipInfo, RelationshipKind};

use crate::core::{EntityError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Source of entity definitions.
pub trait SchemaProvider: Send + Sync {
    fn definition(&self, entity_name: &str) -> Option<Arc<EntityDefinition>>;

    fn require(&self, entity_name: &str) -> Result<Arc<EntityDefinition>> {
        self.definition(entity_name)
            .ok_or_else(|| EntityError::UnknownEntity(entity_name.to_string()))
    }

    /// Finds the relationship on the related entity that points back at
    /// `from`: by explicit reverse name first, then by inverted key map.
    fn find_reverse(
        &self,
        from: &EntityDefinition,
        relationship: &RelationshipInfo,
    ) -> Option<(Arc<EntityDefinition>, RelationshipInfo)> {
        let related = self.definition(&relationship.related_entity)?;
        let reverse = match &relationship.reverse_name {
            Some(name) => related.relationship(name).cloned(),
            None => related
                .relationships()
                .iter()
                .find(|candidate| relationship.is_reverse_of(from.entity_name(), candidate))
                .cloned(),
        }?;
        Some((related, reverse))
    }
}

/// In-memory schema provider keyed by full entity name and short alias.
#[derive(Default)]
pub struct SchemaRegistry {
    definitions: HashMap<String, Arc<EntityDefinition>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: EntityDefinition) -> Arc<EntityDefinition> {
        let shared = Arc::new(definition);
        if let Some(alias) = shared.short_alias() {
            self.definitions.insert(alias.to_string(), shared.clone());
        }
        self.definitions
            .insert(shared.entity_name().to_string(), shared.clone());
        shared
    }

    pub fn with(mut self, definition: EntityDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .definitions
            .values()
            .map(|ed| ed.entity_name())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl SchemaProvider for SchemaRegistry {
    fn definition(&self, entity_name: &str) -> Option<Arc<EntityDefinition>> {
        self.definitions.get(entity_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldType;

    #[test]
    fn test_reverse_lookup_through_registry() {
        let registry = SchemaRegistry::new()
            .with(
                EntityDefinition::builder("Party")
                    .pk("partyId", FieldType::Text)
                    .relationship(RelationshipInfo::many("roles", "PartyRole").key("partyId", "partyId"))
                    .build()
                    .unwrap(),
            )
            .with(
                EntityDefinition::builder("PartyRole")
                    .alias("Role")
                    .pk("partyId", FieldType::Text)
                    .pk("roleTypeId", FieldType::Text)
                    .relationship(RelationshipInfo::one("party", "Party").key("partyId", "partyId"))
                    .build()
                    .unwrap(),
            );

        let party = registry.require("Party").unwrap();
        let roles = party.relationship("roles").unwrap();
        let (related, reverse) = registry.find_reverse(&party, roles).unwrap();
        assert_eq!(related.entity_name(), "PartyRole");
        assert_eq!(reverse.name, "party");
        assert!(reverse.kind.is_type_one());

        assert!(registry.definition("Role").is_some());
        assert_eq!(registry.entity_names(), vec!["Party", "PartyRole"]);
        assert!(matches!(
            registry.require("Missing"),
            Err(EntityError::UnknownEntity(_))
        ));
    }
}
