use crate::core::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// Single related record referenced through a foreign key.
    One,
    /// Single related record without a foreign-key constraint.
    OneNoFk,
    Many,
}

impl RelationshipKind {
    pub fn is_type_one(&self) -> bool {
        matches!(self, Self::One | Self::OneNoFk)
    }

    pub fn is_fk(&self) -> bool {
        matches!(self, Self::One)
    }
}

/// An edge in the schema relationship graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipInfo {
    pub name: String,
    pub short_alias: Option<String>,
    pub related_entity: String,
    pub kind: RelationshipKind,
    /// This entity's field -> related entity's field.
    pub key_map: BTreeMap<String, String>,
    /// Fixed constraints applied on the related entity.
    pub key_value_map: BTreeMap<String, FieldValue>,
    /// Name of the reverse relationship on the related entity, when it is not
    /// discoverable from the inverted key map.
    pub reverse_name: Option<String>,
}

impl RelationshipInfo {
    pub fn new(
        name: impl Into<String>,
        related_entity: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name: name.into(),
            short_alias: None,
            related_entity: related_entity.into(),
            kind,
            key_map: BTreeMap::new(),
            key_value_map: BTreeMap::new(),
            reverse_name: None,
        }
    }

    pub fn one(name: impl Into<String>, related_entity: impl Into<String>) -> Self {
        Self::new(name, related_entity, RelationshipKind::One)
    }

    pub fn many(name: impl Into<String>, related_entity: impl Into<String>) -> Self {
        Self::new(name, related_entity, RelationshipKind::Many)
    }

    pub fn key(mut self, field: impl Into<String>, related_field: impl Into<String>) -> Self {
        self.key_map.insert(field.into(), related_field.into());
        self
    }

    pub fn fixed(mut self, related_field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.key_value_map.insert(related_field.into(), value.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.short_alias = Some(alias.into());
        self
    }

    pub fn reverse(mut self, reverse_name: impl Into<String>) -> Self {
        self.reverse_name = Some(reverse_name.into());
        self
    }

    /// Name used for nested export entries: the alias when present.
    pub fn entry_name(&self) -> &str {
        self.short_alias.as_deref().unwrap_or(&self.name)
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name == name || self.short_alias.as_deref() == Some(name)
    }

    /// True when `other` (defined on the related entity) points back at
    /// `entity_name` through the inverted key map.
    pub fn is_reverse_of(&self, entity_name: &str, other: &RelationshipInfo) -> bool {
        if other.related_entity != entity_name || other.key_map.len() != self.key_map.len() {
            return false;
        }
        self.key_map
            .iter()
            .all(|(from, to)| other.key_map.get(to).is_some_and(|back| back == from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_detection_uses_inverted_key_map() {
        let items = RelationshipInfo::many("items", "OrderItem").key("orderId", "orderId");
        let header = RelationshipInfo::one("order", "OrderHeader").key("orderId", "orderId");
        let wrong = RelationshipInfo::one("other", "OrderHeader").key("parentId", "orderId");

        assert!(items.is_reverse_of("OrderHeader", &header));
        assert!(!items.is_reverse_of("OrderHeader", &wrong));
        assert!(!items.is_reverse_of("Invoice", &header));
    }

    #[test]
    fn test_kind_classification() {
        assert!(RelationshipKind::OneNoFk.is_type_one());
        assert!(!RelationshipKind::OneNoFk.is_fk());
        assert!(!RelationshipKind::Many.is_type_one());
    }
}
