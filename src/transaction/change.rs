// ============================================================================
// Staged writes
// ============================================================================
//
// Command Pattern for deferred physical writes. Each key holds at most one
// staged `Change`; later operations on the same key are folded into it so
// commit performs at most one physical mutation per key.
//
// ============================================================================

use crate::core::{EntityError, FieldMap, StoreError};
use crate::schema::EntityDefinition;
use std::sync::Arc;

/// A pending physical write for one key.
#[derive(Debug, Clone)]
pub enum Change {
    Create {
        definition: Arc<EntityDefinition>,
        key: FieldMap,
        fields: FieldMap,
    },

    Update {
        definition: Arc<EntityDefinition>,
        key: FieldMap,
        changed: FieldMap,
    },

    Delete {
        definition: Arc<EntityDefinition>,
        key: FieldMap,
    },

    /// Deleted and created again in the same transaction; flushes as a
    /// delete followed by a create.
    Replace {
        definition: Arc<EntityDefinition>,
        key: FieldMap,
        fields: FieldMap,
    },
}

/// Result of folding a new operation into the staged change for a key.
#[derive(Debug)]
pub enum Folded {
    Staged(Change),
    /// The operations cancel out.
    Nothing,
}

impl Change {
    pub fn entity_name(&self) -> &str {
        self.definition().entity_name()
    }

    pub fn definition(&self) -> &Arc<EntityDefinition> {
        match self {
            Change::Create { definition, .. }
            | Change::Update { definition, .. }
            | Change::Delete { definition, .. }
            | Change::Replace { definition, .. } => definition,
        }
    }

    pub fn key(&self) -> &FieldMap {
        match self {
            Change::Create { key, .. }
            | Change::Update { key, .. }
            | Change::Delete { key, .. }
            | Change::Replace { key, .. } => key,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Change::Delete { .. })
    }

    /// Full row contents when the change defines them.
    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            Change::Create { fields, .. } | Change::Replace { fields, .. } => Some(fields),
            _ => None,
        }
    }

    fn conflict(&self, verb: &str, source: StoreError) -> EntityError {
        EntityError::persistence(verb, self.entity_name(), self.key(), source)
    }

    /// Folds a create into this change.
    pub fn then_create(self, fields: FieldMap) -> Result<Folded, EntityError> {
        match self {
            Change::Delete { definition, key } => Ok(Folded::Staged(Change::Replace {
                definition,
                key,
                fields,
            })),
            other => Err(other.conflict(
                "creating",
                StoreError::DuplicateKey("record already created in this transaction".into()),
            )),
        }
    }

    /// Folds an update into this change.
    pub fn then_update(self, update: FieldMap) -> Result<Folded, EntityError> {
        match self {
            Change::Create {
                definition,
                key,
                mut fields,
            } => {
                fields.extend(update);
                Ok(Folded::Staged(Change::Create {
                    definition,
                    key,
                    fields,
                }))
            }
            Change::Replace {
                definition,
                key,
                mut fields,
            } => {
                fields.extend(update);
                Ok(Folded::Staged(Change::Replace {
                    definition,
                    key,
                    fields,
                }))
            }
            Change::Update {
                definition,
                key,
                mut changed,
            } => {
                changed.extend(update);
                Ok(Folded::Staged(Change::Update {
                    definition,
                    key,
                    changed,
                }))
            }
            deleted @ Change::Delete { .. } => Err(deleted.conflict(
                "updating",
                StoreError::RowNotFound("record deleted in this transaction".into()),
            )),
        }
    }

    /// Folds a delete into this change.
    pub fn then_delete(self) -> Folded {
        match self {
            Change::Create { .. } => Folded::Nothing,
            Change::Update {
                definition, key, ..
            }
            | Change::Replace {
                definition, key, ..
            }
            | Change::Delete { definition, key } => {
                Folded::Staged(Change::Delete { definition, key })
            }
        }
    }
}
