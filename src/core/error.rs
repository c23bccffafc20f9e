use thiserror::Error;

/// Failure reported by a physical-store collaborator.
///
/// The lifecycle layer never returns this directly; it is wrapped into
/// [`EntityError::Persistence`] together with the entity name and primary key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Row not found: {0}")]
    RowNotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum EntityError {
    #[error("The field name {field} is not valid for entity {entity}")]
    UnknownField { entity: String, field: String },

    #[error("Relationship {relationship} not found in entity {entity}")]
    UnknownRelationship { entity: String, relationship: String },

    #[error("Entity '{0}' not found")]
    UnknownEntity(String),

    #[error("Cannot set field {field}, this {entity} value is not mutable (it is read-only)")]
    ImmutableRecord { entity: String, field: String },

    #[error(
        "Record {entity} {primary_key} was updated by someone else at {store_version} which was after the version you loaded at {loaded_version}"
    )]
    OptimisticLock {
        entity: String,
        primary_key: String,
        store_version: String,
        loaded_version: String,
    },

    #[error("Cannot update create-only (immutable) fields {fields:?} on entity {entity}")]
    ImmutableFieldChange { entity: String, fields: Vec<String> },

    #[error("Entity {0} is create-only (immutable), cannot be deleted")]
    ImmutableEntity(String),

    #[error("Not deleting {entity} {primary_key}, found record in relationship {relationship}")]
    RelatedRecordsExist {
        entity: String,
        primary_key: String,
        relationship: String,
    },

    #[error("Cannot delete {entity} {primary_key}, found {dependent} {dependent_key} that depends on it")]
    DisallowedCascadeDelete {
        entity: String,
        primary_key: String,
        dependent: String,
        dependent_key: String,
    },

    #[error(
        "In cascade delete of {entity}, related entity {dependent} is in the clear ref set but field {field} is a primary key field and cannot be cleared"
    )]
    ClearPrimaryKeyField {
        entity: String,
        dependent: String,
        field: String,
    },

    #[error("Relationship {relationship} in entity {entity} is invalid: {reason}")]
    InvalidRelationship {
        entity: String,
        relationship: String,
        reason: String,
    },

    #[error("{message}")]
    Persistence {
        message: String,
        #[source]
        source: StoreError,
    },

    #[error("Authorization denied: {0}")]
    Authorization(String),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("Audit log error: {0}")]
    Audit(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Sequence error: {0}")]
    Sequence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, EntityError>;

impl EntityError {
    /// Wraps a store failure as `"Error <verb> <entity> <pk-map>"`.
    pub fn persistence(
        verb: &str,
        entity_name: &str,
        key: &crate::core::FieldMap,
        source: StoreError,
    ) -> Self {
        Self::Persistence {
            message: format!("Error {} {} {}", verb, entity_name, format_key(key)),
            source,
        }
    }

    /// True for the concurrent-modification failure raised by update.
    pub fn is_optimistic_lock(&self) -> bool {
        matches!(self, Self::OptimisticLock { .. })
    }

    /// The wrapped store error, if this is a persistence failure.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Persistence { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Renders a key map as `{name: value, ...}`.
pub fn format_key(key: &crate::core::FieldMap) -> String {
    let parts: Vec<String> = key
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

impl<T> From<std::sync::PoisonError<T>> for EntityError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<serde_json::Error> for EntityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}
