// ============================================================================
// Collaborator contracts
// ============================================================================
//
// Narrow interfaces the lifecycle engine runs against. Anything that may
// touch storage is async; the rest is synchronous so it can be called from
// drop guards and read paths.
//
// ============================================================================

use super::UserContext;
use crate::audit::AuditLogEntry;
use crate::core::{FieldMap, FieldValue, Result, StoreResult};
use crate::record::Record;
use crate::schema::EntityDefinition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityAction {
    Create,
    Update,
    Delete,
    View,
}

impl EntityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::View => "view",
        }
    }
}

impl fmt::Display for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical row storage. `key` always carries the full primary key.
#[async_trait]
pub trait PhysicalStore: Send + Sync {
    /// Inserts a row made of the fields that have a value.
    async fn create_extended(
        &self,
        definition: &EntityDefinition,
        key: &FieldMap,
        fields: &FieldMap,
    ) -> StoreResult<()>;

    /// Writes exactly `changed` onto the row identified by `key`.
    async fn update_extended(
        &self,
        definition: &EntityDefinition,
        key: &FieldMap,
        changed: &FieldMap,
    ) -> StoreResult<()>;

    async fn delete_extended(&self, definition: &EntityDefinition, key: &FieldMap) -> StoreResult<()>;

    async fn refresh_extended(
        &self,
        definition: &EntityDefinition,
        key: &FieldMap,
    ) -> StoreResult<Option<FieldMap>>;
}

/// Condition-based lookup against one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityFind {
    pub entity_name: String,
    /// Field -> required value; all conditions must hold.
    pub conditions: FieldMap,
    pub order_by: Vec<String>,
    pub use_cache: bool,
    pub for_update: bool,
    pub disable_authz: bool,
}

impl EntityFind {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ..Self::default()
        }
    }

    pub fn condition(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }

    pub fn conditions(mut self, conditions: FieldMap) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn order_by(mut self, fields: Vec<String>) -> Self {
        self.order_by = fields;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn for_update(mut self, for_update: bool) -> Self {
        self.for_update = for_update;
        self
    }

    pub fn disable_authz(mut self) -> Self {
        self.disable_authz = true;
        self
    }
}

#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn find_list(&self, find: &EntityFind) -> StoreResult<Vec<FieldMap>>;

    async fn find_one(&self, find: &EntityFind) -> StoreResult<Option<FieldMap>> {
        Ok(self.find_list(find).await?.into_iter().next())
    }

    async fn find_count(&self, find: &EntityFind) -> StoreResult<u64> {
        Ok(self.find_list(find).await?.len() as u64)
    }
}

/// Handle returned by [`Authorizer::check_and_push`], handed back on pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthzToken(pub u64);

pub trait Authorizer: Send + Sync {
    /// Checks the action (unless `skip_check`) and pushes it onto the
    /// authorization context.
    fn check_and_push(
        &self,
        user: &UserContext,
        entity_name: &str,
        action: EntityAction,
        skip_check: bool,
    ) -> Result<AuthzToken>;

    fn pop(&self, token: AuthzToken);
}

/// Before/after extension logic keyed by entity and operation.
#[async_trait]
pub trait EntityHooks: Send + Sync {
    async fn run(
        &self,
        entity_name: &str,
        record: &mut Record,
        operation: EntityAction,
        is_before: bool,
    ) -> Result<()>;
}

/// Derived-document maintenance (search indexes, feeds).
#[async_trait]
pub trait DocumentFeed: Send + Sync {
    /// Called before the physical create or update with the store values
    /// the record is replacing (`None` on create).
    async fn check_and_register(
        &self,
        record: &Record,
        is_update: bool,
        original: Option<&FieldMap>,
    ) -> Result<()>;

    /// Called before the physical delete.
    async fn check_delete(&self, record: &Record) -> Result<()>;
}

pub trait EntityCache: Send + Sync {
    fn invalidate(&self, record: &Record, is_create: bool);
}

#[async_trait]
pub trait AuditLogSink: Send + Sync {
    async fn write(&self, entry: AuditLogEntry) -> Result<()>;
}

pub trait FieldEncryptor: Send + Sync {
    fn encrypt(&self, text: &str) -> Result<String>;

    fn decrypt(&self, text: &str) -> Result<String>;
}

#[async_trait]
pub trait SequenceSource: Send + Sync {
    async fn next_primary(&self, entity_name: &str) -> Result<String>;
}

/// Diagnostic record of a key mutated inside the current transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecordLock {
    pub entity_name: String,
    pub pk_text: String,
    pub artifact_stack: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

/// Advisory observer; never blocks the caller.
pub trait RecordLockObserver: Send + Sync {
    fn register(&self, lock: EntityRecordLock);
}

pub trait Localizer: Send + Sync {
    /// Localized text for a field value, or `None` when there is no entry
    /// for this exact `locale`.
    fn localize(
        &self,
        entity_name: &str,
        field_name: &str,
        pk_text: Option<&str>,
        original: &str,
        locale: &str,
    ) -> Option<String>;
}

pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates `expr` with `scope` as the variable bindings.
    fn evaluate(&self, expr: &str, scope: &FieldMap) -> Result<FieldValue>;
}
