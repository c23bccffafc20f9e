// ============================================================================
// Execution Context
// ============================================================================
//
// Everything a lifecycle call needs from its surroundings is passed in
// explicitly through `EntityContext`: schema, store, query, authorization,
// hooks, caches, audit sink and the optional transaction write cache.
//
// ============================================================================

pub mod auth;
pub mod collaborators;
pub mod config;

pub use auth::{EntityPermission, PermissionAuthorizer};
pub use collaborators::{
    AuditLogSink, Authorizer, AuthzToken, DocumentFeed, EntityAction, EntityCache, EntityFind,
    EntityHooks, EntityRecordLock, ExpressionEvaluator, FieldEncryptor, Localizer, PhysicalStore,
    QueryStore, RecordLockObserver, SequenceSource,
};
pub use config::EntityConfig;

use crate::core::{DefaultConverter, Result, ValueConverter};
use crate::schema::SchemaProvider;
use crate::transaction::TransactionWriteCache;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Acting user for authorization and audit attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub visit_id: Option<String>,
    /// e.g. `en_US`
    pub locale: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn visit(mut self, visit_id: impl Into<String>) -> Self {
        self.visit_id = Some(visit_id.into());
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}

pub struct EntityContext {
    schema: Arc<dyn SchemaProvider>,
    store: Arc<dyn PhysicalStore>,
    query: Arc<dyn QueryStore>,
    converter: Arc<dyn ValueConverter>,
    authorizer: Option<Arc<dyn Authorizer>>,
    hooks: Option<Arc<dyn EntityHooks>>,
    documents: Option<Arc<dyn DocumentFeed>>,
    cache: Option<Arc<dyn EntityCache>>,
    audit_sink: Option<Arc<dyn AuditLogSink>>,
    encryptor: Option<Arc<dyn FieldEncryptor>>,
    lock_observer: Option<Arc<dyn RecordLockObserver>>,
    sequence: Option<Arc<dyn SequenceSource>>,
    write_cache: Option<Arc<dyn TransactionWriteCache>>,
    localizer: Option<Arc<dyn Localizer>>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    user: UserContext,
    transaction_start: Option<DateTime<Utc>>,
    change_reasons: HashMap<String, String>,
    config: EntityConfig,
    artifact_stack: Mutex<Vec<String>>,
}

impl EntityContext {
    pub fn new(
        schema: Arc<dyn SchemaProvider>,
        store: Arc<dyn PhysicalStore>,
        query: Arc<dyn QueryStore>,
    ) -> Self {
        Self {
            schema,
            store,
            query,
            converter: Arc::new(DefaultConverter),
            authorizer: None,
            hooks: None,
            documents: None,
            cache: None,
            audit_sink: None,
            encryptor: None,
            lock_observer: None,
            sequence: None,
            write_cache: None,
            localizer: None,
            evaluator: None,
            user: UserContext::default(),
            transaction_start: None,
            change_reasons: HashMap::new(),
            config: EntityConfig::default(),
            artifact_stack: Mutex::new(Vec::new()),
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn ValueConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentFeed>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditLogSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_encryptor(mut self, encryptor: Arc<dyn FieldEncryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn with_lock_observer(mut self, observer: Arc<dyn RecordLockObserver>) -> Self {
        self.lock_observer = Some(observer);
        self
    }

    pub fn with_sequence(mut self, sequence: Arc<dyn SequenceSource>) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_write_cache(mut self, write_cache: Arc<dyn TransactionWriteCache>) -> Self {
        self.write_cache = Some(write_cache);
        self
    }

    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.localizer = Some(localizer);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }

    pub fn with_transaction_start(mut self, start: DateTime<Utc>) -> Self {
        self.transaction_start = Some(start);
        self
    }

    /// Reason recorded on audit entries for changes to `field`.
    pub fn with_change_reason(mut self, field: impl Into<String>, reason: impl Into<String>) -> Self {
        self.change_reasons.insert(field.into(), reason.into());
        self
    }

    pub fn with_config(mut self, config: EntityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(&self) -> &Arc<dyn SchemaProvider> {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn PhysicalStore> {
        &self.store
    }

    pub fn query(&self) -> &Arc<dyn QueryStore> {
        &self.query
    }

    pub fn converter(&self) -> &dyn ValueConverter {
        self.converter.as_ref()
    }

    pub fn authorizer(&self) -> Option<&Arc<dyn Authorizer>> {
        self.authorizer.as_ref()
    }

    pub fn hooks(&self) -> Option<&Arc<dyn EntityHooks>> {
        self.hooks.as_ref()
    }

    pub fn documents(&self) -> Option<&Arc<dyn DocumentFeed>> {
        self.documents.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<dyn EntityCache>> {
        self.cache.as_ref()
    }

    pub fn audit_sink(&self) -> Option<&Arc<dyn AuditLogSink>> {
        self.audit_sink.as_ref()
    }

    pub fn encryptor(&self) -> Option<&Arc<dyn FieldEncryptor>> {
        self.encryptor.as_ref()
    }

    pub fn lock_observer(&self) -> Option<&Arc<dyn RecordLockObserver>> {
        self.lock_observer.as_ref()
    }

    pub fn sequence(&self) -> Option<&Arc<dyn SequenceSource>> {
        self.sequence.as_ref()
    }

    pub fn write_cache(&self) -> Option<&Arc<dyn TransactionWriteCache>> {
        self.write_cache.as_ref()
    }

    pub fn localizer(&self) -> Option<&Arc<dyn Localizer>> {
        self.localizer.as_ref()
    }

    pub fn evaluator(&self) -> Option<&Arc<dyn ExpressionEvaluator>> {
        self.evaluator.as_ref()
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    pub fn change_reason(&self, field: &str) -> Option<&str> {
        self.change_reasons
            .get(field)
            .map(String::as_str)
            .filter(|reason| !reason.is_empty())
    }

    /// Transaction start time, or the wall clock outside a transaction.
    pub fn now(&self) -> DateTime<Utc> {
        self.transaction_start.unwrap_or_else(Utc::now)
    }

    // ========================================================================
    // Artifact stack
    // ========================================================================

    fn push_artifact(&self, name: String) {
        if let Ok(mut stack) = self.artifact_stack.lock() {
            stack.push(name);
        }
    }

    fn pop_artifact(&self) {
        if let Ok(mut stack) = self.artifact_stack.lock() {
            stack.pop();
        }
    }

    /// Artifacts currently executing, innermost first.
    pub fn artifact_stack(&self) -> Vec<String> {
        self.artifact_stack
            .lock()
            .map(|stack| stack.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn artifact_depth(&self) -> usize {
        self.artifact_stack.lock().map(|stack| stack.len()).unwrap_or(0)
    }

    pub fn artifact_stack_text(&self) -> String {
        self.artifact_stack().join(", ")
    }
}

/// Scoped authorization: pushes on acquire, pops exactly once on drop.
pub struct AuthzGuard<'a> {
    ctx: &'a EntityContext,
    token: Option<AuthzToken>,
}

impl<'a> AuthzGuard<'a> {
    pub fn acquire(
        ctx: &'a EntityContext,
        entity_name: &str,
        action: EntityAction,
        skip_check: bool,
    ) -> Result<Self> {
        ctx.push_artifact(format!("{}:{}", entity_name, action));
        let token = match ctx.authorizer() {
            Some(authorizer) => {
                match authorizer.check_and_push(ctx.user(), entity_name, action, skip_check) {
                    Ok(token) => Some(token),
                    Err(err) => {
                        ctx.pop_artifact();
                        return Err(err);
                    }
                }
            }
            None => None,
        };
        Ok(Self { ctx, token })
    }
}

impl Drop for AuthzGuard<'_> {
    fn drop(&mut self) {
        if let (Some(token), Some(authorizer)) = (self.token.take(), self.ctx.authorizer()) {
            authorizer.pop(token);
        }
        self.ctx.pop_artifact();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;
    use crate::storage::MemoryStore;

    fn context() -> EntityContext {
        let store = Arc::new(MemoryStore::new());
        EntityContext::new(Arc::new(SchemaRegistry::new()), store.clone(), store)
    }

    #[test]
    fn test_guard_pops_on_drop() {
        let ctx = context();
        {
            let _outer = AuthzGuard::acquire(&ctx, "Party", EntityAction::Update, false).unwrap();
            let _inner = AuthzGuard::acquire(&ctx, "PartyRole", EntityAction::Create, false).unwrap();
            assert_eq!(ctx.artifact_stack_text(), "PartyRole:create, Party:update");
        }
        assert_eq!(ctx.artifact_depth(), 0);
    }

    #[test]
    fn test_denied_check_leaves_no_artifact() {
        let authorizer = Arc::new(PermissionAuthorizer::new());
        let ctx = context()
            .with_authorizer(authorizer.clone())
            .with_user(UserContext::new("nobody"));
        let err = AuthzGuard::acquire(&ctx, "Party", EntityAction::Delete, false);
        assert!(err.is_err());
        assert_eq!(ctx.artifact_depth(), 0);
        assert_eq!(authorizer.depth(), 0);
    }

    #[test]
    fn test_change_reason_ignores_empty() {
        let ctx = context()
            .with_change_reason("statusId", "customer request")
            .with_change_reason("comments", "");
        assert_eq!(ctx.change_reason("statusId"), Some("customer request"));
        assert_eq!(ctx.change_reason("comments"), None);
    }
}
