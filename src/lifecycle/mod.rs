// ============================================================================
// Record Lifecycle
// ============================================================================
//
// create / update / delete / refresh against the context's collaborators.
// Every operation pushes an authorization scope first and pops it exactly
// once on every exit path through `AuthzGuard`. Physical-store failures are
// wrapped as `EntityError::Persistence`; hook, authorization and audit
// errors pass through unchanged.
//
// ============================================================================

pub mod defaults;
pub mod lock;

pub use defaults::{DefaultScope, apply_field_defaults};
pub use lock::register_mutate_lock;

use crate::audit::emit_audit_log;
use crate::context::{AuthzGuard, EntityAction, EntityContext};
use crate::core::{EntityError, FieldMap, FieldValue, Result, StoreError};
use crate::record::Record;
use crate::transaction::CachedRow;
use tracing::{Instrument, Level, event, info_span};

async fn run_hooks(
    ctx: &EntityContext,
    entity_name: &str,
    record: &mut Record,
    action: EntityAction,
    is_before: bool,
) -> Result<()> {
    match ctx.hooks() {
        Some(hooks) => hooks.run(entity_name, record, action, is_before).await,
        None => Ok(()),
    }
}

fn invalidate_cache(ctx: &EntityContext, record: &Record, is_create: bool) {
    if let Some(cache) = ctx.cache() {
        cache.invalidate(record, is_create);
    }
}

// ============================================================================
// create
// ============================================================================

/// Inserts the record.
///
/// Defaults and the last-updated stamp are applied first; only fields that
/// hold a value are written. If the write fails the record is restored to
/// the caller's values so the call can be retried.
///
/// # Examples
///
/// ```
/// use entityvalue::{
///     EntityContext, EntityDefinition, FieldType, MemoryStore, Record, SchemaProvider, SchemaRegistry,
///     lifecycle,
/// };
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let schema = Arc::new(SchemaRegistry::new().with(
///     EntityDefinition::builder("Party").pk("partyId", FieldType::Text).build().unwrap(),
/// ));
/// let store = Arc::new(MemoryStore::new());
/// let ctx = EntityContext::new(schema.clone(), store.clone(), store.clone());
///
/// let mut party = Record::new(schema.require("Party").unwrap());
/// party.set("partyId", "P1").unwrap();
/// lifecycle::create(&ctx, &mut party).await.unwrap();
/// assert!(party.is_persisted());
/// # });
/// ```
pub async fn create(ctx: &EntityContext, record: &mut Record) -> Result<()> {
    let span = info_span!("entity.create", entity = %record.entity_name());
    create_inner(ctx, record).instrument(span).await
}

async fn create_inner(ctx: &EntityContext, record: &mut Record) -> Result<()> {
    let before = record.clone();
    let absorbed = match write_create(ctx, record).await {
        Ok(absorbed) => absorbed,
        Err(err) => {
            *record = before;
            return Err(err);
        }
    };

    let definition = record.definition().clone();
    invalidate_cache(ctx, record, true);
    emit_audit_log(ctx, record, false, None).await?;
    run_hooks(ctx, definition.entity_name(), record, EntityAction::Create, false).await?;

    record.set_synced_with_store();
    event!(Level::DEBUG, absorbed, "entity created");
    Ok(())
}

/// Defaults, authorization, before-hooks and the write itself. Returns
/// whether the write cache absorbed the insert.
async fn write_create(ctx: &EntityContext, record: &mut Record) -> Result<bool> {
    let definition = record.definition().clone();
    let entity_name = definition.entity_name();

    apply_field_defaults(ctx, record, DefaultScope::All)?;
    if let Some(stamp) = definition.last_updated_stamp() {
        if record.value_at(stamp.index).is_null() {
            record.put_known(stamp.index, FieldValue::Timestamp(ctx.now()));
        }
    }

    let skip = definition.authorize_skip();
    let _guard = AuthzGuard::acquire(ctx, entity_name, EntityAction::Create, skip.create || skip.all)?;

    run_hooks(ctx, entity_name, record, EntityAction::Create, true).await?;

    if let Some(documents) = ctx.documents() {
        documents.check_and_register(record, false, None).await?;
    }

    let absorbed = match ctx.write_cache() {
        Some(write_cache) => write_cache.create(record).await?,
        None => false,
    };
    if !absorbed {
        register_mutate_lock(ctx, record);
        let key = record.primary_key();
        ctx.store()
            .create_extended(&definition, &key, &record.set_values())
            .await
            .map_err(|e| EntityError::persistence("creating", entity_name, &key, e))?;
    }
    Ok(absorbed)
}

// ============================================================================
// update
// ============================================================================

/// Non-pk fields that differ from the shadow, and whether the last-updated
/// stamp is among them. The stamp only counts when a non-null stored value
/// existed.
fn changed_field_indexes(record: &Record) -> (Vec<usize>, bool) {
    let mut changed = Vec::new();
    let mut modified_stamp = false;
    for field in record.definition().non_pk_fields() {
        if !record.is_modified_at(field.index) {
            continue;
        }
        if field.is_last_updated_stamp {
            if record.shadow_at(field.index).is_none_or(FieldValue::is_null) {
                continue;
            }
            modified_stamp = true;
        }
        changed.push(field.index);
    }
    (changed, modified_stamp)
}

fn is_no_op(changed: &[usize], modified_stamp: bool) -> bool {
    changed.is_empty() || (changed.len() == 1 && modified_stamp)
}

/// Writes the changed non-pk fields of the record.
///
/// When the entity has defaults, create-only fields, audited fields or
/// optimistic locking, the current store row is fetched first and becomes
/// the shadow every decision is made against. An update with nothing
/// changed returns without touching the store, hooks or audit log.
pub async fn update(ctx: &EntityContext, record: &mut Record) -> Result<()> {
    let span = info_span!("entity.update", entity = %record.entity_name());
    update_inner(ctx, record).instrument(span).await
}

async fn update_inner(ctx: &EntityContext, record: &mut Record) -> Result<()> {
    let before = record.clone();
    let staged = match write_update(ctx, record).await {
        Ok(Some(staged)) => staged,
        Ok(None) => return Ok(()),
        Err(err) => {
            *record = before;
            return Err(err);
        }
    };

    let definition = record.definition().clone();
    if let Some((index, value)) = staged.stamp {
        record.put_known(index, value);
    }
    invalidate_cache(ctx, record, false);
    emit_audit_log(ctx, record, true, staged.original_values.as_ref()).await?;
    run_hooks(ctx, definition.entity_name(), record, EntityAction::Update, false).await?;

    record.set_synced_with_store();
    event!(
        Level::DEBUG,
        absorbed = staged.absorbed,
        fields = staged.field_count,
        "entity updated"
    );
    Ok(())
}

/// Outcome of a successful update write.
struct StagedUpdate {
    original_values: Option<FieldMap>,
    /// New last-updated stamp, applied to the record once the write succeeds.
    stamp: Option<(usize, FieldValue)>,
    absorbed: bool,
    field_count: usize,
}

/// Everything up to and including the physical write. `None` means the
/// update was a no-op. The caller restores the record when this fails.
async fn write_update(ctx: &EntityContext, record: &mut Record) -> Result<Option<StagedUpdate>> {
    let definition = record.definition().clone();
    let entity_name = definition.entity_name();

    apply_field_defaults(ctx, record, DefaultScope::PrimaryKey)?;

    if definition.has_field_defaults()
        || definition.has_create_only_fields()
        || definition.needs_audit_log()
        || definition.optimistic_lock()
    {
        let mut current = record.clone_record();
        if !refresh(ctx, &mut current).await? {
            let key = record.primary_key();
            return Err(EntityError::persistence(
                "updating",
                entity_name,
                &key,
                StoreError::RowNotFound(record.primary_key_text()),
            ));
        }
        record.set_shadow_from_store(&current.set_values());
    }

    apply_field_defaults(ctx, record, DefaultScope::NonPrimaryKey)?;

    let original_values = record.shadow_map();

    let skip = definition.authorize_skip();
    let _guard = AuthzGuard::acquire(ctx, entity_name, EntityAction::Update, skip.all)?;

    let (changed, modified_stamp) = changed_field_indexes(record);
    if is_no_op(&changed, modified_stamp) {
        event!(Level::TRACE, record = %record, "no changed non-pk fields, not updating");
        return Ok(None);
    }

    run_hooks(ctx, entity_name, record, EntityAction::Update, true).await?;

    // before-hooks may have changed values
    let (changed, modified_stamp) = changed_field_indexes(record);
    if is_no_op(&changed, modified_stamp) {
        event!(Level::TRACE, record = %record, "no changed non-pk fields after hooks, not updating");
        return Ok(None);
    }

    let create_only: Vec<String> = changed
        .iter()
        .map(|idx| definition.field_at(*idx))
        .filter(|field| field.create_only)
        .map(|field| field.name.clone())
        .collect();
    if !create_only.is_empty() {
        return Err(EntityError::ImmutableFieldChange {
            entity: entity_name.to_string(),
            fields: create_only,
        });
    }

    let mut stamp = None;
    if let Some(stamp_field) = definition.last_updated_stamp() {
        if definition.optimistic_lock() {
            let loaded = record.value_at(stamp_field.index);
            if let Some(stored) = record.shadow_at(stamp_field.index) {
                if !loaded.is_null() && !stored.is_null() && loaded != stored {
                    return Err(EntityError::OptimisticLock {
                        entity: entity_name.to_string(),
                        primary_key: record.primary_key_text(),
                        store_version: stored.to_string(),
                        loaded_version: loaded.to_string(),
                    });
                }
            }
        }
        if !modified_stamp {
            stamp = Some((stamp_field.index, FieldValue::Timestamp(ctx.now())));
        }
    }

    if let Some(documents) = ctx.documents() {
        documents
            .check_and_register(record, true, original_values.as_ref())
            .await?;
    }

    let mut changed_values: FieldMap = changed
        .iter()
        .map(|idx| {
            (
                definition.field_at(*idx).name.clone(),
                record.value_at(*idx).clone(),
            )
        })
        .collect();
    if let Some((index, value)) = &stamp {
        changed_values.insert(definition.field_at(*index).name.clone(), value.clone());
    }

    let absorbed = match ctx.write_cache() {
        Some(write_cache) => write_cache.update(record, &changed_values).await?,
        None => false,
    };
    if !absorbed {
        register_mutate_lock(ctx, record);
        let key = record.primary_key();
        ctx.store()
            .update_extended(&definition, &key, &changed_values)
            .await
            .map_err(|e| EntityError::persistence("updating", entity_name, &key, e))?;
    }

    Ok(Some(StagedUpdate {
        original_values,
        stamp,
        absorbed,
        field_count: changed_values.len(),
    }))
}

// ============================================================================
// delete
// ============================================================================

pub async fn delete(ctx: &EntityContext, record: &mut Record) -> Result<()> {
    let span = info_span!("entity.delete", entity = %record.entity_name());
    delete_inner(ctx, record).instrument(span).await
}

async fn delete_inner(ctx: &EntityContext, record: &mut Record) -> Result<()> {
    let definition = record.definition().clone();
    let entity_name = definition.entity_name();

    if definition.is_create_only() {
        return Err(EntityError::ImmutableEntity(entity_name.to_string()));
    }

    let _guard = AuthzGuard::acquire(
        ctx,
        entity_name,
        EntityAction::Delete,
        definition.authorize_skip().all,
    )?;

    run_hooks(ctx, entity_name, record, EntityAction::Delete, true).await?;

    if let Some(documents) = ctx.documents() {
        documents.check_delete(record).await?;
    }

    let absorbed = match ctx.write_cache() {
        Some(write_cache) => write_cache.delete(record).await?,
        None => false,
    };
    if !absorbed {
        register_mutate_lock(ctx, record);
        let key = record.primary_key();
        ctx.store()
            .delete_extended(&definition, &key)
            .await
            .map_err(|e| EntityError::persistence("deleting", entity_name, &key, e))?;
    }

    invalidate_cache(ctx, record, false);
    run_hooks(ctx, entity_name, record, EntityAction::Delete, false).await?;

    record.mark_deleted();
    event!(Level::DEBUG, absorbed, "entity deleted");
    Ok(())
}

// ============================================================================
// refresh
// ============================================================================

/// Reloads the record by primary key.
///
/// Returns `false` when the entity has no key fields, the key is incomplete,
/// or no row exists; the record is left untouched in those cases. On a hit
/// every field is replaced and the record is clean.
pub async fn refresh(ctx: &EntityContext, record: &mut Record) -> Result<bool> {
    let span = info_span!("entity.refresh", entity = %record.entity_name());
    refresh_inner(ctx, record).instrument(span).await
}

async fn refresh_inner(ctx: &EntityContext, record: &mut Record) -> Result<bool> {
    let definition = record.definition().clone();
    let entity_name = definition.entity_name();

    if definition.pk_count() == 0 {
        event!(Level::TRACE, "entity has no primary key fields, cannot refresh");
        return Ok(false);
    }

    apply_field_defaults(ctx, record, DefaultScope::All)?;
    if !record.contains_primary_key() {
        return Ok(false);
    }

    let skip = definition.authorize_skip();
    let _guard = AuthzGuard::acquire(ctx, entity_name, EntityAction::View, skip.view || skip.all)?;

    let key = record.primary_key();
    if let Some(write_cache) = ctx.write_cache() {
        match write_cache.refresh(&definition, &key).await? {
            CachedRow::Found(row) => {
                record.replace_from_store(&row);
                return Ok(true);
            }
            CachedRow::Deleted => return Ok(false),
            CachedRow::NotCached => {}
        }
    }

    let row = ctx
        .store()
        .refresh_extended(&definition, &key)
        .await
        .map_err(|e| EntityError::persistence("finding", entity_name, &key, e))?;
    let Some(row) = row else {
        return Ok(false);
    };

    record.replace_from_store(&row);
    if let Some(write_cache) = ctx.write_cache() {
        write_cache.one_put(record).await;
    }
    Ok(true)
}

// ============================================================================
// create_or_update / check_against_store
// ============================================================================

/// Updates when the record was read from the store and its key is
/// unchanged, or when a row with its key exists; creates otherwise.
pub async fn create_or_update(ctx: &EntityContext, record: &mut Record) -> Result<()> {
    let definition = record.definition().clone();
    if record.is_persisted() {
        let key_unchanged = definition.pk_fields().all(|pk| {
            record
                .shadow_at(pk.index)
                .is_none_or(|stored| stored == record.value_at(pk.index))
        });
        if key_unchanged {
            return update(ctx, record).await;
        }
    } else {
        apply_field_defaults(ctx, record, DefaultScope::PrimaryKey)?;
    }

    let mut existing = record.clone_record();
    if refresh(ctx, &mut existing).await? {
        update(ctx, record).await
    } else {
        create(ctx, record).await
    }
}

/// Outcome of comparing a record with its stored row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCheck {
    pub fields_checked: usize,
    pub messages: Vec<String>,
}

impl StoreCheck {
    pub fn matches(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Compares the non-pk fields that hold a value with the stored row,
/// skipping the last-updated stamp. Decimals compare by numeric value.
pub async fn check_against_store(ctx: &EntityContext, record: &Record) -> Result<StoreCheck> {
    let definition = record.definition();
    let mut check = StoreCheck::default();

    let mut stored = record.clone_record();
    if !refresh(ctx, &mut stored).await? {
        check.messages.push(format!(
            "Entity {} record not found for primary key {}",
            definition.entity_name(),
            crate::core::format_key(&record.primary_key())
        ));
        return Ok(check);
    }

    for field in definition.non_pk_fields() {
        if field.is_last_updated_stamp {
            continue;
        }
        let value = record.value_at(field.index);
        let stored_value = stored.value_at(field.index);
        if !value.is_null() && value != stored_value {
            check.messages.push(format!(
                "Field {}.{} did not match; check value [{}], store value [{}] for primary key {}",
                definition.entity_name(),
                field.name,
                value,
                stored_value,
                crate::core::format_key(&record.primary_key())
            ));
        }
        check.fields_checked += 1;
    }
    Ok(check)
}
