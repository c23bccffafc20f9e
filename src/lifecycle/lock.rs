use crate::context::{EntityContext, EntityRecordLock};
use crate::record::Record;
use chrono::Utc;

/// Registers advisory locks for a record about to be written: one for the
/// record itself and one for every foreign-key relationship whose key fields
/// are all non-null.
pub fn register_mutate_lock(ctx: &EntityContext, record: &Record) {
    if !ctx.config().lock_tracking {
        return;
    }
    let Some(observer) = ctx.lock_observer() else {
        return;
    };

    let separator = ctx.config().pk_separator.as_str();
    let artifact_stack = ctx.artifact_stack();
    let registered_at = Utc::now();

    observer.register(EntityRecordLock {
        entity_name: record.entity_name().to_string(),
        pk_text: record.primary_key_text_with(separator),
        artifact_stack: artifact_stack.clone(),
        registered_at,
    });

    let definition = record.definition();
    for relationship in definition.relationships().iter().filter(|rel| rel.kind.is_fk()) {
        let Some(related) = ctx.schema().definition(&relationship.related_entity) else {
            continue;
        };

        let mut parts = Vec::with_capacity(related.pk_count());
        for pk in related.pk_fields() {
            let from_key = relationship
                .key_map
                .iter()
                .find(|(_, related_field)| *related_field == &pk.name)
                .and_then(|(field, _)| definition.field_index(field))
                .map(|idx| record.value_at(idx));
            let value = from_key.or_else(|| relationship.key_value_map.get(&pk.name));
            match value.and_then(|v| v.to_plain_string()) {
                Some(text) => parts.push(text),
                None => break,
            }
        }
        if parts.len() != related.pk_count() {
            continue;
        }

        observer.register(EntityRecordLock {
            entity_name: related.entity_name().to_string(),
            pk_text: parts.join(separator),
            artifact_stack: artifact_stack.clone(),
            registered_at,
        });
    }
}
