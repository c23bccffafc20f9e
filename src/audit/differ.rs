use super::AuditLogEntry;
use crate::context::EntityContext;
use crate::core::{EntityError, FieldMap, FieldValue, Result};
use crate::record::Record;
use crate::schema::{AuditLogMode, FieldInfo};

/// A field change selected for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
}

fn non_null(value: Option<&FieldValue>) -> Option<&FieldValue> {
    value.filter(|v| !v.is_null())
}

/// Fields whose change must be audited.
///
/// `Always` fields are audited on create when non-null and on update when
/// the value differs from `old_values`. `UpdatesOnly` fields are audited on
/// update only, and only once a non-null old value existed. Decimal values
/// compare numerically.
pub fn audited_changes(
    record: &Record,
    is_update: bool,
    old_values: Option<&FieldMap>,
) -> Vec<FieldChange> {
    let definition = record.definition();
    let mut changes = Vec::new();

    for fi in definition.fields() {
        let considered = match fi.audit_log {
            AuditLogMode::Off => false,
            AuditLogMode::Always => true,
            AuditLogMode::UpdatesOnly => is_update,
        };
        if !considered || !record.is_set_at(fi.index) {
            continue;
        }

        let value = non_null(Some(record.value_at(fi.index)));
        let old_value = non_null(old_values.and_then(|old| old.get(&fi.name)));

        if fi.audit_log == AuditLogMode::UpdatesOnly && old_value.is_none() {
            continue;
        }
        if is_update {
            match value {
                None if old_value.is_none() => continue,
                Some(new) if old_value == Some(new) => continue,
                _ => {}
            }
        } else if value.is_none() {
            continue;
        }

        changes.push(FieldChange {
            field: fi.name.clone(),
            old_value: old_value.cloned(),
            new_value: value.cloned(),
        });
    }

    changes
}

fn truncate(text: String, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text
    } else {
        text.chars().take(max_len).collect()
    }
}

fn value_text(
    ctx: &EntityContext,
    field: &FieldInfo,
    value: Option<&FieldValue>,
) -> Result<Option<String>> {
    let Some(text) = value.and_then(FieldValue::to_plain_string) else {
        return Ok(None);
    };
    let text = if field.encrypt {
        let encryptor = ctx.encryptor().ok_or_else(|| {
            EntityError::Audit(format!(
                "Field {} is encrypted but no encryptor is configured",
                field.name
            ))
        })?;
        encryptor.encrypt(&text)?
    } else {
        text
    };
    Ok(Some(truncate(text, ctx.config().audit_value_max_len)))
}

/// Primary, secondary and combined-rest key slots.
fn pk_slots(record: &Record) -> (Option<FieldValue>, Option<FieldValue>, Option<String>) {
    let mut pk_fields = record.definition().pk_fields();
    let primary = pk_fields.next().map(|fi| record.value_at(fi.index).clone());
    let secondary = pk_fields.next().map(|fi| record.value_at(fi.index).clone());
    let rest = pk_fields
        .map(|fi| {
            format!(
                "{}:'{}'",
                fi.name,
                record.value_at(fi.index).to_plain_string().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    (primary, secondary, (!rest.is_empty()).then_some(rest))
}

/// Writes an entry for every audited change. Returns the number written.
///
/// Sink failures are returned to the caller; nothing written before the
/// failure is compensated here.
pub async fn emit_audit_log(
    ctx: &EntityContext,
    record: &Record,
    is_update: bool,
    old_values: Option<&FieldMap>,
) -> Result<usize> {
    let definition = record.definition();
    if (is_update && old_values.is_none())
        || !definition.needs_audit_log()
        || !ctx.config().audit_log_enabled
    {
        return Ok(0);
    }
    let Some(sink) = ctx.audit_sink() else {
        return Ok(0);
    };

    let changes = audited_changes(record, is_update, old_values);
    if changes.is_empty() {
        return Ok(0);
    }

    let changed_date = ctx.now();
    let artifact_stack = truncate(ctx.artifact_stack_text(), ctx.config().artifact_stack_max_len);
    let (pk_primary_value, pk_secondary_value, pk_rest_combined_value) = pk_slots(record);
    let primary_key = record.primary_key();

    let mut written = 0;
    for change in changes {
        let Some(field) = definition.field_info(&change.field) else {
            continue;
        };
        let entry = AuditLogEntry {
            changed_entity_name: record.entity_name().to_string(),
            changed_field_name: change.field.clone(),
            pk_primary_value: pk_primary_value.clone(),
            pk_secondary_value: pk_secondary_value.clone(),
            pk_rest_combined_value: pk_rest_combined_value.clone(),
            primary_key: primary_key.clone(),
            old_value_text: value_text(ctx, field, change.old_value.as_ref())?,
            new_value_text: value_text(ctx, field, change.new_value.as_ref())?,
            change_reason: ctx.change_reason(&change.field).map(str::to_string),
            changed_date,
            changed_by_user_id: ctx.user().user_id.clone(),
            changed_in_visit_id: ctx.user().visit_id.clone(),
            artifact_stack: artifact_stack.clone(),
        };
        sink.write(entry).await?;
        written += 1;
    }

    tracing::debug!(entity = %record.entity_name(), written, "audit log entries written");
    Ok(written)
}
