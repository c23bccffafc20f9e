use crate::context::EntityContext;
use crate::core::{EntityError, FieldValue, Result};
use crate::record::Record;
use crate::schema::FieldDefault;

/// Which fields a defaults pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultScope {
    All,
    PrimaryKey,
    NonPrimaryKey,
}

impl DefaultScope {
    fn covers(&self, is_pk: bool) -> bool {
        match self {
            DefaultScope::All => true,
            DefaultScope::PrimaryKey => is_pk,
            DefaultScope::NonPrimaryKey => !is_pk,
        }
    }
}

/// Fills empty fields from their configured defaults.
///
/// A field counts as empty when its current value is empty, or when it is
/// unset and the shadow value is empty too.
pub fn apply_field_defaults(ctx: &EntityContext, record: &mut Record, scope: DefaultScope) -> Result<()> {
    let definition = record.definition().clone();
    if !definition.has_field_defaults() {
        return Ok(());
    }

    for field in definition.fields() {
        let Some(default) = &field.default else {
            continue;
        };
        if !scope.covers(field.is_pk) {
            continue;
        }

        let current = if record.is_set_at(field.index) {
            record.value_at(field.index)
        } else {
            record.shadow_at(field.index).unwrap_or(record.value_at(field.index))
        };
        if !current.is_empty() {
            continue;
        }

        let value = match default {
            FieldDefault::Literal(value) => value.clone(),
            FieldDefault::Now => FieldValue::Timestamp(ctx.now()),
            FieldDefault::CopyOf(source) => {
                let idx = definition.field_index(source).ok_or_else(|| EntityError::UnknownField {
                    entity: definition.entity_name().to_string(),
                    field: source.clone(),
                })?;
                let value = record.value_at(idx);
                if value.is_null() {
                    record.shadow_at(idx).cloned().unwrap_or(FieldValue::Null)
                } else {
                    value.clone()
                }
            }
            FieldDefault::Expression(expr) => {
                let evaluator = ctx.evaluator().ok_or_else(|| {
                    EntityError::Configuration(format!(
                        "Default for {}.{} is an expression but no evaluator is configured",
                        definition.entity_name(),
                        field.name
                    ))
                })?;
                let mut bindings = record.shadow_map().unwrap_or_default();
                bindings.extend(record.set_values());
                evaluator.evaluate(expr, &bindings)?
            }
        };

        if !value.is_null() {
            record.put_known(field.index, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExpressionEvaluator;
    use crate::core::{FieldMap, FieldType};
    use crate::schema::{EntityDefinition, FieldInfo, SchemaRegistry};
    use crate::storage::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    struct Concat;

    impl ExpressionEvaluator for Concat {
        fn evaluate(&self, expr: &str, scope: &FieldMap) -> Result<FieldValue> {
            let base = scope.get(expr).and_then(FieldValue::to_plain_string);
            Ok(base.map(|text| FieldValue::Text(format!("{}-copy", text))).unwrap_or(FieldValue::Null))
        }
    }

    fn definition() -> Arc<EntityDefinition> {
        EntityDefinition::builder("WorkEffort")
            .pk("workEffortId", FieldType::Text)
            .pk("seq", FieldType::Text)
            .field(FieldInfo::new("statusId", FieldType::Text).default_value(FieldDefault::Literal("WeInPlanning".into())))
            .field(FieldInfo::new("name", FieldType::Text))
            .field(FieldInfo::new("label", FieldType::Text).default_value(FieldDefault::CopyOf("name".into())))
            .field(FieldInfo::new("alias", FieldType::Text).default_value(FieldDefault::Expression("name".into())))
            .field(FieldInfo::new("createdDate", FieldType::Timestamp).default_value(FieldDefault::Now))
            .build_shared()
            .unwrap()
    }

    fn context() -> EntityContext {
        let store = Arc::new(MemoryStore::new());
        EntityContext::new(Arc::new(SchemaRegistry::new()), store.clone(), store)
            .with_evaluator(Arc::new(Concat))
            .with_transaction_start(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
    }

    #[test]
    fn test_defaults_fill_empty_fields_only() {
        let ctx = context();
        let mut record = Record::new(definition());
        record.set("name", "Plan").unwrap();
        record.set("statusId", "").unwrap();

        apply_field_defaults(&ctx, &mut record, DefaultScope::All).unwrap();

        assert_eq!(record.get("statusId").unwrap(), &FieldValue::from("WeInPlanning"));
        assert_eq!(record.get("label").unwrap(), &FieldValue::from("Plan"));
        assert_eq!(record.get("alias").unwrap(), &FieldValue::from("Plan-copy"));
        assert_eq!(
            record.get("createdDate").unwrap().as_timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_scope_limits_fields() {
        let ctx = context();
        let mut record = Record::new(definition());
        apply_field_defaults(&ctx, &mut record, DefaultScope::PrimaryKey).unwrap();
        assert!(!record.is_field_set("statusId"));

        apply_field_defaults(&ctx, &mut record, DefaultScope::NonPrimaryKey).unwrap();
        assert!(record.is_field_set("statusId"));
        // nothing to copy from and the expression yields null
        assert!(!record.is_field_set("label"));
        assert!(!record.is_field_set("alias"));
    }

    #[test]
    fn test_expression_default_needs_evaluator() {
        let store = Arc::new(MemoryStore::new());
        let ctx = EntityContext::new(Arc::new(SchemaRegistry::new()), store.clone(), store);
        let mut record = Record::new(definition());
        let err = apply_field_defaults(&ctx, &mut record, DefaultScope::All).unwrap_err();
        assert!(matches!(err, EntityError::Configuration(_)));
    }
}
