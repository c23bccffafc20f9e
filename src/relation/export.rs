use super::{RelatedQuery, find_related_by, find_related_one_by};
use crate::context::EntityContext;
use crate::core::{FieldValue, Result};
use crate::record::export::ENTITY_KEY;
use crate::record::{PlainMap, PlainValue, Record, write_xml};
use async_recursion::async_recursion;
use std::collections::{BTreeSet, HashSet};

type Visited = HashSet<(String, String)>;

fn visit_key(record: &Record) -> (String, String) {
    (record.entity_name().to_string(), record.primary_key_text())
}

/// Null-free map of the record's fields, tagged with its entity, with
/// dependents nested `levels` deep: type-one relationships as a map, others
/// as a list. Nested maps drop the key fields they inherit from their
/// parents. A record already exported is not exported again.
pub async fn plain_value_map(ctx: &EntityContext, record: &Record, levels: usize) -> Result<PlainMap> {
    let mut visited = Visited::new();
    visited.insert(visit_key(record));
    plain_map(ctx, record, levels, &BTreeSet::new(), &mut visited).await
}

#[async_recursion]
async fn plain_map(
    ctx: &EntityContext,
    record: &Record,
    levels: usize,
    parent_pk_fields: &BTreeSet<String>,
    visited: &mut Visited,
) -> Result<PlainMap> {
    let definition = record.definition();
    let mut map = PlainMap::new();
    for field in definition.fields() {
        let value = record.value_at(field.index);
        if value.is_null() || parent_pk_fields.contains(&field.name) {
            continue;
        }
        map.insert(field.name.clone(), PlainValue::Scalar(value.clone()));
    }
    let tag = definition.short_alias().unwrap_or(definition.entity_name());
    map.insert(ENTITY_KEY.to_string(), PlainValue::Scalar(FieldValue::from(tag)));

    if levels == 0 {
        return Ok(map);
    }

    let mut pk_fields = parent_pk_fields.clone();
    pk_fields.extend(definition.pk_field_names().into_iter().map(str::to_string));

    for rel in definition.relationships() {
        let Some((_, reverse)) = ctx.schema().find_reverse(definition, rel) else {
            continue;
        };
        if !reverse.kind.is_type_one() {
            continue;
        }

        if rel.kind.is_type_one() {
            let Some(related) = find_related_one_by(ctx, record, rel, &RelatedQuery::new()).await? else {
                continue;
            };
            if !visited.insert(visit_key(&related)) {
                continue;
            }
            let nested = plain_map(ctx, &related, levels - 1, &pk_fields, visited).await?;
            map.insert(rel.entry_name().to_string(), PlainValue::One(nested));
        } else {
            let mut nested = Vec::new();
            for related in find_related_by(ctx, record, rel, &RelatedQuery::new()).await? {
                if !visited.insert(visit_key(&related)) {
                    continue;
                }
                nested.push(plain_map(ctx, &related, levels - 1, &pk_fields, visited).await?);
            }
            if !nested.is_empty() {
                map.insert(rel.entry_name().to_string(), PlainValue::Many(nested));
            }
        }
    }
    Ok(map)
}

/// Appends the record and its dependents as XML to `out`, returning the
/// number of elements written.
pub async fn write_xml_text(
    ctx: &EntityContext,
    record: &Record,
    out: &mut String,
    prefix: &str,
    levels: usize,
) -> Result<usize> {
    let plain = plain_value_map(ctx, record, levels).await?;
    let definition = record.definition();
    let element = definition.short_alias().unwrap_or(definition.entity_name());
    Ok(write_xml(out, prefix, element, &plain, ctx.config().xml_attribute_max_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldMap, FieldType};
    use crate::schema::{EntityDefinition, FieldInfo, RelationshipInfo, SchemaProvider, SchemaRegistry};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::new()
                .with(
                    EntityDefinition::builder("Order")
                        .alias("ord")
                        .pk("orderId", FieldType::Text)
                        .field(FieldInfo::new("note", FieldType::Text))
                        .relationship(RelationshipInfo::many("items", "OrderItem").key("orderId", "orderId"))
                        .relationship(RelationshipInfo::one("customer", "Customer").key("customerId", "customerId"))
                        .field(FieldInfo::new("customerId", FieldType::Text))
                        .build()
                        .unwrap(),
                )
                .with(
                    EntityDefinition::builder("OrderItem")
                        .pk("orderId", FieldType::Text)
                        .pk("itemSeq", FieldType::Text)
                        .field(FieldInfo::new("qty", FieldType::Integer))
                        .relationship(RelationshipInfo::one("order", "Order").key("orderId", "orderId"))
                        .build()
                        .unwrap(),
                )
                .with(
                    EntityDefinition::builder("Customer")
                        .pk("customerId", FieldType::Text)
                        .build()
                        .unwrap(),
                ),
        )
    }

    async fn seeded() -> (Arc<SchemaRegistry>, EntityContext) {
        let schema = registry();
        let store = Arc::new(MemoryStore::new());
        let item = schema.require("OrderItem").unwrap();
        for (seq, qty) in [("01", 2), ("02", 5)] {
            let mut row = FieldMap::new();
            row.insert("orderId".into(), "O1".into());
            row.insert("itemSeq".into(), seq.into());
            row.insert("qty".into(), qty.into());
            store.seed(&item, row).await;
        }
        let mut customer = FieldMap::new();
        customer.insert("customerId".into(), "C1".into());
        store.seed(&schema.require("Customer").unwrap(), customer).await;
        let ctx = EntityContext::new(schema.clone(), store.clone(), store);
        (schema, ctx)
    }

    fn order(schema: &SchemaRegistry) -> Record {
        let mut row = FieldMap::new();
        row.insert("orderId".into(), "O1".into());
        row.insert("customerId".into(), "C1".into());
        row.insert("note".into(), FieldValue::Null);
        Record::from_store(schema.require("Order").unwrap(), &row)
    }

    #[tokio::test]
    async fn test_plain_map_nests_dependents_only() {
        let (schema, ctx) = seeded().await;
        let plain = plain_value_map(&ctx, &order(&schema), 2).await.unwrap();

        assert_eq!(plain.get(ENTITY_KEY), Some(&PlainValue::Scalar("ord".into())));
        assert!(!plain.contains_key("note"));
        // the customer does not point back as a dependent
        assert!(!plain.contains_key("customer"));

        let Some(PlainValue::Many(items)) = plain.get("items") else {
            panic!("items not nested: {plain:?}");
        };
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| !item.contains_key("orderId")));
        assert!(items.iter().all(|item| item.contains_key("itemSeq")));
    }

    #[tokio::test]
    async fn test_zero_levels_is_flat() {
        let (schema, ctx) = seeded().await;
        let plain = plain_value_map(&ctx, &order(&schema), 0).await.unwrap();
        assert!(!plain.contains_key("items"));
        assert_eq!(plain.get("orderId"), Some(&PlainValue::Scalar("O1".into())));
    }

    #[tokio::test]
    async fn test_xml_counts_nested_elements() {
        let (schema, ctx) = seeded().await;
        let mut out = String::new();
        let written = write_xml_text(&ctx, &order(&schema), &mut out, "", 1).await.unwrap();

        assert_eq!(written, 3);
        assert!(out.contains("<ord "));
        assert!(out.contains("<items itemSeq=\"01\""));
        assert!(out.trim_end().ends_with("</ord>"));
    }

    #[tokio::test]
    async fn test_plain_map_stops_at_cyclic_dependents() {
        let schema = Arc::new(
            SchemaRegistry::new()
                .with(
                    EntityDefinition::builder("Account")
                        .pk("accountId", FieldType::Text)
                        .relationship(RelationshipInfo::one("profile", "AccountProfile").key("accountId", "accountId"))
                        .build()
                        .unwrap(),
                )
                .with(
                    EntityDefinition::builder("AccountProfile")
                        .pk("accountId", FieldType::Text)
                        .field(FieldInfo::new("bio", FieldType::Text))
                        .relationship(RelationshipInfo::one("account", "Account").key("accountId", "accountId"))
                        .build()
                        .unwrap(),
                ),
        );
        let store = Arc::new(MemoryStore::new());
        let mut row = FieldMap::new();
        row.insert("accountId".into(), "A1".into());
        store.seed(&schema.require("Account").unwrap(), row.clone()).await;
        row.insert("bio".into(), "hi".into());
        store.seed(&schema.require("AccountProfile").unwrap(), row.clone()).await;
        let ctx = EntityContext::new(schema.clone(), store.clone(), store);

        let account = Record::from_store(schema.require("Account").unwrap(), &row);
        let plain = plain_value_map(&ctx, &account, 10).await.unwrap();

        let Some(PlainValue::One(profile)) = plain.get("profile") else {
            panic!("profile not nested: {plain:?}");
        };
        assert_eq!(profile.get("bio"), Some(&PlainValue::Scalar("hi".into())));
        assert!(!profile.contains_key("account"));
    }
}
