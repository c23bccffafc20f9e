use super::{RelatedQuery, find_related_by, find_related_one_by};
use crate::context::EntityContext;
use crate::core::Result;
use crate::lifecycle::{self, DefaultScope, apply_field_defaults};
use crate::record::Record;
use async_recursion::async_recursion;
use std::collections::HashSet;

/// Checks that every foreign-key relationship resolves to a record.
///
/// Without `insert_dummy` the first missing record returns `false`. With it,
/// a minimal record is created for each missing one whose key can be filled
/// from this record (its own foreign keys checked first), and the result is
/// `false` if anything was missing. A dummy for a record already being
/// checked further up the chain is not created again.
pub async fn check_fks(ctx: &EntityContext, record: &Record, insert_dummy: bool) -> Result<bool> {
    let mut visited = HashSet::new();
    visited.insert((record.entity_name().to_string(), record.primary_key_text()));
    check_fks_visiting(ctx, record, insert_dummy, &mut visited).await
}

#[async_recursion]
async fn check_fks_visiting(
    ctx: &EntityContext,
    record: &Record,
    insert_dummy: bool,
    visited: &mut HashSet<(String, String)>,
) -> Result<bool> {
    let mut none_missing = true;
    for rel in record.definition().relationships() {
        if !rel.kind.is_fk() {
            continue;
        }
        if find_related_one_by(ctx, record, rel, &RelatedQuery::new())
            .await?
            .is_some()
        {
            continue;
        }
        if !insert_dummy {
            return Ok(false);
        }
        none_missing = false;

        let related = ctx.schema().require(&rel.related_entity)?;
        let mut dummy = Record::new(related);
        apply_field_defaults(ctx, &mut dummy, DefaultScope::All)?;
        for (field, related_field) in &rel.key_map {
            dummy.set(related_field, record.get(field)?.clone())?;
        }

        if dummy.contains_primary_key()
            && visited.insert((dummy.entity_name().to_string(), dummy.primary_key_text()))
        {
            check_fks_visiting(ctx, &dummy, true, visited).await?;
            lifecycle::create(ctx, &mut dummy).await?;
            tracing::warn!(
                entity = %dummy.entity_name(),
                pk = %dummy.primary_key_text(),
                "created dummy record for missing foreign key"
            );
        }
    }
    Ok(none_missing)
}

/// Records that depend on this one: every relationship whose reverse is
/// type one, skipping related entities named in `skip_entities`.
pub async fn find_related_fk(
    ctx: &EntityContext,
    record: &Record,
    skip_entities: &HashSet<String>,
) -> Result<Vec<Record>> {
    let definition = record.definition();
    let mut dependents = Vec::new();
    for rel in definition.relationships() {
        let Some((related, reverse)) = ctx.schema().find_reverse(definition, rel) else {
            continue;
        };
        if !reverse.kind.is_type_one() || related.is_named_in(skip_entities) {
            continue;
        }
        dependents.extend(find_related_by(ctx, record, rel, &RelatedQuery::new()).await?);
    }
    Ok(dependents)
}
