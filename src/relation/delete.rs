use super::{RelatedQuery, find_related_by, relationship};
use crate::context::EntityContext;
use crate::core::{EntityError, FieldValue, Result};
use crate::lifecycle;
use crate::record::Record;
use crate::schema::{EntityDefinition, RelationshipInfo};
use async_recursion::async_recursion;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Deletes every record reached through the relationship, locking them for
/// update first. Returns the number deleted.
pub async fn delete_related(ctx: &EntityContext, record: &Record, relationship_name: &str) -> Result<usize> {
    let relationship = relationship(record, relationship_name)?;
    let related = find_related_by(ctx, record, relationship, &RelatedQuery::new().for_update(true)).await?;
    let count = related.len();
    for mut value in related {
        lifecycle::delete(ctx, &mut value).await?;
    }
    Ok(count)
}

fn is_listed(relationship: &RelationshipInfo, names: &HashSet<String>) -> bool {
    names.contains(&relationship.name)
        || relationship
            .short_alias
            .as_ref()
            .is_some_and(|alias| names.contains(alias))
}

/// First "many" relationship outside `to_delete` that still has rows.
async fn blocking_relationship(
    ctx: &EntityContext,
    record: &Record,
    to_delete: &HashSet<String>,
) -> Result<Option<String>> {
    for name in to_delete {
        relationship(record, name)?;
    }
    for rel in record.definition().relationships() {
        if rel.kind.is_type_one() || is_listed(rel, to_delete) {
            continue;
        }
        if super::find_related_count(ctx, record, &rel.name, false).await? > 0 {
            event!(
                Level::DEBUG,
                entity = %record.entity_name(),
                pk = %record.primary_key_text(),
                relationship = %rel.name,
                "not deleting, found record in relationship"
            );
            return Ok(Some(rel.name.clone()));
        }
    }
    Ok(None)
}

async fn delete_listed_then_self(
    ctx: &EntityContext,
    record: &mut Record,
    to_delete: &HashSet<String>,
) -> Result<()> {
    for name in to_delete {
        delete_related(ctx, record, name).await?;
    }
    lifecycle::delete(ctx, record).await
}

/// Deletes the rows of the listed relationships and then the record, unless
/// another "many" relationship still has rows. Returns `false`, deleting
/// nothing, in that case.
pub async fn delete_with_related(
    ctx: &EntityContext,
    record: &mut Record,
    to_delete: &HashSet<String>,
) -> Result<bool> {
    if blocking_relationship(ctx, record, to_delete).await?.is_some() {
        return Ok(false);
    }
    delete_listed_then_self(ctx, record, to_delete).await?;
    Ok(true)
}

/// Like [`delete_with_related`], but a blocking relationship is an error.
pub async fn delete_with_related_strict(
    ctx: &EntityContext,
    record: &mut Record,
    to_delete: &HashSet<String>,
) -> Result<()> {
    if let Some(blocking) = blocking_relationship(ctx, record, to_delete).await? {
        return Err(EntityError::RelatedRecordsExist {
            entity: record.entity_name().to_string(),
            primary_key: record.primary_key_text(),
            relationship: blocking,
        });
    }
    delete_listed_then_self(ctx, record, to_delete).await
}

/// Dependents found through one relationship, with the policy for them.
struct DependentStep {
    related: Arc<EntityDefinition>,
    reverse: RelationshipInfo,
    clear_ref: bool,
    dependents: Vec<Record>,
}

/// Deletes the record after dealing with every record that depends on it.
///
/// Dependents of an entity named in `clear_refs` get their reference fields
/// nulled and are updated. Other dependents are cascade-deleted, which is
/// only allowed for entities named in `allow_delete`. All dependents of the
/// record are checked against both rules before any of them is touched.
pub async fn delete_with_cascade(
    ctx: &EntityContext,
    record: &mut Record,
    clear_refs: &HashSet<String>,
    allow_delete: &HashSet<String>,
) -> Result<()> {
    let span = info_span!(
        "entity.delete_cascade",
        entity = %record.entity_name(),
        pk = %record.primary_key_text()
    );
    let mut visited = HashSet::new();
    cascade(ctx, record, clear_refs, allow_delete, &mut visited)
        .instrument(span)
        .await
}

#[async_recursion]
async fn cascade(
    ctx: &EntityContext,
    record: &mut Record,
    clear_refs: &HashSet<String>,
    allow_delete: &HashSet<String>,
    visited: &mut HashSet<(String, String)>,
) -> Result<()> {
    if !visited.insert((record.entity_name().to_string(), record.primary_key_text())) {
        return Ok(());
    }

    let definition = record.definition().clone();
    let mut steps = Vec::new();
    for rel in definition.relationships() {
        let Some((related, reverse)) = ctx.schema().find_reverse(&definition, rel) else {
            continue;
        };
        if !reverse.kind.is_type_one() {
            continue;
        }
        let dependents = find_related_by(ctx, record, rel, &RelatedQuery::new()).await?;
        if dependents.is_empty() {
            continue;
        }
        steps.push(DependentStep {
            clear_ref: related.is_named_in(clear_refs),
            related,
            reverse,
            dependents,
        });
    }

    for step in &steps {
        if step.clear_ref {
            if let Some(pk_field) = step.reverse.key_map.keys().find(|f| step.related.is_pk_field(f)) {
                return Err(EntityError::ClearPrimaryKeyField {
                    entity: definition.entity_name().to_string(),
                    dependent: step.related.entity_name().to_string(),
                    field: pk_field.clone(),
                });
            }
        } else if !step.related.is_named_in(allow_delete) {
            let dependent_key = step
                .dependents
                .iter()
                .find(|dep| !visited.contains(&(dep.entity_name().to_string(), dep.primary_key_text())))
                .map(|dep| dep.primary_key_text());
            if let Some(dependent_key) = dependent_key {
                return Err(EntityError::DisallowedCascadeDelete {
                    entity: definition.entity_name().to_string(),
                    primary_key: record.primary_key_text(),
                    dependent: step.related.entity_name().to_string(),
                    dependent_key,
                });
            }
        }
    }

    for step in steps {
        for mut dependent in step.dependents {
            if step.clear_ref {
                for field in step.reverse.key_map.keys() {
                    dependent.set(field, FieldValue::Null)?;
                }
                lifecycle::update(ctx, &mut dependent).await?;
            } else {
                cascade(ctx, &mut dependent, clear_refs, allow_delete, visited).await?;
            }
        }
    }

    lifecycle::delete(ctx, record).await
}
