// ============================================================================
// Relationship Engine
// ============================================================================
//
// Lookups, deletes and exports that follow the schema's relationship graph.
// A relationship lookup matches the related entity on the key-mapped values
// of the current record, the relationship's fixed values and any extra
// caller conditions.
//
// ============================================================================

pub mod delete;
pub mod export;
pub mod fk;

pub use delete::{delete_related, delete_with_cascade, delete_with_related, delete_with_related_strict};
pub use export::{plain_value_map, write_xml_text};
pub use fk::{check_fks, find_related_fk};

use crate::context::{EntityContext, EntityFind};
use crate::core::{EntityError, FieldMap, Result};
use crate::record::Record;
use crate::schema::RelationshipInfo;

/// Options for a relationship lookup.
#[derive(Debug, Clone, Default)]
pub struct RelatedQuery {
    pub conditions: FieldMap,
    pub order_by: Vec<String>,
    pub use_cache: bool,
    pub for_update: bool,
}

impl RelatedQuery {
    pub fn new() -> Self {
        Self::default()
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
}

fn relationship<'a>(record: &'a Record, name: &str) -> Result<&'a RelationshipInfo> {
    record
        .definition()
        .relationship(name)
        .ok_or_else(|| EntityError::UnknownRelationship {
            entity: record.entity_name().to_string(),
            relationship: name.to_string(),
        })
}

/// Related entity field -> value condition for one relationship.
fn related_conditions(record: &Record, relationship: &RelationshipInfo) -> Result<FieldMap> {
    let mut conditions = FieldMap::new();
    for (field, related_field) in &relationship.key_map {
        conditions.insert(related_field.clone(), record.get(field)?.clone());
    }
    conditions.extend(relationship.key_value_map.clone());
    Ok(conditions)
}

fn related_find(record: &Record, relationship: &RelationshipInfo, query: &RelatedQuery) -> Result<EntityFind> {
    Ok(EntityFind::new(relationship.related_entity.clone())
        .conditions(related_conditions(record, relationship)?)
        .conditions(query.conditions.clone())
        .order_by(query.order_by.clone())
        .use_cache(query.use_cache)
        .for_update(query.for_update))
}

pub(crate) async fn find_related_by(
    ctx: &EntityContext,
    record: &Record,
    relationship: &RelationshipInfo,
    query: &RelatedQuery,
) -> Result<Vec<Record>> {
    let related = ctx.schema().require(&relationship.related_entity)?;
    let find = related_find(record, relationship, query)?;
    let rows = ctx
        .query()
        .find_list(&find)
        .await
        .map_err(|e| EntityError::persistence("finding", related.entity_name(), &find.conditions, e))?;
    Ok(rows
        .iter()
        .map(|row| Record::from_store(related.clone(), row))
        .collect())
}

pub(crate) async fn find_related_one_by(
    ctx: &EntityContext,
    record: &Record,
    relationship: &RelationshipInfo,
    query: &RelatedQuery,
) -> Result<Option<Record>> {
    let related = ctx.schema().require(&relationship.related_entity)?;
    let find = related_find(record, relationship, query)?;
    let row = ctx
        .query()
        .find_one(&find)
        .await
        .map_err(|e| EntityError::persistence("finding", related.entity_name(), &find.conditions, e))?;
    Ok(row.map(|row| Record::from_store(related, &row)))
}

/// Records reached through the named relationship (name or alias).
pub async fn find_related(
    ctx: &EntityContext,
    record: &Record,
    relationship_name: &str,
    query: &RelatedQuery,
) -> Result<Vec<Record>> {
    let relationship = relationship(record, relationship_name)?;
    find_related_by(ctx, record, relationship, query).await
}

pub async fn find_related_one(
    ctx: &EntityContext,
    record: &Record,
    relationship_name: &str,
    use_cache: bool,
    for_update: bool,
) -> Result<Option<Record>> {
    let relationship = relationship(record, relationship_name)?;
    let query = RelatedQuery::new().use_cache(use_cache).for_update(for_update);
    find_related_one_by(ctx, record, relationship, &query).await
}

pub async fn find_related_count(
    ctx: &EntityContext,
    record: &Record,
    relationship_name: &str,
    use_cache: bool,
) -> Result<u64> {
    let relationship = relationship(record, relationship_name)?;
    let find = related_find(record, relationship, &RelatedQuery::new().use_cache(use_cache))?;
    ctx.query()
        .find_count(&find)
        .await
        .map_err(|e| EntityError::persistence("finding", &relationship.related_entity, &find.conditions, e))
}
