// ============================================================================
// Sequenced keys
// ============================================================================
//
// Primary sequencing takes the next value from the context's sequence source
// and places it, with the entity's prefix, in the first key field. Secondary
// sequencing numbers the last key field within the rows sharing the other
// key fields.
//
// ============================================================================

use crate::context::{EntityContext, EntityFind, SequenceSource};
use crate::core::{EntityError, FieldMap, Result};
use crate::record::Record;
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Zero-pads `value` to `width` digits.
pub fn padded_number(value: u64, width: usize) -> String {
    format!("{:0width$}", value, width = width)
}

/// Sets the first primary-key field from the sequence source.
pub async fn set_sequenced_primary(ctx: &EntityContext, record: &mut Record) -> Result<String> {
    let definition = record.definition().clone();
    let Some(pk) = definition.pk_fields().next() else {
        return Err(EntityError::Sequence(format!(
            "Entity {} has no primary key field to sequence",
            definition.entity_name()
        )));
    };
    let source = ctx.sequence().ok_or_else(|| {
        EntityError::Sequence(format!(
            "No sequence source configured for {}",
            definition.entity_name()
        ))
    })?;

    let next = source.next_primary(definition.entity_name()).await?;
    let value = match definition.sequence_primary_prefix() {
        Some(prefix) => format!("{}{}", prefix, next),
        None => next,
    };
    record.set(&pk.name, value.as_str())?;
    Ok(value)
}

/// Sets the last primary-key field to one more than the highest numeric
/// value among rows sharing the other key fields, zero-padded.
pub async fn set_sequenced_secondary(ctx: &EntityContext, record: &mut Record) -> Result<String> {
    let definition = record.definition().clone();
    if definition.pk_count() < 2 {
        return Err(EntityError::Sequence(format!(
            "Cannot sequence a secondary key on {} with fewer than 2 primary key fields",
            definition.entity_name()
        )));
    }

    let pk_names = definition.pk_field_names();
    let seq_field = pk_names[pk_names.len() - 1];
    let other_fields = &pk_names[..pk_names.len() - 1];
    let width = definition
        .sequence_secondary_padded_length()
        .unwrap_or(ctx.config().secondary_padded_length);

    record.remove(seq_field)?;

    let conditions: FieldMap = other_fields
        .iter()
        .map(|name| Ok((name.to_string(), record.get(name)?.clone())))
        .collect::<Result<_>>()?;
    let find = EntityFind::new(definition.entity_name())
        .conditions(conditions)
        .disable_authz();
    let rows = ctx
        .query()
        .find_list(&find)
        .await
        .map_err(|e| EntityError::persistence("finding", definition.entity_name(), &find.conditions, e))?;

    let mut highest: Option<u64> = None;
    for row in &rows {
        let Some(existing) = row.get(seq_field).filter(|v| !v.is_null()) else {
            continue;
        };
        match existing.as_i64().and_then(|n| u64::try_from(n).ok()) {
            Some(n) => highest = Some(highest.map_or(n, |h| h.max(n))),
            None => warn!(
                "Ignoring non-numeric secondary sequence value [{}] in {}.{}",
                existing,
                definition.entity_name(),
                seq_field
            ),
        }
    }

    let next = padded_number(highest.map_or(1, |h| h + 1), width);
    record.set(seq_field, next.as_str())?;
    Ok(next)
}

/// Sequence source holding per-entity counters in memory.
pub struct MemorySequence {
    start: u64,
    counters: Mutex<HashMap<String, u64>>,
}

impl MemorySequence {
    pub fn new() -> Self {
        Self::with_start(100_000)
    }

    /// First value handed out for each entity.
    pub fn with_start(start: u64) -> Self {
        Self {
            start,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn current(&self, entity_name: &str) -> Option<u64> {
        self.counters.lock().await.get(entity_name).copied()
    }
}

impl Default for MemorySequence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SequenceSource for MemorySequence {
    async fn next_primary(&self, entity_name: &str) -> Result<String> {
        let mut counters = self.counters.lock().await;
        let next = match counters.get(entity_name) {
            Some(last) => last + 1,
            None => self.start,
        };
        counters.insert(entity_name.to_string(), next);
        Ok(next.to_string())
    }
}
