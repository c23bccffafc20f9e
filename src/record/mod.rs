// ============================================================================
// Field Value Store
// ============================================================================
//
// A `Record` holds one value slot per field of its entity, addressed by the
// field's stable index in the shared `EntityDefinition`. A slot is `None`
// until the field is set; `Some(FieldValue::Null)` is an explicit null.
//
// Shadow bookkeeping:
// - `shadow` is the last-known store state. It is captured as a full copy of
//   the slots the first time a persisted record diverges, or replaced by a
//   store fetch during update.
// - `prior_shadow` is what `shadow` was at the last sync with the store and
//   answers "what was the original value" after the shadow is cleared.
//
// ============================================================================

pub mod export;

pub use export::{PlainMap, PlainValue, write_xml};

use crate::context::EntityContext;
use crate::core::{EntityError, FieldMap, FieldValue, Result, ValueConverter};
use crate::schema::{EntityDefinition, FieldInfo, FieldReadPath};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Separator between primary-key parts in the combined key text.
pub const PK_SEPARATOR: &str = "::";

static NULL: FieldValue = FieldValue::Null;

type Slots = Vec<Option<FieldValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    New,
    Persisted,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct Record {
    definition: Arc<EntityDefinition>,
    values: Slots,
    shadow: Option<Slots>,
    prior_shadow: Option<Slots>,
    touched: BTreeSet<usize>,
    persisted: bool,
    mutable: bool,
    state: RecordState,
    /// (field index, locale) -> localized text, misses included.
    localized: HashMap<(usize, String), Option<String>>,
}

impl Record {
    /// Empty, not yet persisted record.
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        let slots = vec![None; definition.field_count()];
        Self {
            definition,
            values: slots,
            shadow: None,
            prior_shadow: None,
            touched: BTreeSet::new(),
            persisted: false,
            mutable: true,
            state: RecordState::New,
            localized: HashMap::new(),
        }
    }

    /// Record populated from a store read. Unknown keys in `row` are ignored.
    pub fn from_store(definition: Arc<EntityDefinition>, row: &FieldMap) -> Self {
        let mut record = Self::new(definition);
        for (name, value) in row {
            if let Some(idx) = record.definition.field_index(name) {
                record.values[idx] = Some(value.clone());
            }
        }
        record.prior_shadow = Some(record.values.clone());
        record.persisted = true;
        record.state = RecordState::Persisted;
        record
    }

    pub fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    pub fn entity_name(&self) -> &str {
        self.definition.entity_name()
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn field(&self, name: &str) -> Result<&FieldInfo> {
        self.definition
            .field_info(name)
            .ok_or_else(|| EntityError::UnknownField {
                entity: self.entity_name().to_string(),
                field: name.to_string(),
            })
    }

    /// Raw stored value; unset fields read as null.
    pub fn get(&self, name: &str) -> Result<&FieldValue> {
        let idx = self.field(name)?.index;
        Ok(self.value_at(idx))
    }

    #[inline]
    pub fn value_at(&self, index: usize) -> &FieldValue {
        self.values[index].as_ref().unwrap_or(&NULL)
    }

    /// Reads a field through its read path: localized text for the user's
    /// locale, or the computed expression result.
    pub fn read(&mut self, ctx: &EntityContext, name: &str) -> Result<FieldValue> {
        let field = self.field(name)?.clone();
        match &field.read_path {
            FieldReadPath::Simple => Ok(self.value_at(field.index).clone()),
            FieldReadPath::Localized => Ok(self.read_localized(ctx, &field)),
            FieldReadPath::Computed { expr } => match ctx.evaluator() {
                Some(evaluator) => evaluator.evaluate(expr, &self.get_map()),
                None => Ok(self.value_at(field.index).clone()),
            },
        }
    }

    fn read_localized(&mut self, ctx: &EntityContext, field: &FieldInfo) -> FieldValue {
        let original = self.value_at(field.index).clone();
        let (Some(localizer), Some(locale)) = (ctx.localizer(), ctx.user().locale.clone()) else {
            return original;
        };
        let Some(text) = original.as_str().filter(|text| !text.is_empty()) else {
            return original;
        };

        let key = (field.index, locale.clone());
        if let Some(cached) = self.localized.get(&key) {
            return cached.clone().map(FieldValue::Text).unwrap_or(original);
        }

        let pk_text = (self.definition.pk_count() == 1 && !field.is_pk)
            .then(|| self.primary_key_text());
        let mut candidates = vec![locale.clone()];
        if let Some(language) = locale.split(['_', '-']).next().filter(|lang| *lang != locale) {
            candidates.push(language.to_string());
        }
        candidates.push("default".to_string());

        let found = candidates.iter().find_map(|candidate| {
            localizer.localize(
                self.entity_name(),
                &field.name,
                pk_text.as_deref(),
                text,
                candidate,
            )
        });
        self.localized.insert(key, found.clone());
        found.map(FieldValue::Text).unwrap_or(original)
    }

    pub fn get_string(&self, converter: &dyn ValueConverter, name: &str) -> Result<Option<String>> {
        let field = self.field(name)?;
        Ok(converter.convert_to_string(field.field_type, self.value_at(field.index)))
    }

    /// Every field of the entity, unset fields as null.
    pub fn get_map(&self) -> FieldMap {
        self.definition
            .fields()
            .iter()
            .map(|fi| (fi.name.clone(), self.value_at(fi.index).clone()))
            .collect()
    }

    /// Only the fields that have been set.
    pub fn set_values(&self) -> FieldMap {
        self.definition
            .fields()
            .iter()
            .filter_map(|fi| {
                self.values[fi.index]
                    .as_ref()
                    .map(|value| (fi.name.clone(), value.clone()))
            })
            .collect()
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.definition.is_field(name)
    }

    pub fn is_field_set(&self, name: &str) -> bool {
        self.definition
            .field_index(name)
            .is_some_and(|idx| self.values[idx].is_some())
    }

    pub(crate) fn is_set_at(&self, index: usize) -> bool {
        self.values[index].is_some()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn check_mutable(&self, field: &str) -> Result<()> {
        if self.mutable {
            Ok(())
        } else {
            Err(EntityError::ImmutableRecord {
                entity: self.entity_name().to_string(),
                field: field.to_string(),
            })
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<&mut Self> {
        let idx = self.field(name)?.index;
        self.check_mutable(name)?;
        self.put_at(idx, Some(value.into()));
        Ok(self)
    }

    pub fn set_string(
        &mut self,
        converter: &dyn ValueConverter,
        name: &str,
        text: &str,
    ) -> Result<&mut Self> {
        let field = self.field(name)?;
        let (idx, field_type) = (field.index, field.field_type);
        self.check_mutable(name)?;
        let value = converter.convert_from_string(field_type, text)?;
        self.put_at(idx, Some(value));
        Ok(self)
    }

    /// Sets every key of `fields` that names a field; other keys are ignored.
    pub fn set_all(&mut self, fields: &FieldMap) -> Result<&mut Self> {
        self.check_mutable("*")?;
        for (name, value) in fields {
            if let Some(idx) = self.definition.field_index(name) {
                self.put_at(idx, Some(value.clone()));
            }
        }
        Ok(self)
    }

    /// Copies matching entries of `fields` into the record.
    ///
    /// With a `prefix` the source key is the prefix followed by the field
    /// name with its first letter upper-cased. `pks` restricts the copy to
    /// primary-key fields (`Some(true)`) or non-key fields (`Some(false)`).
    /// Empty source values are skipped unless `set_if_empty`.
    pub fn set_fields(
        &mut self,
        fields: &FieldMap,
        set_if_empty: bool,
        prefix: Option<&str>,
        pks: Option<bool>,
    ) -> Result<&mut Self> {
        self.check_mutable("*")?;
        let definition = self.definition.clone();
        for fi in definition.fields() {
            if pks.is_some_and(|only_pks| only_pks != fi.is_pk) {
                continue;
            }
            let source_key = match prefix.filter(|p| !p.is_empty()) {
                Some(prefix) => format!("{}{}", prefix, capitalize(&fi.name)),
                None => fi.name.clone(),
            };
            let Some(value) = fields.get(&source_key) else {
                continue;
            };
            if value.is_empty() && !set_if_empty {
                continue;
            }
            self.put_at(fi.index, Some(value.clone()));
        }
        Ok(self)
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<FieldValue>> {
        let idx = self.field(name)?.index;
        self.check_mutable(name)?;
        let previous = self.values[idx].clone();
        if previous.is_some() {
            self.capture_shadow();
        }
        self.values[idx] = None;
        Ok(previous)
    }

    /// Unsets every field.
    pub fn clear(&mut self) -> Result<()> {
        self.check_mutable("*")?;
        self.capture_shadow();
        self.values.iter_mut().for_each(|slot| *slot = None);
        Ok(())
    }

    /// Forces the field into the next update even when its value is unchanged.
    pub fn touch_field(&mut self, name: &str) -> Result<&mut Self> {
        let idx = self.field(name)?.index;
        self.check_mutable(name)?;
        self.touched.insert(idx);
        Ok(self)
    }

    fn put_at(&mut self, index: usize, value: Option<FieldValue>) {
        if self.persisted && self.shadow.is_none() && self.values[index] != value {
            self.capture_shadow();
        }
        self.values[index] = value;
    }

    /// Slot write used by the lifecycle for defaults and stamps.
    pub(crate) fn put_known(&mut self, index: usize, value: FieldValue) {
        self.put_at(index, Some(value));
    }

    fn capture_shadow(&mut self) {
        if self.persisted && self.shadow.is_none() {
            self.shadow = Some(self.values.clone());
        }
    }

    // ========================================================================
    // Dirty tracking
    // ========================================================================

    pub fn is_field_modified(&self, name: &str) -> bool {
        self.definition
            .field_index(name)
            .is_some_and(|idx| self.is_modified_at(idx))
    }

    pub(crate) fn is_modified_at(&self, index: usize) -> bool {
        let Some(current) = &self.values[index] else {
            return false;
        };
        if self.touched.contains(&index) {
            return true;
        }
        if !self.persisted {
            return true;
        }
        match &self.shadow {
            None => false,
            Some(shadow) => match &shadow[index] {
                None => true,
                Some(stored) => stored != current,
            },
        }
    }

    pub fn is_dirty(&self) -> bool {
        if !self.persisted || !self.touched.is_empty() {
            return true;
        }
        match &self.shadow {
            None => false,
            Some(shadow) => shadow
                .iter()
                .zip(&self.values)
                .any(|(stored, current)| match (stored, current) {
                    (Some(stored), Some(current)) => stored != current,
                    (None, None) => false,
                    _ => true,
                }),
        }
    }

    pub(crate) fn shadow_at(&self, index: usize) -> Option<&FieldValue> {
        self.shadow.as_ref().and_then(|shadow| shadow[index].as_ref())
    }

    pub(crate) fn has_shadow(&self) -> bool {
        self.shadow.is_some()
    }

    /// Shadow slots that hold a value, by field name.
    pub(crate) fn shadow_map(&self) -> Option<FieldMap> {
        let shadow = self.shadow.as_ref()?;
        Some(
            self.definition
                .fields()
                .iter()
                .filter_map(|fi| {
                    shadow[fi.index]
                        .as_ref()
                        .map(|value| (fi.name.clone(), value.clone()))
                })
                .collect(),
        )
    }

    pub(crate) fn prior_shadow_at(&self, index: usize) -> Option<&FieldValue> {
        self.prior_shadow
            .as_ref()
            .and_then(|prior| prior[index].as_ref())
    }

    /// Store value as last known: the shadow, else the current value.
    pub fn original_value(&self, name: &str) -> Result<&FieldValue> {
        let idx = self.field(name)?.index;
        Ok(self.shadow_at(idx).unwrap_or_else(|| self.value_at(idx)))
    }

    /// Value at the last store sync, else the original value.
    pub fn old_value(&self, name: &str) -> Result<&FieldValue> {
        let idx = self.field(name)?.index;
        Ok(self
            .prior_shadow_at(idx)
            .or_else(|| self.shadow_at(idx))
            .unwrap_or_else(|| self.value_at(idx)))
    }

    /// Installs a full store row as the shadow. Fields the caller has not
    /// set are filled from the row.
    pub(crate) fn set_shadow_from_store(&mut self, row: &FieldMap) {
        let mut shadow: Slots = vec![None; self.definition.field_count()];
        for fi in self.definition.fields() {
            if let Some(value) = row.get(&fi.name) {
                shadow[fi.index] = Some(value.clone());
                if self.values[fi.index].is_none() {
                    self.values[fi.index] = Some(value.clone());
                }
            }
        }
        self.shadow = Some(shadow);
        self.persisted = true;
        if self.state == RecordState::New {
            self.state = RecordState::Persisted;
        }
    }

    /// Replaces every slot with the store row and marks the record clean.
    pub(crate) fn replace_from_store(&mut self, row: &FieldMap) {
        for fi in self.definition.fields() {
            self.values[fi.index] = row.get(&fi.name).cloned();
        }
        self.shadow = None;
        self.prior_shadow = Some(self.values.clone());
        self.touched.clear();
        self.localized.clear();
        self.persisted = true;
        self.state = RecordState::Persisted;
    }

    /// Marks the record as in sync with the store after a write.
    pub fn set_synced_with_store(&mut self) {
        self.prior_shadow = self.shadow.take();
        self.touched.clear();
        self.persisted = true;
        self.state = RecordState::Persisted;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = RecordState::Deleted;
    }

    /// Records served from a read-only cache may not be mutated.
    pub fn mark_from_cache(&mut self) {
        self.mutable = false;
    }

    /// Mutable copy carrying the same values and sync state.
    pub fn clone_record(&self) -> Record {
        let mut copy = self.clone();
        copy.mutable = true;
        copy
    }

    // ========================================================================
    // Primary key
    // ========================================================================

    pub fn primary_key(&self) -> FieldMap {
        self.definition
            .pk_fields()
            .map(|fi| (fi.name.clone(), self.value_at(fi.index).clone()))
            .collect()
    }

    pub fn primary_key_text(&self) -> String {
        self.primary_key_text_with(PK_SEPARATOR)
    }

    /// Single key as plain text, or the parts joined by `separator`.
    pub fn primary_key_text_with(&self, separator: &str) -> String {
        self.definition
            .pk_fields()
            .map(|fi| self.value_at(fi.index).to_plain_string().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// True when every key field holds a non-empty value.
    pub fn contains_primary_key(&self) -> bool {
        self.definition.pk_count() > 0
            && self
                .definition
                .pk_fields()
                .all(|fi| !self.value_at(fi.index).is_empty())
    }

    pub fn primary_key_matches(&self, other: &Record) -> bool {
        self.entity_name() == other.entity_name()
            && self
                .definition
                .pk_fields()
                .all(|fi| self.value_at(fi.index) == other.value_at(fi.index))
    }

    /// True when every entry of `conditions` equals the record's value.
    pub fn map_matches(&self, conditions: &FieldMap) -> bool {
        conditions.iter().all(|(name, expected)| {
            self.definition
                .field_index(name)
                .is_some_and(|idx| self.value_at(idx) == expected)
        })
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Ordering and equality
// ============================================================================

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Record {}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entity_name()
            .cmp(other.entity_name())
            .then_with(|| {
                let len = self.values.len().max(other.values.len());
                (0..len)
                    .map(|idx| {
                        let left = self.values.get(idx).and_then(Option::as_ref).unwrap_or(&NULL);
                        let right = other.values.get(idx).and_then(Option::as_ref).unwrap_or(&NULL);
                        left.compare(right)
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            })
    }
}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_name().hash(state);
        for idx in 0..self.values.len() {
            self.value_at(idx).hash(state);
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}: {{", self.entity_name())?;
        let mut first = true;
        for fi in self.definition.fields() {
            if let Some(value) = &self.values[fi.index] {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", fi.name, value)?;
                first = false;
            }
        }
        write!(f, "}}]")
    }
}
