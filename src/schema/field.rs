use crate::core::{FieldType, FieldValue};
use serde::{Deserialize, Serialize};

/// Audit policy for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuditLogMode {
    #[default]
    Off,
    /// Emit on create (non-null) and on every real change.
    Always,
    /// Emit only on update, and only once a non-null value existed.
    UpdatesOnly,
}

impl AuditLogMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// How a field value is read, decided once when the definition is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldReadPath {
    Simple,
    Localized,
    Computed { expr: String },
}

/// Default applied to an empty field before create/update/refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldDefault {
    Literal(FieldValue),
    /// Transaction start time, or wall clock when there is none.
    Now,
    /// Value of another field, looked up in current values then the store shadow.
    CopyOf(String),
    /// Evaluated by the context's expression evaluator.
    Expression(String),
}

/// Field descriptor. `index` is the field's stable slot in every record of
/// the owning entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub index: usize,
    pub field_type: FieldType,
    pub is_pk: bool,
    pub create_only: bool,
    pub audit_log: AuditLogMode,
    pub encrypt: bool,
    pub is_last_updated_stamp: bool,
    pub default: Option<FieldDefault>,
    pub read_path: FieldReadPath,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            index: 0,
            field_type,
            is_pk: false,
            create_only: false,
            audit_log: AuditLogMode::Off,
            encrypt: false,
            is_last_updated_stamp: false,
            default: None,
            read_path: FieldReadPath::Simple,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_pk = true;
        self
    }

    pub fn create_only(mut self) -> Self {
        self.create_only = true;
        self
    }

    pub fn audit(mut self, mode: AuditLogMode) -> Self {
        self.audit_log = mode;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }

    pub fn default_value(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn localized(mut self) -> Self {
        self.read_path = FieldReadPath::Localized;
        self
    }

    pub fn computed(mut self, expr: impl Into<String>) -> Self {
        self.read_path = FieldReadPath::Computed { expr: expr.into() };
        self
    }

    pub(crate) fn last_updated_stamp(mut self) -> Self {
        self.is_last_updated_stamp = true;
        self
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.read_path, FieldReadPath::Simple)
    }
}
