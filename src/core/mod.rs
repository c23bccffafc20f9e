pub mod convert;
pub mod error;
pub mod value;

pub use convert::{DefaultConverter, ValueConverter};
pub use error::{EntityError, Result, StoreError, format_key};
pub use value::{FieldType, FieldValue, TIMESTAMP_TEXT_FORMAT};

/// Field name -> value, used for keys, store rows and change sets.
pub type FieldMap = std::collections::BTreeMap<String, FieldValue>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;
