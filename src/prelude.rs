//! Everything an application needs to define entities and run records
//! through their lifecycle.
//!
//! `collaborators` holds the traits implemented by hosts that plug their own
//! store, authorization, caching or auditing into an [`EntityContext`].

pub use crate::core::{EntityError, FieldType, FieldValue, Result, StoreError};
pub use crate::context::{EntityConfig, EntityContext, UserContext};
pub use crate::lifecycle::{check_against_store, create, create_or_update, delete, refresh, update};
pub use crate::record::{PlainMap, PlainValue, Record};
pub use crate::relation::{
    RelatedQuery, check_fks, delete_related, delete_with_cascade, delete_with_related, find_related,
    find_related_count, find_related_one, plain_value_map, write_xml_text,
};
pub use crate::schema::{
    AuditLogMode, EntityDefinition, FieldDefault, FieldInfo, RelationshipInfo, SchemaRegistry,
};
pub use crate::sequence::{set_sequenced_primary, set_sequenced_secondary};

pub mod collaborators {
    //! Host-side seams of the lifecycle.
    pub use crate::context::{
        AuditLogSink, Authorizer, DocumentFeed, EntityAction, EntityCache, EntityFind, EntityHooks,
        ExpressionEvaluator, FieldEncryptor, Localizer, PhysicalStore, QueryStore,
        RecordLockObserver, SequenceSource,
    };
    pub use crate::schema::SchemaProvider;
    pub use crate::transaction::TransactionWriteCache;
}
