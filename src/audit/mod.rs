// ============================================================================
// Audit Log
// ============================================================================
//
// Field-level change history. The differ decides which audit-enabled fields
// produced a real change; entries are written to the context's sink after
// the physical write and before the lifecycle call returns.
//
// ============================================================================

pub mod differ;
pub mod log;

pub use differ::{FieldChange, audited_changes, emit_audit_log};
pub use log::{AuditLogEntry, MemoryAuditLog};
