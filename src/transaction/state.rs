// ============================================================================
// Write Cache State
// ============================================================================
//
// A write cache moves through Active -> Committed/Aborted. Once it leaves
// Active it stops absorbing operations and every lifecycle call passes
// through to the physical store.
//
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a write cache, used in spans and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn new() -> Self {
        Self(NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// ```text
/// Active ──flush──> Committed
///   │
///   └──rollback / failed flush──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        *self == Self::Active
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase() {
        let first = TransactionId::new();
        let second = TransactionId::new();
        assert!(second.value() > first.value());
        assert_eq!(first.to_string(), format!("tx#{}", first.value()));
    }

    #[test]
    fn test_only_active_absorbs() {
        assert!(TransactionState::default().is_active());
        assert!(!TransactionState::Committed.is_active());
        assert_eq!(TransactionState::Aborted.to_string(), "aborted");
    }
}
