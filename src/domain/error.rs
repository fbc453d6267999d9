//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

/// Business rule violations and invariant failures of the ledger core.
///
/// These are independent of the web/infrastructure layer and are always
/// returned, never thrown across the service boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// No usable caller context (missing or malformed identity)
    #[error("Unauthorized: no valid caller context")]
    Unauthorized,

    /// Caller lacks the permission key required by the operation
    #[error("Permission denied: {permission}")]
    PermissionDenied { permission: String },

    /// Malformed or inconsistent input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Journal entry debits and credits do not balance
    #[error("Double-entry imbalance: debits {debits}, credits {credits}")]
    DoubleEntryImbalance { debits: Decimal, credits: Decimal },

    /// Operation requires a period in a different state
    #[error("Period state violation: {0}")]
    PeriodStateViolation(String),

    /// Account tree rule broken (depth, cycle, duplicate code)
    #[error("Hierarchy violation: {0}")]
    HierarchyViolation(String),

    /// Entity absent or outside the caller's scope
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Status transition not permitted by the entity's state machine
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Lock or transaction contention; safe to retry
    #[error("Concurrency conflict, retry the operation")]
    ConcurrencyConflict,
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::ConcurrencyConflict)
    }

    /// Check if retrying the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict)
    }

    /// Stable machine-readable code for observability
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Validation(_) => "validation_failed",
            Self::DoubleEntryImbalance { .. } => "double_entry_imbalance",
            Self::PeriodStateViolation(_) => "period_state_violation",
            Self::HierarchyViolation(_) => "hierarchy_violation",
            Self::NotFound { .. } => "not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::ConcurrencyConflict => "concurrency_conflict",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_imbalance_error_carries_totals() {
        let err = DomainError::DoubleEntryImbalance {
            debits: dec!(100.00),
            credits: dec!(99.50),
        };

        assert!(err.is_client_error());
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "double_entry_imbalance");
        assert!(err.to_string().contains("100.00"));
        assert!(err.to_string().contains("99.50"));
    }

    #[test]
    fn test_concurrency_conflict_is_retryable() {
        let err = DomainError::ConcurrencyConflict;
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = DomainError::invalid_transition("journal entry", "APPROVED", "DRAFT");
        assert_eq!(
            err.to_string(),
            "Invalid journal entry transition: APPROVED -> DRAFT"
        );
    }
}
