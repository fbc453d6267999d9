//! Operation Context
//!
//! Identity and tenant scope of the current operation, used for audit and
//! tracing. Resolved once by the auth middleware and threaded explicitly
//! through every service call.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scope::LedgerScope;

/// Context for an operation, used for auditing and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Acting user
    pub user_id: Uuid,

    /// Tenant scope (agency XOR sub-account)
    pub scope: LedgerScope,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl OperationContext {
    /// Create a new context for a user in a scope
    pub fn new(user_id: Uuid, scope: LedgerScope) -> Self {
        Self {
            user_id,
            scope,
            correlation_id: None,
        }
    }

    /// Attach a correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let user_id = Uuid::new_v4();
        let agency_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let context = OperationContext::new(user_id, LedgerScope::Agency(agency_id))
            .with_correlation_id(correlation_id);

        assert_eq!(context.user_id, user_id);
        assert_eq!(context.scope, LedgerScope::Agency(agency_id));
        assert_eq!(context.correlation_id, Some(correlation_id));
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context =
            OperationContext::new(Uuid::new_v4(), LedgerScope::SubAccount(Uuid::new_v4()));
        assert!(context.correlation_id.is_none());

        let id = context.ensure_correlation_id();
        assert_eq!(context.correlation_id, Some(id));

        // Calling again should return the same ID
        let id2 = context.ensure_correlation_id();
        assert_eq!(id, id2);
    }
}
