//! Ledger scope
//!
//! Tenant isolation boundary. Every ledger row belongs to exactly one of an
//! agency or a sub-account, never both and never neither. The enum makes the
//! XOR structural; callers thread the scope explicitly through every
//! operation instead of relying on ambient session state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;

/// Owning tenant of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum LedgerScope {
    Agency(Uuid),
    SubAccount(Uuid),
}

impl LedgerScope {
    /// Value for the `agency_id` column (None when sub-account scoped).
    pub fn agency_id(&self) -> Option<Uuid> {
        match self {
            LedgerScope::Agency(id) => Some(*id),
            LedgerScope::SubAccount(_) => None,
        }
    }

    /// Value for the `sub_account_id` column (None when agency scoped).
    pub fn sub_account_id(&self) -> Option<Uuid> {
        match self {
            LedgerScope::Agency(_) => None,
            LedgerScope::SubAccount(id) => Some(*id),
        }
    }

    /// Both scope columns in insert order.
    pub fn columns(&self) -> (Option<Uuid>, Option<Uuid>) {
        (self.agency_id(), self.sub_account_id())
    }

    /// Stable text key, used by per-scope counters.
    pub fn key(&self) -> String {
        match self {
            LedgerScope::Agency(id) => format!("agency:{}", id),
            LedgerScope::SubAccount(id) => format!("sub_account:{}", id),
        }
    }

    /// Rebuild a scope from the two nullable columns.
    pub fn from_columns(
        agency_id: Option<Uuid>,
        sub_account_id: Option<Uuid>,
    ) -> Result<Self, DomainError> {
        match (agency_id, sub_account_id) {
            (Some(id), None) => Ok(LedgerScope::Agency(id)),
            (None, Some(id)) => Ok(LedgerScope::SubAccount(id)),
            _ => Err(DomainError::Validation(
                "scope must be exactly one of agency or sub-account".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_columns_are_exclusive() {
        let id = Uuid::new_v4();

        let agency = LedgerScope::Agency(id);
        assert_eq!(agency.columns(), (Some(id), None));

        let sub = LedgerScope::SubAccount(id);
        assert_eq!(sub.columns(), (None, Some(id)));
    }

    #[test]
    fn test_from_columns_rejects_both_and_neither() {
        let id = Uuid::new_v4();

        assert!(LedgerScope::from_columns(Some(id), Some(id)).is_err());
        assert!(LedgerScope::from_columns(None, None).is_err());
        assert_eq!(
            LedgerScope::from_columns(Some(id), None).unwrap(),
            LedgerScope::Agency(id)
        );
    }

    #[test]
    fn test_scope_key_is_stable() {
        let id: Uuid = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(
            LedgerScope::Agency(id).key(),
            "agency:550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(
            LedgerScope::SubAccount(id).key(),
            "sub_account:550e8400-e29b-41d4-a716-446655440000"
        );
    }
}
