//! Chart of accounts
//!
//! Account classification plus the materialized-path hierarchy math. Paths
//! look like `1000/1000-0001/` so ancestor and descendant queries are plain
//! prefix scans; moves rewrite the prefix for the whole subtree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::DomainError;

/// Maximum hierarchy depth (level is 0-based)
pub const MAX_ACCOUNT_DEPTH: i32 = 7;

/// Account classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expense => "EXPENSE",
        }
    }

    /// Balance-sheet types carry balances across periods; P&L types reset.
    pub fn is_balance_sheet(&self) -> bool {
        matches!(
            self,
            AccountType::Asset | AccountType::Liability | AccountType::Equity
        )
    }

    /// Convention when the caller doesn't specify a normal balance.
    pub fn default_normal_balance(&self) -> NormalBalance {
        match self {
            AccountType::Asset | AccountType::Expense => NormalBalance::Debit,
            _ => NormalBalance::Credit,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "EQUITY" => Ok(AccountType::Equity),
            "REVENUE" => Ok(AccountType::Revenue),
            "EXPENSE" => Ok(AccountType::Expense),
            other => Err(DomainError::Validation(format!(
                "unknown account type: {}",
                other
            ))),
        }
    }
}

/// Side on which the account normally carries its balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalBalance {
    Debit,
    Credit,
}

impl NormalBalance {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalBalance::Debit => "DEBIT",
            NormalBalance::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for NormalBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NormalBalance {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(NormalBalance::Debit),
            "CREDIT" => Ok(NormalBalance::Credit),
            other => Err(DomainError::Validation(format!(
                "unknown normal balance: {}",
                other
            ))),
        }
    }
}

/// Chart-of-accounts node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub parent_account_id: Option<Uuid>,
    pub path: String,
    pub level: i32,
    pub is_control_account: bool,
    pub is_system_managed: bool,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validate an account code: non-empty, no path separator, no pattern
/// metacharacters. Codes end up in materialized paths that are matched
/// with LIKE prefix patterns, so '%' and '_' would leak into the pattern.
pub fn validate_code(code: &str) -> Result<(), DomainError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DomainError::Validation(
            "account code must not be empty".to_string(),
        ));
    }
    if let Some(bad) = code.chars().find(|c| matches!(c, '/' | '%' | '_')) {
        return Err(DomainError::Validation(format!(
            "account code must not contain '{}'",
            bad
        )));
    }
    Ok(())
}

/// Materialized path of a child under an optional parent.
pub fn child_path(parent_path: Option<&str>, code: &str) -> String {
    match parent_path {
        Some(parent) => format!("{}{}/", parent, code),
        None => format!("{}/", code),
    }
}

/// Level of a child under an optional parent (root is 0).
pub fn child_level(parent_level: Option<i32>) -> i32 {
    parent_level.map_or(0, |l| l + 1)
}

/// True when `path` lies inside the subtree rooted at `ancestor_path`
/// (the root itself counts as inside).
pub fn is_within_subtree(path: &str, ancestor_path: &str) -> bool {
    path.starts_with(ancestor_path)
}

/// Rewrite a descendant path after its subtree root moved from
/// `old_prefix` to `new_prefix`.
pub fn rebase_path(path: &str, old_prefix: &str, new_prefix: &str) -> String {
    debug_assert!(path.starts_with(old_prefix));
    format!("{}{}", new_prefix, &path[old_prefix.len()..])
}

/// Guard for a move: rejects cycles and excessive depth.
///
/// `node_path`/`node_level` describe the node being moved, `new_parent` the
/// prospective parent (None re-roots the node), and `max_descendant_level`
/// the deepest level currently inside the node's subtree (the node itself
/// when it is a leaf).
pub fn validate_move(
    node_path: &str,
    node_level: i32,
    new_parent: Option<(&str, i32)>,
    max_descendant_level: i32,
) -> Result<(String, i32), DomainError> {
    if let Some((parent_path, _)) = new_parent {
        if is_within_subtree(parent_path, node_path) {
            return Err(DomainError::HierarchyViolation(
                "cannot move an account under itself or its own descendant".to_string(),
            ));
        }
    }

    let new_level = child_level(new_parent.map(|(_, level)| level));
    let level_delta = new_level - node_level;

    if max_descendant_level + level_delta > MAX_ACCOUNT_DEPTH {
        return Err(DomainError::HierarchyViolation(format!(
            "move would exceed maximum account depth of {}",
            MAX_ACCOUNT_DEPTH
        )));
    }

    // Keep the node's own code segment; only the parent prefix changes
    let code_segment = node_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(node_path);
    let new_path = child_path(new_parent.map(|(path, _)| path), code_segment);

    Ok((new_path, new_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path_and_level() {
        assert_eq!(child_path(None, "1000-0000"), "1000-0000/");
        assert_eq!(
            child_path(Some("1000-0000/"), "1000-0001"),
            "1000-0000/1000-0001/"
        );
        assert_eq!(child_level(None), 0);
        assert_eq!(child_level(Some(2)), 3);
    }

    #[test]
    fn test_default_normal_balance() {
        assert_eq!(
            AccountType::Asset.default_normal_balance(),
            NormalBalance::Debit
        );
        assert_eq!(
            AccountType::Expense.default_normal_balance(),
            NormalBalance::Debit
        );
        assert_eq!(
            AccountType::Revenue.default_normal_balance(),
            NormalBalance::Credit
        );
        assert_eq!(
            AccountType::Liability.default_normal_balance(),
            NormalBalance::Credit
        );
    }

    #[test]
    fn test_balance_sheet_classification() {
        assert!(AccountType::Asset.is_balance_sheet());
        assert!(AccountType::Equity.is_balance_sheet());
        assert!(!AccountType::Revenue.is_balance_sheet());
        assert!(!AccountType::Expense.is_balance_sheet());
    }

    #[test]
    fn test_validate_code() {
        assert!(validate_code("1000-0000").is_ok());
        assert!(validate_code("").is_err());
        assert!(validate_code("   ").is_err());
        assert!(validate_code("10/00").is_err());
    }

    #[test]
    fn test_validate_code_rejects_pattern_metacharacters() {
        // '%' and '_' would escape into the LIKE prefix built from the path
        assert!(validate_code("1%").is_err());
        assert!(validate_code("10_0").is_err());
        assert!(validate_code("_").is_err());
    }

    #[test]
    fn test_move_rejects_cycle() {
        // Moving "1000-0000" under its own child "1000-0001"
        let result = validate_move(
            "1000-0000/",
            0,
            Some(("1000-0000/1000-0001/", 1)),
            1,
        );
        assert!(matches!(
            result,
            Err(DomainError::HierarchyViolation(_))
        ));
    }

    #[test]
    fn test_move_rejects_self() {
        let result = validate_move("1000-0000/", 0, Some(("1000-0000/", 0)), 0);
        assert!(matches!(result, Err(DomainError::HierarchyViolation(_))));
    }

    #[test]
    fn test_move_rejects_depth_overflow() {
        // Node at level 1 whose subtree already reaches level 4, moved
        // under a parent at level 5: deepest descendant would land at 8.
        let result = validate_move("a/b/", 1, Some(("p/q/r/s/t/u/", 5)), 4);
        assert!(matches!(result, Err(DomainError::HierarchyViolation(_))));
    }

    #[test]
    fn test_move_computes_new_path_and_level() {
        let (path, level) = validate_move("a/b/", 1, Some(("x/y/", 1)), 2).unwrap();
        assert_eq!(path, "x/y/b/");
        assert_eq!(level, 2);
    }

    #[test]
    fn test_move_to_root() {
        let (path, level) = validate_move("a/b/", 1, None, 3).unwrap();
        assert_eq!(path, "b/");
        assert_eq!(level, 0);
    }

    #[test]
    fn test_rebase_path() {
        assert_eq!(rebase_path("a/b/c/", "a/b/", "x/y/b/"), "x/y/b/c/");
    }

    #[test]
    fn test_rebase_path_with_multibyte_code() {
        // Prefix boundaries hold for non-ASCII codes
        assert_eq!(
            rebase_path("büro/1000/", "büro/", "hq/büro/"),
            "hq/büro/1000/"
        );
    }

    #[test]
    fn test_account_type_round_trip() {
        for t in [
            AccountType::Asset,
            AccountType::Liability,
            AccountType::Equity,
            AccountType::Revenue,
            AccountType::Expense,
        ] {
            assert_eq!(t.as_str().parse::<AccountType>().unwrap(), t);
        }
        assert!("CASH".parse::<AccountType>().is_err());
    }
}
