//! Open items and matching
//!
//! Trackable items created when journal lines post to control accounts,
//! and the tolerance-based matching core used by both manual matching and
//! auto-clear. Matching works on signed remaining amounts: debit items are
//! positive, credit items negative.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::DomainError;

/// Side the item was posted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemSide {
    Debit,
    Credit,
}

impl ItemSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSide::Debit => "DEBIT",
            ItemSide::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for ItemSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(ItemSide::Debit),
            "CREDIT" => Ok(ItemSide::Credit),
            other => Err(DomainError::Validation(format!(
                "unknown item side: {}",
                other
            ))),
        }
    }
}

/// Open item lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenItemStatus {
    Open,
    Matched,
    Excluded,
}

impl OpenItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenItemStatus::Open => "OPEN",
            OpenItemStatus::Matched => "MATCHED",
            OpenItemStatus::Excluded => "EXCLUDED",
        }
    }
}

impl fmt::Display for OpenItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OpenItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(OpenItemStatus::Open),
            "MATCHED" => Ok(OpenItemStatus::Matched),
            "EXCLUDED" => Ok(OpenItemStatus::Excluded),
            other => Err(DomainError::Validation(format!(
                "unknown open item status: {}",
                other
            ))),
        }
    }
}

/// Trackable item on a control account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenItem {
    pub id: Uuid,
    pub account_id: Uuid,
    pub side: ItemSide,
    pub amount: Decimal,
    pub remaining_amount: Decimal,
    pub currency_code: String,
    pub item_date: NaiveDate,
    pub reference: Option<String>,
    pub status: OpenItemStatus,
}

impl OpenItem {
    /// Remaining amount with the matching sign convention applied.
    pub fn signed_remaining(&self) -> Decimal {
        match self.side {
            ItemSide::Debit => self.remaining_amount,
            ItemSide::Credit => -self.remaining_amount,
        }
    }
}

/// How far from zero a match group's net may be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MatchTolerance {
    /// Net must be exactly zero
    Zero,
    /// Net may deviate up to a fixed amount
    Fixed { amount: Decimal },
    /// Net may deviate up to a percentage of the larger side
    Percent { percent: Decimal },
}

impl MatchTolerance {
    /// Absolute deviation allowed for a group whose larger side totals
    /// `larger_side`.
    pub fn allowance(&self, larger_side: Decimal) -> Decimal {
        match self {
            MatchTolerance::Zero => Decimal::ZERO,
            MatchTolerance::Fixed { amount } => amount.abs(),
            MatchTolerance::Percent { percent } => {
                larger_side.abs() * percent.abs() / Decimal::ONE_HUNDRED
            }
        }
    }
}

/// Outcome of a match for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchAllocation {
    pub open_item_id: Uuid,
    pub applied_amount: Decimal,
    pub fully_cleared: bool,
}

/// Evaluate a match over a candidate group.
///
/// Requires at least two OPEN items on the same account and currency with
/// at least one item per side. The net of signed remainings must fall
/// within the tolerance; an optional date window bounds the spread of item
/// dates. On success returns the amount applied to each item: when the net
/// is exactly zero everything clears; otherwise the smaller side clears
/// fully and the residual stays on the larger side's most recent touched
/// item, which remains open.
pub fn evaluate_match(
    items: &[OpenItem],
    tolerance: &MatchTolerance,
    date_window_days: Option<i64>,
) -> Result<Vec<MatchAllocation>, DomainError> {
    if items.len() < 2 {
        return Err(DomainError::Validation(
            "matching requires at least two items".to_string(),
        ));
    }

    let account_id = items[0].account_id;
    let currency = &items[0].currency_code;
    for item in items {
        if item.account_id != account_id {
            return Err(DomainError::Validation(
                "all matched items must belong to the same account".to_string(),
            ));
        }
        if &item.currency_code != currency {
            return Err(DomainError::Validation(
                "all matched items must share one currency".to_string(),
            ));
        }
        if item.status != OpenItemStatus::Open {
            return Err(DomainError::Validation(format!(
                "item {} is not open",
                item.id
            )));
        }
        if item.remaining_amount <= Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "item {} has nothing remaining",
                item.id
            )));
        }
    }

    if let Some(window) = date_window_days {
        let min = items.iter().map(|i| i.item_date).min().unwrap();
        let max = items.iter().map(|i| i.item_date).max().unwrap();
        if (max - min).num_days() > window {
            return Err(DomainError::Validation(format!(
                "item dates spread over more than {} days",
                window
            )));
        }
    }

    let debit_total: Decimal = items
        .iter()
        .filter(|i| i.side == ItemSide::Debit)
        .map(|i| i.remaining_amount)
        .sum();
    let credit_total: Decimal = items
        .iter()
        .filter(|i| i.side == ItemSide::Credit)
        .map(|i| i.remaining_amount)
        .sum();

    if debit_total == Decimal::ZERO || credit_total == Decimal::ZERO {
        return Err(DomainError::Validation(
            "matching requires items on both sides".to_string(),
        ));
    }

    let net = debit_total - credit_total;
    let allowed = tolerance.allowance(debit_total.max(credit_total));
    if net.abs() > allowed {
        return Err(DomainError::Validation(format!(
            "items net to {}, outside tolerance {}",
            net, allowed
        )));
    }

    let cleared = debit_total.min(credit_total);
    let (smaller_side, larger_side) = if debit_total <= credit_total {
        (ItemSide::Debit, ItemSide::Credit)
    } else {
        (ItemSide::Credit, ItemSide::Debit)
    };

    let mut allocations = Vec::with_capacity(items.len());

    // Smaller side clears in full
    for item in items.iter().filter(|i| i.side == smaller_side) {
        allocations.push(MatchAllocation {
            open_item_id: item.id,
            applied_amount: item.remaining_amount,
            fully_cleared: true,
        });
    }

    // Larger side consumes the cleared amount oldest-first; the residual
    // (at most the tolerance) stays open on the last touched item
    let mut larger: Vec<&OpenItem> = items.iter().filter(|i| i.side == larger_side).collect();
    larger.sort_by_key(|i| (i.item_date, i.id));

    let mut left = cleared;
    for item in larger {
        if left == Decimal::ZERO {
            break;
        }
        let applied = item.remaining_amount.min(left);
        left -= applied;
        allocations.push(MatchAllocation {
            open_item_id: item.id,
            applied_amount: applied,
            fully_cleared: applied == item.remaining_amount,
        });
    }

    Ok(allocations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(side: ItemSide, remaining: Decimal, day: u32) -> OpenItem {
        OpenItem {
            id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            side,
            amount: remaining,
            remaining_amount: remaining,
            currency_code: "USD".to_string(),
            item_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            reference: None,
            status: OpenItemStatus::Open,
        }
    }

    #[test]
    fn test_exact_three_way_match_clears_everything() {
        // {+500, -300, -200} nets to zero
        let items = vec![
            item(ItemSide::Debit, dec!(500), 1),
            item(ItemSide::Credit, dec!(300), 2),
            item(ItemSide::Credit, dec!(200), 3),
        ];

        let allocations = evaluate_match(&items, &MatchTolerance::Zero, None).unwrap();
        assert_eq!(allocations.len(), 3);
        assert!(allocations.iter().all(|a| a.fully_cleared));

        let total_applied: Decimal = allocations.iter().map(|a| a.applied_amount).sum();
        assert_eq!(total_applied, dec!(1000));
    }

    #[test]
    fn test_unbalanced_pair_fails_at_zero_tolerance() {
        // {+500, -300} nets to 200
        let items = vec![
            item(ItemSide::Debit, dec!(500), 1),
            item(ItemSide::Credit, dec!(300), 2),
        ];

        assert!(evaluate_match(&items, &MatchTolerance::Zero, None).is_err());
    }

    #[test]
    fn test_unbalanced_pair_partially_clears_within_tolerance() {
        let debit = item(ItemSide::Debit, dec!(500), 1);
        let credit = item(ItemSide::Credit, dec!(300), 2);
        let debit_id = debit.id;
        let credit_id = credit.id;

        let allocations = evaluate_match(
            &[debit, credit],
            &MatchTolerance::Fixed { amount: dec!(200) },
            None,
        )
        .unwrap();

        let credit_alloc = allocations
            .iter()
            .find(|a| a.open_item_id == credit_id)
            .unwrap();
        assert!(credit_alloc.fully_cleared);
        assert_eq!(credit_alloc.applied_amount, dec!(300));

        let debit_alloc = allocations
            .iter()
            .find(|a| a.open_item_id == debit_id)
            .unwrap();
        assert!(!debit_alloc.fully_cleared);
        assert_eq!(debit_alloc.applied_amount, dec!(300));
    }

    #[test]
    fn test_percent_tolerance() {
        let items = vec![
            item(ItemSide::Debit, dec!(1000), 1),
            item(ItemSide::Credit, dec!(995), 2),
        ];

        // 0.1% of 1000 = 1, net is 5 -> fails
        assert!(evaluate_match(
            &items,
            &MatchTolerance::Percent { percent: dec!(0.1) },
            None
        )
        .is_err());

        // 1% of 1000 = 10, net is 5 -> succeeds
        assert!(evaluate_match(
            &items,
            &MatchTolerance::Percent { percent: dec!(1) },
            None
        )
        .is_ok());
    }

    #[test]
    fn test_date_window_enforced() {
        let items = vec![
            item(ItemSide::Debit, dec!(100), 1),
            item(ItemSide::Credit, dec!(100), 20),
        ];

        assert!(evaluate_match(&items, &MatchTolerance::Zero, Some(7)).is_err());
        assert!(evaluate_match(&items, &MatchTolerance::Zero, Some(30)).is_ok());
    }

    #[test]
    fn test_single_item_rejected() {
        let items = vec![item(ItemSide::Debit, dec!(100), 1)];
        assert!(evaluate_match(&items, &MatchTolerance::Zero, None).is_err());
    }

    #[test]
    fn test_one_sided_group_rejected() {
        let items = vec![
            item(ItemSide::Debit, dec!(100), 1),
            item(ItemSide::Debit, dec!(100), 2),
        ];
        assert!(evaluate_match(
            &items,
            &MatchTolerance::Fixed {
                amount: dec!(1000)
            },
            None
        )
        .is_err());
    }

    #[test]
    fn test_non_open_item_rejected() {
        let mut matched = item(ItemSide::Credit, dec!(100), 2);
        matched.status = OpenItemStatus::Matched;
        let items = vec![item(ItemSide::Debit, dec!(100), 1), matched];
        assert!(evaluate_match(&items, &MatchTolerance::Zero, None).is_err());
    }

    #[test]
    fn test_larger_side_consumed_oldest_first() {
        let old_debit = item(ItemSide::Debit, dec!(300), 1);
        let new_debit = item(ItemSide::Debit, dec!(300), 10);
        let old_id = old_debit.id;
        let new_id = new_debit.id;
        let credit = item(ItemSide::Credit, dec!(400), 5);

        let allocations = evaluate_match(
            &[new_debit, old_debit, credit],
            &MatchTolerance::Fixed { amount: dec!(200) },
            None,
        )
        .unwrap();

        let old_alloc = allocations
            .iter()
            .find(|a| a.open_item_id == old_id)
            .unwrap();
        assert!(old_alloc.fully_cleared);
        assert_eq!(old_alloc.applied_amount, dec!(300));

        let new_alloc = allocations
            .iter()
            .find(|a| a.open_item_id == new_id)
            .unwrap();
        assert!(!new_alloc.fully_cleared);
        assert_eq!(new_alloc.applied_amount, dec!(100));
    }

    #[test]
    fn test_signed_remaining() {
        assert_eq!(
            item(ItemSide::Debit, dec!(50), 1).signed_remaining(),
            dec!(50)
        );
        assert_eq!(
            item(ItemSide::Credit, dec!(50), 1).signed_remaining(),
            dec!(-50)
        );
    }
}
