//! Financial periods
//!
//! Period state machine and the carry-forward rule applied at close:
//! balance-sheet accounts carry their closing balance into the next
//! period's opening; revenue and expense accounts reset to zero.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::account::AccountType;
use super::error::DomainError;

/// Period lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatus {
    Future,
    Open,
    Closed,
    Locked,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Future => "FUTURE",
            PeriodStatus::Open => "OPEN",
            PeriodStatus::Closed => "CLOSED",
            PeriodStatus::Locked => "LOCKED",
        }
    }

    /// FUTURE -> OPEN -> CLOSED -> LOCKED, with CLOSED -> OPEN as the only
    /// backward edge (reopening, separately guarded). LOCKED is terminal.
    pub fn can_transition_to(&self, next: PeriodStatus) -> bool {
        matches!(
            (self, next),
            (PeriodStatus::Future, PeriodStatus::Open)
                | (PeriodStatus::Open, PeriodStatus::Closed)
                | (PeriodStatus::Closed, PeriodStatus::Open)
                | (PeriodStatus::Closed, PeriodStatus::Locked)
        )
    }

    pub fn accepts_postings(&self) -> bool {
        matches!(self, PeriodStatus::Open)
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PeriodStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FUTURE" => Ok(PeriodStatus::Future),
            "OPEN" => Ok(PeriodStatus::Open),
            "CLOSED" => Ok(PeriodStatus::Closed),
            "LOCKED" => Ok(PeriodStatus::Locked),
            other => Err(DomainError::Validation(format!(
                "unknown period status: {}",
                other
            ))),
        }
    }
}

/// Financial period row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialPeriod {
    pub id: Uuid,
    pub fiscal_year: i32,
    pub fiscal_period: i32,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: PeriodStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_reason: Option<String>,
}

impl FinancialPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Inclusive date-range overlap, used to reject overlapping periods
/// within one scope.
pub fn ranges_overlap(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Opening balance seeded into the next period for one closing row.
pub fn carry_forward_amount(account_type: AccountType, closing: Decimal) -> Decimal {
    if account_type.is_balance_sheet() {
        closing
    } else {
        // Profit-and-loss reset
        Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_status_transitions() {
        assert!(PeriodStatus::Future.can_transition_to(PeriodStatus::Open));
        assert!(PeriodStatus::Open.can_transition_to(PeriodStatus::Closed));
        assert!(PeriodStatus::Closed.can_transition_to(PeriodStatus::Open));
        assert!(PeriodStatus::Closed.can_transition_to(PeriodStatus::Locked));

        // LOCKED is terminal; no shortcuts
        assert!(!PeriodStatus::Locked.can_transition_to(PeriodStatus::Open));
        assert!(!PeriodStatus::Locked.can_transition_to(PeriodStatus::Closed));
        assert!(!PeriodStatus::Future.can_transition_to(PeriodStatus::Closed));
        assert!(!PeriodStatus::Open.can_transition_to(PeriodStatus::Locked));
    }

    #[test]
    fn test_only_open_accepts_postings() {
        assert!(PeriodStatus::Open.accepts_postings());
        assert!(!PeriodStatus::Future.accepts_postings());
        assert!(!PeriodStatus::Closed.accepts_postings());
        assert!(!PeriodStatus::Locked.accepts_postings());
    }

    #[test]
    fn test_ranges_overlap() {
        // Adjacent months do not overlap
        assert!(!ranges_overlap(
            date(2026, 1, 1),
            date(2026, 1, 31),
            date(2026, 2, 1),
            date(2026, 2, 28),
        ));
        // Shared boundary day overlaps
        assert!(ranges_overlap(
            date(2026, 1, 1),
            date(2026, 2, 1),
            date(2026, 2, 1),
            date(2026, 2, 28),
        ));
        // Containment overlaps
        assert!(ranges_overlap(
            date(2026, 1, 1),
            date(2026, 12, 31),
            date(2026, 6, 1),
            date(2026, 6, 30),
        ));
    }

    #[test]
    fn test_carry_forward_by_account_type() {
        assert_eq!(
            carry_forward_amount(AccountType::Asset, dec!(150.00)),
            dec!(150.00)
        );
        assert_eq!(
            carry_forward_amount(AccountType::Liability, dec!(-75.25)),
            dec!(-75.25)
        );
        assert_eq!(
            carry_forward_amount(AccountType::Equity, dec!(10)),
            dec!(10)
        );
        assert_eq!(
            carry_forward_amount(AccountType::Revenue, dec!(900)),
            dec!(0)
        );
        assert_eq!(
            carry_forward_amount(AccountType::Expense, dec!(420)),
            dec!(0)
        );
    }

    #[test]
    fn test_period_contains() {
        let period = FinancialPeriod {
            id: Uuid::new_v4(),
            fiscal_year: 2026,
            fiscal_period: 3,
            name: "2026-03".to_string(),
            start_date: date(2026, 3, 1),
            end_date: date(2026, 3, 31),
            status: PeriodStatus::Open,
            closed_at: None,
            locked_at: None,
            locked_reason: None,
        };

        assert!(period.contains(date(2026, 3, 1)));
        assert!(period.contains(date(2026, 3, 31)));
        assert!(!period.contains(date(2026, 4, 1)));
    }
}
