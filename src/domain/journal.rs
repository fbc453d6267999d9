//! Journal entries
//!
//! Double-entry validation, the entry state machine, base-currency
//! computation and reversal mirroring. All monetary math is
//! `rust_decimal::Decimal`; floats never appear in posting paths.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::DomainError;

/// Tolerated rounding difference between total debits and credits,
/// in base currency units.
pub fn balance_epsilon() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

/// Journal entry lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Draft => "DRAFT",
            EntryStatus::PendingApproval => "PENDING_APPROVAL",
            EntryStatus::Approved => "APPROVED",
            EntryStatus::Rejected => "REJECTED",
        }
    }

    /// Allowed transitions: DRAFT -> PENDING_APPROVAL -> APPROVED | REJECTED.
    /// APPROVED and REJECTED are terminal (reversal creates a new entry).
    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        matches!(
            (self, next),
            (EntryStatus::Draft, EntryStatus::PendingApproval)
                | (EntryStatus::PendingApproval, EntryStatus::Approved)
                | (EntryStatus::PendingApproval, EntryStatus::Rejected)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(EntryStatus::Draft),
            "PENDING_APPROVAL" => Ok(EntryStatus::PendingApproval),
            "APPROVED" => Ok(EntryStatus::Approved),
            "REJECTED" => Ok(EntryStatus::Rejected),
            other => Err(DomainError::Validation(format!(
                "unknown entry status: {}",
                other
            ))),
        }
    }
}

/// Caller-supplied line before base amounts are computed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineInput {
    pub account_id: Uuid,
    #[serde(default)]
    pub debit_amount: Decimal,
    #[serde(default)]
    pub credit_amount: Decimal,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Persisted journal entry line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: Uuid,
    pub line_number: i32,
    pub debit_amount: Decimal,
    pub credit_amount: Decimal,
    pub base_debit_amount: Decimal,
    pub base_credit_amount: Decimal,
    pub memo: Option<String>,
}

/// Journal entry header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub entry_number: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub status: EntryStatus,
    pub period_id: Uuid,
    pub currency_code: String,
    pub exchange_rate: Decimal,
    pub is_reversal_entry: bool,
    pub reversal_of_entry_id: Option<Uuid>,
    pub reversed_by_entry_id: Option<Uuid>,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Validate the double-entry invariant over a set of lines.
///
/// Debits and credits must each have at least one non-zero amount, no
/// amount may be negative, and the totals must agree within the rounding
/// epsilon.
pub fn validate_lines(lines: &[LineInput]) -> Result<(), DomainError> {
    if lines.is_empty() {
        return Err(DomainError::Validation(
            "journal entry requires at least one line".to_string(),
        ));
    }

    let mut total_debit = Decimal::ZERO;
    let mut total_credit = Decimal::ZERO;

    for (idx, line) in lines.iter().enumerate() {
        if line.debit_amount < Decimal::ZERO || line.credit_amount < Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "line {}: amounts must not be negative",
                idx + 1
            )));
        }
        if line.debit_amount == Decimal::ZERO && line.credit_amount == Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "line {}: either debit or credit must be non-zero",
                idx + 1
            )));
        }
        total_debit += line.debit_amount;
        total_credit += line.credit_amount;
    }

    if total_debit == Decimal::ZERO || total_credit == Decimal::ZERO {
        return Err(DomainError::Validation(
            "journal entry requires at least one debit and one credit".to_string(),
        ));
    }

    if (total_debit - total_credit).abs() > balance_epsilon() {
        return Err(DomainError::DoubleEntryImbalance {
            debits: total_debit,
            credits: total_credit,
        });
    }

    Ok(())
}

/// Validate an exchange rate (must be strictly positive).
pub fn validate_exchange_rate(rate: Decimal) -> Result<(), DomainError> {
    if rate <= Decimal::ZERO {
        return Err(DomainError::Validation(
            "exchange rate must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Number lines and compute base-currency equivalents once, at posting
/// time; they are stored redundantly for fast reporting.
pub fn build_lines(inputs: &[LineInput], exchange_rate: Decimal) -> Vec<JournalLine> {
    inputs
        .iter()
        .enumerate()
        .map(|(idx, input)| JournalLine {
            account_id: input.account_id,
            line_number: (idx + 1) as i32,
            debit_amount: input.debit_amount,
            credit_amount: input.credit_amount,
            base_debit_amount: input.debit_amount * exchange_rate,
            base_credit_amount: input.credit_amount * exchange_rate,
            memo: input.memo.clone(),
        })
        .collect()
}

/// Mirror lines for a reversal entry: every debit becomes a credit and
/// vice versa, base amounts included. The mirror of a balanced entry is
/// itself balanced.
pub fn reversal_lines(lines: &[JournalLine]) -> Vec<JournalLine> {
    lines
        .iter()
        .map(|line| JournalLine {
            account_id: line.account_id,
            line_number: line.line_number,
            debit_amount: line.credit_amount,
            credit_amount: line.debit_amount,
            base_debit_amount: line.base_credit_amount,
            base_credit_amount: line.base_debit_amount,
            memo: line.memo.clone(),
        })
        .collect()
}

/// Render a sequential entry number, zero-padded per scope.
pub fn format_entry_number(sequence: i64) -> String {
    format!("JE-{:06}", sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(debit: Decimal, credit: Decimal) -> LineInput {
        LineInput {
            account_id: Uuid::new_v4(),
            debit_amount: debit,
            credit_amount: credit,
            memo: None,
        }
    }

    #[test]
    fn test_balanced_lines_accepted() {
        let lines = vec![line(dec!(150.00), dec!(0)), line(dec!(0), dec!(150.00))];
        assert!(validate_lines(&lines).is_ok());
    }

    #[test]
    fn test_imbalance_rejected() {
        let lines = vec![line(dec!(150.00), dec!(0)), line(dec!(0), dec!(149.00))];
        assert!(matches!(
            validate_lines(&lines),
            Err(DomainError::DoubleEntryImbalance { .. })
        ));
    }

    #[test]
    fn test_imbalance_within_epsilon_accepted() {
        let lines = vec![line(dec!(100.00), dec!(0)), line(dec!(0), dec!(99.99))];
        assert!(validate_lines(&lines).is_ok());
    }

    #[test]
    fn test_empty_and_one_sided_rejected() {
        assert!(validate_lines(&[]).is_err());

        // Only debits, no credits
        let lines = vec![line(dec!(50), dec!(0)), line(dec!(50), dec!(0))];
        assert!(validate_lines(&lines).is_err());
    }

    #[test]
    fn test_negative_amount_rejected() {
        let lines = vec![line(dec!(-10), dec!(0)), line(dec!(0), dec!(-10))];
        assert!(matches!(
            validate_lines(&lines),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_line_rejected() {
        let lines = vec![
            line(dec!(100), dec!(0)),
            line(dec!(0), dec!(0)),
            line(dec!(0), dec!(100)),
        ];
        assert!(matches!(
            validate_lines(&lines),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_line_with_both_sides_balances_at_entry_level() {
        // A line may carry both a debit and a credit as long as the
        // entry-level totals still balance.
        let lines = vec![line(dec!(100), dec!(30)), line(dec!(0), dec!(70))];
        assert!(validate_lines(&lines).is_ok());
    }

    #[test]
    fn test_build_lines_computes_base_amounts() {
        let inputs = vec![line(dec!(100.00), dec!(0)), line(dec!(0), dec!(100.00))];
        let built = build_lines(&inputs, dec!(1.25));

        assert_eq!(built[0].line_number, 1);
        assert_eq!(built[0].base_debit_amount, dec!(125.0000));
        assert_eq!(built[1].line_number, 2);
        assert_eq!(built[1].base_credit_amount, dec!(125.0000));
    }

    #[test]
    fn test_reversal_swaps_sides_and_balances() {
        let inputs = vec![line(dec!(150.00), dec!(0)), line(dec!(0), dec!(150.00))];
        let built = build_lines(&inputs, dec!(2));
        let mirrored = reversal_lines(&built);

        assert_eq!(mirrored[0].debit_amount, dec!(0));
        assert_eq!(mirrored[0].credit_amount, dec!(150.00));
        assert_eq!(mirrored[0].base_credit_amount, dec!(300.00));
        assert_eq!(mirrored[1].debit_amount, dec!(150.00));

        // The mirror still satisfies the double-entry invariant
        let as_inputs: Vec<LineInput> = mirrored
            .iter()
            .map(|l| LineInput {
                account_id: l.account_id,
                debit_amount: l.debit_amount,
                credit_amount: l.credit_amount,
                memo: None,
            })
            .collect();
        assert!(validate_lines(&as_inputs).is_ok());
    }

    #[test]
    fn test_status_transitions() {
        assert!(EntryStatus::Draft.can_transition_to(EntryStatus::PendingApproval));
        assert!(EntryStatus::PendingApproval.can_transition_to(EntryStatus::Approved));
        assert!(EntryStatus::PendingApproval.can_transition_to(EntryStatus::Rejected));

        assert!(!EntryStatus::Draft.can_transition_to(EntryStatus::Approved));
        assert!(!EntryStatus::Approved.can_transition_to(EntryStatus::Draft));
        assert!(!EntryStatus::Rejected.can_transition_to(EntryStatus::PendingApproval));
    }

    #[test]
    fn test_entry_number_format() {
        assert_eq!(format_entry_number(42), "JE-000042");
        assert_eq!(format_entry_number(1_234_567), "JE-1234567");
    }

    #[test]
    fn test_exchange_rate_validation() {
        assert!(validate_exchange_rate(dec!(1)).is_ok());
        assert!(validate_exchange_rate(dec!(0)).is_err());
        assert!(validate_exchange_rate(dec!(-0.5)).is_err());
    }
}
