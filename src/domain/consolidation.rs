//! Consolidation
//!
//! Multi-entity rollups over closed periods. Balances are folded into
//! lines keyed by account code; intercompany eliminations are adjustment
//! rows applied only to the snapshot, never to the underlying ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::account::AccountType;
use super::error::DomainError;

/// Snapshot lifecycle: DRAFT until finalized, FINAL is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    Draft,
    Final,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Draft => "DRAFT",
            SnapshotStatus::Final => "FINAL",
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SnapshotStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(SnapshotStatus::Draft),
            "FINAL" => Ok(SnapshotStatus::Final),
            other => Err(DomainError::Validation(format!(
                "unknown snapshot status: {}",
                other
            ))),
        }
    }
}

/// One consolidated line, keyed by account code across entities.
///
/// `elimination_debit`/`elimination_credit` accumulate the two sides of
/// elimination adjustments applied to this line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupLine {
    pub account_code: String,
    pub account_type: AccountType,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub elimination_debit: Decimal,
    pub elimination_credit: Decimal,
}

impl RollupLine {
    fn zero(account_code: String, account_type: AccountType) -> Self {
        Self {
            account_code,
            account_type,
            total_debit: Decimal::ZERO,
            total_credit: Decimal::ZERO,
            elimination_debit: Decimal::ZERO,
            elimination_credit: Decimal::ZERO,
        }
    }

    /// Net consolidated balance, debit-positive, eliminations applied.
    pub fn net(&self) -> Decimal {
        (self.total_debit + self.elimination_debit)
            - (self.total_credit + self.elimination_credit)
    }
}

/// One balance row feeding the rollup.
#[derive(Debug, Clone)]
pub struct RollupInput {
    pub account_code: String,
    pub account_type: AccountType,
    pub opening_balance: Decimal,
    pub debit_movement: Decimal,
    pub credit_movement: Decimal,
}

/// Fold balance rows from the member periods into consolidated lines.
///
/// Openings are folded into the side they sit on, so a line's net equals
/// the sum of the contributing closing balances.
pub fn roll_up(inputs: impl IntoIterator<Item = RollupInput>) -> BTreeMap<String, RollupLine> {
    let mut lines: BTreeMap<String, RollupLine> = BTreeMap::new();

    for input in inputs {
        let line = lines
            .entry(input.account_code.clone())
            .or_insert_with(|| RollupLine::zero(input.account_code.clone(), input.account_type));

        line.total_debit += input.debit_movement;
        line.total_credit += input.credit_movement;
        if input.opening_balance >= Decimal::ZERO {
            line.total_debit += input.opening_balance;
        } else {
            line.total_credit += -input.opening_balance;
        }
    }

    lines
}

/// Apply an elimination adjustment to the rollup: `amount` is debited to
/// `debit_code` and credited to `credit_code`, creating zero lines for
/// codes the rollup has not seen.
pub fn apply_elimination(
    lines: &mut BTreeMap<String, RollupLine>,
    debit_code: &str,
    credit_code: &str,
    amount: Decimal,
    account_type_for_new: AccountType,
) {
    let debit_line = lines
        .entry(debit_code.to_string())
        .or_insert_with(|| RollupLine::zero(debit_code.to_string(), account_type_for_new));
    debit_line.elimination_debit += amount;

    let credit_line = lines
        .entry(credit_code.to_string())
        .or_insert_with(|| RollupLine::zero(credit_code.to_string(), account_type_for_new));
    credit_line.elimination_credit += amount;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn input(code: &str, t: AccountType, opening: Decimal, debit: Decimal, credit: Decimal) -> RollupInput {
        RollupInput {
            account_code: code.to_string(),
            account_type: t,
            opening_balance: opening,
            debit_movement: debit,
            credit_movement: credit,
        }
    }

    #[test]
    fn test_roll_up_sums_by_code_across_entities() {
        // Same receivable account code in two sub-entities
        let lines = roll_up(vec![
            input("1200", AccountType::Asset, dec!(100), dec!(50), dec!(20)),
            input("1200", AccountType::Asset, dec!(0), dec!(200), dec!(0)),
            input("4000", AccountType::Revenue, dec!(0), dec!(0), dec!(270)),
        ]);

        assert_eq!(lines.len(), 2);

        let receivables = &lines["1200"];
        assert_eq!(receivables.total_debit, dec!(350));
        assert_eq!(receivables.total_credit, dec!(20));
        // Net equals the sum of contributing closings: (100+50-20) + 200
        assert_eq!(receivables.net(), dec!(330));

        assert_eq!(lines["4000"].net(), dec!(-270));
    }

    #[test]
    fn test_negative_opening_folds_into_credit_side() {
        let lines = roll_up(vec![input(
            "2100",
            AccountType::Liability,
            dec!(-500),
            dec!(100),
            dec!(50),
        )]);

        let payables = &lines["2100"];
        assert_eq!(payables.total_credit, dec!(550));
        assert_eq!(payables.total_debit, dec!(100));
        assert_eq!(payables.net(), dec!(-450));
    }

    #[test]
    fn test_elimination_cancels_intercompany_pair() {
        // Intercompany receivable and payable of 300 offset each other
        let mut lines = roll_up(vec![
            input("1300", AccountType::Asset, dec!(0), dec!(300), dec!(0)),
            input("2300", AccountType::Liability, dec!(0), dec!(0), dec!(300)),
        ]);
        assert_eq!(lines["1300"].net(), dec!(300));
        assert_eq!(lines["2300"].net(), dec!(-300));

        // Eliminate: debit the payable, credit the receivable
        apply_elimination(&mut lines, "2300", "1300", dec!(300), AccountType::Asset);

        assert_eq!(lines["1300"].net(), dec!(0));
        assert_eq!(lines["2300"].net(), dec!(0));
    }

    #[test]
    fn test_elimination_creates_missing_lines() {
        let mut lines = BTreeMap::new();
        apply_elimination(&mut lines, "9100", "9200", dec!(42), AccountType::Equity);

        assert_eq!(lines["9100"].net(), dec!(42));
        assert_eq!(lines["9200"].net(), dec!(-42));
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!("DRAFT".parse::<SnapshotStatus>().unwrap(), SnapshotStatus::Draft);
        assert_eq!("FINAL".parse::<SnapshotStatus>().unwrap(), SnapshotStatus::Final);
        assert!("PENDING".parse::<SnapshotStatus>().is_err());
    }
}
