//! Account balances
//!
//! Per (account, period, currency) running balances. Rows are created
//! lazily on first posting and incremented afterwards; the closing balance
//! is always `opening + debit_movement - credit_movement`, stored
//! debit-positive for every account. Presentation-side sign flips by
//! normal balance are a read concern.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Closing balance equation, the one invariant of this module.
pub fn closing_balance(opening: Decimal, debit: Decimal, credit: Decimal) -> Decimal {
    opening + debit - credit
}

/// One posting line as seen by the aggregator: entry currency attached,
/// base amounts already computed.
#[derive(Debug, Clone)]
pub struct PostingLine {
    pub account_id: Uuid,
    pub currency_code: String,
    pub debit_amount: Decimal,
    pub credit_amount: Decimal,
    pub base_debit_amount: Decimal,
    pub base_credit_amount: Decimal,
}

/// Summed deltas for one (account, currency) key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDelta {
    pub account_id: Uuid,
    pub currency_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub base_debit: Decimal,
    pub base_credit: Decimal,
}

impl BalanceDelta {
    /// Group lines by (account, currency) and sum the movements.
    ///
    /// The result is ordered by key so callers acquire row locks in a
    /// deterministic order.
    pub fn aggregate(lines: &[PostingLine]) -> Vec<BalanceDelta> {
        let mut groups: BTreeMap<(Uuid, String), BalanceDelta> = BTreeMap::new();

        for line in lines {
            let key = (line.account_id, line.currency_code.clone());
            let entry = groups.entry(key).or_insert_with(|| BalanceDelta {
                account_id: line.account_id,
                currency_code: line.currency_code.clone(),
                debit: Decimal::ZERO,
                credit: Decimal::ZERO,
                base_debit: Decimal::ZERO,
                base_credit: Decimal::ZERO,
            });
            entry.debit += line.debit_amount;
            entry.credit += line.credit_amount;
            entry.base_debit += line.base_debit_amount;
            entry.base_credit += line.base_credit_amount;
        }

        groups.into_values().collect()
    }
}

/// Persisted balance row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub id: Uuid,
    pub account_id: Uuid,
    pub period_id: Uuid,
    pub currency_code: String,
    pub opening_balance: Decimal,
    pub debit_movement: Decimal,
    pub credit_movement: Decimal,
    pub closing_balance: Decimal,
    pub base_opening_balance: Decimal,
    pub base_debit_movement: Decimal,
    pub base_credit_movement: Decimal,
    pub base_closing_balance: Decimal,
}

impl AccountBalance {
    /// Whether the stored row still satisfies the closing equation.
    pub fn is_consistent(&self) -> bool {
        self.closing_balance
            == closing_balance(self.opening_balance, self.debit_movement, self.credit_movement)
            && self.base_closing_balance
                == closing_balance(
                    self.base_opening_balance,
                    self.base_debit_movement,
                    self.base_credit_movement,
                )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn posting(account_id: Uuid, currency: &str, debit: Decimal, credit: Decimal) -> PostingLine {
        PostingLine {
            account_id,
            currency_code: currency.to_string(),
            debit_amount: debit,
            credit_amount: credit,
            base_debit_amount: debit * dec!(2),
            base_credit_amount: credit * dec!(2),
        }
    }

    #[test]
    fn test_closing_balance_equation() {
        assert_eq!(
            closing_balance(dec!(100), dec!(40), dec!(15)),
            dec!(125)
        );
        assert_eq!(closing_balance(dec!(0), dec!(0), dec!(50)), dec!(-50));
    }

    #[test]
    fn test_aggregate_groups_by_account_and_currency() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let lines = vec![
            posting(a, "USD", dec!(100), dec!(0)),
            posting(a, "USD", dec!(50), dec!(0)),
            posting(a, "EUR", dec!(0), dec!(30)),
            posting(b, "USD", dec!(0), dec!(150)),
        ];

        let deltas = BalanceDelta::aggregate(&lines);
        assert_eq!(deltas.len(), 3);

        let a_usd = deltas
            .iter()
            .find(|d| d.account_id == a && d.currency_code == "USD")
            .unwrap();
        assert_eq!(a_usd.debit, dec!(150));
        assert_eq!(a_usd.credit, dec!(0));
        assert_eq!(a_usd.base_debit, dec!(300));

        let a_eur = deltas
            .iter()
            .find(|d| d.account_id == a && d.currency_code == "EUR")
            .unwrap();
        assert_eq!(a_eur.credit, dec!(30));
    }

    #[test]
    fn test_aggregate_order_is_deterministic() {
        let mut ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let lines: Vec<PostingLine> = ids
            .iter()
            .map(|id| posting(*id, "USD", dec!(1), dec!(0)))
            .collect();

        let deltas = BalanceDelta::aggregate(&lines);
        ids.sort();
        let delta_ids: Vec<Uuid> = deltas.iter().map(|d| d.account_id).collect();
        assert_eq!(delta_ids, ids);
    }

    #[test]
    fn test_balance_consistency_check() {
        let mut balance = AccountBalance {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            period_id: Uuid::new_v4(),
            currency_code: "USD".to_string(),
            opening_balance: dec!(100),
            debit_movement: dec!(150),
            credit_movement: dec!(50),
            closing_balance: dec!(200),
            base_opening_balance: dec!(100),
            base_debit_movement: dec!(150),
            base_credit_movement: dec!(50),
            base_closing_balance: dec!(200),
        };
        assert!(balance.is_consistent());

        balance.closing_balance = dec!(199);
        assert!(!balance.is_consistent());
    }
}
