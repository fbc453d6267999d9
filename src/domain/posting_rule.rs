//! Posting rules
//!
//! Rules that turn source documents into draft journal entries. Conditions
//! are a tagged enum rather than a free-form JSON blob, so unknown shapes
//! fail at deserialization instead of at evaluation.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One condition on a posting rule. A rule matches a document only when
/// every condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RuleCondition {
    AmountAtLeast { amount: Decimal },
    AmountAtMost { amount: Decimal },
    CurrencyIs { currency_code: String },
    DescriptionContains { needle: String },
    DateBetween { from: NaiveDate, to: NaiveDate },
}

/// Source document a posting rule is evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub amount: Decimal,
    pub currency_code: String,
    pub description: String,
    pub date: NaiveDate,
}

impl RuleCondition {
    pub fn matches(&self, doc: &SourceDocument) -> bool {
        match self {
            RuleCondition::AmountAtLeast { amount } => doc.amount >= *amount,
            RuleCondition::AmountAtMost { amount } => doc.amount <= *amount,
            RuleCondition::CurrencyIs { currency_code } => doc.currency_code == *currency_code,
            RuleCondition::DescriptionContains { needle } => {
                doc.description.to_lowercase().contains(&needle.to_lowercase())
            }
            RuleCondition::DateBetween { from, to } => *from <= doc.date && doc.date <= *to,
        }
    }
}

/// Conjunction over all conditions; an empty list matches everything.
pub fn rule_matches(conditions: &[RuleCondition], doc: &SourceDocument) -> bool {
    conditions.iter().all(|c| c.matches(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn doc(amount: Decimal, currency: &str, description: &str) -> SourceDocument {
        SourceDocument {
            amount,
            currency_code: currency.to_string(),
            description: description.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
        }
    }

    #[test]
    fn test_amount_bounds() {
        let d = doc(dec!(250), "USD", "office supplies");
        assert!(RuleCondition::AmountAtLeast { amount: dec!(100) }.matches(&d));
        assert!(!RuleCondition::AmountAtLeast { amount: dec!(500) }.matches(&d));
        assert!(RuleCondition::AmountAtMost { amount: dec!(250) }.matches(&d));
        assert!(!RuleCondition::AmountAtMost { amount: dec!(249.99) }.matches(&d));
    }

    #[test]
    fn test_description_contains_is_case_insensitive() {
        let d = doc(dec!(10), "USD", "Monthly SaaS Subscription");
        assert!(RuleCondition::DescriptionContains {
            needle: "saas".to_string()
        }
        .matches(&d));
        assert!(!RuleCondition::DescriptionContains {
            needle: "hardware".to_string()
        }
        .matches(&d));
    }

    #[test]
    fn test_date_between_inclusive() {
        let d = doc(dec!(10), "USD", "x");
        let cond = RuleCondition::DateBetween {
            from: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
        };
        assert!(cond.matches(&d));
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let d = doc(dec!(250), "EUR", "invoice 42");
        let conditions = vec![
            RuleCondition::AmountAtLeast { amount: dec!(100) },
            RuleCondition::CurrencyIs {
                currency_code: "EUR".to_string(),
            },
        ];
        assert!(rule_matches(&conditions, &d));

        let conditions = vec![
            RuleCondition::AmountAtLeast { amount: dec!(100) },
            RuleCondition::CurrencyIs {
                currency_code: "USD".to_string(),
            },
        ];
        assert!(!rule_matches(&conditions, &d));
    }

    #[test]
    fn test_empty_conditions_match_everything() {
        assert!(rule_matches(&[], &doc(dec!(1), "USD", "")));
    }

    #[test]
    fn test_condition_serde_round_trip() {
        let cond = RuleCondition::AmountAtLeast { amount: dec!(100) };
        let json = serde_json::to_string(&cond).unwrap();
        assert!(json.contains("\"type\":\"amount_at_least\""));

        let back: RuleCondition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cond);

        // Unknown shapes are rejected at the boundary
        let bad: Result<RuleCondition, _> =
            serde_json::from_str(r#"{"type":"regex_match","pattern":".*"}"#);
        assert!(bad.is_err());
    }
}
