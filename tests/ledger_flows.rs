//! End-to-end ledger flows over the domain layer: posting, balance
//! aggregation, period close carry-forward, reversal, open item matching
//! and consolidation.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use ledger_core::domain::{
    balance, consolidation, journal, open_item, period, posting_rule, AccountType, BalanceDelta,
    EntryStatus, ItemSide, LedgerScope, LineInput, MatchTolerance, OpenItem, OpenItemStatus,
    PeriodStatus, PostingLine, RollupInput, RuleCondition, SourceDocument,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn line(account_id: Uuid, debit: Decimal, credit: Decimal) -> LineInput {
    LineInput {
        account_id,
        debit_amount: debit,
        credit_amount: credit,
        memo: None,
    }
}

#[test]
fn posting_flow_from_draft_to_aggregated_balances() {
    let cash = Uuid::new_v4();
    let revenue = Uuid::new_v4();

    // A balanced two-line entry passes validation
    let inputs = vec![
        line(cash, dec!(1200.00), dec!(0)),
        line(revenue, dec!(0), dec!(1200.00)),
    ];
    journal::validate_lines(&inputs).unwrap();

    // Lifecycle: DRAFT -> PENDING_APPROVAL -> APPROVED
    assert!(EntryStatus::Draft.can_transition_to(EntryStatus::PendingApproval));
    assert!(EntryStatus::PendingApproval.can_transition_to(EntryStatus::Approved));

    // Base amounts computed at a 1.10 rate
    let built = journal::build_lines(&inputs, dec!(1.10));
    assert_eq!(built[0].base_debit_amount, dec!(1320.0000));

    // Approval turns the lines into balance deltas grouped per account
    let posting: Vec<PostingLine> = built
        .iter()
        .map(|l| PostingLine {
            account_id: l.account_id,
            currency_code: "EUR".to_string(),
            debit_amount: l.debit_amount,
            credit_amount: l.credit_amount,
            base_debit_amount: l.base_debit_amount,
            base_credit_amount: l.base_credit_amount,
        })
        .collect();

    let deltas = BalanceDelta::aggregate(&posting);
    assert_eq!(deltas.len(), 2);

    let cash_delta = deltas.iter().find(|d| d.account_id == cash).unwrap();
    assert_eq!(cash_delta.debit, dec!(1200.00));
    assert_eq!(cash_delta.base_debit, dec!(1320.0000));

    // Closing balance is debit-positive
    assert_eq!(
        balance::closing_balance(dec!(100), cash_delta.debit, cash_delta.credit),
        dec!(1300.00)
    );
}

#[test]
fn multiline_entry_aggregates_per_account_and_currency() {
    let account = Uuid::new_v4();
    let other = Uuid::new_v4();

    // Two debit lines on the same account fold into one delta
    let posting = vec![
        PostingLine {
            account_id: account,
            currency_code: "USD".to_string(),
            debit_amount: dec!(40),
            credit_amount: dec!(0),
            base_debit_amount: dec!(40),
            base_credit_amount: dec!(0),
        },
        PostingLine {
            account_id: account,
            currency_code: "USD".to_string(),
            debit_amount: dec!(60),
            credit_amount: dec!(0),
            base_debit_amount: dec!(60),
            base_credit_amount: dec!(0),
        },
        PostingLine {
            account_id: other,
            currency_code: "USD".to_string(),
            debit_amount: dec!(0),
            credit_amount: dec!(100),
            base_debit_amount: dec!(0),
            base_credit_amount: dec!(100),
        },
    ];

    let deltas = BalanceDelta::aggregate(&posting);
    assert_eq!(deltas.len(), 2);
    let merged = deltas.iter().find(|d| d.account_id == account).unwrap();
    assert_eq!(merged.debit, dec!(100));
}

#[test]
fn period_close_carries_balance_sheet_and_resets_pnl() {
    // Close a period with one asset and one revenue balance
    assert!(PeriodStatus::Open.can_transition_to(PeriodStatus::Closed));

    let asset_closing = dec!(2500.00);
    let revenue_closing = dec!(-1800.00);

    assert_eq!(
        period::carry_forward_amount(AccountType::Asset, asset_closing),
        dec!(2500.00)
    );
    assert_eq!(
        period::carry_forward_amount(AccountType::Revenue, revenue_closing),
        Decimal::ZERO
    );

    // Locked periods are terminal and reject postings
    assert!(PeriodStatus::Closed.can_transition_to(PeriodStatus::Locked));
    assert!(!PeriodStatus::Locked.can_transition_to(PeriodStatus::Open));
    assert!(!PeriodStatus::Closed.accepts_postings());
}

#[test]
fn pending_entry_survives_close_and_is_refused_by_the_period() {
    // Closing is not blocked by draft or pending entries
    assert!(PeriodStatus::Open.can_transition_to(PeriodStatus::Closed));

    // The entry machine alone would still allow the approval afterwards;
    // the refusal comes from the closed period rejecting postings
    assert!(EntryStatus::PendingApproval.can_transition_to(EntryStatus::Approved));
    assert!(!PeriodStatus::Closed.accepts_postings());
}

#[test]
fn reversal_mirror_cancels_the_original_posting() {
    let cash = Uuid::new_v4();
    let expense = Uuid::new_v4();

    let inputs = vec![
        line(expense, dec!(75.50), dec!(0)),
        line(cash, dec!(0), dec!(75.50)),
    ];
    let original = journal::build_lines(&inputs, dec!(1));
    let mirrored = journal::reversal_lines(&original);

    // Original plus mirror nets to zero per account
    let mut posting = Vec::new();
    for l in original.iter().chain(mirrored.iter()) {
        posting.push(PostingLine {
            account_id: l.account_id,
            currency_code: "USD".to_string(),
            debit_amount: l.debit_amount,
            credit_amount: l.credit_amount,
            base_debit_amount: l.base_debit_amount,
            base_credit_amount: l.base_credit_amount,
        });
    }

    for delta in BalanceDelta::aggregate(&posting) {
        assert_eq!(delta.debit, delta.credit);
    }
}

#[test]
fn matching_flow_with_tolerance_leaves_residual_open() {
    let account = Uuid::new_v4();
    let item = |side: ItemSide, amount: Decimal, day: u32| OpenItem {
        id: Uuid::new_v4(),
        account_id: account,
        side,
        amount,
        remaining_amount: amount,
        currency_code: "USD".to_string(),
        item_date: date(2026, 4, day),
        reference: Some("INV-1001".to_string()),
        status: OpenItemStatus::Open,
    };

    let invoice = item(ItemSide::Debit, dec!(500.00), 1);
    let payment_a = item(ItemSide::Credit, dec!(300.00), 5);
    let payment_b = item(ItemSide::Credit, dec!(199.50), 9);
    let invoice_id = invoice.id;

    // Net is 0.50; a fixed tolerance of 1.00 admits the group
    let allocations = open_item::evaluate_match(
        &[invoice, payment_a, payment_b],
        &MatchTolerance::Fixed { amount: dec!(1.00) },
        Some(30),
    )
    .unwrap();

    // Both payments clear fully; the invoice keeps the 0.50 residual
    let invoice_alloc = allocations
        .iter()
        .find(|a| a.open_item_id == invoice_id)
        .unwrap();
    assert!(!invoice_alloc.fully_cleared);
    assert_eq!(invoice_alloc.applied_amount, dec!(499.50));

    let cleared: Vec<_> = allocations.iter().filter(|a| a.fully_cleared).collect();
    assert_eq!(cleared.len(), 2);

    // The allocation total restores the items exactly on unmatch
    let total: Decimal = allocations.iter().map(|a| a.applied_amount).sum();
    assert_eq!(total, dec!(999.00));
}

#[test]
fn consolidation_flow_rollup_elimination_and_net() {
    // Two sub-entities share account codes; intercompany 1300/2300 pair
    let mut lines = consolidation::roll_up(vec![
        RollupInput {
            account_code: "1000".to_string(),
            account_type: AccountType::Asset,
            opening_balance: dec!(500),
            debit_movement: dec!(200),
            credit_movement: dec!(0),
        },
        RollupInput {
            account_code: "1000".to_string(),
            account_type: AccountType::Asset,
            opening_balance: dec!(0),
            debit_movement: dec!(300),
            credit_movement: dec!(100),
        },
        RollupInput {
            account_code: "1300".to_string(),
            account_type: AccountType::Asset,
            opening_balance: dec!(0),
            debit_movement: dec!(250),
            credit_movement: dec!(0),
        },
        RollupInput {
            account_code: "2300".to_string(),
            account_type: AccountType::Liability,
            opening_balance: dec!(0),
            debit_movement: dec!(0),
            credit_movement: dec!(250),
        },
    ]);

    assert_eq!(lines["1000"].net(), dec!(900));
    assert_eq!(lines["1300"].net(), dec!(250));

    consolidation::apply_elimination(&mut lines, "2300", "1300", dec!(250), AccountType::Asset);

    assert_eq!(lines["1300"].net(), Decimal::ZERO);
    assert_eq!(lines["2300"].net(), Decimal::ZERO);
    // Untouched lines keep their totals
    assert_eq!(lines["1000"].net(), dec!(900));
}

#[test]
fn posting_rule_builds_a_balanced_pair() {
    let doc = SourceDocument {
        amount: dec!(149.99),
        currency_code: "USD".to_string(),
        description: "Monthly software subscription".to_string(),
        date: date(2026, 5, 12),
    };

    let conditions = vec![
        RuleCondition::AmountAtMost { amount: dec!(500) },
        RuleCondition::DescriptionContains {
            needle: "subscription".to_string(),
        },
    ];
    assert!(posting_rule::rule_matches(&conditions, &doc));

    // The rule application produces exactly the one-debit-one-credit pair
    let debit_account = Uuid::new_v4();
    let credit_account = Uuid::new_v4();
    let inputs = vec![
        line(debit_account, doc.amount, dec!(0)),
        line(credit_account, dec!(0), doc.amount),
    ];
    journal::validate_lines(&inputs).unwrap();
}

#[test]
fn scope_key_is_stable_and_distinct_per_tenant() {
    let agency = Uuid::new_v4();
    let sub = Uuid::new_v4();

    let a = LedgerScope::Agency(agency);
    let s = LedgerScope::SubAccount(sub);

    assert_ne!(a.key(), s.key());
    assert_eq!(a.key(), LedgerScope::Agency(agency).key());

    let (agency_col, sub_col) = a.columns();
    assert_eq!(agency_col, Some(agency));
    assert_eq!(sub_col, None);
}

#[test]
fn entry_numbers_are_sequential_per_scope() {
    assert_eq!(journal::format_entry_number(1), "JE-000001");
    assert_eq!(journal::format_entry_number(2), "JE-000002");
    assert!(journal::format_entry_number(999_999) < journal::format_entry_number(1_000_000));
}
