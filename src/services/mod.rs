//! Service layer
//!
//! One service per ledger component. Services own the SQL transactions and
//! delegate the algorithmic work to the pure domain layer; every mutating
//! method takes the resolved `OperationContext` and records audit/event
//! side effects after the primary transaction commits.

mod balances;
mod chart_of_accounts;
mod consolidation;
mod journal;
mod periods;
mod posting_rules;
mod reconciliation;

pub use balances::BalanceAggregator;
pub use chart_of_accounts::{
    ArchiveAccountCommand, ChartOfAccountsService, CreateAccountCommand, MoveAccountCommand,
    UpdateAccountCommand,
};
pub use consolidation::{
    AddEliminationCommand, ConsolidationService, CreateSnapshotCommand, SnapshotView,
};
pub use journal::{CreateEntryCommand, EntryView, JournalService, ReverseEntryCommand};
pub use periods::{CreatePeriodCommand, PeriodService};
pub use posting_rules::{
    ApplyRuleCommand, CreatePostingRuleCommand, PostingRuleRecord, PostingRulesService,
    UpdatePostingRuleCommand,
};
pub use reconciliation::{
    AutoClearReport, ClearingRuleRecord, CreateClearingRuleCommand, CreateReconciliationCommand,
    MatchItemsCommand, ReconciliationService,
};
