//! Domain module
//!
//! Pure ledger types and invariants. Nothing here touches the database;
//! services orchestrate SQL around these functions so the posting, close
//! and matching algorithms stay unit-testable.

pub mod account;
pub mod balance;
pub mod consolidation;
pub mod context;
pub mod error;
pub mod events;
pub mod journal;
pub mod open_item;
pub mod period;
pub mod posting_rule;
pub mod scope;

pub use account::{Account, AccountType, NormalBalance, MAX_ACCOUNT_DEPTH};
pub use balance::{AccountBalance, BalanceDelta, PostingLine};
pub use consolidation::{RollupInput, RollupLine, SnapshotStatus};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::LedgerEvent;
pub use journal::{EntryStatus, JournalEntry, JournalLine, LineInput};
pub use open_item::{ItemSide, MatchAllocation, MatchTolerance, OpenItem, OpenItemStatus};
pub use period::{FinancialPeriod, PeriodStatus};
pub use posting_rule::{RuleCondition, SourceDocument};
pub use scope::LedgerScope;
