//! ledger_core Library
//!
//! General ledger engine: chart of accounts, double-entry journal,
//! balance aggregation, period close, open item reconciliation,
//! consolidation and posting rules. Re-exports modules for integration
//! testing and external use.

pub mod api;
pub mod audit;
pub mod domain;
pub mod events;
pub mod services;

// Used by the server binary
pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{DomainError, LedgerScope, OperationContext};
pub use error::{AppError, AppResult};
