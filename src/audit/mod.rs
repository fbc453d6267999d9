//! Audit Log Service
//!
//! Tamper-evident audit logging with hash chain verification. Every
//! mutating ledger operation is recorded; a failed audit write is logged
//! to the side channel and never aborts the primary operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::OperationContext;

/// Audit log entry for database storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub sequence_number: i64,
    pub user_id: Option<Uuid>,
    pub agency_id: Option<Uuid>,
    pub sub_account_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub previous_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    AccountCreated,
    AccountUpdated,
    AccountArchived,
    AccountMoved,
    EntryDrafted,
    EntrySubmitted,
    EntryApproved,
    EntryRejected,
    EntryReversed,
    PeriodCreated,
    PeriodOpened,
    PeriodClosed,
    PeriodReopened,
    PeriodLocked,
    ReconciliationCreated,
    ReconciliationCompleted,
    ItemsMatched,
    ItemUnmatched,
    ItemExcluded,
    ClearingRuleCreated,
    AutoClearRun,
    SnapshotCreated,
    EliminationAdded,
    EliminationRemoved,
    SnapshotFinalized,
    PostingRuleCreated,
    PostingRuleUpdated,
    PostingRuleApplied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AccountCreated => "account.created",
            AuditAction::AccountUpdated => "account.updated",
            AuditAction::AccountArchived => "account.archived",
            AuditAction::AccountMoved => "account.moved",
            AuditAction::EntryDrafted => "journal_entry.drafted",
            AuditAction::EntrySubmitted => "journal_entry.submitted",
            AuditAction::EntryApproved => "journal_entry.approved",
            AuditAction::EntryRejected => "journal_entry.rejected",
            AuditAction::EntryReversed => "journal_entry.reversed",
            AuditAction::PeriodCreated => "period.created",
            AuditAction::PeriodOpened => "period.opened",
            AuditAction::PeriodClosed => "period.closed",
            AuditAction::PeriodReopened => "period.reopened",
            AuditAction::PeriodLocked => "period.locked",
            AuditAction::ReconciliationCreated => "reconciliation.created",
            AuditAction::ReconciliationCompleted => "reconciliation.completed",
            AuditAction::ItemsMatched => "open_items.matched",
            AuditAction::ItemUnmatched => "open_items.unmatched",
            AuditAction::ItemExcluded => "open_items.excluded",
            AuditAction::ClearingRuleCreated => "clearing_rule.created",
            AuditAction::AutoClearRun => "open_items.auto_clear",
            AuditAction::SnapshotCreated => "consolidation.snapshot_created",
            AuditAction::EliminationAdded => "consolidation.elimination_added",
            AuditAction::EliminationRemoved => "consolidation.elimination_removed",
            AuditAction::SnapshotFinalized => "consolidation.snapshot_finalized",
            AuditAction::PostingRuleCreated => "posting_rule.created",
            AuditAction::PostingRuleUpdated => "posting_rule.updated",
            AuditAction::PostingRuleApplied => "posting_rule.applied",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: String,
    entity_type: Option<String>,
    entity_id: Option<Uuid>,
    previous_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
    reason: Option<String>,
}

impl AuditLogBuilder {
    /// Create a new audit log builder
    pub fn new(action: AuditAction) -> Self {
        Self {
            action: action.as_str().to_string(),
            entity_type: None,
            entity_id: None,
            previous_values: None,
            new_values: None,
            reason: None,
        }
    }

    /// Set the entity type
    pub fn entity_type(mut self, entity_type: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self
    }

    /// Set the entity ID
    pub fn entity_id(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Set the previous values
    pub fn previous_values<T: Serialize>(mut self, state: &T) -> Self {
        self.previous_values = serde_json::to_value(state).ok();
        self
    }

    /// Set the new values
    pub fn new_values<T: Serialize>(mut self, state: &T) -> Self {
        self.new_values = serde_json::to_value(state).ok();
        self
    }

    /// Set the caller-supplied reason
    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// Audit Log Service
#[derive(Debug, Clone)]
pub struct AuditLogService {
    pool: PgPool,
}

impl AuditLogService {
    /// Create a new AuditLogService
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write an audit log entry
    /// The hash chain is calculated by the database trigger
    pub async fn log(
        &self,
        builder: AuditLogBuilder,
        context: &OperationContext,
    ) -> Result<Uuid, AuditLogError> {
        let id = Uuid::new_v4();
        let (agency_id, sub_account_id) = context.scope.columns();

        // Note: sequence_number, previous_hash, and current_hash are set by the DB trigger
        let result: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO audit_logs (
                id, user_id, agency_id, sub_account_id, correlation_id,
                action, entity_type, entity_id,
                previous_values, new_values, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(context.user_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(context.correlation_id)
        .bind(&builder.action)
        .bind(&builder.entity_type)
        .bind(builder.entity_id)
        .bind(&builder.previous_values)
        .bind(&builder.new_values)
        .bind(&builder.reason)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            audit_id = %result.0,
            action = %builder.action,
            "Audit log entry created"
        );

        Ok(result.0)
    }

    /// Fire-and-forget variant: a failing audit sink must never abort the
    /// primary operation, so errors land on the warn channel only.
    pub async fn log_or_warn(&self, builder: AuditLogBuilder, context: &OperationContext) {
        let action = builder.action.clone();
        if let Err(e) = self.log(builder, context).await {
            tracing::warn!(action = %action, error = %e, "Audit log write failed, continuing");
        }
    }

    /// Verify the integrity of the audit log hash chain
    pub async fn verify_hash_chain(
        &self,
        limit: Option<i64>,
    ) -> Result<ChainVerificationResult, AuditLogError> {
        let limit = limit.unwrap_or(1000);

        // The jsonb columns are hashed in their Postgres text rendering, so
        // they are fetched as text rather than re-serialized here
        let entries: Vec<(
            Uuid,
            i64,
            String,
            String,
            String,
            Option<Uuid>,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            r#"
            SELECT id, sequence_number, action, previous_hash, current_hash,
                   user_id, previous_values::text, new_values::text
            FROM audit_logs
            ORDER BY sequence_number ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if entries.is_empty() {
            return Ok(ChainVerificationResult {
                is_valid: true,
                entries_checked: 0,
                first_invalid_entry: None,
                expected_hash: None,
                actual_hash: None,
            });
        }

        let mut previous_hash =
            "0000000000000000000000000000000000000000000000000000000000000000".to_string();

        for (id, seq, action, prev_hash, current_hash, user_id, previous_values, new_values) in
            &entries
        {
            // Verify chain linkage
            if prev_hash != &previous_hash {
                return Ok(ChainVerificationResult {
                    is_valid: false,
                    entries_checked: *seq as u64,
                    first_invalid_entry: Some(*id),
                    expected_hash: Some(previous_hash),
                    actual_hash: Some(prev_hash.clone()),
                });
            }

            // Recalculate hash
            let hash_input = format!(
                "{}{}{}{}{}{}{}",
                id,
                seq,
                action,
                user_id.map(|u| u.to_string()).unwrap_or_default(),
                previous_values.as_deref().unwrap_or(""),
                new_values.as_deref().unwrap_or(""),
                prev_hash
            );

            let calculated_hash = sha256_hex(&hash_input);

            if &calculated_hash != current_hash {
                return Ok(ChainVerificationResult {
                    is_valid: false,
                    entries_checked: *seq as u64,
                    first_invalid_entry: Some(*id),
                    expected_hash: Some(calculated_hash),
                    actual_hash: Some(current_hash.clone()),
                });
            }

            previous_hash = current_hash.clone();
        }

        Ok(ChainVerificationResult {
            is_valid: true,
            entries_checked: entries.len() as u64,
            first_invalid_entry: None,
            expected_hash: None,
            actual_hash: None,
        })
    }
}

/// Result of hash chain verification
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

/// Calculate SHA-256 hash and return as hex string
fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_as_str() {
        assert_eq!(AuditAction::AccountCreated.as_str(), "account.created");
        assert_eq!(AuditAction::EntryApproved.as_str(), "journal_entry.approved");
        assert_eq!(AuditAction::PeriodLocked.as_str(), "period.locked");
    }

    #[test]
    fn test_audit_log_builder() {
        let entity_id = Uuid::new_v4();
        let builder = AuditLogBuilder::new(AuditAction::PeriodLocked)
            .entity_type("FinancialPeriod")
            .entity_id(entity_id)
            .reason("year-end close finalized");

        assert_eq!(builder.action, "period.locked");
        assert_eq!(builder.entity_type, Some("FinancialPeriod".to_string()));
        assert_eq!(builder.entity_id, Some(entity_id));
        assert_eq!(builder.reason.as_deref(), Some("year-end close finalized"));
    }

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex("test input");
        assert_eq!(hash.len(), 64); // SHA-256 produces 64 hex characters
    }
}
