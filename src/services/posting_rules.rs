//! Posting Rules
//!
//! Declarative rules that turn source documents into draft journal
//! entries. Conditions are stored as JSONB and deserialized into the
//! typed condition enum, so a corrupted rule fails loudly at apply time
//! instead of silently matching.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{
    posting_rule, DomainError, LedgerEvent, LineInput, OperationContext, RuleCondition,
    SourceDocument,
};
use crate::error::AppError;
use crate::events::EventEmitter;
use crate::services::{CreateEntryCommand, EntryView, JournalService};

/// Command to create a posting rule
#[derive(Debug, Clone)]
pub struct CreatePostingRuleCommand {
    pub name: String,
    pub description: Option<String>,
    pub conditions: Vec<RuleCondition>,
    pub debit_account_id: Uuid,
    pub credit_account_id: Uuid,
    pub priority: i32,
}

/// Command to update a rule; absent fields keep their current value
#[derive(Debug, Clone, Default)]
pub struct UpdatePostingRuleCommand {
    pub name: Option<String>,
    pub description: Option<String>,
    pub conditions: Option<Vec<RuleCondition>>,
    pub priority: Option<i32>,
}

/// Command to apply a rule to one source document
#[derive(Debug, Clone)]
pub struct ApplyRuleCommand {
    pub document: SourceDocument,
    pub period_id: Uuid,
    pub exchange_rate: Decimal,
}

/// Stored posting rule
#[derive(Debug, Clone, serde::Serialize)]
pub struct PostingRuleRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub conditions: Vec<RuleCondition>,
    pub debit_account_id: Uuid,
    pub credit_account_id: Uuid,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: chrono::DateTime<Utc>,
}

/// Posting Rules service
pub struct PostingRulesService {
    pool: PgPool,
    audit: AuditLogService,
    emitter: EventEmitter,
    journal: JournalService,
}

type RuleRow = (
    Uuid,
    String,
    Option<String>,
    serde_json::Value,
    Uuid,
    Uuid,
    i32,
    bool,
    chrono::DateTime<Utc>,
);

fn rule_from_row(row: RuleRow) -> Result<PostingRuleRecord, AppError> {
    let (
        id,
        name,
        description,
        conditions,
        debit_account_id,
        credit_account_id,
        priority,
        is_active,
        created_at,
    ) = row;

    let conditions: Vec<RuleCondition> = serde_json::from_value(conditions).map_err(|e| {
        AppError::Domain(DomainError::Validation(format!(
            "posting rule {} has invalid conditions: {}",
            id, e
        )))
    })?;

    Ok(PostingRuleRecord {
        id,
        name,
        description,
        conditions,
        debit_account_id,
        credit_account_id,
        priority,
        is_active,
        created_at,
    })
}

const RULE_COLUMNS: &str = "id, name, description, conditions, debit_account_id, \
     credit_account_id, priority, is_active, created_at";

impl PostingRulesService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit: AuditLogService::new(pool.clone()),
            emitter: EventEmitter::new(pool.clone()),
            journal: JournalService::new(pool.clone()),
            pool,
        }
    }

    /// Create a rule mapping matching documents onto a debit/credit
    /// account pair.
    pub async fn create_rule(
        &self,
        command: CreatePostingRuleCommand,
        context: &OperationContext,
    ) -> Result<PostingRuleRecord, AppError> {
        if command.name.trim().is_empty() {
            return Err(DomainError::Validation("rule name must not be empty".to_string()).into());
        }
        if command.debit_account_id == command.credit_account_id {
            return Err(DomainError::Validation(
                "debit and credit accounts must differ".to_string(),
            )
            .into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let conditions = serde_json::to_value(&command.conditions)
            .map_err(|e| DomainError::Validation(format!("conditions not serializable: {}", e)))?;

        let row: RuleRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO posting_rules (
                id, agency_id, sub_account_id, name, description, conditions,
                debit_account_id, credit_account_id, priority, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            RULE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(command.name.trim())
        .bind(&command.description)
        .bind(&conditions)
        .bind(command.debit_account_id)
        .bind(command.credit_account_id)
        .bind(command.priority)
        .bind(context.user_id)
        .fetch_one(&self.pool)
        .await?;

        let created = rule_from_row(row)?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::PostingRuleCreated)
                    .entity_type("PostingRule")
                    .entity_id(created.id)
                    .new_values(&created),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::journal(
                    "posting_rule.created",
                    created.id,
                    json!({ "name": created.name }),
                ),
                context,
            )
            .await;

        Ok(created)
    }

    /// Apply a rule to a document. If every condition holds, a balanced
    /// draft entry is created through the normal journal path; it still
    /// walks the full approval workflow.
    pub async fn apply_rule(
        &self,
        rule_id: Uuid,
        command: ApplyRuleCommand,
        context: &OperationContext,
    ) -> Result<EntryView, AppError> {
        let rule = self.get_rule(rule_id, context).await?;
        if !rule.is_active {
            return Err(DomainError::Validation(format!(
                "posting rule '{}' is inactive",
                rule.name
            ))
            .into());
        }
        if command.document.amount <= Decimal::ZERO {
            return Err(DomainError::Validation(
                "document amount must be positive".to_string(),
            )
            .into());
        }
        if !posting_rule::rule_matches(&rule.conditions, &command.document) {
            return Err(DomainError::Validation(format!(
                "document does not satisfy the conditions of rule '{}'",
                rule.name
            ))
            .into());
        }

        let entry = self
            .journal
            .create_entry(
                CreateEntryCommand {
                    entry_date: command.document.date,
                    description: command.document.description.clone(),
                    period_id: command.period_id,
                    currency_code: command.document.currency_code.clone(),
                    exchange_rate: command.exchange_rate,
                    lines: vec![
                        LineInput {
                            account_id: rule.debit_account_id,
                            debit_amount: command.document.amount,
                            credit_amount: Decimal::ZERO,
                            memo: Some(format!("rule: {}", rule.name)),
                        },
                        LineInput {
                            account_id: rule.credit_account_id,
                            debit_amount: Decimal::ZERO,
                            credit_amount: command.document.amount,
                            memo: Some(format!("rule: {}", rule.name)),
                        },
                    ],
                },
                context,
            )
            .await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::PostingRuleApplied)
                    .entity_type("PostingRule")
                    .entity_id(rule_id)
                    .new_values(&json!({
                        "entry_id": entry.entry.id,
                        "amount": command.document.amount,
                    })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::journal(
                    "posting_rule.applied",
                    rule_id,
                    json!({ "entry_id": entry.entry.id }),
                ),
                context,
            )
            .await;

        Ok(entry)
    }

    /// Update a rule's name, description, conditions or priority. Absent
    /// fields keep their current value; the account pair is immutable so
    /// existing entries keep their provenance.
    pub async fn update_rule(
        &self,
        rule_id: Uuid,
        command: UpdatePostingRuleCommand,
        context: &OperationContext,
    ) -> Result<PostingRuleRecord, AppError> {
        let before = self.get_rule(rule_id, context).await?;

        let name = command.name.unwrap_or_else(|| before.name.clone());
        if name.trim().is_empty() {
            return Err(DomainError::Validation("rule name must not be empty".to_string()).into());
        }
        let description = command.description.or_else(|| before.description.clone());
        let conditions = command
            .conditions
            .unwrap_or_else(|| before.conditions.clone());
        let priority = command.priority.unwrap_or(before.priority);

        let conditions_json = serde_json::to_value(&conditions)
            .map_err(|e| DomainError::Validation(format!("conditions not serializable: {}", e)))?;
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: RuleRow = sqlx::query_as(&format!(
            r#"
            UPDATE posting_rules
            SET name = $1, description = $2, conditions = $3, priority = $4,
                updated_at = NOW()
            WHERE id = $5
              AND agency_id IS NOT DISTINCT FROM $6
              AND sub_account_id IS NOT DISTINCT FROM $7
            RETURNING {}
            "#,
            RULE_COLUMNS
        ))
        .bind(name.trim())
        .bind(&description)
        .bind(&conditions_json)
        .bind(priority)
        .bind(rule_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_one(&self.pool)
        .await?;

        let updated = rule_from_row(row)?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::PostingRuleUpdated)
                    .entity_type("PostingRule")
                    .entity_id(rule_id)
                    .previous_values(&before)
                    .new_values(&updated),
                context,
            )
            .await;

        Ok(updated)
    }

    /// Deactivate a rule; applications fail from then on.
    pub async fn deactivate_rule(
        &self,
        rule_id: Uuid,
        context: &OperationContext,
    ) -> Result<PostingRuleRecord, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: Option<RuleRow> = sqlx::query_as(&format!(
            r#"
            UPDATE posting_rules
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            RETURNING {}
            "#,
            RULE_COLUMNS
        ))
        .bind(rule_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| DomainError::not_found("posting_rule", rule_id))?;
        let updated = rule_from_row(row)?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::PostingRuleUpdated)
                    .entity_type("PostingRule")
                    .entity_id(rule_id)
                    .new_values(&json!({ "is_active": false })),
                context,
            )
            .await;

        Ok(updated)
    }

    /// Fetch one rule within the caller's scope.
    pub async fn get_rule(
        &self,
        rule_id: Uuid,
        context: &OperationContext,
    ) -> Result<PostingRuleRecord, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: Option<RuleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM posting_rules
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
            RULE_COLUMNS
        ))
        .bind(rule_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| DomainError::not_found("posting_rule", rule_id))?;
        rule_from_row(row)
    }

    /// List rules in scope, active first, then by ascending priority.
    pub async fn list_rules(
        &self,
        context: &OperationContext,
    ) -> Result<Vec<PostingRuleRecord>, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let rows: Vec<RuleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM posting_rules
            WHERE agency_id IS NOT DISTINCT FROM $1
              AND sub_account_id IS NOT DISTINCT FROM $2
            ORDER BY is_active DESC, priority ASC, name
            "#,
            RULE_COLUMNS
        ))
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(rule_from_row).collect()
    }
}
