//! Open Item Reconciliation
//!
//! Manual matching, unmatching, exclusion and rule-driven auto-clear over
//! open items. All paths funnel through the same tolerance-based matching
//! core; allocations are recorded per match group so an unmatch can
//! restore each item exactly.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{
    open_item, DomainError, ItemSide, LedgerEvent, MatchTolerance, OpenItem, OpenItemStatus,
    OperationContext,
};
use crate::error::AppError;
use crate::events::EventEmitter;

/// Command to create a reconciliation workspace over one control account
#[derive(Debug, Clone)]
pub struct CreateReconciliationCommand {
    pub account_id: Uuid,
    pub period_id: Uuid,
    pub name: String,
    pub statement_date: NaiveDate,
    pub statement_balance: Decimal,
}

/// Command to match a group of open items
#[derive(Debug, Clone)]
pub struct MatchItemsCommand {
    pub item_ids: Vec<Uuid>,
    pub tolerance: MatchTolerance,
}

/// Command to create an auto-clear rule for one account
#[derive(Debug, Clone)]
pub struct CreateClearingRuleCommand {
    pub name: String,
    pub account_id: Uuid,
    pub tolerance: MatchTolerance,
    pub date_window_days: Option<i32>,
    pub priority: i32,
}

/// Stored clearing rule
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClearingRuleRecord {
    pub id: Uuid,
    pub name: String,
    pub account_id: Uuid,
    pub tolerance: MatchTolerance,
    pub date_window_days: Option<i32>,
    pub priority: i32,
    pub is_active: bool,
}

/// Outcome of an auto-clear run
#[derive(Debug, Clone, serde::Serialize)]
pub struct AutoClearReport {
    pub rules_evaluated: usize,
    pub groups_matched: usize,
    pub items_cleared: usize,
}

/// Reconciliation service
pub struct ReconciliationService {
    pool: PgPool,
    audit: AuditLogService,
    emitter: EventEmitter,
}

type OpenItemRow = (
    Uuid,
    Uuid,
    String,
    Decimal,
    Decimal,
    String,
    NaiveDate,
    Option<String>,
    String,
);

fn open_item_from_row(row: OpenItemRow) -> Result<OpenItem, AppError> {
    let (id, account_id, side, amount, remaining_amount, currency_code, item_date, reference, status) =
        row;

    Ok(OpenItem {
        id,
        account_id,
        side: side.parse().map_err(AppError::Domain)?,
        amount,
        remaining_amount,
        currency_code,
        item_date,
        reference,
        status: status.parse().map_err(AppError::Domain)?,
    })
}

const OPEN_ITEM_COLUMNS: &str =
    "id, account_id, side, amount, remaining_amount, currency_code, item_date, reference, status";

// Scoped so a foreign tenant's item id resolves to NotFound instead of
// dissolving that tenant's match group
const UNMATCH_LOOKUP_SQL: &str = r#"
    SELECT match_group_id FROM open_items
    WHERE id = $1
      AND agency_id IS NOT DISTINCT FROM $2
      AND sub_account_id IS NOT DISTINCT FROM $3
    FOR UPDATE
"#;

impl ReconciliationService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit: AuditLogService::new(pool.clone()),
            emitter: EventEmitter::new(pool.clone()),
            pool,
        }
    }

    /// Create a reconciliation workspace; the account must be a control
    /// account in the caller's scope.
    pub async fn create_reconciliation(
        &self,
        command: CreateReconciliationCommand,
        context: &OperationContext,
    ) -> Result<Uuid, AppError> {
        if command.name.trim().is_empty() {
            return Err(DomainError::Validation(
                "reconciliation name must not be empty".to_string(),
            )
            .into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let account: Option<(bool, bool)> = sqlx::query_as(
            r#"
            SELECT is_control_account, is_archived FROM accounts
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(command.account_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (is_control, is_archived) =
            account.ok_or_else(|| DomainError::not_found("account", command.account_id))?;
        if !is_control {
            return Err(DomainError::Validation(
                "reconciliation requires a control account".to_string(),
            )
            .into());
        }
        if is_archived {
            return Err(DomainError::Validation(
                "cannot reconcile an archived account".to_string(),
            )
            .into());
        }

        let period: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM financial_periods
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(command.period_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut *tx)
        .await?;
        if period.is_none() {
            return Err(DomainError::not_found("financial_period", command.period_id).into());
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO reconciliations (
                id, agency_id, sub_account_id, account_id, period_id,
                name, statement_date, statement_balance, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(command.account_id)
        .bind(command.period_id)
        .bind(command.name.trim())
        .bind(command.statement_date)
        .bind(command.statement_balance)
        .bind(context.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::ReconciliationCreated)
                    .entity_type("Reconciliation")
                    .entity_id(id)
                    .new_values(&json!({
                        "account_id": command.account_id,
                        "name": command.name.trim(),
                    })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::reconciliation(
                    "reconciliation.created",
                    id,
                    json!({ "account_id": command.account_id }),
                ),
                context,
            )
            .await;

        Ok(id)
    }

    /// Flip a reconciliation to COMPLETED once its account carries no OPEN
    /// items in the reconciled period.
    pub async fn complete_reconciliation(
        &self,
        reconciliation_id: Uuid,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, Uuid, String)> = sqlx::query_as(
            r#"
            SELECT account_id, period_id, status FROM reconciliations
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            FOR UPDATE
            "#,
        )
        .bind(reconciliation_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (account_id, period_id, status) =
            row.ok_or_else(|| DomainError::not_found("reconciliation", reconciliation_id))?;
        if status != "IN_PROGRESS" {
            return Err(DomainError::invalid_transition("reconciliation", status, "COMPLETED").into());
        }

        let (open_count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM open_items
            WHERE account_id = $1 AND period_id = $2 AND status = 'OPEN'
            "#,
        )
        .bind(account_id)
        .bind(period_id)
        .fetch_one(&mut *tx)
        .await?;
        if open_count > 0 {
            return Err(DomainError::Validation(format!(
                "{} open items remain unmatched",
                open_count
            ))
            .into());
        }

        sqlx::query(
            "UPDATE reconciliations SET status = 'COMPLETED', completed_at = NOW() WHERE id = $1",
        )
        .bind(reconciliation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::ReconciliationCompleted)
                    .entity_type("Reconciliation")
                    .entity_id(reconciliation_id)
                    .new_values(&json!({ "status": "COMPLETED" })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::reconciliation(
                    "reconciliation.completed",
                    reconciliation_id,
                    json!({ "account_id": account_id }),
                ),
                context,
            )
            .await;

        Ok(())
    }

    /// Match a group of open items under one tolerance. On success every
    /// item in the group is stamped with a fresh match group id and its
    /// allocation is recorded; fully cleared items become MATCHED.
    pub async fn match_items(
        &self,
        command: MatchItemsCommand,
        context: &OperationContext,
    ) -> Result<Uuid, AppError> {
        let mut tx = self.pool.begin().await?;

        let items = self
            .fetch_items_for_update(&mut tx, &command.item_ids, context)
            .await?;
        if items.len() != command.item_ids.len() {
            return Err(DomainError::Validation(
                "one or more items were not found in scope".to_string(),
            )
            .into());
        }

        let allocations = open_item::evaluate_match(&items, &command.tolerance, None)?;
        let match_group_id = Uuid::new_v4();
        Self::apply_allocations(&mut tx, match_group_id, &allocations).await?;

        tx.commit().await?;

        let cleared = allocations.iter().filter(|a| a.fully_cleared).count();
        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::ItemsMatched)
                    .entity_type("MatchGroup")
                    .entity_id(match_group_id)
                    .new_values(&json!({
                        "item_ids": command.item_ids,
                        "fully_cleared": cleared,
                    })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::reconciliation(
                    "open_items.matched",
                    match_group_id,
                    json!({ "items": command.item_ids.len(), "fully_cleared": cleared }),
                ),
                context,
            )
            .await;

        Ok(match_group_id)
    }

    /// Undo the match group an item belongs to. Every member returns to
    /// OPEN with its remaining recomputed as amount minus the allocations
    /// still applied by other groups, so partial reductions elsewhere
    /// survive the unmatch.
    pub async fn unmatch_item(
        &self,
        item_id: Uuid,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let row: Option<(Option<Uuid>,)> = sqlx::query_as(UNMATCH_LOOKUP_SQL)
            .bind(item_id)
            .bind(agency_id)
            .bind(sub_account_id)
            .fetch_optional(&mut *tx)
            .await?;

        let match_group_id = row
            .ok_or_else(|| DomainError::not_found("open_item", item_id))?
            .0
            .ok_or_else(|| {
                DomainError::Validation("open item is not part of a match group".to_string())
            })?;

        let members: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT open_item_id FROM open_item_allocations
            WHERE match_group_id = $1
            ORDER BY open_item_id
            "#,
        )
        .bind(match_group_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM open_item_allocations WHERE match_group_id = $1")
            .bind(match_group_id)
            .execute(&mut *tx)
            .await?;

        for (member_id,) in &members {
            sqlx::query(
                r#"
                UPDATE open_items
                SET remaining_amount = amount - COALESCE((
                        SELECT SUM(applied_amount) FROM open_item_allocations
                        WHERE open_item_id = open_items.id
                    ), 0),
                    status = 'OPEN',
                    match_group_id = CASE
                        WHEN match_group_id = $1 THEN NULL
                        ELSE match_group_id
                    END,
                    updated_at = NOW()
                WHERE id = $2
                "#,
            )
            .bind(match_group_id)
            .bind(member_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::ItemUnmatched)
                    .entity_type("OpenItem")
                    .entity_id(item_id)
                    .previous_values(&json!({
                        "match_group_id": match_group_id,
                        "members": members.len(),
                    })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::reconciliation(
                    "open_items.unmatched",
                    match_group_id,
                    json!({ "members": members.len() }),
                ),
                context,
            )
            .await;

        Ok(())
    }

    /// Exclude an open item from matching. A reason is mandatory; only
    /// OPEN items can be excluded.
    pub async fn exclude_item(
        &self,
        item_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        if reason.trim().is_empty() {
            return Err(DomainError::Validation("exclusion reason is required".to_string()).into());
        }

        let mut tx = self.pool.begin().await?;

        let items = self
            .fetch_items_for_update(&mut tx, &[item_id], context)
            .await?;
        let item = items
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::not_found("open_item", item_id))?;
        if item.status != OpenItemStatus::Open {
            return Err(DomainError::invalid_transition(
                "open_item",
                item.status.as_str(),
                OpenItemStatus::Excluded.as_str(),
            )
            .into());
        }

        sqlx::query(
            r#"
            UPDATE open_items
            SET status = 'EXCLUDED', exclusion_reason = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(reason.trim())
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::ItemExcluded)
                    .entity_type("OpenItem")
                    .entity_id(item_id)
                    .reason(reason.trim()),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::reconciliation(
                    "open_items.excluded",
                    item_id,
                    json!({ "reason": reason.trim() }),
                ),
                context,
            )
            .await;

        Ok(())
    }

    /// Create an auto-clear rule for one account in scope.
    pub async fn create_clearing_rule(
        &self,
        command: CreateClearingRuleCommand,
        context: &OperationContext,
    ) -> Result<ClearingRuleRecord, AppError> {
        if command.name.trim().is_empty() {
            return Err(DomainError::Validation("rule name must not be empty".to_string()).into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let tolerance = serde_json::to_value(&command.tolerance)
            .map_err(|e| DomainError::Validation(format!("tolerance not serializable: {}", e)))?;

        let account: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM accounts
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(command.account_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&self.pool)
        .await?;
        if account.is_none() {
            return Err(DomainError::not_found("account", command.account_id).into());
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO clearing_rules (
                id, agency_id, sub_account_id, name, account_id,
                tolerance, date_window_days, priority
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(command.name.trim())
        .bind(command.account_id)
        .bind(&tolerance)
        .bind(command.date_window_days)
        .bind(command.priority)
        .execute(&self.pool)
        .await?;

        let record = ClearingRuleRecord {
            id,
            name: command.name.trim().to_string(),
            account_id: command.account_id,
            tolerance: command.tolerance,
            date_window_days: command.date_window_days,
            priority: command.priority,
            is_active: true,
        };

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::ClearingRuleCreated)
                    .entity_type("ClearingRule")
                    .entity_id(id)
                    .new_values(&record),
                context,
            )
            .await;

        Ok(record)
    }

    /// List clearing rules in scope in evaluation order.
    pub async fn list_clearing_rules(
        &self,
        context: &OperationContext,
    ) -> Result<Vec<ClearingRuleRecord>, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let rows: Vec<(Uuid, String, Uuid, serde_json::Value, Option<i32>, i32, bool)> =
            sqlx::query_as(
                r#"
                SELECT id, name, account_id, tolerance, date_window_days, priority, is_active
                FROM clearing_rules
                WHERE agency_id IS NOT DISTINCT FROM $1
                  AND sub_account_id IS NOT DISTINCT FROM $2
                ORDER BY priority ASC, created_at ASC
                "#,
            )
            .bind(agency_id)
            .bind(sub_account_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(
                |(id, name, account_id, tolerance, date_window_days, priority, is_active)| {
                    let tolerance: MatchTolerance =
                        serde_json::from_value(tolerance).map_err(|e| {
                            AppError::Domain(DomainError::Validation(format!(
                                "clearing rule {} has an invalid tolerance: {}",
                                id, e
                            )))
                        })?;
                    Ok(ClearingRuleRecord {
                        id,
                        name,
                        account_id,
                        tolerance,
                        date_window_days,
                        priority,
                        is_active,
                    })
                },
            )
            .collect()
    }

    /// Run every active clearing rule in priority order. Items are grouped
    /// by reference within the rule's account; groups that pass the rule's
    /// tolerance and date window clear through the same matching core as
    /// manual matching. Groups that fail are skipped, never errors.
    pub async fn auto_clear(
        &self,
        account_id: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<AutoClearReport, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let rules: Vec<(Uuid, Uuid, serde_json::Value, Option<i32>)> = sqlx::query_as(
            r#"
            SELECT id, account_id, tolerance, date_window_days FROM clearing_rules
            WHERE is_active
              AND agency_id IS NOT DISTINCT FROM $1
              AND sub_account_id IS NOT DISTINCT FROM $2
              AND ($3::uuid IS NULL OR account_id = $3)
            ORDER BY priority ASC, created_at ASC
            "#,
        )
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(account_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut report = AutoClearReport {
            rules_evaluated: rules.len(),
            groups_matched: 0,
            items_cleared: 0,
        };

        for (rule_id, account_id, tolerance, date_window_days) in rules {
            let tolerance: MatchTolerance = serde_json::from_value(tolerance).map_err(|e| {
                AppError::Domain(DomainError::Validation(format!(
                    "clearing rule {} has an invalid tolerance: {}",
                    rule_id, e
                )))
            })?;

            let rows: Vec<OpenItemRow> = sqlx::query_as(&format!(
                r#"
                SELECT {} FROM open_items
                WHERE account_id = $1
                  AND status = 'OPEN'
                  AND reference IS NOT NULL
                  AND agency_id IS NOT DISTINCT FROM $2
                  AND sub_account_id IS NOT DISTINCT FROM $3
                ORDER BY reference, item_date, id
                FOR UPDATE
                "#,
                OPEN_ITEM_COLUMNS
            ))
            .bind(account_id)
            .bind(agency_id)
            .bind(sub_account_id)
            .fetch_all(&mut *tx)
            .await?;

            let items: Vec<OpenItem> = rows
                .into_iter()
                .map(open_item_from_row)
                .collect::<Result<_, _>>()?;

            // Candidate groups share one reference; the rows arrive sorted
            let mut start = 0;
            while start < items.len() {
                let reference = items[start].reference.clone();
                let mut end = start + 1;
                while end < items.len() && items[end].reference == reference {
                    end += 1;
                }
                let group = &items[start..end];
                start = end;

                let has_both_sides = group.iter().any(|i| i.side == ItemSide::Debit)
                    && group.iter().any(|i| i.side == ItemSide::Credit);
                if group.len() < 2 || !has_both_sides {
                    continue;
                }

                match open_item::evaluate_match(
                    group,
                    &tolerance,
                    date_window_days.map(i64::from),
                ) {
                    Ok(allocations) => {
                        let match_group_id = Uuid::new_v4();
                        Self::apply_allocations(&mut tx, match_group_id, &allocations).await?;
                        report.groups_matched += 1;
                        report.items_cleared +=
                            allocations.iter().filter(|a| a.fully_cleared).count();
                    }
                    Err(e) => {
                        tracing::debug!(
                            rule_id = %rule_id,
                            reference = ?reference,
                            reason = %e,
                            "Auto-clear group skipped"
                        );
                    }
                }
            }
        }

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::AutoClearRun)
                    .entity_type("ClearingRun")
                    .new_values(&report),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::reconciliation(
                    "open_items.auto_clear",
                    Uuid::new_v4(),
                    json!({
                        "groups_matched": report.groups_matched,
                        "items_cleared": report.items_cleared,
                    }),
                ),
                context,
            )
            .await;

        Ok(report)
    }

    /// Open items on one account, oldest first.
    pub async fn list_open_items(
        &self,
        account_id: Uuid,
        include_settled: bool,
        context: &OperationContext,
    ) -> Result<Vec<OpenItem>, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let rows: Vec<OpenItemRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM open_items
            WHERE account_id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
              AND ($4 OR status = 'OPEN')
            ORDER BY item_date, id
            "#,
            OPEN_ITEM_COLUMNS
        ))
        .bind(account_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(include_settled)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(open_item_from_row).collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn apply_allocations(
        tx: &mut Transaction<'_, Postgres>,
        match_group_id: Uuid,
        allocations: &[crate::domain::MatchAllocation],
    ) -> Result<(), AppError> {
        for allocation in allocations {
            sqlx::query(
                r#"
                INSERT INTO open_item_allocations (id, match_group_id, open_item_id, applied_amount)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(match_group_id)
            .bind(allocation.open_item_id)
            .bind(allocation.applied_amount)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE open_items
                SET remaining_amount = remaining_amount - $1,
                    status = CASE WHEN $2 THEN 'MATCHED' ELSE status END,
                    match_group_id = $3,
                    updated_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(allocation.applied_amount)
            .bind(allocation.fully_cleared)
            .bind(match_group_id)
            .bind(allocation.open_item_id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn fetch_items_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item_ids: &[Uuid],
        context: &OperationContext,
    ) -> Result<Vec<OpenItem>, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let rows: Vec<OpenItemRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM open_items
            WHERE id = ANY($1)
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            ORDER BY id
            FOR UPDATE
            "#,
            OPEN_ITEM_COLUMNS
        ))
        .bind(item_ids)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(AppError::from_sqlx)?;

        rows.into_iter().map(open_item_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatch_lookup_is_tenant_scoped() {
        // A foreign tenant's item id must resolve to NotFound, never to
        // that tenant's match group
        assert!(UNMATCH_LOOKUP_SQL.contains("agency_id IS NOT DISTINCT FROM"));
        assert!(UNMATCH_LOOKUP_SQL.contains("sub_account_id IS NOT DISTINCT FROM"));
    }
}
