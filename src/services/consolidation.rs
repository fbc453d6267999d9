//! Consolidation Engine
//!
//! Point-in-time snapshots rolling up closed member periods into lines
//! keyed by account code, with intercompany elimination adjustments.
//! Adjustments live only on the snapshot; the underlying ledgers are
//! never touched.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{
    consolidation, AccountType, DomainError, LedgerEvent, OperationContext, PeriodStatus,
    RollupLine, SnapshotStatus,
};
use crate::error::AppError;
use crate::events::EventEmitter;

/// Command to create a consolidation snapshot over closed periods
#[derive(Debug, Clone)]
pub struct CreateSnapshotCommand {
    pub name: String,
    pub period_ids: Vec<Uuid>,
}

/// Command to add an elimination adjustment to a draft snapshot
#[derive(Debug, Clone)]
pub struct AddEliminationCommand {
    pub debit_account_code: String,
    pub credit_account_code: String,
    pub amount: Decimal,
    pub account_type: AccountType,
    pub description: String,
}

/// Snapshot header with its consolidated lines
#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotView {
    pub id: Uuid,
    pub name: String,
    pub status: SnapshotStatus,
    pub period_ids: Vec<Uuid>,
    pub lines: Vec<RollupLine>,
    pub created_at: chrono::DateTime<Utc>,
}

/// Consolidation service
pub struct ConsolidationService {
    pool: PgPool,
    audit: AuditLogService,
    emitter: EventEmitter,
}

// Member periods and their balances are read within the caller's scope
// only; a foreign period id falls out as NotFound rather than leaking
// another tenant's balances into the rollup
const MEMBER_PERIODS_SQL: &str = r#"
    SELECT id, status FROM financial_periods
    WHERE id = ANY($1)
      AND agency_id IS NOT DISTINCT FROM $2
      AND sub_account_id IS NOT DISTINCT FROM $3
    FOR SHARE
"#;

const MEMBER_BALANCES_SQL: &str = r#"
    SELECT a.code, a.account_type,
           b.opening_balance, b.debit_movement, b.credit_movement
    FROM account_balances b
    JOIN accounts a ON a.id = b.account_id
    WHERE b.period_id = ANY($1)
      AND b.agency_id IS NOT DISTINCT FROM $2
      AND b.sub_account_id IS NOT DISTINCT FROM $3
    ORDER BY a.code
"#;

impl ConsolidationService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit: AuditLogService::new(pool.clone()),
            emitter: EventEmitter::new(pool.clone()),
            pool,
        }
    }

    /// Roll the member periods up into a DRAFT snapshot. Every member
    /// period must be CLOSED or LOCKED so the data underneath cannot move.
    pub async fn create_snapshot(
        &self,
        command: CreateSnapshotCommand,
        context: &OperationContext,
    ) -> Result<SnapshotView, AppError> {
        if command.name.trim().is_empty() {
            return Err(DomainError::Validation("snapshot name must not be empty".to_string()).into());
        }
        if command.period_ids.is_empty() {
            return Err(DomainError::Validation(
                "snapshot requires at least one member period".to_string(),
            )
            .into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let periods: Vec<(Uuid, String)> = sqlx::query_as(MEMBER_PERIODS_SQL)
            .bind(&command.period_ids)
            .bind(agency_id)
            .bind(sub_account_id)
            .fetch_all(&mut *tx)
            .await?;

        for period_id in &command.period_ids {
            let status = periods
                .iter()
                .find(|(id, _)| id == period_id)
                .map(|(_, s)| s.as_str())
                .ok_or_else(|| DomainError::not_found("financial_period", period_id))?;
            let status: PeriodStatus = status.parse().map_err(AppError::Domain)?;
            if !matches!(status, PeriodStatus::Closed | PeriodStatus::Locked) {
                return Err(DomainError::PeriodStateViolation(format!(
                    "period {} is {}, consolidation requires CLOSED or LOCKED",
                    period_id, status
                ))
                .into());
            }
        }

        // Balance rows from every member period, keyed by account code so
        // the same code folds into one consolidated line
        let inputs: Vec<(String, String, Decimal, Decimal, Decimal)> =
            sqlx::query_as(MEMBER_BALANCES_SQL)
                .bind(&command.period_ids)
                .bind(agency_id)
                .bind(sub_account_id)
                .fetch_all(&mut *tx)
                .await?;

        let rollup_inputs = inputs
            .into_iter()
            .map(
                |(code, account_type, opening, debit, credit)| -> Result<_, AppError> {
                    Ok(consolidation::RollupInput {
                        account_code: code,
                        account_type: account_type.parse().map_err(AppError::Domain)?,
                        opening_balance: opening,
                        debit_movement: debit,
                        credit_movement: credit,
                    })
                },
            )
            .collect::<Result<Vec<_>, _>>()?;
        let lines = consolidation::roll_up(rollup_inputs);

        let snapshot_id = Uuid::new_v4();
        let created_at: (chrono::DateTime<Utc>,) = sqlx::query_as(
            r#"
            INSERT INTO consolidation_snapshots (
                id, agency_id, sub_account_id, name, status, created_by
            )
            VALUES ($1, $2, $3, $4, 'DRAFT', $5)
            RETURNING created_at
            "#,
        )
        .bind(snapshot_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(command.name.trim())
        .bind(context.user_id)
        .fetch_one(&mut *tx)
        .await?;

        for period_id in &command.period_ids {
            sqlx::query(
                "INSERT INTO consolidation_snapshot_periods (snapshot_id, period_id) VALUES ($1, $2)",
            )
            .bind(snapshot_id)
            .bind(period_id)
            .execute(&mut *tx)
            .await?;
        }

        for line in lines.values() {
            Self::insert_line(&mut tx, snapshot_id, line).await?;
        }

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::SnapshotCreated)
                    .entity_type("ConsolidationSnapshot")
                    .entity_id(snapshot_id)
                    .new_values(&json!({
                        "name": command.name.trim(),
                        "period_ids": command.period_ids,
                        "line_count": lines.len(),
                    })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::consolidation(
                    "snapshot.created",
                    snapshot_id,
                    json!({ "periods": command.period_ids.len(), "lines": lines.len() }),
                ),
                context,
            )
            .await;

        Ok(SnapshotView {
            id: snapshot_id,
            name: command.name.trim().to_string(),
            status: SnapshotStatus::Draft,
            period_ids: command.period_ids,
            lines: lines.into_values().collect(),
            created_at: created_at.0,
        })
    }

    /// Add an intercompany elimination to a DRAFT snapshot: the amount is
    /// debited to one code and credited to the other, creating zero lines
    /// for codes the rollup has not seen.
    pub async fn add_elimination(
        &self,
        snapshot_id: Uuid,
        command: AddEliminationCommand,
        context: &OperationContext,
    ) -> Result<Uuid, AppError> {
        if command.amount <= Decimal::ZERO {
            return Err(DomainError::Validation(
                "elimination amount must be positive".to_string(),
            )
            .into());
        }
        if command.debit_account_code == command.credit_account_code {
            return Err(DomainError::Validation(
                "elimination must touch two distinct account codes".to_string(),
            )
            .into());
        }

        let mut tx = self.pool.begin().await?;
        self.require_draft(&mut tx, snapshot_id, context).await?;

        let adjustment_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO elimination_adjustments (
                id, snapshot_id, debit_account_code, credit_account_code,
                amount, description, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(adjustment_id)
        .bind(snapshot_id)
        .bind(&command.debit_account_code)
        .bind(&command.credit_account_code)
        .bind(command.amount)
        .bind(command.description.trim())
        .bind(context.user_id)
        .execute(&mut *tx)
        .await?;

        Self::adjust_line(
            &mut tx,
            snapshot_id,
            &command.debit_account_code,
            command.account_type,
            command.amount,
            Decimal::ZERO,
        )
        .await?;
        Self::adjust_line(
            &mut tx,
            snapshot_id,
            &command.credit_account_code,
            command.account_type,
            Decimal::ZERO,
            command.amount,
        )
        .await?;

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::EliminationAdded)
                    .entity_type("EliminationAdjustment")
                    .entity_id(adjustment_id)
                    .new_values(&json!({
                        "snapshot_id": snapshot_id,
                        "debit_account_code": command.debit_account_code,
                        "credit_account_code": command.credit_account_code,
                        "amount": command.amount,
                    })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::consolidation(
                    "snapshot.elimination_added",
                    snapshot_id,
                    json!({ "adjustment_id": adjustment_id, "amount": command.amount }),
                ),
                context,
            )
            .await;

        Ok(adjustment_id)
    }

    /// Remove an elimination from a DRAFT snapshot, backing its two sides
    /// out of the affected lines.
    pub async fn remove_elimination(
        &self,
        snapshot_id: Uuid,
        adjustment_id: Uuid,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        self.require_draft(&mut tx, snapshot_id, context).await?;

        let adjustment: Option<(String, String, Decimal)> = sqlx::query_as(
            r#"
            SELECT debit_account_code, credit_account_code, amount
            FROM elimination_adjustments
            WHERE id = $1 AND snapshot_id = $2
            FOR UPDATE
            "#,
        )
        .bind(adjustment_id)
        .bind(snapshot_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (debit_code, credit_code, amount) = adjustment
            .ok_or_else(|| DomainError::not_found("elimination_adjustment", adjustment_id))?;

        sqlx::query(
            r#"
            UPDATE consolidation_lines
            SET elimination_debit = elimination_debit - $1
            WHERE snapshot_id = $2 AND account_code = $3
            "#,
        )
        .bind(amount)
        .bind(snapshot_id)
        .bind(&debit_code)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE consolidation_lines
            SET elimination_credit = elimination_credit - $1
            WHERE snapshot_id = $2 AND account_code = $3
            "#,
        )
        .bind(amount)
        .bind(snapshot_id)
        .bind(&credit_code)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM elimination_adjustments WHERE id = $1")
            .bind(adjustment_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::EliminationRemoved)
                    .entity_type("EliminationAdjustment")
                    .entity_id(adjustment_id)
                    .previous_values(&json!({
                        "debit_account_code": debit_code,
                        "credit_account_code": credit_code,
                        "amount": amount,
                    })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::consolidation(
                    "snapshot.elimination_removed",
                    snapshot_id,
                    json!({ "adjustment_id": adjustment_id }),
                ),
                context,
            )
            .await;

        Ok(())
    }

    /// DRAFT -> FINAL. Terminal: a finalized snapshot accepts no further
    /// eliminations.
    pub async fn finalize_snapshot(
        &self,
        snapshot_id: Uuid,
        context: &OperationContext,
    ) -> Result<SnapshotView, AppError> {
        let mut tx = self.pool.begin().await?;
        self.require_draft(&mut tx, snapshot_id, context).await?;

        sqlx::query(
            "UPDATE consolidation_snapshots SET status = 'FINAL', finalized_at = NOW() WHERE id = $1",
        )
        .bind(snapshot_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::SnapshotFinalized)
                    .entity_type("ConsolidationSnapshot")
                    .entity_id(snapshot_id)
                    .new_values(&json!({ "status": SnapshotStatus::Final })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::consolidation("snapshot.finalized", snapshot_id, json!({})),
                context,
            )
            .await;

        self.get_snapshot(snapshot_id, context).await
    }

    /// Fetch a snapshot with its lines, net amounts eliminations applied.
    pub async fn get_snapshot(
        &self,
        snapshot_id: Uuid,
        context: &OperationContext,
    ) -> Result<SnapshotView, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let header: Option<(String, String, chrono::DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT name, status, created_at FROM consolidation_snapshots
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(snapshot_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let (name, status, created_at) = header
            .ok_or_else(|| DomainError::not_found("consolidation_snapshot", snapshot_id))?;

        let period_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT period_id FROM consolidation_snapshot_periods WHERE snapshot_id = $1",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;

        let rows: Vec<(String, String, Decimal, Decimal, Decimal, Decimal)> = sqlx::query_as(
            r#"
            SELECT account_code, account_type, total_debit, total_credit,
                   elimination_debit, elimination_credit
            FROM consolidation_lines
            WHERE snapshot_id = $1
            ORDER BY account_code
            "#,
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;

        let lines = rows
            .into_iter()
            .map(
                |(
                    account_code,
                    account_type,
                    total_debit,
                    total_credit,
                    elimination_debit,
                    elimination_credit,
                )| -> Result<_, AppError> {
                    Ok(RollupLine {
                        account_code,
                        account_type: account_type.parse().map_err(AppError::Domain)?,
                        total_debit,
                        total_credit,
                        elimination_debit,
                        elimination_credit,
                    })
                },
            )
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SnapshotView {
            id: snapshot_id,
            name,
            status: status.parse().map_err(AppError::Domain)?,
            period_ids: period_ids.into_iter().map(|(id,)| id).collect(),
            lines,
            created_at,
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn insert_line(
        tx: &mut Transaction<'_, Postgres>,
        snapshot_id: Uuid,
        line: &RollupLine,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO consolidation_lines (
                id, snapshot_id, account_code, account_type,
                total_debit, total_credit, elimination_debit, elimination_credit
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(snapshot_id)
        .bind(&line.account_code)
        .bind(line.account_type.as_str())
        .bind(line.total_debit)
        .bind(line.total_credit)
        .bind(line.elimination_debit)
        .bind(line.elimination_credit)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn adjust_line(
        tx: &mut Transaction<'_, Postgres>,
        snapshot_id: Uuid,
        account_code: &str,
        account_type: AccountType,
        elimination_debit: Decimal,
        elimination_credit: Decimal,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO consolidation_lines (
                id, snapshot_id, account_code, account_type,
                total_debit, total_credit, elimination_debit, elimination_credit
            )
            VALUES ($1, $2, $3, $4, 0, 0, $5, $6)
            ON CONFLICT (snapshot_id, account_code) DO UPDATE SET
                elimination_debit = consolidation_lines.elimination_debit + EXCLUDED.elimination_debit,
                elimination_credit = consolidation_lines.elimination_credit + EXCLUDED.elimination_credit
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(snapshot_id)
        .bind(account_code)
        .bind(account_type.as_str())
        .bind(elimination_debit)
        .bind(elimination_credit)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn require_draft(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        snapshot_id: Uuid,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let status: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status FROM consolidation_snapshots
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            FOR UPDATE
            "#,
        )
        .bind(snapshot_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(AppError::from_sqlx)?;

        let status = status
            .ok_or_else(|| DomainError::not_found("consolidation_snapshot", snapshot_id))?;
        let status: SnapshotStatus = status.parse().map_err(AppError::Domain)?;
        if status != SnapshotStatus::Draft {
            return Err(DomainError::invalid_transition(
                "consolidation_snapshot",
                status.as_str(),
                SnapshotStatus::Draft.as_str(),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_reads_are_tenant_scoped() {
        // Passing another tenant's period ids must surface NotFound, not
        // roll their balances into the snapshot
        for sql in [MEMBER_PERIODS_SQL, MEMBER_BALANCES_SQL] {
            assert!(sql.contains("agency_id IS NOT DISTINCT FROM"));
            assert!(sql.contains("sub_account_id IS NOT DISTINCT FROM"));
        }
    }
}
