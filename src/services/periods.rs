//! Financial Period Manager
//!
//! Period lifecycle and the close procedure. Closing a period seeds the
//! next period's opening balances: balance-sheet accounts carry their
//! closing forward, profit-and-loss accounts reset to zero.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{
    period, AccountType, DomainError, FinancialPeriod, LedgerEvent, OperationContext, PeriodStatus,
};
use crate::error::AppError;
use crate::events::EventEmitter;
use crate::services::BalanceAggregator;

/// Command to create a period
#[derive(Debug, Clone)]
pub struct CreatePeriodCommand {
    pub fiscal_year: i32,
    pub fiscal_period: i32,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Financial Period service
pub struct PeriodService {
    pool: PgPool,
    audit: AuditLogService,
    emitter: EventEmitter,
}

type PeriodRow = (
    Uuid,
    i32,
    i32,
    String,
    NaiveDate,
    NaiveDate,
    String,
    Option<chrono::DateTime<Utc>>,
    Option<chrono::DateTime<Utc>>,
    Option<String>,
);

const PERIOD_COLUMNS: &str = "id, fiscal_year, fiscal_period, name, start_date, end_date, \
     status, closed_at, locked_at, locked_reason";

fn period_from_row(row: PeriodRow) -> Result<FinancialPeriod, AppError> {
    let (
        id,
        fiscal_year,
        fiscal_period,
        name,
        start_date,
        end_date,
        status,
        closed_at,
        locked_at,
        locked_reason,
    ) = row;

    Ok(FinancialPeriod {
        id,
        fiscal_year,
        fiscal_period,
        name,
        start_date,
        end_date,
        status: status.parse().map_err(AppError::Domain)?,
        closed_at,
        locked_at,
        locked_reason,
    })
}

impl PeriodService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit: AuditLogService::new(pool.clone()),
            emitter: EventEmitter::new(pool.clone()),
            pool,
        }
    }

    /// Create a FUTURE period; date ranges within one scope must not overlap.
    pub async fn create_period(
        &self,
        command: CreatePeriodCommand,
        context: &OperationContext,
    ) -> Result<FinancialPeriod, AppError> {
        if command.name.trim().is_empty() {
            return Err(DomainError::Validation("period name must not be empty".to_string()).into());
        }
        if command.end_date < command.start_date {
            return Err(DomainError::Validation(
                "period end date must not precede its start date".to_string(),
            )
            .into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let existing: Vec<(NaiveDate, NaiveDate)> = sqlx::query_as(
            r#"
            SELECT start_date, end_date FROM financial_periods
            WHERE agency_id IS NOT DISTINCT FROM $1
              AND sub_account_id IS NOT DISTINCT FROM $2
            FOR UPDATE
            "#,
        )
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_all(&mut *tx)
        .await?;

        for (start, end) in existing {
            if period::ranges_overlap(command.start_date, command.end_date, start, end) {
                return Err(DomainError::Validation(format!(
                    "period overlaps existing period {} to {}",
                    start, end
                ))
                .into());
            }
        }

        let row: PeriodRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO financial_periods (
                id, agency_id, sub_account_id, fiscal_year, fiscal_period,
                name, start_date, end_date, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'FUTURE')
            RETURNING {}
            "#,
            PERIOD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(command.fiscal_year)
        .bind(command.fiscal_period)
        .bind(command.name.trim())
        .bind(command.start_date)
        .bind(command.end_date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let created = period_from_row(row)?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::PeriodCreated)
                    .entity_type("FinancialPeriod")
                    .entity_id(created.id)
                    .new_values(&created),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::period(
                    "period.created",
                    created.id,
                    json!({ "name": created.name, "start_date": created.start_date }),
                ),
                context,
            )
            .await;

        Ok(created)
    }

    /// FUTURE -> OPEN.
    pub async fn open_period(
        &self,
        period_id: Uuid,
        context: &OperationContext,
    ) -> Result<FinancialPeriod, AppError> {
        let mut tx = self.pool.begin().await?;
        let before = self.fetch_for_update(&mut tx, period_id, context).await?;
        Self::check_transition(&before, PeriodStatus::Open)?;

        let updated = Self::set_status(&mut tx, period_id, PeriodStatus::Open, None).await?;
        tx.commit().await?;

        self.record_transition(AuditAction::PeriodOpened, "period.opened", &before, &updated, None, context)
            .await;
        Ok(updated)
    }

    /// OPEN -> CLOSED, with carry-forward into the next period.
    ///
    /// Runs in one transaction: the period row is locked first so no
    /// posting can approve into it concurrently, then every balance row is
    /// folded into the next period's openings. If no later period exists
    /// yet, closing still succeeds and the next create picks up no seed.
    pub async fn close_period(
        &self,
        period_id: Uuid,
        context: &OperationContext,
    ) -> Result<FinancialPeriod, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let before = self.fetch_for_update(&mut tx, period_id, context).await?;
        Self::check_transition(&before, PeriodStatus::Closed)?;

        // Draft and pending entries may outlive the close; approving one
        // afterwards fails on the period-status check inside the approval
        // transaction
        let next_period: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM financial_periods
            WHERE start_date > $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            ORDER BY start_date ASC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(before.end_date)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((next_id,)) = next_period {
            self.carry_forward(&mut tx, period_id, next_id, context)
                .await?;
        } else {
            tracing::info!(
                period_id = %period_id,
                "No later period exists; closing without carry-forward"
            );
        }

        let updated = Self::set_status(&mut tx, period_id, PeriodStatus::Closed, None).await?;
        tx.commit().await?;

        self.record_transition(AuditAction::PeriodClosed, "period.closed", &before, &updated, None, context)
            .await;
        Ok(updated)
    }

    /// CLOSED -> OPEN. Only the most recently closed period may reopen: a
    /// later CLOSED or LOCKED period would have stale openings otherwise.
    pub async fn reopen_period(
        &self,
        period_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> Result<FinancialPeriod, AppError> {
        if reason.trim().is_empty() {
            return Err(DomainError::Validation("reopen reason is required".to_string()).into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let before = self.fetch_for_update(&mut tx, period_id, context).await?;
        Self::check_transition(&before, PeriodStatus::Open)?;

        let later_settled: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM financial_periods
                WHERE start_date > $1
                  AND status IN ('CLOSED', 'LOCKED')
                  AND agency_id IS NOT DISTINCT FROM $2
                  AND sub_account_id IS NOT DISTINCT FROM $3
            )
            "#,
        )
        .bind(before.end_date)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_one(&mut *tx)
        .await?;
        if later_settled {
            return Err(DomainError::PeriodStateViolation(
                "a later period is already closed or locked; reopen later periods first"
                    .to_string(),
            )
            .into());
        }

        let updated = Self::set_status(&mut tx, period_id, PeriodStatus::Open, None).await?;
        tx.commit().await?;

        self.record_transition(
            AuditAction::PeriodReopened,
            "period.reopened",
            &before,
            &updated,
            Some(reason.trim()),
            context,
        )
        .await;
        Ok(updated)
    }

    /// CLOSED -> LOCKED. Terminal; a reason is mandatory.
    pub async fn lock_period(
        &self,
        period_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> Result<FinancialPeriod, AppError> {
        if reason.trim().is_empty() {
            return Err(DomainError::Validation("lock reason is required".to_string()).into());
        }

        let mut tx = self.pool.begin().await?;
        let before = self.fetch_for_update(&mut tx, period_id, context).await?;
        Self::check_transition(&before, PeriodStatus::Locked)?;

        let updated =
            Self::set_status(&mut tx, period_id, PeriodStatus::Locked, Some(reason.trim())).await?;
        tx.commit().await?;

        self.record_transition(
            AuditAction::PeriodLocked,
            "period.locked",
            &before,
            &updated,
            Some(reason.trim()),
            context,
        )
        .await;
        Ok(updated)
    }

    /// Fetch one period within the caller's scope.
    pub async fn get_period(
        &self,
        period_id: Uuid,
        context: &OperationContext,
    ) -> Result<FinancialPeriod, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: Option<PeriodRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM financial_periods
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
            PERIOD_COLUMNS
        ))
        .bind(period_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| DomainError::not_found("financial_period", period_id))?;
        period_from_row(row)
    }

    /// List periods in scope in calendar order.
    pub async fn list_periods(
        &self,
        context: &OperationContext,
    ) -> Result<Vec<FinancialPeriod>, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let rows: Vec<PeriodRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM financial_periods
            WHERE agency_id IS NOT DISTINCT FROM $1
              AND sub_account_id IS NOT DISTINCT FROM $2
            ORDER BY start_date
            "#,
            PERIOD_COLUMNS
        ))
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(period_from_row).collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn carry_forward(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        closing_period_id: Uuid,
        next_period_id: Uuid,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let rows: Vec<(Uuid, String, String, Decimal, Decimal)> = sqlx::query_as(
            r#"
            SELECT b.account_id, b.currency_code, a.account_type,
                   b.closing_balance, b.base_closing_balance
            FROM account_balances b
            JOIN accounts a ON a.id = b.account_id
            WHERE b.period_id = $1
            ORDER BY b.account_id, b.currency_code
            "#,
        )
        .bind(closing_period_id)
        .fetch_all(&mut **tx)
        .await?;

        for (account_id, currency_code, account_type, closing, base_closing) in rows {
            let account_type: AccountType = account_type.parse().map_err(AppError::Domain)?;
            let opening = period::carry_forward_amount(account_type, closing);
            let base_opening = period::carry_forward_amount(account_type, base_closing);

            BalanceAggregator::set_opening(
                tx,
                context.scope,
                next_period_id,
                account_id,
                &currency_code,
                opening,
                base_opening,
            )
            .await?;
        }
        Ok(())
    }

    fn check_transition(period: &FinancialPeriod, next: PeriodStatus) -> Result<(), AppError> {
        if !period.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(
                "financial_period",
                period.status.as_str(),
                next.as_str(),
            )
            .into());
        }
        Ok(())
    }

    async fn set_status(
        tx: &mut Transaction<'_, Postgres>,
        period_id: Uuid,
        status: PeriodStatus,
        locked_reason: Option<&str>,
    ) -> Result<FinancialPeriod, AppError> {
        let row: PeriodRow = sqlx::query_as(&format!(
            r#"
            UPDATE financial_periods
            SET status = $1,
                closed_at = CASE WHEN $1 = 'CLOSED' THEN NOW() ELSE closed_at END,
                locked_at = CASE WHEN $1 = 'LOCKED' THEN NOW() ELSE locked_at END,
                locked_reason = COALESCE($2, locked_reason),
                updated_at = NOW()
            WHERE id = $3
            RETURNING {}
            "#,
            PERIOD_COLUMNS
        ))
        .bind(status.as_str())
        .bind(locked_reason)
        .bind(period_id)
        .fetch_one(&mut **tx)
        .await?;

        period_from_row(row)
    }

    async fn record_transition(
        &self,
        action: AuditAction,
        event_key: &'static str,
        before: &FinancialPeriod,
        after: &FinancialPeriod,
        reason: Option<&str>,
        context: &OperationContext,
    ) {
        let mut builder = AuditLogBuilder::new(action)
            .entity_type("FinancialPeriod")
            .entity_id(after.id)
            .previous_values(&json!({ "status": before.status }))
            .new_values(&json!({ "status": after.status }));
        if let Some(reason) = reason {
            builder = builder.reason(reason);
        }
        self.audit.log_or_warn(builder, context).await;

        self.emitter
            .emit(
                LedgerEvent::period(
                    event_key,
                    after.id,
                    json!({ "name": after.name, "status": after.status }),
                ),
                context,
            )
            .await;
    }

    async fn fetch_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        period_id: Uuid,
        context: &OperationContext,
    ) -> Result<FinancialPeriod, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: Option<PeriodRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM financial_periods
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            FOR UPDATE
            "#,
            PERIOD_COLUMNS
        ))
        .bind(period_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(AppError::from_sqlx)?;

        let row = row.ok_or_else(|| DomainError::not_found("financial_period", period_id))?;
        period_from_row(row)
    }
}
