//! Journal Entry Processor
//!
//! Entry lifecycle from draft through approval, rejection and reversal.
//! Approval is the posting moment: balances move, open items appear on
//! control accounts, and the entry becomes immutable. Serialization
//! conflicts during approval are retried once before surfacing.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{
    journal, DomainError, EntryStatus, JournalEntry, JournalLine, LedgerEvent, LineInput,
    OperationContext, PeriodStatus, PostingLine,
};
use crate::error::AppError;
use crate::events::EventEmitter;
use crate::services::BalanceAggregator;

/// Command to draft a journal entry
#[derive(Debug, Clone)]
pub struct CreateEntryCommand {
    pub entry_date: NaiveDate,
    pub description: String,
    pub period_id: Uuid,
    pub currency_code: String,
    pub exchange_rate: Decimal,
    pub lines: Vec<LineInput>,
}

/// Command to reverse an approved entry
#[derive(Debug, Clone)]
pub struct ReverseEntryCommand {
    pub reversal_date: NaiveDate,
    pub reason: String,
}

/// Entry header together with its lines
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: JournalEntry,
    pub lines: Vec<JournalLine>,
}

/// Journal Entry service
pub struct JournalService {
    pool: PgPool,
    audit: AuditLogService,
    emitter: EventEmitter,
}

type EntryRow = (
    Uuid,
    String,
    NaiveDate,
    String,
    String,
    Uuid,
    String,
    Decimal,
    bool,
    Option<Uuid>,
    Option<Uuid>,
    Option<chrono::DateTime<Utc>>,
    chrono::DateTime<Utc>,
);

const ENTRY_COLUMNS: &str = "id, entry_number, entry_date, description, status, period_id, \
     currency_code, exchange_rate, is_reversal_entry, reversal_of_entry_id, \
     reversed_by_entry_id, posted_at, created_at";

fn entry_from_row(row: EntryRow) -> Result<JournalEntry, AppError> {
    let (
        id,
        entry_number,
        entry_date,
        description,
        status,
        period_id,
        currency_code,
        exchange_rate,
        is_reversal_entry,
        reversal_of_entry_id,
        reversed_by_entry_id,
        posted_at,
        created_at,
    ) = row;

    Ok(JournalEntry {
        id,
        entry_number,
        entry_date,
        description,
        status: status.parse().map_err(AppError::Domain)?,
        period_id,
        currency_code,
        exchange_rate,
        is_reversal_entry,
        reversal_of_entry_id,
        reversed_by_entry_id,
        posted_at,
        created_at,
    })
}

impl JournalService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit: AuditLogService::new(pool.clone()),
            emitter: EventEmitter::new(pool.clone()),
            pool,
        }
    }

    /// Draft a new entry. The double-entry invariant is enforced here and
    /// re-checked at submit and approval.
    pub async fn create_entry(
        &self,
        command: CreateEntryCommand,
        context: &OperationContext,
    ) -> Result<EntryView, AppError> {
        journal::validate_exchange_rate(command.exchange_rate)?;
        journal::validate_lines(&command.lines)?;
        if command.description.trim().is_empty() {
            return Err(DomainError::Validation("description must not be empty".to_string()).into());
        }
        if command.currency_code.len() != 3 {
            return Err(DomainError::Validation(
                "currency code must be a 3-letter ISO code".to_string(),
            )
            .into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        // Period must exist in scope and still accept new work
        let period: Option<(String, NaiveDate, NaiveDate)> = sqlx::query_as(
            r#"
            SELECT status, start_date, end_date FROM financial_periods
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

        let (period_status, start_date, end_date) =
            period.ok_or_else(|| DomainError::not_found("financial_period", command.period_id))?;
        let period_status: PeriodStatus = period_status.parse().map_err(AppError::Domain)?;
        if period_status == PeriodStatus::Future {
            return Err(DomainError::PeriodStateViolation(
                "cannot draft entries in a future period".to_string(),
            )
            .into());
        }
        if !(start_date <= command.entry_date && command.entry_date <= end_date) {
            return Err(DomainError::Validation(
                "entry date falls outside the target period".to_string(),
            )
            .into());
        }

        self.check_line_accounts(&mut tx, &command.lines, context)
            .await?;

        // Sequential entry number per scope; gap-tolerant, a rolled-back
        // create consumes its number
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO entry_counters (scope_key, last_number)
            VALUES ($1, 1)
            ON CONFLICT (scope_key)
            DO UPDATE SET last_number = entry_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(context.scope.key())
        .fetch_one(&mut *tx)
        .await?;
        let entry_number = journal::format_entry_number(sequence);

        let lines = journal::build_lines(&command.lines, command.exchange_rate);

        let row: EntryRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO journal_entries (
                id, agency_id, sub_account_id, entry_number, entry_date, description,
                status, period_id, currency_code, exchange_rate, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'DRAFT', $7, $8, $9, $10)
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(&entry_number)
        .bind(command.entry_date)
        .bind(command.description.trim())
        .bind(command.period_id)
        .bind(&command.currency_code)
        .bind(command.exchange_rate)
        .bind(context.user_id)
        .fetch_one(&mut *tx)
        .await?;

        let entry = entry_from_row(row)?;
        Self::insert_lines(&mut tx, entry.id, &lines).await?;

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::EntryDrafted)
                    .entity_type("JournalEntry")
                    .entity_id(entry.id)
                    .new_values(&entry),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::journal(
                    "entry.drafted",
                    entry.id,
                    json!({ "entry_number": entry.entry_number, "period_id": entry.period_id }),
                ),
                context,
            )
            .await;

        Ok(EntryView { entry, lines })
    }

    /// DRAFT -> PENDING_APPROVAL. Lines are re-validated so a balanced
    /// draft cannot rot into an unbalanced submission.
    pub async fn submit_entry(
        &self,
        entry_id: Uuid,
        context: &OperationContext,
    ) -> Result<EntryView, AppError> {
        let mut tx = self.pool.begin().await?;

        let entry = self.fetch_for_update(&mut tx, entry_id, context).await?;
        if !entry.status.can_transition_to(EntryStatus::PendingApproval) {
            return Err(DomainError::invalid_transition(
                "journal_entry",
                entry.status.as_str(),
                EntryStatus::PendingApproval.as_str(),
            )
            .into());
        }

        let lines = Self::fetch_lines(&mut tx, entry_id).await?;
        let inputs: Vec<LineInput> = lines
            .iter()
            .map(|l| LineInput {
                account_id: l.account_id,
                debit_amount: l.debit_amount,
                credit_amount: l.credit_amount,
                memo: l.memo.clone(),
            })
            .collect();
        journal::validate_lines(&inputs)?;

        let updated = Self::set_status(&mut tx, entry_id, EntryStatus::PendingApproval).await?;
        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::EntrySubmitted)
                    .entity_type("JournalEntry")
                    .entity_id(entry_id)
                    .previous_values(&json!({ "status": entry.status }))
                    .new_values(&json!({ "status": updated.status })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::journal(
                    "entry.submitted",
                    entry_id,
                    json!({ "entry_number": updated.entry_number }),
                ),
                context,
            )
            .await;

        Ok(EntryView {
            entry: updated,
            lines,
        })
    }

    /// PENDING_APPROVAL -> APPROVED. This is the posting moment: balance
    /// aggregation and open item creation happen in the same transaction.
    /// A serialization conflict is retried once.
    pub async fn approve_entry(
        &self,
        entry_id: Uuid,
        context: &OperationContext,
    ) -> Result<EntryView, AppError> {
        let mut attempts = 0;
        let view = loop {
            match self.try_approve(entry_id, context).await {
                Ok(view) => break view,
                Err(AppError::Domain(DomainError::ConcurrencyConflict)) if attempts == 0 => {
                    attempts += 1;
                    tracing::warn!(
                        entry_id = %entry_id,
                        "Approval hit a serialization conflict, retrying once"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::EntryApproved)
                    .entity_type("JournalEntry")
                    .entity_id(entry_id)
                    .new_values(&json!({
                        "status": view.entry.status,
                        "posted_at": view.entry.posted_at,
                    })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::journal(
                    "entry.approved",
                    entry_id,
                    json!({
                        "entry_number": view.entry.entry_number,
                        "period_id": view.entry.period_id,
                    }),
                ),
                context,
            )
            .await;

        Ok(view)
    }

    async fn try_approve(
        &self,
        entry_id: Uuid,
        context: &OperationContext,
    ) -> Result<EntryView, AppError> {
        let mut tx = self.pool.begin().await?;

        let entry = self.fetch_for_update(&mut tx, entry_id, context).await?;
        if !entry.status.can_transition_to(EntryStatus::Approved) {
            return Err(DomainError::invalid_transition(
                "journal_entry",
                entry.status.as_str(),
                EntryStatus::Approved.as_str(),
            )
            .into());
        }

        // The period is locked for the duration of the posting so a close
        // cannot slide underneath it
        let period_status = Self::lock_period(&mut tx, entry.period_id).await?;
        if !period_status.accepts_postings() {
            return Err(DomainError::PeriodStateViolation(format!(
                "period is {}, postings require OPEN",
                period_status
            ))
            .into());
        }

        let lines = Self::fetch_lines(&mut tx, entry_id).await?;
        let posting: Vec<PostingLine> = lines
            .iter()
            .map(|l| PostingLine {
                account_id: l.account_id,
                currency_code: entry.currency_code.clone(),
                debit_amount: l.debit_amount,
                credit_amount: l.credit_amount,
                base_debit_amount: l.base_debit_amount,
                base_credit_amount: l.base_credit_amount,
            })
            .collect();

        BalanceAggregator::apply_lines(&mut tx, context.scope, entry.period_id, &posting).await?;
        Self::create_open_items(&mut tx, &entry, &lines, context).await?;

        let updated = Self::set_status(&mut tx, entry_id, EntryStatus::Approved).await?;
        tx.commit().await?;

        Ok(EntryView {
            entry: updated,
            lines,
        })
    }

    /// PENDING_APPROVAL -> REJECTED. A reason is mandatory; rejection is
    /// terminal and moves no balances.
    pub async fn reject_entry(
        &self,
        entry_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> Result<EntryView, AppError> {
        if reason.trim().is_empty() {
            return Err(DomainError::Validation("rejection reason is required".to_string()).into());
        }

        let mut tx = self.pool.begin().await?;

        let entry = self.fetch_for_update(&mut tx, entry_id, context).await?;
        if !entry.status.can_transition_to(EntryStatus::Rejected) {
            return Err(DomainError::invalid_transition(
                "journal_entry",
                entry.status.as_str(),
                EntryStatus::Rejected.as_str(),
            )
            .into());
        }

        sqlx::query("UPDATE journal_entries SET rejection_reason = $1 WHERE id = $2")
            .bind(reason.trim())
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        let updated = Self::set_status(&mut tx, entry_id, EntryStatus::Rejected).await?;
        let lines = Self::fetch_lines(&mut tx, entry_id).await?;
        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::EntryRejected)
                    .entity_type("JournalEntry")
                    .entity_id(entry_id)
                    .reason(reason.trim()),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::journal(
                    "entry.rejected",
                    entry_id,
                    json!({ "entry_number": updated.entry_number, "reason": reason.trim() }),
                ),
                context,
            )
            .await;

        Ok(EntryView {
            entry: updated,
            lines,
        })
    }

    /// Reverse an approved entry by posting its mirror image. The original
    /// is never mutated beyond the back-link; each entry can be reversed at
    /// most once.
    pub async fn reverse_entry(
        &self,
        entry_id: Uuid,
        command: ReverseEntryCommand,
        context: &OperationContext,
    ) -> Result<EntryView, AppError> {
        if command.reason.trim().is_empty() {
            return Err(DomainError::Validation("reversal reason is required".to_string()).into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let original = self.fetch_for_update(&mut tx, entry_id, context).await?;
        if original.status != EntryStatus::Approved {
            return Err(DomainError::invalid_transition(
                "journal_entry",
                original.status.as_str(),
                "REVERSED",
            )
            .into());
        }
        if original.reversed_by_entry_id.is_some() {
            return Err(DomainError::Validation(
                "entry has already been reversed".to_string(),
            )
            .into());
        }

        // The reversal posts into whichever OPEN period contains its date,
        // which lets a closed original be corrected in the current period
        let period: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, status FROM financial_periods
            WHERE start_date <= $1 AND $1 <= end_date
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            FOR UPDATE
            "#,
        )
        .bind(command.reversal_date)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (reversal_period_id, period_status) = period.ok_or_else(|| {
            DomainError::PeriodStateViolation(format!(
                "no period covers reversal date {}",
                command.reversal_date
            ))
        })?;
        let period_status: PeriodStatus = period_status.parse().map_err(AppError::Domain)?;
        if !period_status.accepts_postings() {
            return Err(DomainError::PeriodStateViolation(format!(
                "reversal period is {}, postings require OPEN",
                period_status
            ))
            .into());
        }

        let original_lines = Self::fetch_lines(&mut tx, entry_id).await?;
        let mirrored = journal::reversal_lines(&original_lines);

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO entry_counters (scope_key, last_number)
            VALUES ($1, 1)
            ON CONFLICT (scope_key)
            DO UPDATE SET last_number = entry_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(context.scope.key())
        .fetch_one(&mut *tx)
        .await?;

        let row: EntryRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO journal_entries (
                id, agency_id, sub_account_id, entry_number, entry_date, description,
                status, period_id, currency_code, exchange_rate,
                is_reversal_entry, reversal_of_entry_id, posted_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'APPROVED', $7, $8, $9, TRUE, $10, NOW(), $11)
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(journal::format_entry_number(sequence))
        .bind(command.reversal_date)
        .bind(format!(
            "Reversal of {}: {}",
            original.entry_number,
            command.reason.trim()
        ))
        .bind(reversal_period_id)
        .bind(&original.currency_code)
        .bind(original.exchange_rate)
        .bind(entry_id)
        .bind(context.user_id)
        .fetch_one(&mut *tx)
        .await?;

        let reversal = entry_from_row(row)?;
        Self::insert_lines(&mut tx, reversal.id, &mirrored).await?;

        let posting: Vec<PostingLine> = mirrored
            .iter()
            .map(|l| PostingLine {
                account_id: l.account_id,
                currency_code: reversal.currency_code.clone(),
                debit_amount: l.debit_amount,
                credit_amount: l.credit_amount,
                base_debit_amount: l.base_debit_amount,
                base_credit_amount: l.base_credit_amount,
            })
            .collect();
        BalanceAggregator::apply_lines(&mut tx, context.scope, reversal_period_id, &posting)
            .await?;
        Self::create_open_items(&mut tx, &reversal, &mirrored, context).await?;

        sqlx::query("UPDATE journal_entries SET reversed_by_entry_id = $1 WHERE id = $2")
            .bind(reversal.id)
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::EntryReversed)
                    .entity_type("JournalEntry")
                    .entity_id(entry_id)
                    .new_values(&json!({ "reversal_entry_id": reversal.id }))
                    .reason(command.reason.trim()),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::journal(
                    "entry.reversed",
                    entry_id,
                    json!({
                        "reversal_entry_id": reversal.id,
                        "reversal_entry_number": reversal.entry_number,
                    }),
                ),
                context,
            )
            .await;

        Ok(EntryView {
            entry: reversal,
            lines: mirrored,
        })
    }

    /// Fetch one entry with its lines.
    pub async fn get_entry(
        &self,
        entry_id: Uuid,
        context: &OperationContext,
    ) -> Result<EntryView, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: Option<EntryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM journal_entries
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| DomainError::not_found("journal_entry", entry_id))?;
        let entry = entry_from_row(row)?;

        let lines: Vec<(Uuid, i32, Decimal, Decimal, Decimal, Decimal, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT account_id, line_number, debit_amount, credit_amount,
                       base_debit_amount, base_credit_amount, memo
                FROM journal_entry_lines
                WHERE entry_id = $1
                ORDER BY line_number
                "#,
            )
            .bind(entry_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(EntryView {
            entry,
            lines: lines
                .into_iter()
                .map(
                    |(
                        account_id,
                        line_number,
                        debit_amount,
                        credit_amount,
                        base_debit_amount,
                        base_credit_amount,
                        memo,
                    )| JournalLine {
                        account_id,
                        line_number,
                        debit_amount,
                        credit_amount,
                        base_debit_amount,
                        base_credit_amount,
                        memo,
                    },
                )
                .collect(),
        })
    }

    /// List entries in scope for a period, newest first.
    pub async fn list_entries(
        &self,
        period_id: Option<Uuid>,
        status: Option<EntryStatus>,
        context: &OperationContext,
    ) -> Result<Vec<JournalEntry>, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM journal_entries
            WHERE agency_id IS NOT DISTINCT FROM $1
              AND sub_account_id IS NOT DISTINCT FROM $2
              AND ($3::uuid IS NULL OR period_id = $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC
            LIMIT 500
            "#,
            ENTRY_COLUMNS
        ))
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(period_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn check_line_accounts(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        lines: &[LineInput],
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();
        let account_ids: Vec<Uuid> = lines.iter().map(|l| l.account_id).collect();

        let rows: Vec<(Uuid, bool)> = sqlx::query_as(
            r#"
            SELECT id, is_archived FROM accounts
            WHERE id = ANY($1)
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(&account_ids)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_all(&mut **tx)
        .await?;

        for account_id in &account_ids {
            match rows.iter().find(|(id, _)| id == account_id) {
                None => return Err(DomainError::not_found("account", account_id).into()),
                Some((_, true)) => {
                    return Err(DomainError::Validation(format!(
                        "account {} is archived and cannot be posted to",
                        account_id
                    ))
                    .into())
                }
                Some((_, false)) => {}
            }
        }
        Ok(())
    }

    async fn insert_lines(
        tx: &mut Transaction<'_, Postgres>,
        entry_id: Uuid,
        lines: &[JournalLine],
    ) -> Result<(), AppError> {
        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO journal_entry_lines (
                    id, entry_id, account_id, line_number,
                    debit_amount, credit_amount, base_debit_amount, base_credit_amount, memo
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(entry_id)
            .bind(line.account_id)
            .bind(line.line_number)
            .bind(line.debit_amount)
            .bind(line.credit_amount)
            .bind(line.base_debit_amount)
            .bind(line.base_credit_amount)
            .bind(&line.memo)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn fetch_lines(
        tx: &mut Transaction<'_, Postgres>,
        entry_id: Uuid,
    ) -> Result<Vec<JournalLine>, AppError> {
        let rows: Vec<(Uuid, i32, Decimal, Decimal, Decimal, Decimal, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT account_id, line_number, debit_amount, credit_amount,
                       base_debit_amount, base_credit_amount, memo
                FROM journal_entry_lines
                WHERE entry_id = $1
                ORDER BY line_number
                "#,
            )
            .bind(entry_id)
            .fetch_all(&mut **tx)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    account_id,
                    line_number,
                    debit_amount,
                    credit_amount,
                    base_debit_amount,
                    base_credit_amount,
                    memo,
                )| JournalLine {
                    account_id,
                    line_number,
                    debit_amount,
                    credit_amount,
                    base_debit_amount,
                    base_credit_amount,
                    memo,
                },
            )
            .collect())
    }

    async fn lock_period(
        tx: &mut Transaction<'_, Postgres>,
        period_id: Uuid,
    ) -> Result<PeriodStatus, AppError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM financial_periods WHERE id = $1 FOR UPDATE")
                .bind(period_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(AppError::from_sqlx)?;

        let status = status.ok_or_else(|| DomainError::not_found("financial_period", period_id))?;
        status.parse().map_err(AppError::Domain)
    }

    async fn set_status(
        tx: &mut Transaction<'_, Postgres>,
        entry_id: Uuid,
        status: EntryStatus,
    ) -> Result<JournalEntry, AppError> {
        let posted = status == EntryStatus::Approved;
        let row: EntryRow = sqlx::query_as(&format!(
            r#"
            UPDATE journal_entries
            SET status = $1,
                posted_at = CASE WHEN $2 THEN NOW() ELSE posted_at END,
                updated_at = NOW()
            WHERE id = $3
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(status.as_str())
        .bind(posted)
        .bind(entry_id)
        .fetch_one(&mut **tx)
        .await?;

        entry_from_row(row)
    }

    /// One open item per non-zero side of every control-account line.
    async fn create_open_items(
        tx: &mut Transaction<'_, Postgres>,
        entry: &JournalEntry,
        lines: &[JournalLine],
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();
        let account_ids: Vec<Uuid> = lines.iter().map(|l| l.account_id).collect();

        let control_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM accounts WHERE id = ANY($1) AND is_control_account",
        )
        .bind(&account_ids)
        .fetch_all(&mut **tx)
        .await?;

        for line in lines {
            if !control_ids.iter().any(|(id,)| *id == line.account_id) {
                continue;
            }

            for (side, amount) in [
                ("DEBIT", line.debit_amount),
                ("CREDIT", line.credit_amount),
            ] {
                if amount == Decimal::ZERO {
                    continue;
                }
                sqlx::query(
                    r#"
                    INSERT INTO open_items (
                        id, agency_id, sub_account_id, account_id, entry_id, period_id,
                        line_number, side, amount, remaining_amount, currency_code,
                        item_date, reference, status
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, $10, $11, $12, 'OPEN')
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(agency_id)
                .bind(sub_account_id)
                .bind(line.account_id)
                .bind(entry.id)
                .bind(entry.period_id)
                .bind(line.line_number)
                .bind(side)
                .bind(amount)
                .bind(&entry.currency_code)
                .bind(entry.entry_date)
                .bind(&entry.entry_number)
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }

    async fn fetch_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry_id: Uuid,
        context: &OperationContext,
    ) -> Result<JournalEntry, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: Option<EntryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM journal_entries
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            FOR UPDATE
            "#,
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(AppError::from_sqlx)?;

        let row = row.ok_or_else(|| DomainError::not_found("journal_entry", entry_id))?;
        entry_from_row(row)
    }
}
