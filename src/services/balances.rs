//! Balance Aggregator
//!
//! Sole writer of `account_balances` rows. Runs inside the caller's
//! transaction so an approval or reversal is atomic with its balance
//! updates. Rows for the same (account, period, currency) key are
//! serialized through a batched `FOR UPDATE` taken in deterministic key
//! order.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{AccountBalance, BalanceDelta, LedgerScope, PostingLine};
use crate::error::AppError;

/// Balance Aggregator service
pub struct BalanceAggregator {
    pool: PgPool,
}

impl BalanceAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply posted lines to the period's balances.
    ///
    /// One batched lock select over the affected keys, then one upsert per
    /// (account, currency) group. Movements add; closing is recomputed as
    /// `opening + debit - credit`. New keys are seeded at zero opening.
    pub async fn apply_lines(
        tx: &mut Transaction<'_, Postgres>,
        scope: LedgerScope,
        period_id: Uuid,
        lines: &[PostingLine],
    ) -> Result<(), AppError> {
        let deltas = BalanceDelta::aggregate(lines);
        if deltas.is_empty() {
            return Ok(());
        }

        // Lock existing rows for every affected key, ordered so concurrent
        // posters acquire locks in the same sequence
        let account_ids: Vec<Uuid> = deltas.iter().map(|d| d.account_id).collect();
        sqlx::query(
            r#"
            SELECT id FROM account_balances
            WHERE period_id = $1 AND account_id = ANY($2)
            ORDER BY account_id, currency_code
            FOR UPDATE
            "#,
        )
        .bind(period_id)
        .bind(&account_ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(AppError::from_sqlx)?;

        let (agency_id, sub_account_id) = scope.columns();

        for delta in &deltas {
            sqlx::query(
                r#"
                INSERT INTO account_balances (
                    id, agency_id, sub_account_id, account_id, period_id, currency_code,
                    opening_balance, debit_movement, credit_movement, closing_balance,
                    base_opening_balance, base_debit_movement, base_credit_movement,
                    base_closing_balance
                )
                VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $7 - $8, 0, $9, $10, $9 - $10)
                ON CONFLICT (account_id, period_id, currency_code) DO UPDATE SET
                    debit_movement = account_balances.debit_movement + EXCLUDED.debit_movement,
                    credit_movement = account_balances.credit_movement + EXCLUDED.credit_movement,
                    closing_balance = account_balances.opening_balance
                        + account_balances.debit_movement + EXCLUDED.debit_movement
                        - account_balances.credit_movement - EXCLUDED.credit_movement,
                    base_debit_movement =
                        account_balances.base_debit_movement + EXCLUDED.base_debit_movement,
                    base_credit_movement =
                        account_balances.base_credit_movement + EXCLUDED.base_credit_movement,
                    base_closing_balance = account_balances.base_opening_balance
                        + account_balances.base_debit_movement + EXCLUDED.base_debit_movement
                        - account_balances.base_credit_movement - EXCLUDED.base_credit_movement,
                    updated_at = NOW()
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(agency_id)
            .bind(sub_account_id)
            .bind(delta.account_id)
            .bind(period_id)
            .bind(&delta.currency_code)
            .bind(delta.debit)
            .bind(delta.credit)
            .bind(delta.base_debit)
            .bind(delta.base_credit)
            .execute(&mut **tx)
            .await
            .map_err(AppError::from_sqlx)?;
        }

        Ok(())
    }

    /// Seed or overwrite the opening balance of one key, recomputing the
    /// closing from whatever movements the row already carries. Used by
    /// period close for carry-forward.
    pub async fn set_opening(
        tx: &mut Transaction<'_, Postgres>,
        scope: LedgerScope,
        period_id: Uuid,
        account_id: Uuid,
        currency_code: &str,
        opening: Decimal,
        base_opening: Decimal,
    ) -> Result<(), AppError> {
        let (agency_id, sub_account_id) = scope.columns();

        sqlx::query(
            r#"
            INSERT INTO account_balances (
                id, agency_id, sub_account_id, account_id, period_id, currency_code,
                opening_balance, debit_movement, credit_movement, closing_balance,
                base_opening_balance, base_debit_movement, base_credit_movement,
                base_closing_balance
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, $7, $8, 0, 0, $8)
            ON CONFLICT (account_id, period_id, currency_code) DO UPDATE SET
                opening_balance = EXCLUDED.opening_balance,
                closing_balance = EXCLUDED.opening_balance
                    + account_balances.debit_movement - account_balances.credit_movement,
                base_opening_balance = EXCLUDED.base_opening_balance,
                base_closing_balance = EXCLUDED.base_opening_balance
                    + account_balances.base_debit_movement
                    - account_balances.base_credit_movement,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(account_id)
        .bind(period_id)
        .bind(currency_code)
        .bind(opening)
        .bind(base_opening)
        .execute(&mut **tx)
        .await
        .map_err(AppError::from_sqlx)?;

        Ok(())
    }

    /// Balances of one account across periods, or of one period across
    /// accounts when `account_id` is None.
    pub async fn list_balances(
        &self,
        scope: LedgerScope,
        period_id: Uuid,
        account_id: Option<Uuid>,
    ) -> Result<Vec<AccountBalance>, AppError> {
        let (agency_id, sub_account_id) = scope.columns();

        let rows: Vec<(
            Uuid,
            Uuid,
            Uuid,
            String,
            Decimal,
            Decimal,
            Decimal,
            Decimal,
            Decimal,
            Decimal,
            Decimal,
            Decimal,
        )> = sqlx::query_as(
            r#"
            SELECT id, account_id, period_id, currency_code,
                   opening_balance, debit_movement, credit_movement, closing_balance,
                   base_opening_balance, base_debit_movement, base_credit_movement,
                   base_closing_balance
            FROM account_balances
            WHERE period_id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
              AND ($4::uuid IS NULL OR account_id = $4)
            ORDER BY account_id, currency_code
            "#,
        )
        .bind(period_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    account_id,
                    period_id,
                    currency_code,
                    opening_balance,
                    debit_movement,
                    credit_movement,
                    closing_balance,
                    base_opening_balance,
                    base_debit_movement,
                    base_credit_movement,
                    base_closing_balance,
                )| AccountBalance {
                    id,
                    account_id,
                    period_id,
                    currency_code,
                    opening_balance,
                    debit_movement,
                    credit_movement,
                    closing_balance,
                    base_opening_balance,
                    base_debit_movement,
                    base_credit_movement,
                    base_closing_balance,
                },
            )
            .collect())
    }
}
