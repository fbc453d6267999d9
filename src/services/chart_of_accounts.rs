//! Chart of Accounts Manager
//!
//! Owns the hierarchical account tree: code uniqueness within scope,
//! materialized path/level maintenance, archival rules, and subtree moves.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{
    account, Account, AccountType, DomainError, LedgerEvent, NormalBalance, OperationContext,
    MAX_ACCOUNT_DEPTH,
};
use crate::error::AppError;
use crate::events::EventEmitter;

/// Command to create an account
#[derive(Debug, Clone)]
pub struct CreateAccountCommand {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub normal_balance: Option<NormalBalance>,
    pub parent_account_id: Option<Uuid>,
    pub is_control_account: bool,
}

/// Command to update mutable account fields
#[derive(Debug, Clone, Default)]
pub struct UpdateAccountCommand {
    pub name: Option<String>,
    pub is_control_account: Option<bool>,
}

/// Command to archive an account
#[derive(Debug, Clone)]
pub struct ArchiveAccountCommand {
    pub reason: String,
}

/// Command to move an account under a new parent (None re-roots it)
#[derive(Debug, Clone)]
pub struct MoveAccountCommand {
    pub new_parent_id: Option<Uuid>,
}

/// Chart of Accounts service
pub struct ChartOfAccountsService {
    pool: PgPool,
    audit: AuditLogService,
    emitter: EventEmitter,
}

type AccountRow = (
    Uuid,
    String,
    String,
    String,
    String,
    Option<Uuid>,
    String,
    i32,
    bool,
    bool,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn account_from_row(row: AccountRow) -> Result<Account, AppError> {
    let (
        id,
        code,
        name,
        account_type,
        normal_balance,
        parent_account_id,
        path,
        level,
        is_control_account,
        is_system_managed,
        is_archived,
        created_at,
        updated_at,
    ) = row;

    Ok(Account {
        id,
        code,
        name,
        account_type: account_type.parse().map_err(AppError::Domain)?,
        normal_balance: normal_balance.parse().map_err(AppError::Domain)?,
        parent_account_id,
        path,
        level,
        is_control_account,
        is_system_managed,
        is_archived,
        created_at,
        updated_at,
    })
}

const ACCOUNT_COLUMNS: &str = "id, code, name, account_type, normal_balance, parent_account_id, \
     path, level, is_control_account, is_system_managed, is_archived, created_at, updated_at";

impl ChartOfAccountsService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit: AuditLogService::new(pool.clone()),
            emitter: EventEmitter::new(pool.clone()),
            pool,
        }
    }

    /// Create an account under an optional parent.
    pub async fn create_account(
        &self,
        command: CreateAccountCommand,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        account::validate_code(&command.code)?;
        let code = command.code.trim().to_string();
        if command.name.trim().is_empty() {
            return Err(DomainError::Validation("account name must not be empty".to_string()).into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        // Code uniqueness within scope
        let duplicate: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM accounts
                WHERE code = $1
                  AND agency_id IS NOT DISTINCT FROM $2
                  AND sub_account_id IS NOT DISTINCT FROM $3
            )
            "#,
        )
        .bind(&code)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_one(&mut *tx)
        .await?;

        if duplicate {
            return Err(DomainError::HierarchyViolation(format!(
                "account code '{}' already exists in scope",
                code
            ))
            .into());
        }

        let parent = match command.parent_account_id {
            Some(parent_id) => {
                let row: Option<(String, i32, bool)> = sqlx::query_as(
                    r#"
                    SELECT path, level, is_archived FROM accounts
                    WHERE id = $1
                      AND agency_id IS NOT DISTINCT FROM $2
                      AND sub_account_id IS NOT DISTINCT FROM $3
                    FOR UPDATE
                    "#,
                )
                .bind(parent_id)
                .bind(agency_id)
                .bind(sub_account_id)
                .fetch_optional(&mut *tx)
                .await?;

                let (path, level, is_archived) =
                    row.ok_or_else(|| DomainError::not_found("account", parent_id))?;
                if is_archived {
                    return Err(DomainError::Validation(
                        "cannot create a child under an archived account".to_string(),
                    )
                    .into());
                }
                Some((path, level))
            }
            None => None,
        };

        let path = account::child_path(parent.as_ref().map(|(p, _)| p.as_str()), &code);
        let level = account::child_level(parent.as_ref().map(|(_, l)| *l));
        if level > MAX_ACCOUNT_DEPTH {
            return Err(DomainError::HierarchyViolation(format!(
                "account depth {} exceeds maximum of {}",
                level, MAX_ACCOUNT_DEPTH
            ))
            .into());
        }

        let normal_balance = command
            .normal_balance
            .unwrap_or_else(|| command.account_type.default_normal_balance());

        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO accounts (
                id, agency_id, sub_account_id, code, name, account_type, normal_balance,
                parent_account_id, path, level, is_control_account
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(&code)
        .bind(command.name.trim())
        .bind(command.account_type.as_str())
        .bind(normal_balance.as_str())
        .bind(command.parent_account_id)
        .bind(&path)
        .bind(level)
        .bind(command.is_control_account)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let created = account_from_row(row)?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::AccountCreated)
                    .entity_type("Account")
                    .entity_id(created.id)
                    .new_values(&created),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::account(
                    "account.created",
                    created.id,
                    json!({ "code": created.code, "account_type": created.account_type }),
                ),
                context,
            )
            .await;

        Ok(created)
    }

    /// Update mutable fields; system-managed accounts are immutable.
    pub async fn update_account(
        &self,
        account_id: Uuid,
        command: UpdateAccountCommand,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let before = self.fetch_for_update(&mut tx, account_id, context).await?;
        if before.is_system_managed {
            return Err(DomainError::Validation(
                "system-managed accounts cannot be modified".to_string(),
            )
            .into());
        }

        let name = command.name.unwrap_or_else(|| before.name.clone());
        if name.trim().is_empty() {
            return Err(DomainError::Validation("account name must not be empty".to_string()).into());
        }
        let is_control_account = command
            .is_control_account
            .unwrap_or(before.is_control_account);

        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            UPDATE accounts
            SET name = $1, is_control_account = $2, updated_at = NOW()
            WHERE id = $3
              AND agency_id IS NOT DISTINCT FROM $4
              AND sub_account_id IS NOT DISTINCT FROM $5
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(name.trim())
        .bind(is_control_account)
        .bind(account_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let updated = account_from_row(row)?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::AccountUpdated)
                    .entity_type("Account")
                    .entity_id(account_id)
                    .previous_values(&before)
                    .new_values(&updated),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::account("account.updated", account_id, json!({ "code": updated.code })),
                context,
            )
            .await;

        Ok(updated)
    }

    /// Archive an account; blocked while children, postings or balances exist.
    pub async fn archive_account(
        &self,
        account_id: Uuid,
        command: ArchiveAccountCommand,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        if command.reason.trim().is_empty() {
            return Err(DomainError::Validation("archive reason is required".to_string()).into());
        }

        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let before = self.fetch_for_update(&mut tx, account_id, context).await?;
        if before.is_system_managed {
            return Err(DomainError::Validation(
                "system-managed accounts cannot be archived".to_string(),
            )
            .into());
        }
        if before.is_archived {
            return Err(DomainError::Validation("account is already archived".to_string()).into());
        }

        let has_children: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE parent_account_id = $1 AND NOT is_archived)",
        )
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;
        if has_children {
            return Err(
                DomainError::Validation("account with child accounts cannot be archived".to_string())
                    .into(),
            );
        }

        let has_lines: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM journal_entry_lines WHERE account_id = $1)",
        )
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;
        if has_lines {
            return Err(DomainError::Validation(
                "account with journal postings cannot be archived".to_string(),
            )
            .into());
        }

        let has_balances: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM account_balances WHERE account_id = $1)",
        )
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;
        if has_balances {
            return Err(DomainError::Validation(
                "account with balances cannot be archived".to_string(),
            )
            .into());
        }

        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            UPDATE accounts
            SET is_archived = TRUE, archived_reason = $1, updated_at = NOW()
            WHERE id = $2
              AND agency_id IS NOT DISTINCT FROM $3
              AND sub_account_id IS NOT DISTINCT FROM $4
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(command.reason.trim())
        .bind(account_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let archived = account_from_row(row)?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::AccountArchived)
                    .entity_type("Account")
                    .entity_id(account_id)
                    .previous_values(&before)
                    .reason(command.reason.trim()),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::account(
                    "account.archived",
                    account_id,
                    json!({ "code": archived.code, "reason": command.reason.trim() }),
                ),
                context,
            )
            .await;

        Ok(archived)
    }

    /// Move an account (and its whole subtree) under a new parent in one
    /// transaction. Cycles and depth overflows are rejected before any
    /// path is rewritten.
    pub async fn move_account(
        &self,
        account_id: Uuid,
        command: MoveAccountCommand,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();
        let mut tx = self.pool.begin().await?;

        let node = self.fetch_for_update(&mut tx, account_id, context).await?;
        if node.is_system_managed {
            return Err(DomainError::Validation(
                "system-managed accounts cannot be moved".to_string(),
            )
            .into());
        }

        let new_parent = match command.new_parent_id {
            Some(parent_id) => {
                if parent_id == account_id {
                    return Err(DomainError::HierarchyViolation(
                        "cannot move an account under itself or its own descendant".to_string(),
                    )
                    .into());
                }
                let row: Option<(String, i32, bool)> = sqlx::query_as(
                    r#"
                    SELECT path, level, is_archived FROM accounts
                    WHERE id = $1
                      AND agency_id IS NOT DISTINCT FROM $2
                      AND sub_account_id IS NOT DISTINCT FROM $3
                    FOR UPDATE
                    "#,
                )
                .bind(parent_id)
                .bind(agency_id)
                .bind(sub_account_id)
                .fetch_optional(&mut *tx)
                .await?;

                let (path, level, is_archived) =
                    row.ok_or_else(|| DomainError::not_found("account", parent_id))?;
                if is_archived {
                    return Err(DomainError::Validation(
                        "cannot move an account under an archived account".to_string(),
                    )
                    .into());
                }
                Some((path, level))
            }
            None => None,
        };

        // Deepest level currently inside the subtree (the node itself included)
        let max_descendant_level: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT MAX(level) FROM accounts
            WHERE path LIKE $1 || '%'
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(&node.path)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_one(&mut *tx)
        .await?;
        let max_descendant_level = max_descendant_level.unwrap_or(node.level);

        let (new_path, new_level) = account::validate_move(
            &node.path,
            node.level,
            new_parent.as_ref().map(|(p, l)| (p.as_str(), *l)),
            max_descendant_level,
        )?;

        // Rewrite the subtree prefix and shift levels in one statement
        let level_delta = new_level - node.level;
        sqlx::query(
            r#"
            UPDATE accounts
            SET path = $1 || SUBSTRING(path FROM $2),
                level = level + $3,
                updated_at = NOW()
            WHERE path LIKE $4 || '%'
              AND agency_id IS NOT DISTINCT FROM $5
              AND sub_account_id IS NOT DISTINCT FROM $6
            "#,
        )
        .bind(&new_path)
        // SUBSTRING counts characters, not bytes
        .bind(node.path.chars().count() as i32 + 1)
        .bind(level_delta)
        .bind(&node.path)
        .bind(agency_id)
        .bind(sub_account_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE accounts SET parent_account_id = $1 WHERE id = $2")
            .bind(command.new_parent_id)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let moved = self.get_account(account_id, context).await?;

        self.audit
            .log_or_warn(
                AuditLogBuilder::new(AuditAction::AccountMoved)
                    .entity_type("Account")
                    .entity_id(account_id)
                    .previous_values(&json!({ "path": node.path, "level": node.level }))
                    .new_values(&json!({ "path": moved.path, "level": moved.level })),
                context,
            )
            .await;
        self.emitter
            .emit(
                LedgerEvent::account(
                    "account.moved",
                    account_id,
                    json!({ "old_path": node.path, "new_path": moved.path }),
                ),
                context,
            )
            .await;

        Ok(moved)
    }

    /// Fetch one account within the caller's scope.
    pub async fn get_account(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: Option<AccountRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM accounts
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| DomainError::not_found("account", account_id))?;
        account_from_row(row)
    }

    /// List accounts in scope as a flat tree, ordered by path.
    pub async fn list_accounts(
        &self,
        include_archived: bool,
        context: &OperationContext,
    ) -> Result<Vec<Account>, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM accounts
            WHERE agency_id IS NOT DISTINCT FROM $1
              AND sub_account_id IS NOT DISTINCT FROM $2
              AND ($3 OR NOT is_archived)
            ORDER BY path
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(include_archived)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(account_from_row).collect()
    }

    async fn fetch_for_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        let (agency_id, sub_account_id) = context.scope.columns();

        let row: Option<AccountRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM accounts
            WHERE id = $1
              AND agency_id IS NOT DISTINCT FROM $2
              AND sub_account_id IS NOT DISTINCT FROM $3
            FOR UPDATE
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(agency_id)
        .bind(sub_account_id)
        .fetch_optional(&mut **tx)
        .await?;

        let row = row.ok_or_else(|| DomainError::not_found("account", account_id))?;
        account_from_row(row)
    }
}
