//! API Routes
//!
//! HTTP endpoint definitions. Every mutating route checks the API key's
//! permission before touching a service; the "admin" permission implies
//! all others.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditLogService, ChainVerificationResult};
use crate::domain::{
    Account, AccountBalance, AccountType, DomainError, EntryStatus, FinancialPeriod, LineInput,
    MatchTolerance, NormalBalance, OpenItem, OperationContext, RuleCondition, SourceDocument,
};
use crate::error::AppError;
use crate::services::{
    AddEliminationCommand, ApplyRuleCommand, ArchiveAccountCommand, BalanceAggregator,
    ChartOfAccountsService, ClearingRuleRecord, ConsolidationService, CreateAccountCommand,
    CreateClearingRuleCommand, CreateEntryCommand, CreatePeriodCommand, CreatePostingRuleCommand,
    CreateReconciliationCommand, CreateSnapshotCommand, EntryView, JournalService,
    MatchItemsCommand, MoveAccountCommand,
    PeriodService, PostingRuleRecord, PostingRulesService, ReconciliationService,
    ReverseEntryCommand, SnapshotView, UpdateAccountCommand, UpdatePostingRuleCommand,
};

use super::middleware::AuthenticatedApiKey;

// =========================================================================
// Permissions
// =========================================================================

const PERM_COA: &str = "coa.manage";
const PERM_JOURNAL_CREATE: &str = "journal.create";
const PERM_JOURNAL_APPROVE: &str = "journal.approve";
const PERM_PERIODS: &str = "period.manage";
const PERM_RECONCILIATION: &str = "reconciliation.manage";
const PERM_CONSOLIDATION: &str = "consolidation.manage";
const PERM_POSTING_RULES: &str = "posting_rules.manage";

fn require(key: &AuthenticatedApiKey, permission: &str) -> Result<(), AppError> {
    if key.has_permission(permission) {
        return Ok(());
    }
    Err(DomainError::PermissionDenied {
        permission: permission.to_string(),
    }
    .into())
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub normal_balance: Option<NormalBalance>,
    #[serde(default)]
    pub parent_account_id: Option<Uuid>,
    #[serde(default)]
    pub is_control_account: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_control_account: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveAccountRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveAccountRequest {
    #[serde(default)]
    pub new_parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListAccountsQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreatePeriodRequest {
    pub fiscal_year: i32,
    pub fiscal_period: i32,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

fn default_exchange_rate() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Deserialize)]
pub struct CreateEntryRequest {
    pub entry_date: NaiveDate,
    pub description: String,
    pub period_id: Uuid,
    pub currency_code: String,
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: Decimal,
    pub lines: Vec<LineInput>,
}

#[derive(Debug, Deserialize)]
pub struct ReverseEntryRequest {
    pub reversal_date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    #[serde(default)]
    pub period_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<EntryStatus>,
}

#[derive(Debug, Deserialize)]
pub struct BalancesQuery {
    #[serde(default)]
    pub account_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReconciliationRequest {
    pub account_id: Uuid,
    pub period_id: Uuid,
    pub name: String,
    pub statement_date: NaiveDate,
    #[serde(default)]
    pub statement_balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CreateReconciliationResponse {
    pub reconciliation_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct MatchItemsRequest {
    pub item_ids: Vec<Uuid>,
    pub tolerance: MatchTolerance,
}

#[derive(Debug, Serialize)]
pub struct MatchItemsResponse {
    pub match_group_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct OpenItemsQuery {
    #[serde(default)]
    pub include_settled: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    pub name: String,
    pub period_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AddEliminationRequest {
    pub debit_account_code: String,
    pub credit_account_code: String,
    pub amount: Decimal,
    pub account_type: AccountType,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct AddEliminationResponse {
    pub adjustment_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostingRuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    pub debit_account_id: Uuid,
    pub credit_account_id: Uuid,
    #[serde(default = "default_rule_priority")]
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostingRuleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Option<Vec<RuleCondition>>,
    #[serde(default)]
    pub priority: Option<i32>,
}

fn default_rule_priority() -> i32 {
    100
}

#[derive(Debug, Deserialize)]
pub struct ApplyRuleRequest {
    pub document: SourceDocument,
    pub period_id: Uuid,
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CreateClearingRuleRequest {
    pub name: String,
    pub account_id: Uuid,
    pub tolerance: MatchTolerance,
    #[serde(default)]
    pub date_window_days: Option<i32>,
    #[serde(default = "default_rule_priority")]
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
pub struct AutoClearQuery {
    #[serde(default)]
    pub account_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AuditVerifyQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<PgPool> {
    Router::new()
        // Chart of accounts
        .route("/accounts", post(create_account))
        .route("/accounts", get(list_accounts))
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id", patch(update_account))
        .route("/accounts/:account_id/archive", post(archive_account))
        .route("/accounts/:account_id/move", post(move_account))
        .route("/accounts/:account_id/open-items", get(list_open_items))
        // Periods
        .route("/periods", post(create_period))
        .route("/periods", get(list_periods))
        .route("/periods/:period_id", get(get_period))
        .route("/periods/:period_id/open", post(open_period))
        .route("/periods/:period_id/close", post(close_period))
        .route("/periods/:period_id/reopen", post(reopen_period))
        .route("/periods/:period_id/lock", post(lock_period))
        .route("/periods/:period_id/balances", get(list_balances))
        // Journal entries
        .route("/entries", post(create_entry))
        .route("/entries", get(list_entries))
        .route("/entries/:entry_id", get(get_entry))
        .route("/entries/:entry_id/submit", post(submit_entry))
        .route("/entries/:entry_id/approve", post(approve_entry))
        .route("/entries/:entry_id/reject", post(reject_entry))
        .route("/entries/:entry_id/reverse", post(reverse_entry))
        // Reconciliation
        .route("/reconciliations", post(create_reconciliation))
        .route(
            "/reconciliations/:reconciliation_id/complete",
            post(complete_reconciliation),
        )
        .route("/reconciliations/match", post(match_items))
        .route("/clearing-rules", post(create_clearing_rule))
        .route("/clearing-rules", get(list_clearing_rules))
        .route("/reconciliations/auto-clear", post(auto_clear))
        .route("/open-items/:item_id/match", delete(unmatch_item))
        .route("/open-items/:item_id/exclude", post(exclude_item))
        // Consolidation
        .route("/consolidations", post(create_snapshot))
        .route("/consolidations/:snapshot_id", get(get_snapshot))
        .route(
            "/consolidations/:snapshot_id/eliminations",
            post(add_elimination),
        )
        .route(
            "/consolidations/:snapshot_id/eliminations/:adjustment_id",
            delete(remove_elimination),
        )
        .route(
            "/consolidations/:snapshot_id/finalize",
            post(finalize_snapshot),
        )
        // Posting rules
        .route("/posting-rules", post(create_posting_rule))
        .route("/posting-rules", get(list_posting_rules))
        .route("/posting-rules/:rule_id", get(get_posting_rule))
        .route("/posting-rules/:rule_id", patch(update_posting_rule))
        .route("/posting-rules/:rule_id/apply", post(apply_posting_rule))
        .route(
            "/posting-rules/:rule_id/deactivate",
            post(deactivate_posting_rule),
        )
        // Audit
        .route("/audit/verify", get(verify_audit_chain))
}

// =========================================================================
// Chart of accounts
// =========================================================================

async fn create_account(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    require(&key, PERM_COA)?;
    let service = ChartOfAccountsService::new(pool);
    let account = service
        .create_account(
            CreateAccountCommand {
                code: request.code,
                name: request.name,
                account_type: request.account_type,
                normal_balance: request.normal_balance,
                parent_account_id: request.parent_account_id,
                is_control_account: request.is_control_account,
            },
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn list_accounts(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<Vec<Account>>, AppError> {
    let service = ChartOfAccountsService::new(pool);
    let accounts = service
        .list_accounts(query.include_archived, &context)
        .await?;
    Ok(Json(accounts))
}

async fn get_account(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    let service = ChartOfAccountsService::new(pool);
    Ok(Json(service.get_account(account_id, &context).await?))
}

async fn update_account(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<UpdateAccountRequest>,
) -> Result<Json<Account>, AppError> {
    require(&key, PERM_COA)?;
    let service = ChartOfAccountsService::new(pool);
    let account = service
        .update_account(
            account_id,
            UpdateAccountCommand {
                name: request.name,
                is_control_account: request.is_control_account,
            },
            &context,
        )
        .await?;
    Ok(Json(account))
}

async fn archive_account(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<ArchiveAccountRequest>,
) -> Result<Json<Account>, AppError> {
    require(&key, PERM_COA)?;
    let service = ChartOfAccountsService::new(pool);
    let account = service
        .archive_account(
            account_id,
            ArchiveAccountCommand {
                reason: request.reason,
            },
            &context,
        )
        .await?;
    Ok(Json(account))
}

async fn move_account(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<MoveAccountRequest>,
) -> Result<Json<Account>, AppError> {
    require(&key, PERM_COA)?;
    let service = ChartOfAccountsService::new(pool);
    let account = service
        .move_account(
            account_id,
            MoveAccountCommand {
                new_parent_id: request.new_parent_id,
            },
            &context,
        )
        .await?;
    Ok(Json(account))
}

// =========================================================================
// Periods
// =========================================================================

async fn create_period(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreatePeriodRequest>,
) -> Result<(StatusCode, Json<FinancialPeriod>), AppError> {
    require(&key, PERM_PERIODS)?;
    let service = PeriodService::new(pool);
    let period = service
        .create_period(
            CreatePeriodCommand {
                fiscal_year: request.fiscal_year,
                fiscal_period: request.fiscal_period,
                name: request.name,
                start_date: request.start_date,
                end_date: request.end_date,
            },
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(period)))
}

async fn list_periods(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
) -> Result<Json<Vec<FinancialPeriod>>, AppError> {
    let service = PeriodService::new(pool);
    Ok(Json(service.list_periods(&context).await?))
}

async fn get_period(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(period_id): Path<Uuid>,
) -> Result<Json<FinancialPeriod>, AppError> {
    let service = PeriodService::new(pool);
    Ok(Json(service.get_period(period_id, &context).await?))
}

async fn open_period(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(period_id): Path<Uuid>,
) -> Result<Json<FinancialPeriod>, AppError> {
    require(&key, PERM_PERIODS)?;
    let service = PeriodService::new(pool);
    Ok(Json(service.open_period(period_id, &context).await?))
}

async fn close_period(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(period_id): Path<Uuid>,
) -> Result<Json<FinancialPeriod>, AppError> {
    require(&key, PERM_PERIODS)?;
    let service = PeriodService::new(pool);
    Ok(Json(service.close_period(period_id, &context).await?))
}

async fn reopen_period(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(period_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<FinancialPeriod>, AppError> {
    require(&key, PERM_PERIODS)?;
    let service = PeriodService::new(pool);
    Ok(Json(
        service
            .reopen_period(period_id, &request.reason, &context)
            .await?,
    ))
}

async fn lock_period(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(period_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<FinancialPeriod>, AppError> {
    require(&key, PERM_PERIODS)?;
    let service = PeriodService::new(pool);
    Ok(Json(
        service
            .lock_period(period_id, &request.reason, &context)
            .await?,
    ))
}

async fn list_balances(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(period_id): Path<Uuid>,
    Query(query): Query<BalancesQuery>,
) -> Result<Json<Vec<AccountBalance>>, AppError> {
    let aggregator = BalanceAggregator::new(pool);
    Ok(Json(
        aggregator
            .list_balances(context.scope, period_id, query.account_id)
            .await?,
    ))
}

// =========================================================================
// Journal entries
// =========================================================================

async fn create_entry(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateEntryRequest>,
) -> Result<(StatusCode, Json<EntryView>), AppError> {
    require(&key, PERM_JOURNAL_CREATE)?;
    let service = JournalService::new(pool);
    let entry = service
        .create_entry(
            CreateEntryCommand {
                entry_date: request.entry_date,
                description: request.description,
                period_id: request.period_id,
                currency_code: request.currency_code,
                exchange_rate: request.exchange_rate,
                lines: request.lines,
            },
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_entries(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<ListEntriesQuery>,
) -> Result<Json<Vec<crate::domain::JournalEntry>>, AppError> {
    let service = JournalService::new(pool);
    Ok(Json(
        service
            .list_entries(query.period_id, query.status, &context)
            .await?,
    ))
}

async fn get_entry(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<EntryView>, AppError> {
    let service = JournalService::new(pool);
    Ok(Json(service.get_entry(entry_id, &context).await?))
}

async fn submit_entry(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<EntryView>, AppError> {
    require(&key, PERM_JOURNAL_CREATE)?;
    let service = JournalService::new(pool);
    Ok(Json(service.submit_entry(entry_id, &context).await?))
}

async fn approve_entry(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<EntryView>, AppError> {
    require(&key, PERM_JOURNAL_APPROVE)?;
    let service = JournalService::new(pool);
    Ok(Json(service.approve_entry(entry_id, &context).await?))
}

async fn reject_entry(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(entry_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<EntryView>, AppError> {
    require(&key, PERM_JOURNAL_APPROVE)?;
    let service = JournalService::new(pool);
    Ok(Json(
        service
            .reject_entry(entry_id, &request.reason, &context)
            .await?,
    ))
}

async fn reverse_entry(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(entry_id): Path<Uuid>,
    Json(request): Json<ReverseEntryRequest>,
) -> Result<(StatusCode, Json<EntryView>), AppError> {
    require(&key, PERM_JOURNAL_APPROVE)?;
    let service = JournalService::new(pool);
    let reversal = service
        .reverse_entry(
            entry_id,
            ReverseEntryCommand {
                reversal_date: request.reversal_date,
                reason: request.reason,
            },
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reversal)))
}

// =========================================================================
// Reconciliation
// =========================================================================

async fn create_reconciliation(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateReconciliationRequest>,
) -> Result<(StatusCode, Json<CreateReconciliationResponse>), AppError> {
    require(&key, PERM_RECONCILIATION)?;
    let service = ReconciliationService::new(pool);
    let reconciliation_id = service
        .create_reconciliation(
            CreateReconciliationCommand {
                account_id: request.account_id,
                period_id: request.period_id,
                name: request.name,
                statement_date: request.statement_date,
                statement_balance: request.statement_balance,
            },
            &context,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateReconciliationResponse { reconciliation_id }),
    ))
}

async fn complete_reconciliation(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(reconciliation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require(&key, PERM_RECONCILIATION)?;
    let service = ReconciliationService::new(pool);
    service
        .complete_reconciliation(reconciliation_id, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn match_items(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<MatchItemsRequest>,
) -> Result<Json<MatchItemsResponse>, AppError> {
    require(&key, PERM_RECONCILIATION)?;
    let service = ReconciliationService::new(pool);
    let match_group_id = service
        .match_items(
            MatchItemsCommand {
                item_ids: request.item_ids,
                tolerance: request.tolerance,
            },
            &context,
        )
        .await?;
    Ok(Json(MatchItemsResponse { match_group_id }))
}

async fn unmatch_item(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require(&key, PERM_RECONCILIATION)?;
    let service = ReconciliationService::new(pool);
    service.unmatch_item(item_id, &context).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn exclude_item(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(item_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<StatusCode, AppError> {
    require(&key, PERM_RECONCILIATION)?;
    let service = ReconciliationService::new(pool);
    service
        .exclude_item(item_id, &request.reason, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_clearing_rule(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateClearingRuleRequest>,
) -> Result<(StatusCode, Json<ClearingRuleRecord>), AppError> {
    require(&key, PERM_RECONCILIATION)?;
    let service = ReconciliationService::new(pool);
    let rule = service
        .create_clearing_rule(
            CreateClearingRuleCommand {
                name: request.name,
                account_id: request.account_id,
                tolerance: request.tolerance,
                date_window_days: request.date_window_days,
                priority: request.priority,
            },
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn list_clearing_rules(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
) -> Result<Json<Vec<ClearingRuleRecord>>, AppError> {
    let service = ReconciliationService::new(pool);
    Ok(Json(service.list_clearing_rules(&context).await?))
}

async fn auto_clear(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<AutoClearQuery>,
) -> Result<Json<crate::services::AutoClearReport>, AppError> {
    require(&key, PERM_RECONCILIATION)?;
    let service = ReconciliationService::new(pool);
    Ok(Json(service.auto_clear(query.account_id, &context).await?))
}

async fn list_open_items(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<OpenItemsQuery>,
) -> Result<Json<Vec<OpenItem>>, AppError> {
    let service = ReconciliationService::new(pool);
    Ok(Json(
        service
            .list_open_items(account_id, query.include_settled, &context)
            .await?,
    ))
}

// =========================================================================
// Consolidation
// =========================================================================

async fn create_snapshot(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Result<(StatusCode, Json<SnapshotView>), AppError> {
    require(&key, PERM_CONSOLIDATION)?;
    let service = ConsolidationService::new(pool);
    let snapshot = service
        .create_snapshot(
            CreateSnapshotCommand {
                name: request.name,
                period_ids: request.period_ids,
            },
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_snapshot(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(snapshot_id): Path<Uuid>,
) -> Result<Json<SnapshotView>, AppError> {
    let service = ConsolidationService::new(pool);
    Ok(Json(service.get_snapshot(snapshot_id, &context).await?))
}

async fn add_elimination(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(snapshot_id): Path<Uuid>,
    Json(request): Json<AddEliminationRequest>,
) -> Result<(StatusCode, Json<AddEliminationResponse>), AppError> {
    require(&key, PERM_CONSOLIDATION)?;
    let service = ConsolidationService::new(pool);
    let adjustment_id = service
        .add_elimination(
            snapshot_id,
            AddEliminationCommand {
                debit_account_code: request.debit_account_code,
                credit_account_code: request.credit_account_code,
                amount: request.amount,
                account_type: request.account_type,
                description: request.description,
            },
            &context,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AddEliminationResponse { adjustment_id }),
    ))
}

async fn remove_elimination(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path((snapshot_id, adjustment_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    require(&key, PERM_CONSOLIDATION)?;
    let service = ConsolidationService::new(pool);
    service
        .remove_elimination(snapshot_id, adjustment_id, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn finalize_snapshot(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(snapshot_id): Path<Uuid>,
) -> Result<Json<SnapshotView>, AppError> {
    require(&key, PERM_CONSOLIDATION)?;
    let service = ConsolidationService::new(pool);
    Ok(Json(service.finalize_snapshot(snapshot_id, &context).await?))
}

// =========================================================================
// Posting rules
// =========================================================================

async fn create_posting_rule(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreatePostingRuleRequest>,
) -> Result<(StatusCode, Json<PostingRuleRecord>), AppError> {
    require(&key, PERM_POSTING_RULES)?;
    let service = PostingRulesService::new(pool);
    let rule = service
        .create_rule(
            CreatePostingRuleCommand {
                name: request.name,
                description: request.description,
                conditions: request.conditions,
                debit_account_id: request.debit_account_id,
                credit_account_id: request.credit_account_id,
                priority: request.priority,
            },
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn list_posting_rules(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
) -> Result<Json<Vec<PostingRuleRecord>>, AppError> {
    let service = PostingRulesService::new(pool);
    Ok(Json(service.list_rules(&context).await?))
}

async fn get_posting_rule(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<PostingRuleRecord>, AppError> {
    let service = PostingRulesService::new(pool);
    Ok(Json(service.get_rule(rule_id, &context).await?))
}

async fn update_posting_rule(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(rule_id): Path<Uuid>,
    Json(request): Json<UpdatePostingRuleRequest>,
) -> Result<Json<PostingRuleRecord>, AppError> {
    require(&key, PERM_POSTING_RULES)?;
    let service = PostingRulesService::new(pool);
    let rule = service
        .update_rule(
            rule_id,
            UpdatePostingRuleCommand {
                name: request.name,
                description: request.description,
                conditions: request.conditions,
                priority: request.priority,
            },
            &context,
        )
        .await?;
    Ok(Json(rule))
}

async fn apply_posting_rule(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(rule_id): Path<Uuid>,
    Json(request): Json<ApplyRuleRequest>,
) -> Result<(StatusCode, Json<EntryView>), AppError> {
    require(&key, PERM_POSTING_RULES)?;
    let service = PostingRulesService::new(pool);
    let entry = service
        .apply_rule(
            rule_id,
            ApplyRuleCommand {
                document: request.document,
                period_id: request.period_id,
                exchange_rate: request.exchange_rate,
            },
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn deactivate_posting_rule(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<PostingRuleRecord>, AppError> {
    require(&key, PERM_POSTING_RULES)?;
    let service = PostingRulesService::new(pool);
    Ok(Json(service.deactivate_rule(rule_id, &context).await?))
}

// =========================================================================
// Audit
// =========================================================================

async fn verify_audit_chain(
    State(pool): State<PgPool>,
    Extension(key): Extension<AuthenticatedApiKey>,
    Query(query): Query<AuditVerifyQuery>,
) -> Result<Json<ChainVerificationResult>, AppError> {
    require(&key, "admin")?;
    let service = AuditLogService::new(pool);
    let result = service
        .verify_hash_chain(query.limit)
        .await
        .map_err(|e| match e {
            crate::audit::AuditLogError::Database(e) => AppError::Database(e),
            crate::audit::AuditLogError::Serialization(e) => AppError::Internal(e.to_string()),
        })?;
    Ok(Json(result))
}
