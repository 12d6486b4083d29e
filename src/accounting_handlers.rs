// src/accounting_handlers.rs
//! Chart of accounts, bank accounts and the two voucher ledgers
//! (accounts payable / accounts receivable) with their payments.

use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::models::*;
use crate::error::{validate_amount, ApiError, ApiResult};
use crate::handlers::{fetch_page, normalize_page, ApiResponse};
use crate::query_builder::{FieldWhitelist, SafeQueryBuilder};
use crate::sequence::{next_document_number, DocumentKind};
use crate::validator::{normalize_code, CustomValidate, FieldValidator};

// ==================== CHART OF ACCOUNTS ====================

async fn find_account(pool: &sqlx::SqlitePool, id: &str) -> ApiResult<ChartOfAccount> {
    sqlx::query_as::<_, ChartOfAccount>("SELECT * FROM chart_of_accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Account"))
}

async fn account_code_exists(pool: &sqlx::SqlitePool, code: &str) -> ApiResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chart_of_accounts WHERE account_code = ?")
        .bind(code)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

pub async fn get_accounts(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<AccountQuery>,
) -> ApiResult<HttpResponse> {
    let account_type = query.account_type.as_deref().map(str::to_uppercase);
    let search = query.search.as_deref().map(|s| format!("%{}%", s.trim()));

    let accounts: Vec<ChartOfAccount> = sqlx::query_as(
        r#"SELECT * FROM chart_of_accounts
           WHERE (? IS NULL OR account_type = ?)
             AND (? IS NULL OR is_active = ?)
             AND (? IS NULL OR account_code LIKE ? OR account_name LIKE ?)
           ORDER BY account_code"#
    )
        .bind(&account_type)
        .bind(&account_type)
        .bind(query.is_active)
        .bind(query.is_active)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(accounts)))
}

pub async fn get_account(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let account = find_account(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(account)))
}

pub async fn create_account(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateAccountRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;

    let code = request.account_code.trim().to_string();
    let parent = request.parent_code.as_deref().map(str::trim);
    if let Some(parent) = parent {
        if !account_code_exists(&app_state.db_pool, parent).await? {
            return Err(ApiError::BadRequest(format!("Parent account {} does not exist", parent)));
        }
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO chart_of_accounts (
            id, account_code, account_name, account_type, normal_balance, parent_code,
            is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)"#
    )
        .bind(&id)
        .bind(&code)
        .bind(request.account_name.trim())
        .bind(request.account_type.to_string())
        .bind(request.account_type.normal_balance().to_string())
        .bind(parent)
        .bind(now)
        .bind(now)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Account {} created by {}", code, user_id);

    let account = find_account(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(account)))
}

pub async fn update_account(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateAccountRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let account_id = path.into_inner();
    request.validate()?;

    let account = find_account(&app_state.db_pool, &account_id).await?;

    let parent = request.parent_code.as_deref().map(str::trim);
    if let Some(parent) = parent {
        FieldValidator::account_code(parent).map_err(ApiError::ValidationError)?;
        if parent == account.account_code {
            return Err(ApiError::ValidationError("Account cannot be its own parent".to_string()));
        }
        if !account_code_exists(&app_state.db_pool, parent).await? {
            return Err(ApiError::BadRequest(format!("Parent account {} does not exist", parent)));
        }
    }

    sqlx::query(
        r#"UPDATE chart_of_accounts SET
            account_name = COALESCE(?, account_name),
            account_type = COALESCE(?, account_type),
            normal_balance = COALESCE(?, normal_balance),
            parent_code = COALESCE(?, parent_code),
            is_active = COALESCE(?, is_active),
            updated_at = ?
        WHERE id = ?"#
    )
        .bind(request.account_name.as_deref().map(str::trim))
        .bind(request.account_type.map(|t| t.to_string()))
        .bind(request.account_type.map(|t| t.normal_balance().to_string()))
        .bind(parent)
        .bind(request.is_active)
        .bind(Utc::now())
        .bind(&account_id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Account {} updated by {}", account.account_code, user_id);

    let account = find_account(&app_state.db_pool, &account_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(account)))
}

pub async fn delete_account(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let account_id = path.into_inner();
    let account = find_account(&app_state.db_pool, &account_id).await?;

    let (banks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM banks WHERE account_code = ?")
        .bind(&account.account_code)
        .fetch_one(&app_state.db_pool)
        .await?;
    let (children,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chart_of_accounts WHERE parent_code = ?")
        .bind(&account.account_code)
        .fetch_one(&app_state.db_pool)
        .await?;

    if banks > 0 || children > 0 {
        return Err(ApiError::Conflict(format!(
            "Account {} is used by {} bank(s) and {} sub-account(s)",
            account.account_code, banks, children
        )));
    }

    sqlx::query("DELETE FROM chart_of_accounts WHERE id = ?")
        .bind(&account_id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("🗑️ Account {} deleted by user {}", account.account_code, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Account deleted successfully".to_string())))
}

// ==================== BANKS ====================

async fn find_bank(pool: &sqlx::SqlitePool, id: &str) -> ApiResult<Bank> {
    sqlx::query_as::<_, Bank>("SELECT * FROM banks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Bank"))
}

pub async fn get_banks(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<BankQuery>,
) -> ApiResult<HttpResponse> {
    let search = query.search.as_deref().map(|s| format!("%{}%", s.trim()));

    let banks: Vec<Bank> = sqlx::query_as(
        r#"SELECT * FROM banks
           WHERE (? IS NULL OR is_active = ?)
             AND (? IS NULL OR bank_code LIKE ? OR bank_name LIKE ? OR account_number LIKE ?)
           ORDER BY bank_code"#
    )
        .bind(query.is_active)
        .bind(query.is_active)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(banks)))
}

pub async fn get_bank(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let bank = find_bank(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(bank)))
}

pub async fn create_bank(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateBankRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;

    let account_code = request.account_code.as_deref().map(str::trim);
    if let Some(code) = account_code {
        if !account_code_exists(&app_state.db_pool, code).await? {
            return Err(ApiError::BadRequest(format!("Account {} does not exist", code)));
        }
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let bank_code = normalize_code(&request.bank_code);

    sqlx::query(
        r#"INSERT INTO banks (
            id, bank_code, bank_name, account_name, account_number, branch, account_code,
            is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)"#
    )
        .bind(&id)
        .bind(&bank_code)
        .bind(request.bank_name.trim())
        .bind(request.account_name.trim())
        .bind(request.account_number.trim())
        .bind(&request.branch)
        .bind(account_code)
        .bind(now)
        .bind(now)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Bank {} created by {}", bank_code, user_id);

    let bank = find_bank(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(bank)))
}

pub async fn update_bank(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateBankRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let bank_id = path.into_inner();
    request.validate()?;
    let bank = find_bank(&app_state.db_pool, &bank_id).await?;

    let account_code = request.account_code.as_deref().map(str::trim);
    if let Some(code) = account_code {
        if !account_code_exists(&app_state.db_pool, code).await? {
            return Err(ApiError::BadRequest(format!("Account {} does not exist", code)));
        }
    }

    sqlx::query(
        r#"UPDATE banks SET
            bank_name = COALESCE(?, bank_name),
            account_name = COALESCE(?, account_name),
            account_number = COALESCE(?, account_number),
            branch = COALESCE(?, branch),
            account_code = COALESCE(?, account_code),
            is_active = COALESCE(?, is_active),
            updated_at = ?
        WHERE id = ?"#
    )
        .bind(request.bank_name.as_deref().map(str::trim))
        .bind(request.account_name.as_deref().map(str::trim))
        .bind(request.account_number.as_deref().map(str::trim))
        .bind(&request.branch)
        .bind(account_code)
        .bind(request.is_active)
        .bind(Utc::now())
        .bind(&bank_id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Bank {} updated by {}", bank.bank_code, user_id);

    let bank = find_bank(&app_state.db_pool, &bank_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(bank)))
}

pub async fn delete_bank(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let bank_id = path.into_inner();
    let bank = find_bank(&app_state.db_pool, &bank_id).await?;

    let (payments,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM voucher_payments WHERE bank_id = ?")
        .bind(&bank_id)
        .fetch_one(&app_state.db_pool)
        .await?;
    if payments > 0 {
        return Err(ApiError::Conflict(format!(
            "Bank {} has {} recorded payment(s); deactivate it instead",
            bank.bank_code, payments
        )));
    }

    sqlx::query("DELETE FROM banks WHERE id = ?")
        .bind(&bank_id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("🗑️ Bank {} deleted by user {}", bank.bank_code, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Bank deleted successfully".to_string())))
}

// ==================== VOUCHERS ====================

/// Columns shared by both voucher tables.
#[derive(Debug, sqlx::FromRow)]
struct VoucherState {
    voucher_no: String,
    amount: f64,
    amount_paid: f64,
    balance: f64,
    status: String,
}

impl VoucherState {
    fn status(&self) -> ApiResult<VoucherStatus> {
        VoucherStatus::from_str(&self.status).map_err(|_| {
            ApiError::InternalServerError(format!("Unknown voucher status '{}'", self.status))
        })
    }
}

async fn voucher_state(conn: &mut SqliteConnection, ledger: Ledger, id: &str) -> ApiResult<VoucherState> {
    let sql = format!(
        "SELECT voucher_no, amount, amount_paid, balance, status FROM {} WHERE id = ?",
        ledger.table()
    );
    sqlx::query_as::<_, VoucherState>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found(ledger.entity()))
}

async fn payment_count(conn: &mut SqliteConnection, ledger: Ledger, id: &str) -> ApiResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM voucher_payments WHERE ledger = ? AND voucher_id = ?")
        .bind(ledger.to_string())
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

async fn load_voucher<T>(conn: &mut SqliteConnection, ledger: Ledger, id: &str) -> ApiResult<VoucherWithPayments<T>>
where
    T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
{
    let sql = format!("SELECT * FROM {} WHERE id = ?", ledger.table());
    let voucher = sqlx::query_as::<_, T>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found(ledger.entity()))?;

    let payments = sqlx::query_as::<_, VoucherPayment>(
        "SELECT * FROM voucher_payments WHERE ledger = ? AND voucher_id = ? ORDER BY paid_on, created_at"
    )
        .bind(ledger.to_string())
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(VoucherWithPayments { voucher, payments })
}

async fn list_vouchers<T>(app_state: &AppState, ledger: Ledger, query: &VoucherQuery) -> ApiResult<HttpResponse>
where
    T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin + Serialize,
{
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);

    let whitelist = FieldWhitelist::for_vouchers(ledger.table());
    let mut builder = SafeQueryBuilder::new(&whitelist);

    if let Some(ref search) = query.search {
        builder.add_search(&["voucher_no", "invoice_no"], search);
    }
    if let Some(ref status) = query.status {
        builder.add_exact_match("status", status.to_uppercase());
    }

    builder
        .order_by(
            query.sort_by.as_deref().unwrap_or("created_at"),
            query.sort_order.as_deref().unwrap_or("DESC"),
        )
        .limit(per_page)
        .offset(offset);

    let result = fetch_page::<T>(&app_state.db_pool, &builder, page, per_page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

async fn show_voucher<T>(app_state: &AppState, ledger: Ledger, id: &str) -> ApiResult<HttpResponse>
where
    T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin + Serialize,
{
    let mut conn = app_state.db_pool.acquire().await?;
    let voucher = load_voucher::<T>(&mut conn, ledger, id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(voucher)))
}

async fn pay_voucher<T>(
    app_state: &AppState,
    ledger: Ledger,
    id: &str,
    request: &RecordPaymentRequest,
    user_id: &str,
) -> ApiResult<HttpResponse>
where
    T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin + Serialize,
{
    request.validate()?;
    validate_amount(request.amount)?;

    let mut tx = app_state.db_pool.begin().await?;

    let state = voucher_state(&mut *tx, ledger, id).await?;
    let status = state.status()?;
    if matches!(status, VoucherStatus::Paid | VoucherStatus::Cancelled) {
        return Err(ApiError::Conflict(format!(
            "{} {} is {} and cannot take payments",
            ledger.entity(), state.voucher_no, state.status
        )));
    }

    if let Some(ref bank_id) = request.bank_id {
        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM banks WHERE id = ?")
            .bind(bank_id)
            .fetch_optional(&mut *tx)
            .await?;
        match active {
            Some(true) => {}
            Some(false) => return Err(ApiError::BadRequest(format!("Bank '{}' is inactive", bank_id))),
            None => return Err(ApiError::BadRequest(format!("Bank '{}' does not exist", bank_id))),
        }
    }

    let current = VoucherBalance {
        amount: state.amount,
        amount_paid: state.amount_paid,
        balance: state.balance,
    };
    let (next, next_status) = current.pay(request.amount)?;
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO voucher_payments (
            id, ledger, voucher_id, bank_id, amount, reference_no, paid_on, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(Uuid::new_v4().to_string())
        .bind(ledger.to_string())
        .bind(id)
        .bind(&request.bank_id)
        .bind(request.amount)
        .bind(&request.reference_no)
        .bind(request.paid_on.unwrap_or_else(|| now.date_naive()))
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    let sql = format!(
        "UPDATE {} SET amount_paid = ?, balance = ?, status = ?, updated_at = ? WHERE id = ?",
        ledger.table()
    );
    sqlx::query(&sql)
        .bind(next.amount_paid)
        .bind(next.balance)
        .bind(next_status.to_string())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let voucher = load_voucher::<T>(&mut *tx, ledger, id).await?;
    tx.commit().await?;

    log::info!(
        "{} {}: payment {:.2} by {}, balance {:.2} ({})",
        ledger.entity(), state.voucher_no, request.amount, user_id, next.balance, next_status
    );
    Ok(HttpResponse::Ok().json(ApiResponse::success(voucher)))
}

async fn cancel_voucher<T>(app_state: &AppState, ledger: Ledger, id: &str, user_id: &str) -> ApiResult<HttpResponse>
where
    T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin + Serialize,
{
    let mut tx = app_state.db_pool.begin().await?;

    let state = voucher_state(&mut *tx, ledger, id).await?;
    let status = state.status()?;
    if status == VoucherStatus::Cancelled {
        return Err(ApiError::invalid_transition(ledger.entity(), status.as_ref(), "CANCELLED"));
    }
    if payment_count(&mut *tx, ledger, id).await? > 0 {
        return Err(ApiError::Conflict(format!(
            "{} {} has payments and cannot be cancelled",
            ledger.entity(), state.voucher_no
        )));
    }

    let sql = format!("UPDATE {} SET status = 'CANCELLED', updated_at = ? WHERE id = ?", ledger.table());
    sqlx::query(&sql)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let voucher = load_voucher::<T>(&mut *tx, ledger, id).await?;
    tx.commit().await?;

    log::info!("{} {} cancelled by {}", ledger.entity(), state.voucher_no, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(voucher)))
}

async fn delete_voucher(app_state: &AppState, ledger: Ledger, id: &str, user_id: &str) -> ApiResult<HttpResponse> {
    let mut tx = app_state.db_pool.begin().await?;

    let state = voucher_state(&mut *tx, ledger, id).await?;
    if state.status()? != VoucherStatus::Open || payment_count(&mut *tx, ledger, id).await? > 0 {
        return Err(ApiError::Conflict(format!(
            "{} {} is {}; only open vouchers without payments can be deleted",
            ledger.entity(), state.voucher_no, state.status
        )));
    }

    let sql = format!("DELETE FROM {} WHERE id = ?", ledger.table());
    sqlx::query(&sql)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    log::info!("🗑️ {} {} deleted by user {}", ledger.entity(), state.voucher_no, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Voucher deleted successfully".to_string())))
}

// ---------- accounts payable ----------

pub async fn get_payables(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<VoucherQuery>,
) -> ApiResult<HttpResponse> {
    list_vouchers::<AccountPayable>(&app_state, Ledger::Payable, &query).await
}

pub async fn get_payable(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    show_voucher::<AccountPayable>(&app_state, Ledger::Payable, &path.into_inner()).await
}

pub async fn create_payable(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreatePayableRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;
    validate_amount(request.amount)?;

    let mut tx = app_state.db_pool.begin().await?;

    let voucher_no = next_document_number(&mut *tx, DocumentKind::Payable, app_state.config.business.sequence_width).await?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let balance = VoucherBalance::new(request.amount);

    sqlx::query(
        r#"INSERT INTO accounts_payable (
            id, voucher_no, supplier_name, po_number, invoice_no, invoice_date, due_date,
            amount, amount_paid, balance, status, remarks, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'OPEN', ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&voucher_no)
        .bind(request.supplier_name.trim())
        .bind(request.po_number.as_deref().map(normalize_code))
        .bind(&request.invoice_no)
        .bind(request.invoice_date.unwrap_or_else(|| now.date_naive()))
        .bind(request.due_date)
        .bind(balance.amount)
        .bind(balance.amount_paid)
        .bind(balance.balance)
        .bind(&request.remarks)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    let voucher = load_voucher::<AccountPayable>(&mut *tx, Ledger::Payable, &id).await?;
    tx.commit().await?;

    log::info!("Payable {} ({:.2}) created by {}", voucher_no, request.amount, user_id);
    Ok(HttpResponse::Created().json(ApiResponse::success(voucher)))
}

pub async fn record_payable_payment(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<RecordPaymentRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    pay_voucher::<AccountPayable>(&app_state, Ledger::Payable, &path.into_inner(), &request, &user_id).await
}

pub async fn cancel_payable(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    cancel_voucher::<AccountPayable>(&app_state, Ledger::Payable, &path.into_inner(), &user_id).await
}

pub async fn delete_payable(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    delete_voucher(&app_state, Ledger::Payable, &path.into_inner(), &user_id).await
}

// ---------- accounts receivable ----------

pub async fn get_receivables(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<VoucherQuery>,
) -> ApiResult<HttpResponse> {
    list_vouchers::<AccountReceivable>(&app_state, Ledger::Receivable, &query).await
}

pub async fn get_receivable(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    show_voucher::<AccountReceivable>(&app_state, Ledger::Receivable, &path.into_inner()).await
}

pub async fn create_receivable(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateReceivableRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;
    validate_amount(request.amount)?;

    let mut tx = app_state.db_pool.begin().await?;

    let customer_code: String = sqlx::query_scalar("SELECT customer_code FROM customers WHERE id = ?")
        .bind(&request.customer_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::customer_not_found(&request.customer_id))?;

    let voucher_no = next_document_number(&mut *tx, DocumentKind::Receivable, app_state.config.business.sequence_width).await?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let balance = VoucherBalance::new(request.amount);

    sqlx::query(
        r#"INSERT INTO accounts_receivable (
            id, voucher_no, customer_id, so_number, dr_no, invoice_no, invoice_date, due_date,
            amount, amount_paid, balance, status, remarks, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'OPEN', ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&voucher_no)
        .bind(&request.customer_id)
        .bind(request.so_number.as_deref().map(normalize_code))
        .bind(request.dr_no.as_deref().map(normalize_code))
        .bind(&request.invoice_no)
        .bind(request.invoice_date.unwrap_or_else(|| now.date_naive()))
        .bind(request.due_date)
        .bind(balance.amount)
        .bind(balance.amount_paid)
        .bind(balance.balance)
        .bind(&request.remarks)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    let voucher = load_voucher::<AccountReceivable>(&mut *tx, Ledger::Receivable, &id).await?;
    tx.commit().await?;

    log::info!("Receivable {} for {} ({:.2}) created by {}", voucher_no, customer_code, request.amount, user_id);
    Ok(HttpResponse::Created().json(ApiResponse::success(voucher)))
}

pub async fn record_receivable_payment(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<RecordPaymentRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    pay_voucher::<AccountReceivable>(&app_state, Ledger::Receivable, &path.into_inner(), &request, &user_id).await
}

pub async fn cancel_receivable(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    cancel_voucher::<AccountReceivable>(&app_state, Ledger::Receivable, &path.into_inner(), &user_id).await
}

pub async fn delete_receivable(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    delete_voucher(&app_state, Ledger::Receivable, &path.into_inner(), &user_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;

    fn payment(amount: f64, bank_id: Option<String>) -> web::Json<RecordPaymentRequest> {
        web::Json(RecordPaymentRequest {
            amount,
            bank_id,
            reference_no: Some("CHK-1001".to_string()),
            paid_on: None,
        })
    }

    fn account(code: &str, account_type: AccountType) -> CreateAccountRequest {
        CreateAccountRequest {
            account_code: code.to_string(),
            account_name: format!("Account {}", code),
            account_type,
            parent_code: None,
        }
    }

    fn bank(code: &str, account_code: Option<&str>) -> CreateBankRequest {
        CreateBankRequest {
            bank_code: code.to_string(),
            bank_name: "Metro Bank".to_string(),
            account_name: "Backoffice Corp".to_string(),
            account_number: "0012-3456-78".to_string(),
            branch: Some("Makati".to_string()),
            account_code: account_code.map(str::to_string),
        }
    }

    async fn data_id(resp: HttpResponse) -> String {
        body_json(resp).await["data"]["id"].as_str().unwrap().to_string()
    }

    #[actix_rt::test]
    async fn test_payable_payments_settle_balance() {
        let state = app_state().await;
        let request = CreatePayableRequest {
            supplier_name: "Steelworks Inc".to_string(),
            po_number: Some("po-000001".to_string()),
            invoice_no: Some("INV-9".to_string()),
            invoice_date: None,
            due_date: None,
            amount: 1000.0,
            remarks: None,
        };
        let body = body_json(create_payable(state.clone(), web::Json(request), "u1".into()).await.unwrap()).await;
        assert_eq!(body["data"]["voucher_no"], "APV-000001");
        assert_eq!(body["data"]["balance"], 1000.0);
        assert_eq!(body["data"]["po_number"], "PO-000001");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let body = body_json(
            record_payable_payment(state.clone(), web::Path::from(id.clone()), payment(400.0, None), "u1".into())
                .await
                .unwrap(),
        ).await;
        assert_eq!(body["data"]["status"], "PARTIAL");
        assert_eq!(body["data"]["balance"], 600.0);
        assert_eq!(body["data"]["payments"].as_array().unwrap().len(), 1);

        let err = record_payable_payment(state.clone(), web::Path::from(id.clone()), payment(600.5, None), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = cancel_payable(state.clone(), web::Path::from(id.clone()), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let body = body_json(
            record_payable_payment(state.clone(), web::Path::from(id.clone()), payment(600.0, None), "u1".into())
                .await
                .unwrap(),
        ).await;
        assert_eq!(body["data"]["status"], "PAID");
        assert_eq!(body["data"]["balance"], 0.0);

        let err = record_payable_payment(state.clone(), web::Path::from(id.clone()), payment(1.0, None), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let err = delete_payable(state.clone(), web::Path::from(id), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn test_receivable_cancel_and_delete_rules() {
        let state = app_state().await;
        let pool = &state.db_pool;

        let mut request = CreateReceivableRequest {
            customer_id: "missing".to_string(),
            so_number: None,
            dr_no: None,
            invoice_no: None,
            invoice_date: None,
            due_date: None,
            amount: 250.0,
            remarks: None,
        };
        let err = create_receivable(state.clone(), web::Json(request.clone()), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        request.customer_id = seed_customer(pool, "ACME").await;
        let cancelled = data_id(create_receivable(state.clone(), web::Json(request.clone()), "u1".into()).await.unwrap()).await;
        let open = data_id(create_receivable(state.clone(), web::Json(request), "u1".into()).await.unwrap()).await;

        let body = body_json(cancel_receivable(state.clone(), web::Path::from(cancelled.clone()), "u1".into()).await.unwrap()).await;
        assert_eq!(body["data"]["status"], "CANCELLED");
        assert_eq!(body["data"]["voucher_no"], "ARV-000001");

        let err = record_receivable_payment(state.clone(), web::Path::from(cancelled.clone()), payment(10.0, None), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let err = delete_receivable(state.clone(), web::Path::from(cancelled), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        delete_receivable(state.clone(), web::Path::from(open), "u1".into()).await.unwrap();
    }

    #[actix_rt::test]
    async fn test_accounts_and_banks() {
        let state = app_state().await;

        let body = body_json(create_account(state.clone(), web::Json(account("1010", AccountType::Asset)), "u1".into()).await.unwrap()).await;
        assert_eq!(body["data"]["normal_balance"], "DEBIT");
        let cash = body["data"]["id"].as_str().unwrap().to_string();

        let err = create_account(state.clone(), web::Json(account("1010", AccountType::Asset)), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let mut child = account("1010-01", AccountType::Asset);
        child.parent_code = Some("9999".to_string());
        let err = create_account(state.clone(), web::Json(child.clone()), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        child.parent_code = Some("1010".to_string());
        create_account(state.clone(), web::Json(child), "u1".into()).await.unwrap();

        let err = create_bank(state.clone(), web::Json(bank("mb01", Some("4040"))), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        let body = body_json(create_bank(state.clone(), web::Json(bank("mb01", Some("1010"))), "u1".into()).await.unwrap()).await;
        assert_eq!(body["data"]["bank_code"], "MB01");
        let bank_id = body["data"]["id"].as_str().unwrap().to_string();

        let err = delete_account(state.clone(), web::Path::from(cash.clone()), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let update = UpdateAccountRequest {
            account_name: None,
            account_type: Some(AccountType::Liability),
            parent_code: None,
            is_active: Some(false),
        };
        let body = body_json(update_account(state.clone(), web::Path::from(cash), web::Json(update), "u1".into()).await.unwrap()).await;
        assert_eq!(body["data"]["normal_balance"], "CREDIT");
        assert_eq!(body["data"]["is_active"], false);

        // a bank with payments against it stays
        let request = CreatePayableRequest {
            supplier_name: "Steelworks Inc".to_string(),
            po_number: None,
            invoice_no: None,
            invoice_date: None,
            due_date: None,
            amount: 50.0,
            remarks: None,
        };
        let payable = data_id(create_payable(state.clone(), web::Json(request), "u1".into()).await.unwrap()).await;
        record_payable_payment(state.clone(), web::Path::from(payable), payment(50.0, Some(bank_id.clone())), "u1".into())
            .await
            .unwrap();
        let err = delete_bank(state.clone(), web::Path::from(bank_id), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
