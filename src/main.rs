// main.rs - back-office service entry point, route table and protected wrappers
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpRequest, HttpResponse, HttpServer,
};
use actix_web::http::header;
use actix_web_httpauth::middleware::HttpAuthentication;
use actix_cors::Cors;
use anyhow::Context;
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, migrate::MigrateDatabase, Sqlite, SqlitePool};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod accounting_handlers;
mod audit;
mod auth;
mod auth_handlers;
mod config;
mod customer_handlers;
mod db;
mod delivery_handlers;
mod error;
mod export_handlers;
mod handlers;
mod inventory;
mod inventory_handlers;
mod models;
mod monitoring;
mod purchase_order_handlers;
mod query_builder;
mod sales_order_handlers;
mod sequence;
mod transfer_handlers;
pub mod validator;

use audit::ChangeSet;
use auth::{jwt_middleware, require_permission, Action, AuthService, Resource, UserRole};
use config::{load_config, Config};
use error::ApiResult;
use models::*;
use monitoring::{start_maintenance_tasks, Metrics, RequestLogger};

use accounting_handlers::*;
use auth_handlers::*;
use customer_handlers::*;
use delivery_handlers::*;
use export_handlers::{export_inventory, export_sales_orders, ExportQuery};
use handlers::{get_dashboard_stats, get_recent_activity, health_check};
use inventory_handlers::*;
use purchase_order_handlers::*;
use sales_order_handlers::*;
use transfer_handlers::*;

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

/// Caller id once the role check has passed.
fn authorize(http_request: &HttpRequest, resource: Resource, action: Action) -> ApiResult<String> {
    Ok(require_permission(http_request, resource, action)?.sub)
}

// ==================== CUSTOMER PROTECTED WRAPPERS ====================

async fn create_customer_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateCustomerRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Customers, Action::Create)?;

    let mut cs = ChangeSet::new();
    cs.created("customer_code", &request.customer_code);
    cs.created("name", &request.name);

    let response = create_customer(app_state.clone(), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "create", "customer", "",
        &format!("Created customer: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn update_customer_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateCustomerRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Customers, Action::Edit)?;
    let customer_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Ok(old) = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(&customer_id)
        .fetch_one(&app_state.db_pool)
        .await
    {
        if let Some(ref name) = request.name {
            cs.add("name", &old.name, name);
        }
        if request.address.is_some() {
            cs.add_opt("address", &old.address, &request.address);
        }
        if request.contact_person.is_some() {
            cs.add_opt("contact_person", &old.contact_person, &request.contact_person);
        }
        if let Some(limit) = request.credit_limit {
            cs.add_num("credit_limit", old.credit_limit, limit);
        }
        if let Some(status) = request.status {
            cs.add("status", &old.status, status.as_ref());
        }
    }

    let desc = if cs.has_changes() {
        format!("Customer {} updated: {}", customer_id, cs.to_description())
    } else {
        format!("Customer {} updated", customer_id)
    };

    let response = update_customer(app_state.clone(), web::Path::from(customer_id.clone()), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "edit", "customer", &customer_id,
        &desc, &cs, &http_request,
    ).await;
    Ok(response)
}

async fn delete_customer_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Customers, Action::Delete)?;
    let customer_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Ok((code, name)) = sqlx::query_as::<_, (String, String)>(
        "SELECT customer_code, name FROM customers WHERE id = ?"
    ).bind(&customer_id).fetch_one(&app_state.db_pool).await {
        cs.deleted("customer_code", &code);
        cs.deleted("name", &name);
    }

    let response = delete_customer(app_state.clone(), web::Path::from(customer_id.clone()), user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "delete", "customer", &customer_id,
        &format!("Deleted customer: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

// ==================== INVENTORY PROTECTED WRAPPERS ====================

async fn create_inventory_item_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateInventoryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Inventory, Action::Create)?;

    let mut cs = ChangeSet::new();
    cs.created("item_code", &request.item_code);
    cs.created("warehouse", &request.warehouse);
    cs.created("quantity", &request.quantity.to_string());

    let response = create_inventory_item(app_state.clone(), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "create", "inventory", "",
        &format!("Created stock row: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn update_inventory_item_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateInventoryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Inventory, Action::Edit)?;
    let item_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Ok(old) = sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_main WHERE id = ?")
        .bind(&item_id)
        .fetch_one(&app_state.db_pool)
        .await
    {
        if request.description.is_some() {
            cs.add_opt("description", &old.description, &request.description);
        }
        if let Some(ref unit) = request.unit {
            cs.add("unit", &old.unit, unit);
        }
        if let Some(cost) = request.unit_cost {
            cs.add_num("unit_cost", old.unit_cost, cost);
        }
        if let Some(level) = request.reorder_level {
            cs.add_num("reorder_level", old.reorder_level, level);
        }
    }

    let response = update_inventory_item(app_state.clone(), web::Path::from(item_id.clone()), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "edit", "inventory", &item_id,
        &format!("Stock row {} updated: {}", item_id, cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn adjust_inventory_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<AdjustInventoryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Inventory, Action::Edit)?;
    let item_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Ok(old) = sqlx::query_scalar::<_, f64>("SELECT quantity FROM inventory_main WHERE id = ?")
        .bind(&item_id)
        .fetch_one(&app_state.db_pool)
        .await
    {
        cs.add_num("quantity", old, request.quantity);
    }

    let response = adjust_inventory(app_state.clone(), web::Path::from(item_id.clone()), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "adjust", "inventory", &item_id,
        &format!("Stock count adjusted: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn delete_inventory_item_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Inventory, Action::Delete)?;
    let item_id = path.into_inner();

    let response = delete_inventory_item(app_state.clone(), web::Path::from(item_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "delete", "inventory", &item_id,
        "Deleted stock row", &http_request,
    ).await;
    Ok(response)
}

// ==================== SALES ORDER PROTECTED WRAPPERS ====================

async fn create_sales_order_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateSalesOrderRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::SalesOrders, Action::Create)?;
    let description = format!("Created sales order for customer {} with {} line(s)", request.customer_id, request.items.len());

    let response = create_sales_order(app_state.clone(), request, user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "create", "sales_order", "", &description, &http_request).await;
    Ok(response)
}

async fn update_sales_order_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateSalesOrderRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::SalesOrders, Action::Edit)?;
    let order_id = path.into_inner();

    let response = update_sales_order(app_state.clone(), web::Path::from(order_id.clone()), request, user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "edit", "sales_order", &order_id,
        &format!("Sales order {} updated", order_id), &http_request,
    ).await;
    Ok(response)
}

async fn cancel_sales_order_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::SalesOrders, Action::Approve)?;
    let order_id = path.into_inner();

    let response = cancel_sales_order(app_state.clone(), web::Path::from(order_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "cancel", "sales_order", &order_id,
        "Sales order cancelled, reservations released", &http_request,
    ).await;
    Ok(response)
}

async fn delete_sales_order_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::SalesOrders, Action::Delete)?;
    let order_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Ok((number, status)) = sqlx::query_as::<_, (String, String)>(
        "SELECT so_number, status FROM sales_orders WHERE id = ?"
    ).bind(&order_id).fetch_one(&app_state.db_pool).await {
        cs.deleted("so_number", &number);
        cs.deleted("status", &status);
    }

    let response = delete_sales_order(app_state.clone(), web::Path::from(order_id.clone()), user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "delete", "sales_order", &order_id,
        &format!("Deleted sales order: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

// ==================== DELIVERY PROTECTED WRAPPERS ====================

async fn create_delivery_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateDeliveryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Deliveries, Action::Create)?;
    let description = format!("Prepared delivery against sales order {}", request.sales_order_id);

    let response = create_delivery(app_state.clone(), request, user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "create", "delivery", "", &description, &http_request).await;
    Ok(response)
}

async fn update_delivery_status_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateDeliveryStatusRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Deliveries, Action::Edit)?;
    let delivery_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Ok(old) = sqlx::query_scalar::<_, String>("SELECT status FROM deliveries WHERE id = ?")
        .bind(&delivery_id)
        .fetch_one(&app_state.db_pool)
        .await
    {
        cs.add("status", &old, request.status.as_ref());
    }

    let response = update_delivery_status(app_state.clone(), web::Path::from(delivery_id.clone()), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "status", "delivery", &delivery_id,
        &format!("Delivery {}: {}", delivery_id, cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn delete_delivery_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Deliveries, Action::Delete)?;
    let delivery_id = path.into_inner();

    let response = delete_delivery(app_state.clone(), web::Path::from(delivery_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "delete", "delivery", &delivery_id,
        "Deleted delivery", &http_request,
    ).await;
    Ok(response)
}

// ==================== TRANSFER PROTECTED WRAPPERS ====================

async fn create_transfer_request_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateTransferRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Transfers, Action::Create)?;
    let description = format!(
        "Requested transfer {} -> {} with {} line(s)",
        request.from_warehouse, request.to_warehouse, request.items.len()
    );

    let response = create_transfer_request(app_state.clone(), request, user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "create", "transfer_request", "", &description, &http_request).await;
    Ok(response)
}

async fn approve_transfer_request_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Transfers, Action::Approve)?;
    let request_id = path.into_inner();

    let response = approve_transfer_request(app_state.clone(), web::Path::from(request_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "approve", "transfer_request", &request_id,
        "Transfer approved, stock moved", &http_request,
    ).await;
    Ok(response)
}

async fn reject_transfer_request_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<RejectTransferRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Transfers, Action::Approve)?;
    let request_id = path.into_inner();
    let description = match request.reason {
        Some(ref reason) => format!("Transfer rejected: {}", reason),
        None => "Transfer rejected".to_string(),
    };

    let response = reject_transfer_request(app_state.clone(), web::Path::from(request_id.clone()), request, user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "reject", "transfer_request", &request_id,
        &description, &http_request,
    ).await;
    Ok(response)
}

async fn delete_transfer_request_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Transfers, Action::Delete)?;
    let request_id = path.into_inner();

    let response = delete_transfer_request(app_state.clone(), web::Path::from(request_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "delete", "transfer_request", &request_id,
        "Deleted transfer request", &http_request,
    ).await;
    Ok(response)
}

// ==================== PURCHASE ORDER PROTECTED WRAPPERS ====================

async fn create_purchase_order_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreatePurchaseOrderRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::PurchaseOrders, Action::Create)?;
    let description = format!("Created purchase order for {} with {} line(s)", request.supplier_name, request.items.len());

    let response = create_purchase_order(app_state.clone(), request, user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "create", "purchase_order", "", &description, &http_request).await;
    Ok(response)
}

async fn update_purchase_order_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdatePurchaseOrderRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::PurchaseOrders, Action::Edit)?;
    let order_id = path.into_inner();

    let response = update_purchase_order(app_state.clone(), web::Path::from(order_id.clone()), request, user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "edit", "purchase_order", &order_id,
        &format!("Purchase order {} updated", order_id), &http_request,
    ).await;
    Ok(response)
}

async fn approve_purchase_order_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::PurchaseOrders, Action::Approve)?;
    let order_id = path.into_inner();

    let response = approve_purchase_order(app_state.clone(), web::Path::from(order_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "approve", "purchase_order", &order_id,
        "Purchase order approved", &http_request,
    ).await;
    Ok(response)
}

async fn cancel_purchase_order_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::PurchaseOrders, Action::Approve)?;
    let order_id = path.into_inner();

    let response = cancel_purchase_order(app_state.clone(), web::Path::from(order_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "cancel", "purchase_order", &order_id,
        "Purchase order cancelled", &http_request,
    ).await;
    Ok(response)
}

async fn receive_purchase_order_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<ReceivePurchaseOrderRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::PurchaseOrders, Action::Approve)?;
    let order_id = path.into_inner();
    let description = format!("Received {} line(s) into stock", request.items.len());

    let response = receive_purchase_order(app_state.clone(), web::Path::from(order_id.clone()), request, user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "receive", "purchase_order", &order_id,
        &description, &http_request,
    ).await;
    Ok(response)
}

async fn delete_purchase_order_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::PurchaseOrders, Action::Delete)?;
    let order_id = path.into_inner();

    let response = delete_purchase_order(app_state.clone(), web::Path::from(order_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "delete", "purchase_order", &order_id,
        "Deleted purchase order", &http_request,
    ).await;
    Ok(response)
}

// ==================== ACCOUNTING PROTECTED WRAPPERS ====================

async fn create_account_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateAccountRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Create)?;

    let mut cs = ChangeSet::new();
    cs.created("account_code", &request.account_code);
    cs.created("account_name", &request.account_name);
    cs.created("account_type", request.account_type.as_ref());

    let response = create_account(app_state.clone(), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "create", "account", "",
        &format!("Created account: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn update_account_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateAccountRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Edit)?;
    let account_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Ok((name, account_type)) = sqlx::query_as::<_, (String, String)>(
        "SELECT account_name, account_type FROM chart_of_accounts WHERE id = ?"
    ).bind(&account_id).fetch_one(&app_state.db_pool).await {
        if let Some(ref new_name) = request.account_name {
            cs.add("account_name", &name, new_name);
        }
        if let Some(new_type) = request.account_type {
            cs.add("account_type", &account_type, new_type.as_ref());
        }
    }

    let response = update_account(app_state.clone(), web::Path::from(account_id.clone()), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "edit", "account", &account_id,
        &format!("Account {} updated: {}", account_id, cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn delete_account_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Delete)?;
    let account_id = path.into_inner();

    let response = delete_account(app_state.clone(), web::Path::from(account_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "delete", "account", &account_id,
        "Deleted account", &http_request,
    ).await;
    Ok(response)
}

async fn create_bank_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateBankRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Create)?;

    let mut cs = ChangeSet::new();
    cs.created("bank_code", &request.bank_code);
    cs.created("bank_name", &request.bank_name);

    let response = create_bank(app_state.clone(), request, user_id.clone()).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "create", "bank", "",
        &format!("Created bank: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn update_bank_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateBankRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Edit)?;
    let bank_id = path.into_inner();

    let response = update_bank(app_state.clone(), web::Path::from(bank_id.clone()), request, user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "edit", "bank", &bank_id,
        &format!("Bank {} updated", bank_id), &http_request,
    ).await;
    Ok(response)
}

async fn delete_bank_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Delete)?;
    let bank_id = path.into_inner();

    let response = delete_bank(app_state.clone(), web::Path::from(bank_id.clone()), user_id.clone()).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "delete", "bank", &bank_id,
        "Deleted bank", &http_request,
    ).await;
    Ok(response)
}

async fn create_payable_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreatePayableRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Create)?;
    let description = format!("Created payable voucher for {}", request.supplier_name);

    let response = create_payable(app_state.clone(), request, user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "create", "payable", "", &description, &http_request).await;
    Ok(response)
}

async fn record_payable_payment_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<RecordPaymentRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Edit)?;
    let voucher_id = path.into_inner();
    let description = format!("Payment of {:.2} recorded", request.amount);

    let response = record_payable_payment(app_state.clone(), web::Path::from(voucher_id.clone()), request, user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "payment", "payable", &voucher_id, &description, &http_request).await;
    Ok(response)
}

async fn cancel_payable_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Approve)?;
    let voucher_id = path.into_inner();

    let response = cancel_payable(app_state.clone(), web::Path::from(voucher_id.clone()), user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "cancel", "payable", &voucher_id, "Payable voucher cancelled", &http_request).await;
    Ok(response)
}

async fn delete_payable_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Delete)?;
    let voucher_id = path.into_inner();

    let response = delete_payable(app_state.clone(), web::Path::from(voucher_id.clone()), user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "delete", "payable", &voucher_id, "Deleted payable voucher", &http_request).await;
    Ok(response)
}

async fn create_receivable_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateReceivableRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Create)?;
    let description = format!("Created receivable voucher for customer {}", request.customer_id);

    let response = create_receivable(app_state.clone(), request, user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "create", "receivable", "", &description, &http_request).await;
    Ok(response)
}

async fn record_receivable_payment_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<RecordPaymentRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Edit)?;
    let voucher_id = path.into_inner();
    let description = format!("Collection of {:.2} recorded", request.amount);

    let response = record_receivable_payment(app_state.clone(), web::Path::from(voucher_id.clone()), request, user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "payment", "receivable", &voucher_id, &description, &http_request).await;
    Ok(response)
}

async fn cancel_receivable_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Approve)?;
    let voucher_id = path.into_inner();

    let response = cancel_receivable(app_state.clone(), web::Path::from(voucher_id.clone()), user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "cancel", "receivable", &voucher_id, "Receivable voucher cancelled", &http_request).await;
    Ok(response)
}

async fn delete_receivable_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Accounting, Action::Delete)?;
    let voucher_id = path.into_inner();

    let response = delete_receivable(app_state.clone(), web::Path::from(voucher_id.clone()), user_id.clone()).await?;
    audit::audit(&app_state.db_pool, &user_id, "delete", "receivable", &voucher_id, "Deleted receivable voucher", &http_request).await;
    Ok(response)
}

// ==================== EXPORT PROTECTED WRAPPERS ====================

async fn export_inventory_protected(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ExportQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Export, Action::View)?;
    let response = export_inventory(app_state.clone(), query).await?;
    audit::audit(&app_state.db_pool, &user_id, "export", "inventory", "", "Exported inventory CSV", &http_request).await;
    Ok(response)
}

async fn export_sales_orders_protected(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ExportQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = authorize(&http_request, Resource::Export, Action::View)?;
    let response = export_sales_orders(app_state.clone(), query).await?;
    audit::audit(&app_state.db_pool, &user_id, "export", "sales_order", "", "Exported sales orders CSV", &http_request).await;
    Ok(response)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    setup_logging(&config)?;
    config.print_startup_info();

    if config.is_production() {
        validate_production_config(&config)?;
    }

    setup_database(&config.database.url).await?;
    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(&config.auth));
    create_default_admin_if_needed(&pool, &auth_service).await?;

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
    });

    start_maintenance_tasks(pool.clone(), config.business.clone()).await;

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics_arc = Arc::new(Metrics::new());
    let server_config = config.server.clone();

    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&config.security.allowed_origins, config.is_production());
        let auth_middleware = HttpAuthentication::bearer(jwt_middleware);
        let security_headers = setup_security_headers(&config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics_arc.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(metrics_arc.clone()))
            .app_data(web::JsonConfig::default().limit(config.security.max_request_size))

            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(login))
            )

            .service(
                web::scope("/api/v1")
                    .wrap(auth_middleware)
                    .route("/metrics", web::get().to(monitoring::metrics_endpoint))

                    // Auth & users
                    .service(
                        web::scope("/auth")
                            .route("/profile", web::get().to(get_profile))
                            .route("/change-password", web::post().to(change_password))
                    )
                    .service(
                        web::scope("/users")
                            .route("", web::get().to(get_users))
                            .route("", web::post().to(create_user))
                            .route("/roles", web::get().to(get_roles))
                            .route("/{id}", web::get().to(get_user))
                            .route("/{id}", web::put().to(update_user))
                            .route("/{id}", web::delete().to(delete_user))
                            .route("/{id}/password", web::put().to(change_user_password))
                    )

                    // Dashboard
                    .route("/dashboard/stats", web::get().to(get_dashboard_stats))
                    .route("/dashboard/activity", web::get().to(get_recent_activity))

                    // Customers
                    .service(
                        web::scope("/customers")
                            .route("", web::get().to(get_customers))
                            .route("", web::post().to(create_customer_protected))
                            .route("/{id}", web::get().to(get_customer))
                            .route("/{id}", web::put().to(update_customer_protected))
                            .route("/{id}", web::delete().to(delete_customer_protected))
                    )

                    // Inventory
                    .service(
                        web::scope("/inventory")
                            .route("", web::get().to(get_inventory))
                            .route("", web::post().to(create_inventory_item_protected))
                            .route("/items/{item_code}", web::get().to(get_item_stock))
                            .route("/{id}", web::get().to(get_inventory_item))
                            .route("/{id}", web::put().to(update_inventory_item_protected))
                            .route("/{id}", web::delete().to(delete_inventory_item_protected))
                            .route("/{id}/adjust", web::post().to(adjust_inventory_protected))
                            .route("/{id}/history", web::get().to(get_inventory_history))
                    )

                    // Sales orders
                    .service(
                        web::scope("/sales-orders")
                            .route("", web::get().to(get_sales_orders))
                            .route("", web::post().to(create_sales_order_protected))
                            .route("/{id}", web::get().to(get_sales_order))
                            .route("/{id}", web::put().to(update_sales_order_protected))
                            .route("/{id}", web::delete().to(delete_sales_order_protected))
                            .route("/{id}/cancel", web::post().to(cancel_sales_order_protected))
                    )

                    // Deliveries
                    .service(
                        web::scope("/deliveries")
                            .route("", web::get().to(get_deliveries))
                            .route("", web::post().to(create_delivery_protected))
                            .route("/{id}", web::get().to(get_delivery))
                            .route("/{id}", web::delete().to(delete_delivery_protected))
                            .route("/{id}/status", web::patch().to(update_delivery_status_protected))
                    )

                    // Transfer requests
                    .service(
                        web::scope("/transfers")
                            .route("", web::get().to(get_transfer_requests))
                            .route("", web::post().to(create_transfer_request_protected))
                            .route("/{id}", web::get().to(get_transfer_request))
                            .route("/{id}", web::delete().to(delete_transfer_request_protected))
                            .route("/{id}/approve", web::post().to(approve_transfer_request_protected))
                            .route("/{id}/reject", web::post().to(reject_transfer_request_protected))
                    )

                    // Purchase orders
                    .service(
                        web::scope("/purchase-orders")
                            .route("", web::get().to(get_purchase_orders))
                            .route("", web::post().to(create_purchase_order_protected))
                            .route("/{id}", web::get().to(get_purchase_order))
                            .route("/{id}", web::put().to(update_purchase_order_protected))
                            .route("/{id}", web::delete().to(delete_purchase_order_protected))
                            .route("/{id}/approve", web::post().to(approve_purchase_order_protected))
                            .route("/{id}/cancel", web::post().to(cancel_purchase_order_protected))
                            .route("/{id}/receive", web::post().to(receive_purchase_order_protected))
                    )

                    // Accounting
                    .service(
                        web::scope("/accounts")
                            .route("", web::get().to(get_accounts))
                            .route("", web::post().to(create_account_protected))
                            .route("/{id}", web::get().to(get_account))
                            .route("/{id}", web::put().to(update_account_protected))
                            .route("/{id}", web::delete().to(delete_account_protected))
                    )
                    .service(
                        web::scope("/banks")
                            .route("", web::get().to(get_banks))
                            .route("", web::post().to(create_bank_protected))
                            .route("/{id}", web::get().to(get_bank))
                            .route("/{id}", web::put().to(update_bank_protected))
                            .route("/{id}", web::delete().to(delete_bank_protected))
                    )
                    .service(
                        web::scope("/payables")
                            .route("", web::get().to(get_payables))
                            .route("", web::post().to(create_payable_protected))
                            .route("/{id}", web::get().to(get_payable))
                            .route("/{id}", web::delete().to(delete_payable_protected))
                            .route("/{id}/payments", web::post().to(record_payable_payment_protected))
                            .route("/{id}/cancel", web::post().to(cancel_payable_protected))
                    )
                    .service(
                        web::scope("/receivables")
                            .route("", web::get().to(get_receivables))
                            .route("", web::post().to(create_receivable_protected))
                            .route("/{id}", web::get().to(get_receivable))
                            .route("/{id}", web::delete().to(delete_receivable_protected))
                            .route("/{id}/payments", web::post().to(record_receivable_payment_protected))
                            .route("/{id}/cancel", web::post().to(cancel_receivable_protected))
                    )

                    // Export
                    .service(
                        web::scope("/export")
                            .route("/inventory", web::get().to(export_inventory_protected))
                            .route("/sales-orders", web::get().to(export_sales_orders_protected))
                    )
            )
    })
        .keep_alive(Duration::from_secs(server_config.keep_alive))
        .client_request_timeout(Duration::from_secs(server_config.client_timeout))
        .client_disconnect_timeout(Duration::from_secs(server_config.client_shutdown));

    if let Some(workers) = server_config.workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

fn setup_cors(allowed_origins: &[String], is_production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
        .max_age(3600);

    if allowed_origins.iter().any(|o| o == "*") && !is_production {
        log::warn!("Using wildcard CORS (*) in development mode");
        return cors.allow_any_origin();
    }

    for origin in allowed_origins.iter().filter(|o| !o.is_empty() && o.as_str() != "*") {
        cors = cors.allowed_origin(origin);
    }
    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }
    if !config.security.require_https {
        log::warn!("Production mode without require_https: HSTS header disabled");
    }
    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if database_url.contains(":memory:") {
        return Ok(());
    }
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)
        .with_context(|| format!("Invalid database url {}", db_config.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .idle_timeout(Duration::from_secs(db_config.idle_timeout))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_config.url))?;
    Ok(pool)
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains",
        ));
    }

    headers
}

async fn create_default_admin_if_needed(
    pool: &SqlitePool,
    auth_service: &AuthService,
) -> anyhow::Result<()> {
    let user_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if user_count.0 > 0 {
        return Ok(());
    }

    let (password, generated) = match env::var("DEFAULT_ADMIN_PASSWORD") {
        Ok(password) => (password, false),
        Err(_) => (generate_admin_password(), true),
    };

    auth::User::create(pool, "admin", "admin@backoffice.local", &password, UserRole::Admin, auth_service)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create default admin user: {}", e))?;

    log::warn!("Default admin user created:");
    log::warn!("  Username: admin");
    if generated {
        log::warn!("  Password: {} (generated - CHANGE IMMEDIATELY!)", password);
    }

    Ok(())
}

/// Random password that satisfies the strength rules: one of each class plus filler.
fn generate_admin_password() -> String {
    use rand::seq::SliceRandom;
    use rand::Rng;

    const CLASSES: [&[u8]; 4] = [
        b"0123456789",
        b"!@#$%^&*-_=+",
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZ",
        b"abcdefghijklmnopqrstuvwxyz",
    ];

    let mut rng = rand::thread_rng();
    let mut chars: Vec<char> = CLASSES
        .iter()
        .filter_map(|class| class.choose(&mut rng).map(|&b| b as char))
        .collect();
    for _ in 0..12 {
        let class = CLASSES[rng.gen_range(0..CLASSES.len())];
        if let Some(&b) = class.choose(&mut rng) {
            chars.push(b as char);
        }
    }
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_admin_password_is_strong() {
        for _ in 0..20 {
            let password = generate_admin_password();
            assert_eq!(password.len(), 16);
            assert!(auth::validate_password_strength(&password).is_ok());
        }
    }
}
