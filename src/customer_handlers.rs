// src/customer_handlers.rs
//! Customer master data.

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::models::*;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{fetch_page, normalize_page, ApiResponse};
use crate::query_builder::{FieldWhitelist, SafeQueryBuilder};
use crate::validator::{normalize_code, CustomValidate};

async fn find_customer(pool: &sqlx::SqlitePool, id: &str) -> ApiResult<Customer> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::customer_not_found(id))
}

pub async fn get_customers(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<CustomerQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);

    let whitelist = FieldWhitelist::for_customers();
    let mut builder = SafeQueryBuilder::new(&whitelist);

    if let Some(ref search) = query.search {
        builder.add_search(&["customer_code", "name", "contact_person", "email"], search);
    }
    if let Some(ref status) = query.status {
        builder.add_exact_match("status", status.to_uppercase());
    }

    builder
        .order_by(
            query.sort_by.as_deref().unwrap_or("customer_code"),
            query.sort_order.as_deref().unwrap_or("ASC"),
        )
        .limit(per_page)
        .offset(offset);

    let result = fetch_page::<Customer>(&app_state.db_pool, &builder, page, per_page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn get_customer(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let customer = find_customer(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(customer)))
}

pub async fn create_customer(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateCustomerRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;

    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    let code = normalize_code(&request.customer_code);

    sqlx::query(
        r#"INSERT INTO customers (
            id, customer_code, name, address, contact_person, phone, email, tin,
            payment_terms_days, credit_limit, status, created_by, updated_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'ACTIVE', ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&code)
        .bind(request.name.trim())
        .bind(&request.address)
        .bind(&request.contact_person)
        .bind(&request.phone)
        .bind(&request.email)
        .bind(&request.tin)
        .bind(request.payment_terms_days.unwrap_or(0))
        .bind(request.credit_limit.unwrap_or(0.0))
        .bind(&user_id)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Customer {} created by {}", code, user_id);

    let customer = find_customer(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(customer)))
}

pub async fn update_customer(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateCustomerRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let customer_id = path.into_inner();
    request.validate()?;
    request.custom_validate().into_result()?;

    find_customer(&app_state.db_pool, &customer_id).await?;

    sqlx::query(
        r#"UPDATE customers SET
            name = COALESCE(?, name),
            address = COALESCE(?, address),
            contact_person = COALESCE(?, contact_person),
            phone = COALESCE(?, phone),
            email = COALESCE(?, email),
            tin = COALESCE(?, tin),
            payment_terms_days = COALESCE(?, payment_terms_days),
            credit_limit = COALESCE(?, credit_limit),
            status = COALESCE(?, status),
            updated_by = ?,
            updated_at = ?
        WHERE id = ?"#
    )
        .bind(request.name.as_deref().map(str::trim))
        .bind(&request.address)
        .bind(&request.contact_person)
        .bind(&request.phone)
        .bind(&request.email)
        .bind(&request.tin)
        .bind(request.payment_terms_days)
        .bind(request.credit_limit)
        .bind(request.status.map(|s| s.to_string()))
        .bind(&user_id)
        .bind(Utc::now())
        .bind(&customer_id)
        .execute(&app_state.db_pool)
        .await?;

    let customer = find_customer(&app_state.db_pool, &customer_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(customer)))
}

pub async fn delete_customer(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let customer_id = path.into_inner();
    let customer = find_customer(&app_state.db_pool, &customer_id).await?;

    let (orders,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sales_orders WHERE customer_id = ?")
        .bind(&customer_id)
        .fetch_one(&app_state.db_pool)
        .await?;
    let (vouchers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts_receivable WHERE customer_id = ?")
        .bind(&customer_id)
        .fetch_one(&app_state.db_pool)
        .await?;

    if orders > 0 || vouchers > 0 {
        return Err(ApiError::Conflict(format!(
            "Customer {} has {} sales order(s) and {} receivable(s); deactivate it instead",
            customer.customer_code, orders, vouchers
        )));
    }

    sqlx::query("DELETE FROM customers WHERE id = ?")
        .bind(&customer_id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("🗑️ Customer {} deleted by user {}", customer.customer_code, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Customer deleted successfully".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;

    fn new_customer(code: &str) -> CreateCustomerRequest {
        CreateCustomerRequest {
            customer_code: code.to_string(),
            name: "Acme Trading".to_string(),
            address: None,
            contact_person: Some("Juan".to_string()),
            phone: Some("+63 2 555-0101".to_string()),
            email: Some("buyer@acme.test".to_string()),
            tin: Some("123-456-789".to_string()),
            payment_terms_days: Some(30),
            credit_limit: Some(50_000.0),
        }
    }

    #[actix_rt::test]
    async fn test_create_uppercases_code_and_rejects_duplicates() {
        let state = app_state().await;

        let resp = create_customer(state.clone(), web::Json(new_customer(" acme ")), "u1".into()).await.unwrap();
        assert_eq!(resp.status(), actix_web::http::StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["customer_code"], "ACME");
        assert_eq!(body["data"]["status"], "ACTIVE");

        let err = create_customer(state.clone(), web::Json(new_customer("ACME")), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn test_delete_blocked_by_sales_orders() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer_id = seed_customer(pool, "BETA").await;

        sqlx::query(
            "INSERT INTO sales_orders (id, so_number, customer_id, customer_code, order_date, created_at, updated_at) \
             VALUES ('so1', 'SO-000001', ?, 'BETA', '2024-01-01', datetime('now'), datetime('now'))"
        )
            .bind(&customer_id)
            .execute(pool)
            .await
            .unwrap();

        let err = delete_customer(state.clone(), web::Path::from(customer_id.clone()), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let other = seed_customer(pool, "GAMMA").await;
        delete_customer(state.clone(), web::Path::from(other.clone()), "u1".into()).await.unwrap();
        assert!(matches!(find_customer(pool, &other).await, Err(ApiError::NotFound(_))));
    }

    #[actix_rt::test]
    async fn test_update_keeps_unset_fields() {
        let state = app_state().await;
        let id = seed_customer(&state.db_pool, "DELTA").await;

        let update = UpdateCustomerRequest {
            name: None,
            address: Some("Cebu".to_string()),
            contact_person: None,
            phone: None,
            email: None,
            tin: None,
            payment_terms_days: Some(45),
            credit_limit: None,
            status: Some(CustomerStatus::Inactive),
        };
        update_customer(state.clone(), web::Path::from(id.clone()), web::Json(update), "u2".into()).await.unwrap();

        let customer = find_customer(&state.db_pool, &id).await.unwrap();
        assert_eq!(customer.name, "DELTA Trading");
        assert_eq!(customer.address.as_deref(), Some("Cebu"));
        assert_eq!(customer.payment_terms_days, 45);
        assert_eq!(customer.status, "INACTIVE");
        assert_eq!(customer.updated_by.as_deref(), Some("u2"));
    }
}
