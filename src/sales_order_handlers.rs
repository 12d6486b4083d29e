// src/sales_order_handlers.rs
//! Sales orders. Every open line keeps its undelivered quantity on hold in
//! the line's warehouse; edits, cancellation and deletion move that
//! reservation in the same transaction as the document change.

use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::models::*;
use crate::error::{ApiError, ApiResult};
use crate::delivery_handlers::prepared_quantity;
use crate::handlers::{fetch_page, normalize_page, ApiResponse};
use crate::inventory::{self, reservation_deltas, Movement};
use crate::query_builder::{FieldWhitelist, SafeQueryBuilder};
use crate::sequence::{next_document_number, DocumentKind};
use crate::validator::{normalize_code, CustomValidate, FieldValidator};

// ==================== LOADERS ====================

pub(crate) async fn load_order(conn: &mut SqliteConnection, id: &str) -> ApiResult<SalesOrder> {
    sqlx::query_as::<_, SalesOrder>("SELECT * FROM sales_orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::sales_order_not_found(id))
}

pub(crate) async fn load_items(conn: &mut SqliteConnection, order_id: &str) -> ApiResult<Vec<SalesOrderItem>> {
    let items = sqlx::query_as::<_, SalesOrderItem>(
        "SELECT * FROM sales_order_items WHERE sales_order_id = ? ORDER BY rowid"
    )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(items)
}

async fn load_with_items(conn: &mut SqliteConnection, id: &str) -> ApiResult<SalesOrderWithItems> {
    let order = load_order(conn, id).await?;
    let items = load_items(conn, id).await?;
    Ok(SalesOrderWithItems { order, items })
}

fn parse_status(order: &SalesOrder) -> ApiResult<SalesOrderStatus> {
    SalesOrderStatus::from_str(&order.status).map_err(|_| {
        ApiError::InternalServerError(format!("Unknown sales order status '{}'", order.status))
    })
}

async fn active_delivery_count(conn: &mut SqliteConnection, order_id: &str) -> ApiResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM deliveries WHERE sales_order_id = ? AND status != 'CANCELLED'"
    )
        .bind(order_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

async fn insert_line(
    conn: &mut SqliteConnection,
    order_id: &str,
    line: &SalesOrderLineRequest,
) -> ApiResult<()> {
    let unit_price = line.unit_price.unwrap_or(0.0);
    sqlx::query(
        r#"INSERT INTO sales_order_items (
            id, sales_order_id, item_code, description, warehouse,
            quantity, delivered_quantity, unit_price, amount
        ) VALUES (?, ?, ?, ?, ?, ?, 0.0, ?, ?)"#
    )
        .bind(Uuid::new_v4().to_string())
        .bind(order_id)
        .bind(normalize_code(&line.item_code))
        .bind(&line.description)
        .bind(normalize_code(&line.warehouse))
        .bind(line.quantity)
        .bind(unit_price)
        .bind(line.quantity * unit_price)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn refresh_total(conn: &mut SqliteConnection, order_id: &str) -> ApiResult<()> {
    sqlx::query(
        "UPDATE sales_orders SET total_amount = \
         (SELECT COALESCE(SUM(amount), 0.0) FROM sales_order_items WHERE sales_order_id = ?) \
         WHERE id = ?"
    )
        .bind(order_id)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Give back whatever is still reserved by the order's lines.
async fn release_remaining(
    conn: &mut SqliteConnection,
    order: &SalesOrder,
    remarks: &str,
    user_id: &str,
) -> ApiResult<()> {
    let items = load_items(conn, &order.id).await?;
    let movement = Movement {
        reference_type: ReferenceType::SalesOrder,
        reference_no: &order.so_number,
        remarks: Some(remarks),
        user_id,
    };
    for item in items.iter().filter(|i| i.remaining() > 0.0) {
        let remaining = item.remaining();
        inventory::apply(conn, &item.item_code, &item.warehouse, &movement, |s| s.reserve_delta(-remaining)).await?;
    }
    Ok(())
}

// ==================== HANDLERS ====================

pub async fn get_sales_orders(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<SalesOrderQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);

    let whitelist = FieldWhitelist::for_sales_orders();
    let mut builder = SafeQueryBuilder::new(&whitelist);

    if let Some(ref search) = query.search {
        builder.add_search(&["so_number", "customer_code"], search);
    }
    if let Some(ref status) = query.status {
        builder.add_exact_match("status", status.to_uppercase());
    }
    if let Some(ref customer_id) = query.customer_id {
        builder.add_exact_match("customer_id", customer_id.as_str());
    }

    builder
        .order_by(
            query.sort_by.as_deref().unwrap_or("created_at"),
            query.sort_order.as_deref().unwrap_or("DESC"),
        )
        .limit(per_page)
        .offset(offset);

    let result = fetch_page::<SalesOrder>(&app_state.db_pool, &builder, page, per_page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn get_sales_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let mut conn = app_state.db_pool.acquire().await?;
    let order = load_with_items(&mut conn, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(order)))
}

pub async fn create_sales_order(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateSalesOrderRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;

    let mut tx = app_state.db_pool.begin().await?;

    let customer: Customer = sqlx::query_as("SELECT * FROM customers WHERE id = ?")
        .bind(&request.customer_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::customer_not_found(&request.customer_id))?;

    if customer.status != CustomerStatus::Active.to_string() {
        return Err(ApiError::BadRequest(format!(
            "Customer {} is inactive", customer.customer_code
        )));
    }

    let so_number = next_document_number(&mut *tx, DocumentKind::SalesOrder, app_state.config.business.sequence_width).await?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let order_date = request.order_date.unwrap_or_else(|| now.date_naive());

    sqlx::query(
        r#"INSERT INTO sales_orders (
            id, so_number, customer_id, customer_code, order_date, delivery_date,
            remarks, status, total_amount, created_by, updated_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', 0.0, ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&so_number)
        .bind(&customer.id)
        .bind(&customer.customer_code)
        .bind(order_date)
        .bind(request.delivery_date)
        .bind(&request.remarks)
        .bind(&user_id)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    let movement = Movement {
        reference_type: ReferenceType::SalesOrder,
        reference_no: &so_number,
        remarks: None,
        user_id: &user_id,
    };

    for line in &request.items {
        insert_line(&mut *tx, &id, line).await?;
        let qty = line.quantity;
        inventory::apply(
            &mut *tx,
            &normalize_code(&line.item_code),
            &normalize_code(&line.warehouse),
            &movement,
            |s| s.reserve_delta(qty),
        ).await?;
    }

    refresh_total(&mut *tx, &id).await?;
    let order = load_with_items(&mut *tx, &id).await?;
    tx.commit().await?;

    log::info!(
        "Sales order {} for {} created by {} ({} line(s))",
        so_number, customer.customer_code, user_id, order.items.len()
    );

    Ok(HttpResponse::Created().json(ApiResponse::success(order)))
}

pub async fn update_sales_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateSalesOrderRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    request.validate()?;
    request.custom_validate().into_result()?;

    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &order_id).await?;
    let status = parse_status(&order)?;
    if !status.is_open() {
        return Err(ApiError::not_editable("Sales order", &order.status));
    }

    FieldValidator::date_order(Some(order.order_date), request.delivery_date, "Order date", "Delivery date")
        .map_err(ApiError::ValidationError)?;

    let mut new_status = status;

    if let Some(ref lines) = request.items {
        let existing = load_items(&mut *tx, &order_id).await?;
        let by_key: HashMap<(String, String), &SalesOrderItem> = existing
            .iter()
            .map(|i| ((i.item_code.clone(), i.warehouse.clone()), i))
            .collect();

        let wanted: Vec<(String, String)> = lines
            .iter()
            .map(|l| (normalize_code(&l.item_code), normalize_code(&l.warehouse)))
            .collect();

        // lines dropped from the order
        for item in &existing {
            if wanted.contains(&(item.item_code.clone(), item.warehouse.clone())) {
                continue;
            }
            if item.delivered_quantity > 0.0 {
                return Err(ApiError::Conflict(format!(
                    "Line {} @ {} has deliveries and cannot be removed",
                    item.item_code, item.warehouse
                )));
            }
            let referenced: i64 = sqlx::query_scalar(
                r#"SELECT COUNT(*) FROM delivery_items di
                   JOIN deliveries d ON d.id = di.delivery_id
                   WHERE di.sales_order_item_id = ? AND d.status != 'CANCELLED'"#
            )
                .bind(&item.id)
                .fetch_one(&mut *tx)
                .await?;
            if referenced > 0 {
                return Err(ApiError::Conflict(format!(
                    "Line {} @ {} is on a prepared delivery and cannot be removed",
                    item.item_code, item.warehouse
                )));
            }
            sqlx::query("DELETE FROM sales_order_items WHERE id = ?")
                .bind(&item.id)
                .execute(&mut *tx)
                .await?;
        }

        let mut updated_lines: Vec<(f64, f64)> = Vec::with_capacity(lines.len());
        let mut new_remaining: Vec<(String, String, f64)> = Vec::with_capacity(lines.len());

        for (line, key) in lines.iter().zip(wanted.iter()) {
            let unit_price = line.unit_price.unwrap_or(0.0);
            match by_key.get(key) {
                Some(current) => {
                    if line.quantity < current.delivered_quantity {
                        return Err(ApiError::BadRequest(format!(
                            "Line {} @ {} already delivered {}, cannot reduce to {}",
                            key.0, key.1, current.delivered_quantity, line.quantity
                        )));
                    }
                    let prepared = prepared_quantity(&mut *tx, &current.id).await?;
                    if line.quantity < current.delivered_quantity + prepared {
                        return Err(ApiError::BadRequest(format!(
                            "Line {} @ {} has {} on prepared deliveries, cannot reduce to {}",
                            key.0, key.1, current.delivered_quantity + prepared, line.quantity
                        )));
                    }
                    sqlx::query(
                        "UPDATE sales_order_items SET description = COALESCE(?, description), \
                         quantity = ?, unit_price = ?, amount = ? WHERE id = ?"
                    )
                        .bind(&line.description)
                        .bind(line.quantity)
                        .bind(unit_price)
                        .bind(line.quantity * unit_price)
                        .bind(&current.id)
                        .execute(&mut *tx)
                        .await?;
                    updated_lines.push((line.quantity, current.delivered_quantity));
                    new_remaining.push((key.0.clone(), key.1.clone(), line.quantity - current.delivered_quantity));
                }
                None => {
                    insert_line(&mut *tx, &order_id, line).await?;
                    updated_lines.push((line.quantity, 0.0));
                    new_remaining.push((key.0.clone(), key.1.clone(), line.quantity));
                }
            }
        }

        let old_remaining: Vec<(String, String, f64)> = existing
            .iter()
            .map(|i| (i.item_code.clone(), i.warehouse.clone(), i.remaining()))
            .collect();

        let movement = Movement {
            reference_type: ReferenceType::SalesOrder,
            reference_no: &order.so_number,
            remarks: Some("Order lines changed"),
            user_id: &user_id,
        };
        for ((item_code, warehouse), delta) in reservation_deltas(&old_remaining, &new_remaining) {
            inventory::apply(&mut *tx, &item_code, &warehouse, &movement, |s| s.reserve_delta(delta)).await?;
        }

        new_status = SalesOrderStatus::from_delivered(&updated_lines);
        refresh_total(&mut *tx, &order_id).await?;
    }

    sqlx::query(
        r#"UPDATE sales_orders SET
            delivery_date = COALESCE(?, delivery_date),
            remarks = COALESCE(?, remarks),
            status = ?,
            updated_by = ?,
            updated_at = ?
        WHERE id = ?"#
    )
        .bind(request.delivery_date)
        .bind(&request.remarks)
        .bind(new_status.to_string())
        .bind(&user_id)
        .bind(Utc::now())
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;

    let updated = load_with_items(&mut *tx, &order_id).await?;
    tx.commit().await?;

    log::info!("Sales order {} updated by {}", order.so_number, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn cancel_sales_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &order_id).await?;
    let status = parse_status(&order)?;
    if !status.is_open() {
        return Err(ApiError::invalid_transition("Sales order", &order.status, "CANCELLED"));
    }

    let prepared: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM deliveries WHERE sales_order_id = ? AND status = 'PREPARED'"
    )
        .bind(&order_id)
        .fetch_one(&mut *tx)
        .await?;
    if prepared > 0 {
        return Err(ApiError::Conflict(format!(
            "Sales order {} has {} prepared deliveries; cancel them first",
            order.so_number, prepared
        )));
    }

    release_remaining(&mut *tx, &order, "Order cancelled", &user_id).await?;

    sqlx::query("UPDATE sales_orders SET status = 'CANCELLED', updated_by = ?, updated_at = ? WHERE id = ?")
        .bind(&user_id)
        .bind(Utc::now())
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;

    let cancelled = load_with_items(&mut *tx, &order_id).await?;
    tx.commit().await?;

    log::info!("Sales order {} cancelled by {}", order.so_number, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        cancelled,
        "Sales order cancelled".to_string(),
    )))
}

pub async fn delete_sales_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &order_id).await?;

    let deliveries = active_delivery_count(&mut *tx, &order_id).await?;
    if deliveries > 0 {
        return Err(ApiError::Conflict(format!(
            "Sales order {} has {} delivery receipt(s) and cannot be deleted",
            order.so_number, deliveries
        )));
    }

    if parse_status(&order)?.is_open() {
        release_remaining(&mut *tx, &order, "Order deleted", &user_id).await?;
    }

    sqlx::query("DELETE FROM deliveries WHERE sales_order_id = ?")
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM sales_order_items WHERE sales_order_id = ?")
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM sales_orders WHERE id = ?")
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    log::info!("🗑️ Sales order {} deleted by user {}", order.so_number, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Sales order deleted successfully".to_string())))
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::*;
    use crate::delivery_handlers::test_support::{delivery_request, prepare, set_status};
    use crate::handlers::test_support::*;

    fn update_items(items: Vec<SalesOrderLineRequest>) -> UpdateSalesOrderRequest {
        UpdateSalesOrderRequest { delivery_date: None, remarks: None, items: Some(items) }
    }

    #[actix_rt::test]
    async fn test_create_reserves_each_line() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;
        seed_stock(pool, "NUT", "MAIN", 50.0, 5.0).await;

        let order = create_order(&state, &customer, vec![so_line("bolt", "main", 30.0), so_line("NUT", "MAIN", 10.0)]).await;

        assert_eq!(order["so_number"], "SO-000001");
        assert_eq!(order["status"], "PENDING");
        assert_eq!(order["total_amount"], 400.0);
        assert_eq!(order["items"].as_array().unwrap().len(), 2);
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 30.0, 70.0));
        assert_eq!(stock(pool, "NUT", "MAIN").await, (50.0, 15.0, 35.0));
        assert_eq!(tracker_rows(pool, "SO").await, 2);

        let second = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 1.0)]).await;
        assert_eq!(second["so_number"], "SO-000002");
    }

    #[actix_rt::test]
    async fn test_missing_stock_row_rolls_back_everything() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;

        let request = CreateSalesOrderRequest {
            customer_id: customer,
            order_date: None,
            delivery_date: None,
            remarks: None,
            items: vec![so_line("BOLT", "MAIN", 10.0), so_line("GHOST", "MAIN", 1.0)],
        };
        let err = create_sales_order(state.clone(), web::Json(request), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales_orders").fetch_one(pool).await.unwrap();
        assert_eq!(orders, 0);
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 0.0, 100.0));
        assert_eq!(tracker_rows(pool, "SO").await, 0);
    }

    #[actix_rt::test]
    async fn test_quantity_increase_moves_delta() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;

        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 30.0)]).await;
        let id = order["id"].as_str().unwrap().to_string();

        update_sales_order(state.clone(), web::Path::from(id.clone()), web::Json(update_items(vec![so_line("BOLT", "MAIN", 45.0)])), "u1".into())
            .await
            .unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 45.0, 55.0));

        update_sales_order(state.clone(), web::Path::from(id), web::Json(update_items(vec![so_line("BOLT", "MAIN", 20.0)])), "u1".into())
            .await
            .unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 20.0, 80.0));
    }

    #[actix_rt::test]
    async fn test_over_reservation_clamps_available_only() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 30.0, 0.0).await;

        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 20.0)]).await;
        let id = order["id"].as_str().unwrap().to_string();

        update_sales_order(state.clone(), web::Path::from(id), web::Json(update_items(vec![so_line("BOLT", "MAIN", 50.0)])), "u1".into())
            .await
            .unwrap();
        // on-hold +30, available floored at zero instead of -20
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (30.0, 50.0, 0.0));
    }

    #[actix_rt::test]
    async fn test_replacing_lines_releases_dropped_ones() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;
        seed_stock(pool, "NUT", "MAIN", 100.0, 0.0).await;

        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 10.0)]).await;
        let id = order["id"].as_str().unwrap().to_string();

        let resp = update_sales_order(state.clone(), web::Path::from(id), web::Json(update_items(vec![so_line("NUT", "MAIN", 7.0)])), "u1".into())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["total_amount"], 70.0);
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 0.0, 100.0));
        assert_eq!(stock(pool, "NUT", "MAIN").await, (100.0, 7.0, 93.0));
    }

    #[actix_rt::test]
    async fn test_lines_on_deliveries_cannot_be_removed() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;
        seed_stock(pool, "NUT", "MAIN", 100.0, 0.0).await;

        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 10.0), so_line("NUT", "MAIN", 5.0)]).await;
        let id = order["id"].as_str().unwrap().to_string();
        let receipt = prepare(&state, delivery_request(&order, &[(1, 2.0)])).await;

        let err = update_sales_order(state.clone(), web::Path::from(id.clone()), web::Json(update_items(vec![so_line("BOLT", "MAIN", 10.0)])), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(stock(pool, "NUT", "MAIN").await, (100.0, 5.0, 95.0));

        set_status(&state, &receipt, DeliveryStatus::Delivered).await.unwrap();
        let err = update_sales_order(state.clone(), web::Path::from(id), web::Json(update_items(vec![so_line("BOLT", "MAIN", 10.0)])), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(stock(pool, "NUT", "MAIN").await, (98.0, 3.0, 95.0));
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 10.0, 90.0));
    }

    #[actix_rt::test]
    async fn test_prepared_quantity_blocks_shrinking() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;

        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 10.0)]).await;
        let id = order["id"].as_str().unwrap().to_string();
        let receipt = prepare(&state, delivery_request(&order, &[(0, 8.0)])).await;

        let err = update_sales_order(state.clone(), web::Path::from(id.clone()), web::Json(update_items(vec![so_line("BOLT", "MAIN", 5.0)])), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 10.0, 90.0));

        update_sales_order(state.clone(), web::Path::from(id), web::Json(update_items(vec![so_line("BOLT", "MAIN", 8.0)])), "u1".into())
            .await
            .unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 8.0, 92.0));

        set_status(&state, &receipt, DeliveryStatus::Delivered).await.unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (92.0, 0.0, 92.0));
    }

    #[actix_rt::test]
    async fn test_editing_partial_order_recomputes_status() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;

        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 10.0)]).await;
        let id = order["id"].as_str().unwrap().to_string();
        let receipt = prepare(&state, delivery_request(&order, &[(0, 6.0)])).await;
        set_status(&state, &receipt, DeliveryStatus::Delivered).await.unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (94.0, 4.0, 90.0));

        let err = update_sales_order(state.clone(), web::Path::from(id.clone()), web::Json(update_items(vec![so_line("BOLT", "MAIN", 5.0)])), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let resp = update_sales_order(state.clone(), web::Path::from(id.clone()), web::Json(update_items(vec![so_line("BOLT", "MAIN", 12.0)])), "u1".into())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["data"]["status"], "PARTIAL");
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (94.0, 6.0, 88.0));

        let resp = update_sales_order(state.clone(), web::Path::from(id), web::Json(update_items(vec![so_line("BOLT", "MAIN", 6.0)])), "u1".into())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["data"]["status"], "COMPLETED");
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (94.0, 0.0, 94.0));
    }

    #[actix_rt::test]
    async fn test_cancel_releases_and_locks_order() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;

        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 25.0)]).await;
        let id = order["id"].as_str().unwrap().to_string();

        cancel_sales_order(state.clone(), web::Path::from(id.clone()), "u1".into()).await.unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 0.0, 100.0));

        let err = update_sales_order(state.clone(), web::Path::from(id.clone()), web::Json(update_items(vec![so_line("BOLT", "MAIN", 5.0)])), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = cancel_sales_order(state.clone(), web::Path::from(id), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn test_delete_releases_unless_delivered() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;

        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 40.0)]).await;
        let id = order["id"].as_str().unwrap().to_string();

        sqlx::query(
            "INSERT INTO deliveries (id, dr_no, sales_order_id, so_number, customer_id, delivery_date, status, created_at, updated_at) \
             VALUES ('d1', 'DR-000001', ?, 'SO-000001', ?, '2024-01-02', 'PREPARED', datetime('now'), datetime('now'))"
        )
            .bind(&id)
            .bind(&customer)
            .execute(pool)
            .await
            .unwrap();

        let err = delete_sales_order(state.clone(), web::Path::from(id.clone()), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 40.0, 60.0));

        sqlx::query("UPDATE deliveries SET status = 'CANCELLED' WHERE id = 'd1'").execute(pool).await.unwrap();
        delete_sales_order(state.clone(), web::Path::from(id), "u1".into()).await.unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 0.0, 100.0));

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales_orders").fetch_one(pool).await.unwrap();
        assert_eq!(remaining, 0);
    }

    #[actix_rt::test]
    async fn test_inactive_customer_rejected() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        sqlx::query("UPDATE customers SET status = 'INACTIVE'").execute(pool).await.unwrap();
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;

        let request = CreateSalesOrderRequest {
            customer_id: customer,
            order_date: None,
            delivery_date: None,
            remarks: None,
            items: vec![so_line("BOLT", "MAIN", 1.0)],
        };
        let err = create_sales_order(state.clone(), web::Json(request), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
