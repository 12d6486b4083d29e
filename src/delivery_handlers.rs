// src/delivery_handlers.rs
//! Delivery receipts against sales orders.
//!
//! A receipt is PREPARED without touching stock. Marking it DELIVERED
//! consumes the reservation and the physical quantity of each line and
//! rolls the delivered figures up into the sales order.

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
use crate::handlers::{fetch_page, normalize_page, ApiResponse};
use crate::inventory::{self, Movement};
use crate::query_builder::{FieldWhitelist, SafeQueryBuilder};
use crate::sales_order_handlers::{load_items, load_order};
use crate::sequence::{next_document_number, DocumentKind};
use crate::validator::{BusinessValidator, CustomValidate};

async fn load_delivery(conn: &mut SqliteConnection, id: &str) -> ApiResult<Delivery> {
    sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::delivery_not_found(id))
}

async fn load_delivery_items(conn: &mut SqliteConnection, delivery_id: &str) -> ApiResult<Vec<DeliveryItem>> {
    let items = sqlx::query_as::<_, DeliveryItem>(
        "SELECT * FROM delivery_items WHERE delivery_id = ? ORDER BY rowid"
    )
        .bind(delivery_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(items)
}

async fn load_with_items(conn: &mut SqliteConnection, id: &str) -> ApiResult<DeliveryWithItems> {
    let delivery = load_delivery(conn, id).await?;
    let items = load_delivery_items(conn, id).await?;
    Ok(DeliveryWithItems { delivery, items })
}

fn parse_status(delivery: &Delivery) -> ApiResult<DeliveryStatus> {
    DeliveryStatus::from_str(&delivery.status).map_err(|_| {
        ApiError::InternalServerError(format!("Unknown delivery status '{}'", delivery.status))
    })
}

/// Quantity of a sales order line already promised to PREPARED receipts.
pub(crate) async fn prepared_quantity(conn: &mut SqliteConnection, sales_order_item_id: &str) -> ApiResult<f64> {
    let qty: f64 = sqlx::query_scalar(
        r#"SELECT COALESCE(SUM(di.quantity), 0.0) FROM delivery_items di
           JOIN deliveries d ON d.id = di.delivery_id
           WHERE di.sales_order_item_id = ? AND d.status = 'PREPARED'"#
    )
        .bind(sales_order_item_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(qty)
}

pub async fn get_deliveries(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<DeliveryQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);

    let whitelist = FieldWhitelist::for_deliveries();
    let mut builder = SafeQueryBuilder::new(&whitelist);

    if let Some(ref search) = query.search {
        builder.add_search(&["dr_no", "so_number"], search);
    }
    if let Some(ref status) = query.status {
        builder.add_exact_match("status", status.to_uppercase());
    }
    if let Some(ref sales_order_id) = query.sales_order_id {
        builder.add_condition("sales_order_id = ?", vec![sales_order_id.clone()]);
    }

    builder
        .order_by(
            query.sort_by.as_deref().unwrap_or("created_at"),
            query.sort_order.as_deref().unwrap_or("DESC"),
        )
        .limit(per_page)
        .offset(offset);

    let result = fetch_page::<Delivery>(&app_state.db_pool, &builder, page, per_page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn get_delivery(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let mut conn = app_state.db_pool.acquire().await?;
    let delivery = load_with_items(&mut conn, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(delivery)))
}

pub async fn create_delivery(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateDeliveryRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;

    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &request.sales_order_id).await?;
    let order_status = SalesOrderStatus::from_str(&order.status).unwrap_or(SalesOrderStatus::Cancelled);
    if !order_status.is_open() {
        return Err(ApiError::Conflict(format!(
            "Sales order {} is {} and cannot be delivered",
            order.so_number, order.status
        )));
    }

    let order_items: HashMap<String, SalesOrderItem> = load_items(&mut *tx, &order.id)
        .await?
        .into_iter()
        .map(|i| (i.id.clone(), i))
        .collect();

    let mut lines: Vec<(&SalesOrderItem, f64)> = Vec::with_capacity(request.items.len());
    for line in &request.items {
        let so_item = order_items.get(&line.sales_order_item_id).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Line '{}' is not on sales order {}",
                line.sales_order_item_id, order.so_number
            ))
        })?;
        let promised = prepared_quantity(&mut *tx, &so_item.id).await?;
        BusinessValidator::validate_delivery_line(
            so_item.quantity,
            so_item.delivered_quantity + promised,
            line.quantity,
        )
            .into_business_result()?;
        lines.push((so_item, line.quantity));
    }

    let dr_no = next_document_number(&mut *tx, DocumentKind::Delivery, app_state.config.business.sequence_width).await?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO deliveries (
            id, dr_no, sales_order_id, so_number, customer_id, delivery_date,
            driver, plate_no, remarks, status, created_by, updated_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'PREPARED', ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&dr_no)
        .bind(&order.id)
        .bind(&order.so_number)
        .bind(&order.customer_id)
        .bind(request.delivery_date.unwrap_or_else(|| now.date_naive()))
        .bind(&request.driver)
        .bind(&request.plate_no)
        .bind(&request.remarks)
        .bind(&user_id)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    for (so_item, quantity) in lines {
        sqlx::query(
            "INSERT INTO delivery_items (id, delivery_id, sales_order_item_id, item_code, warehouse, quantity) \
             VALUES (?, ?, ?, ?, ?, ?)"
        )
            .bind(Uuid::new_v4().to_string())
            .bind(&id)
            .bind(&so_item.id)
            .bind(&so_item.item_code)
            .bind(&so_item.warehouse)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
    }

    let delivery = load_with_items(&mut *tx, &id).await?;
    tx.commit().await?;

    log::info!("Delivery {} prepared for {} by {}", dr_no, order.so_number, user_id);
    Ok(HttpResponse::Created().json(ApiResponse::success(delivery)))
}

/// Goods leave the warehouse: deduct stock and roll delivered figures up.
async fn mark_delivered(
    conn: &mut SqliteConnection,
    delivery: &Delivery,
    user_id: &str,
) -> ApiResult<()> {
    let order = load_order(conn, &delivery.sales_order_id).await?;
    let order_status = SalesOrderStatus::from_str(&order.status).unwrap_or(SalesOrderStatus::Cancelled);
    if !order_status.is_open() {
        return Err(ApiError::Conflict(format!(
            "Sales order {} is {}; delivery {} cannot be released",
            order.so_number, order.status, delivery.dr_no
        )));
    }

    let movement = Movement {
        reference_type: ReferenceType::Delivery,
        reference_no: &delivery.dr_no,
        remarks: None,
        user_id,
    };

    for line in load_delivery_items(conn, &delivery.id).await? {
        let so_item: SalesOrderItem = sqlx::query_as("SELECT * FROM sales_order_items WHERE id = ?")
            .bind(&line.sales_order_item_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| ApiError::not_found("Sales order line"))?;

        BusinessValidator::validate_delivery_line(so_item.quantity, so_item.delivered_quantity, line.quantity)
            .into_business_result()?;

        let qty = line.quantity;
        inventory::apply(conn, &line.item_code, &line.warehouse, &movement, |s| s.deliver(qty)).await?;

        sqlx::query("UPDATE sales_order_items SET delivered_quantity = delivered_quantity + ? WHERE id = ?")
            .bind(qty)
            .bind(&so_item.id)
            .execute(&mut *conn)
            .await?;
    }

    let progress: Vec<(f64, f64)> = load_items(conn, &order.id)
        .await?
        .iter()
        .map(|i| (i.quantity, i.delivered_quantity))
        .collect();
    let status = SalesOrderStatus::from_delivered(&progress);

    sqlx::query("UPDATE sales_orders SET status = ?, updated_by = ?, updated_at = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(user_id)
        .bind(Utc::now())
        .bind(&order.id)
        .execute(&mut *conn)
        .await?;

    log::info!("Sales order {} is now {} after {}", order.so_number, status, delivery.dr_no);
    Ok(())
}

pub async fn update_delivery_status(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateDeliveryStatusRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let delivery_id = path.into_inner();
    request.validate()?;

    let mut tx = app_state.db_pool.begin().await?;

    let delivery = load_delivery(&mut *tx, &delivery_id).await?;
    let current = parse_status(&delivery)?;
    let next = request.status;

    if !current.can_transition_to(next) {
        return Err(ApiError::invalid_transition("Delivery", current.as_ref(), next.as_ref()));
    }

    let mut delivered_at = delivery.delivered_at;
    if next == DeliveryStatus::Delivered {
        mark_delivered(&mut *tx, &delivery, &user_id).await?;
        delivered_at = Some(Utc::now());
    }

    sqlx::query(
        r#"UPDATE deliveries SET
            status = ?,
            remarks = COALESCE(?, remarks),
            delivered_at = ?,
            updated_by = ?,
            updated_at = ?
        WHERE id = ?"#
    )
        .bind(next.to_string())
        .bind(&request.remarks)
        .bind(delivered_at)
        .bind(&user_id)
        .bind(Utc::now())
        .bind(&delivery_id)
        .execute(&mut *tx)
        .await?;

    let updated = load_with_items(&mut *tx, &delivery_id).await?;
    tx.commit().await?;

    log::info!("Delivery {}: {} -> {} by {}", delivery.dr_no, current, next, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn delete_delivery(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let delivery_id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let delivery = load_delivery(&mut *tx, &delivery_id).await?;
    if !parse_status(&delivery)?.is_deletable() {
        return Err(ApiError::Conflict(format!(
            "Delivery {} is {} and cannot be deleted",
            delivery.dr_no, delivery.status
        )));
    }

    sqlx::query("DELETE FROM delivery_items WHERE delivery_id = ?")
        .bind(&delivery_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM deliveries WHERE id = ?")
        .bind(&delivery_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    log::info!("🗑️ Delivery {} deleted by user {}", delivery.dr_no, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Delivery deleted successfully".to_string())))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::handlers::test_support::body_json;

    pub fn delivery_request(order: &serde_json::Value, lines: &[(usize, f64)]) -> CreateDeliveryRequest {
        CreateDeliveryRequest {
            sales_order_id: order["id"].as_str().unwrap().to_string(),
            delivery_date: None,
            driver: Some("Pedro".to_string()),
            plate_no: Some("ABC 1234".to_string()),
            remarks: None,
            items: lines
                .iter()
                .map(|(idx, qty)| DeliveryLineRequest {
                    sales_order_item_id: order["items"][*idx]["id"].as_str().unwrap().to_string(),
                    quantity: *qty,
                })
                .collect(),
        }
    }

    pub async fn prepare(state: &web::Data<Arc<AppState>>, request: CreateDeliveryRequest) -> String {
        let resp = create_delivery(state.clone(), web::Json(request), "u1".into()).await.unwrap();
        body_json(resp).await["data"]["id"].as_str().unwrap().to_string()
    }

    pub async fn set_status(state: &web::Data<Arc<AppState>>, id: &str, status: DeliveryStatus) -> ApiResult<HttpResponse> {
        let request = UpdateDeliveryStatusRequest { status, remarks: None };
        update_delivery_status(state.clone(), web::Path::from(id.to_string()), web::Json(request), "u1".into()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;
    use crate::sales_order_handlers::test_support::{create_order, so_line};
    use super::test_support::*;

    async fn order_status(pool: &sqlx::SqlitePool, order: &serde_json::Value) -> String {
        sqlx::query_scalar("SELECT status FROM sales_orders WHERE id = ?")
            .bind(order["id"].as_str().unwrap())
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[actix_rt::test]
    async fn test_delivery_flow_consumes_reservation() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;
        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 30.0)]).await;

        let first = prepare(&state, delivery_request(&order, &[(0, 10.0)])).await;
        // preparing moves nothing
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (100.0, 30.0, 70.0));

        let body = body_json(set_status(&state, &first, DeliveryStatus::Delivered).await.unwrap()).await;
        assert_eq!(body["data"]["dr_no"], "DR-000001");
        assert_eq!(body["data"]["status"], "DELIVERED");
        assert!(body["data"]["delivered_at"].is_string());
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (90.0, 20.0, 70.0));
        assert_eq!(order_status(pool, &order).await, "PARTIAL");
        assert_eq!(tracker_rows(pool, "DR").await, 1);

        let second = prepare(&state, delivery_request(&order, &[(0, 20.0)])).await;
        set_status(&state, &second, DeliveryStatus::Delivered).await.unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (70.0, 0.0, 70.0));
        assert_eq!(order_status(pool, &order).await, "COMPLETED");

        set_status(&state, &second, DeliveryStatus::Completed).await.unwrap();
    }

    #[actix_rt::test]
    async fn test_over_delivery_is_bad_request() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;
        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 10.0)]).await;

        let err = create_delivery(state.clone(), web::Json(delivery_request(&order, &[(0, 11.0)])), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // prepared receipts count against what is left
        prepare(&state, delivery_request(&order, &[(0, 6.0)])).await;
        let err = create_delivery(state.clone(), web::Json(delivery_request(&order, &[(0, 6.0)])), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let mut foreign = delivery_request(&order, &[(0, 1.0)]);
        foreign.items[0].sales_order_item_id = "nope".to_string();
        let err = create_delivery(state.clone(), web::Json(foreign), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[actix_rt::test]
    async fn test_transitions_and_delete_rules() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;
        let order = create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 10.0)]).await;

        let id = prepare(&state, delivery_request(&order, &[(0, 4.0)])).await;
        let err = set_status(&state, &id, DeliveryStatus::Completed).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        set_status(&state, &id, DeliveryStatus::Delivered).await.unwrap();
        let err = set_status(&state, &id, DeliveryStatus::Cancelled).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let err = delete_delivery(state.clone(), web::Path::from(id), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let other = prepare(&state, delivery_request(&order, &[(0, 2.0)])).await;
        set_status(&state, &other, DeliveryStatus::Cancelled).await.unwrap();
        // cancelling never touched stock
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (96.0, 6.0, 90.0));
        delete_delivery(state.clone(), web::Path::from(other), "u1".into()).await.unwrap();
    }
}
