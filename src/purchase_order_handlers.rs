// src/purchase_order_handlers.rs
//! Purchase orders: PENDING -> APPROVED -> RECEIVED, or CANCELLED.
//! Receipts add stock through the save path and may be partial.

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
use crate::sequence::{next_document_number, DocumentKind};
use crate::validator::{normalize_code, CustomValidate, FieldValidator};

async fn load_order(conn: &mut SqliteConnection, id: &str) -> ApiResult<PurchaseOrder> {
    sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Purchase order '{}' not found", id)))
}

async fn load_items(conn: &mut SqliteConnection, order_id: &str) -> ApiResult<Vec<PurchaseOrderItem>> {
    let items = sqlx::query_as::<_, PurchaseOrderItem>(
        "SELECT * FROM purchase_order_items WHERE purchase_order_id = ? ORDER BY rowid"
    )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(items)
}

async fn load_with_items(conn: &mut SqliteConnection, id: &str) -> ApiResult<PurchaseOrderWithItems> {
    let order = load_order(conn, id).await?;
    let items = load_items(conn, id).await?;
    Ok(PurchaseOrderWithItems { order, items })
}

fn parse_status(order: &PurchaseOrder) -> ApiResult<PurchaseOrderStatus> {
    PurchaseOrderStatus::from_str(&order.status).map_err(|_| {
        ApiError::InternalServerError(format!("Unknown purchase order status '{}'", order.status))
    })
}

async fn insert_lines(
    conn: &mut SqliteConnection,
    order_id: &str,
    lines: &[PurchaseOrderLineRequest],
) -> ApiResult<()> {
    for line in lines {
        let unit_cost = line.unit_cost.unwrap_or(0.0);
        sqlx::query(
            r#"INSERT INTO purchase_order_items (
                id, purchase_order_id, item_code, description, warehouse,
                quantity, received_quantity, unit_cost, amount
            ) VALUES (?, ?, ?, ?, ?, ?, 0.0, ?, ?)"#
        )
            .bind(Uuid::new_v4().to_string())
            .bind(order_id)
            .bind(normalize_code(&line.item_code))
            .bind(&line.description)
            .bind(normalize_code(&line.warehouse))
            .bind(line.quantity)
            .bind(unit_cost)
            .bind(line.quantity * unit_cost)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        "UPDATE purchase_orders SET total_amount = \
         (SELECT COALESCE(SUM(amount), 0.0) FROM purchase_order_items WHERE purchase_order_id = ?) \
         WHERE id = ?"
    )
        .bind(order_id)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn set_status(
    conn: &mut SqliteConnection,
    order_id: &str,
    status: PurchaseOrderStatus,
) -> ApiResult<()> {
    sqlx::query("UPDATE purchase_orders SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(Utc::now())
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get_purchase_orders(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PurchaseOrderQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);

    let whitelist = FieldWhitelist::for_purchase_orders();
    let mut builder = SafeQueryBuilder::new(&whitelist);

    if let Some(ref search) = query.search {
        builder.add_search(&["po_number", "supplier_name"], search);
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

    let result = fetch_page::<PurchaseOrder>(&app_state.db_pool, &builder, page, per_page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn get_purchase_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let mut conn = app_state.db_pool.acquire().await?;
    let order = load_with_items(&mut conn, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(order)))
}

pub async fn create_purchase_order(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreatePurchaseOrderRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;

    let mut tx = app_state.db_pool.begin().await?;

    let po_number = next_document_number(&mut *tx, DocumentKind::PurchaseOrder, app_state.config.business.sequence_width).await?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO purchase_orders (
            id, po_number, supplier_name, order_date, expected_date, remarks,
            status, total_amount, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 'PENDING', 0.0, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&po_number)
        .bind(request.supplier_name.trim())
        .bind(request.order_date.unwrap_or_else(|| now.date_naive()))
        .bind(request.expected_date)
        .bind(&request.remarks)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    insert_lines(&mut *tx, &id, &request.items).await?;

    let order = load_with_items(&mut *tx, &id).await?;
    tx.commit().await?;

    log::info!("Purchase order {} to {} created by {}", po_number, order.order.supplier_name, user_id);
    Ok(HttpResponse::Created().json(ApiResponse::success(order)))
}

pub async fn update_purchase_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdatePurchaseOrderRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    request.validate()?;
    request.custom_validate().into_result()?;

    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &order_id).await?;
    if parse_status(&order)? != PurchaseOrderStatus::Pending {
        return Err(ApiError::not_editable("Purchase order", &order.status));
    }

    FieldValidator::date_order(Some(order.order_date), request.expected_date, "Order date", "Expected date")
        .map_err(ApiError::ValidationError)?;

    sqlx::query(
        r#"UPDATE purchase_orders SET
            supplier_name = COALESCE(?, supplier_name),
            expected_date = COALESCE(?, expected_date),
            remarks = COALESCE(?, remarks),
            updated_at = ?
        WHERE id = ?"#
    )
        .bind(request.supplier_name.as_deref().map(str::trim))
        .bind(request.expected_date)
        .bind(&request.remarks)
        .bind(Utc::now())
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;

    if let Some(ref items) = request.items {
        sqlx::query("DELETE FROM purchase_order_items WHERE purchase_order_id = ?")
            .bind(&order_id)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut *tx, &order_id, items).await?;
    }

    let updated = load_with_items(&mut *tx, &order_id).await?;
    tx.commit().await?;

    log::info!("Purchase order {} updated by {}", order.po_number, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn approve_purchase_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &order_id).await?;
    let status = parse_status(&order)?;
    if status != PurchaseOrderStatus::Pending {
        return Err(ApiError::invalid_transition("Purchase order", status.as_ref(), "APPROVED"));
    }

    sqlx::query("UPDATE purchase_orders SET status = 'APPROVED', approved_by = ?, updated_at = ? WHERE id = ?")
        .bind(&user_id)
        .bind(Utc::now())
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;

    let approved = load_with_items(&mut *tx, &order_id).await?;
    tx.commit().await?;

    log::info!("Purchase order {} approved by {}", order.po_number, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(approved)))
}

pub async fn cancel_purchase_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &order_id).await?;
    let status = parse_status(&order)?;
    let received_any = load_items(&mut *tx, &order_id)
        .await?
        .iter()
        .any(|i| i.received_quantity > 0.0);

    let cancellable = match status {
        PurchaseOrderStatus::Pending => true,
        PurchaseOrderStatus::Approved => !received_any,
        _ => false,
    };
    if !cancellable {
        return Err(ApiError::invalid_transition("Purchase order", status.as_ref(), "CANCELLED"));
    }

    set_status(&mut *tx, &order_id, PurchaseOrderStatus::Cancelled).await?;
    let cancelled = load_with_items(&mut *tx, &order_id).await?;
    tx.commit().await?;

    log::info!("Purchase order {} cancelled by {}", order.po_number, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(cancelled)))
}

pub async fn receive_purchase_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<ReceivePurchaseOrderRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    request.validate()?;
    request.custom_validate().into_result()?;

    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &order_id).await?;
    let status = parse_status(&order)?;
    if status != PurchaseOrderStatus::Approved {
        return Err(ApiError::Conflict(format!(
            "Purchase order {} is {}; only approved orders can be received",
            order.po_number, order.status
        )));
    }

    let lines: HashMap<String, PurchaseOrderItem> = load_items(&mut *tx, &order_id)
        .await?
        .into_iter()
        .map(|i| (i.id.clone(), i))
        .collect();

    let movement = Movement {
        reference_type: ReferenceType::PurchaseOrder,
        reference_no: &order.po_number,
        remarks: request.remarks.as_deref(),
        user_id: &user_id,
    };

    for receipt in &request.items {
        let line = lines.get(&receipt.purchase_order_item_id).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Line '{}' is not on purchase order {}",
                receipt.purchase_order_item_id, order.po_number
            ))
        })?;

        if receipt.quantity > line.outstanding() + f64::EPSILON {
            return Err(ApiError::BadRequest(format!(
                "Only {} of {} @ {} outstanding, received {}",
                line.outstanding(), line.item_code, line.warehouse, receipt.quantity
            )));
        }

        let qty = receipt.quantity;
        inventory::apply_or_create(&mut *tx, &line.item_code, &line.warehouse, None, &movement, |s| s.receive(qty)).await?;

        sqlx::query("UPDATE purchase_order_items SET received_quantity = received_quantity + ? WHERE id = ?")
            .bind(qty)
            .bind(&line.id)
            .execute(&mut *tx)
            .await?;
    }

    let fully_received = load_items(&mut *tx, &order_id)
        .await?
        .iter()
        .all(|i| i.outstanding() <= f64::EPSILON);
    if fully_received {
        set_status(&mut *tx, &order_id, PurchaseOrderStatus::Received).await?;
    }

    let received = load_with_items(&mut *tx, &order_id).await?;
    tx.commit().await?;

    log::info!(
        "Purchase order {} receipt by {} ({} line(s), complete: {})",
        order.po_number, user_id, request.items.len(), fully_received
    );
    Ok(HttpResponse::Ok().json(ApiResponse::success(received)))
}

pub async fn delete_purchase_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let order = load_order(&mut *tx, &order_id).await?;
    if !parse_status(&order)?.is_deletable() {
        return Err(ApiError::Conflict(format!(
            "Purchase order {} is {} and cannot be deleted",
            order.po_number, order.status
        )));
    }

    sqlx::query("DELETE FROM purchase_order_items WHERE purchase_order_id = ?")
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM purchase_orders WHERE id = ?")
        .bind(&order_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    log::info!("🗑️ Purchase order {} deleted by user {}", order.po_number, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Purchase order deleted successfully".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;

    fn po_line(item_code: &str, warehouse: &str, quantity: f64) -> PurchaseOrderLineRequest {
        PurchaseOrderLineRequest {
            item_code: item_code.to_string(),
            description: None,
            warehouse: warehouse.to_string(),
            quantity,
            unit_cost: Some(4.0),
        }
    }

    async fn create(state: &web::Data<Arc<AppState>>, items: Vec<PurchaseOrderLineRequest>) -> serde_json::Value {
        let request = CreatePurchaseOrderRequest {
            supplier_name: "Steelworks Inc".to_string(),
            order_date: None,
            expected_date: None,
            remarks: None,
            items,
        };
        let resp = create_purchase_order(state.clone(), web::Json(request), "u1".into()).await.unwrap();
        body_json(resp).await["data"].clone()
    }

    fn receipt(order: &serde_json::Value, lines: &[(usize, f64)]) -> web::Json<ReceivePurchaseOrderRequest> {
        web::Json(ReceivePurchaseOrderRequest {
            items: lines
                .iter()
                .map(|(idx, qty)| ReceiveLineRequest {
                    purchase_order_item_id: order["items"][*idx]["id"].as_str().unwrap().to_string(),
                    quantity: *qty,
                })
                .collect(),
            remarks: Some("GRN 77".to_string()),
        })
    }

    fn id_of(order: &serde_json::Value) -> web::Path<String> {
        web::Path::from(order["id"].as_str().unwrap().to_string())
    }

    #[actix_rt::test]
    async fn test_partial_then_full_receipt() {
        let state = app_state().await;
        let pool = &state.db_pool;
        seed_stock(pool, "BOLT", "MAIN", 10.0, 4.0).await;

        let order = create(&state, vec![po_line("BOLT", "MAIN", 30.0), po_line("NUT", "NORTH", 5.0)]).await;
        assert_eq!(order["po_number"], "PO-000001");
        assert_eq!(order["total_amount"], 140.0);

        let err = receive_purchase_order(state.clone(), id_of(&order), receipt(&order, &[(0, 1.0)]), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        approve_purchase_order(state.clone(), id_of(&order), "u2".into()).await.unwrap();

        let body = body_json(
            receive_purchase_order(state.clone(), id_of(&order), receipt(&order, &[(0, 20.0)]), "u1".into())
                .await
                .unwrap(),
        ).await;
        assert_eq!(body["data"]["status"], "APPROVED");
        // save path: available = quantity - on_hold
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (30.0, 4.0, 26.0));

        let err = receive_purchase_order(state.clone(), id_of(&order), receipt(&order, &[(0, 11.0)]), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let body = body_json(
            receive_purchase_order(state.clone(), id_of(&order), receipt(&order, &[(0, 10.0), (1, 5.0)]), "u1".into())
                .await
                .unwrap(),
        ).await;
        assert_eq!(body["data"]["status"], "RECEIVED");
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (40.0, 4.0, 36.0));
        assert_eq!(stock(pool, "NUT", "NORTH").await, (5.0, 0.0, 5.0));
        assert_eq!(tracker_rows(pool, "PO").await, 3);
    }

    #[actix_rt::test]
    async fn test_only_pending_orders_are_editable() {
        let state = app_state().await;
        let order = create(&state, vec![po_line("BOLT", "MAIN", 30.0)]).await;

        let update = UpdatePurchaseOrderRequest {
            supplier_name: None,
            expected_date: None,
            remarks: Some("rush".to_string()),
            items: Some(vec![po_line("BOLT", "MAIN", 10.0), po_line("NUT", "MAIN", 10.0)]),
        };
        let body = body_json(
            update_purchase_order(state.clone(), id_of(&order), web::Json(update.clone()), "u1".into())
                .await
                .unwrap(),
        ).await;
        assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["total_amount"], 80.0);
        assert_eq!(body["data"]["supplier_name"], "Steelworks Inc");

        approve_purchase_order(state.clone(), id_of(&order), "u2".into()).await.unwrap();
        let err = update_purchase_order(state.clone(), id_of(&order), web::Json(update), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = delete_purchase_order(state.clone(), id_of(&order), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        cancel_purchase_order(state.clone(), id_of(&order), "u1".into()).await.unwrap();
        delete_purchase_order(state.clone(), id_of(&order), "u1".into()).await.unwrap();
    }
}
