// src/transfer_handlers.rs
//! Stock transfers between warehouses.
//!
//! Creating a request holds the stock at the source. Approval moves it to
//! the destination (opening the destination row if needed), rejection or
//! deletion of a pending request hands it back.

use actix_web::{web, HttpResponse};
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
use crate::validator::{normalize_code, BusinessValidator, CustomValidate};

async fn load_request(conn: &mut SqliteConnection, id: &str) -> ApiResult<TransferRequest> {
    sqlx::query_as::<_, TransferRequest>("SELECT * FROM transfer_requests WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Transfer request"))
}

async fn load_with_items(conn: &mut SqliteConnection, id: &str) -> ApiResult<TransferRequestWithItems> {
    let request = load_request(conn, id).await?;
    let items = sqlx::query_as::<_, TransferRequestItem>(
        "SELECT * FROM transfer_request_items WHERE transfer_request_id = ? ORDER BY rowid"
    )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(TransferRequestWithItems { request, items })
}

fn parse_status(request: &TransferRequest) -> ApiResult<TransferStatus> {
    TransferStatus::from_str(&request.status).map_err(|_| {
        ApiError::InternalServerError(format!("Unknown transfer status '{}'", request.status))
    })
}

/// Undo the source-side hold of every line.
async fn release_holds(
    conn: &mut SqliteConnection,
    transfer: &TransferRequestWithItems,
    remarks: &str,
    user_id: &str,
) -> ApiResult<()> {
    let movement = Movement {
        reference_type: ReferenceType::TransferRequest,
        reference_no: &transfer.request.request_no,
        remarks: Some(remarks),
        user_id,
    };
    for item in &transfer.items {
        let qty = item.quantity;
        inventory::apply(conn, &item.item_code, &transfer.request.from_warehouse, &movement, |s| s.release(qty)).await?;
    }
    Ok(())
}

pub async fn get_transfer_requests(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<TransferQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);

    let whitelist = FieldWhitelist::for_transfer_requests();
    let mut builder = SafeQueryBuilder::new(&whitelist);

    if let Some(ref search) = query.search {
        builder.add_search(&["request_no"], search);
    }
    if let Some(ref status) = query.status {
        builder.add_exact_match("status", status.to_uppercase());
    }
    if let Some(ref warehouse) = query.warehouse {
        let warehouse = normalize_code(warehouse);
        builder.add_condition("(from_warehouse = ? OR to_warehouse = ?)", vec![warehouse.clone(), warehouse]);
    }

    builder
        .order_by(
            query.sort_by.as_deref().unwrap_or("created_at"),
            query.sort_order.as_deref().unwrap_or("DESC"),
        )
        .limit(per_page)
        .offset(offset);

    let result = fetch_page::<TransferRequest>(&app_state.db_pool, &builder, page, per_page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn get_transfer_request(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let mut conn = app_state.db_pool.acquire().await?;
    let transfer = load_with_items(&mut conn, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(transfer)))
}

pub async fn create_transfer_request(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateTransferRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;

    let from_warehouse = normalize_code(&request.from_warehouse);
    let to_warehouse = normalize_code(&request.to_warehouse);

    let mut tx = app_state.db_pool.begin().await?;

    let request_no = next_document_number(&mut *tx, DocumentKind::TransferRequest, app_state.config.business.sequence_width).await?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO transfer_requests (
            id, request_no, from_warehouse, to_warehouse, remarks, status,
            requested_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&request_no)
        .bind(&from_warehouse)
        .bind(&to_warehouse)
        .bind(&request.remarks)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    let movement = Movement {
        reference_type: ReferenceType::TransferRequest,
        reference_no: &request_no,
        remarks: Some("Held for transfer"),
        user_id: &user_id,
    };

    for line in &request.items {
        let item_code = normalize_code(&line.item_code);
        let source = inventory::find_stock(&mut *tx, &item_code, &from_warehouse).await?;

        let check = BusinessValidator::validate_transfer_hold(source.available_quantity, line.quantity);
        if !check.warnings.is_empty() {
            log::warn!("{}: {} @ {} {:?}", request_no, item_code, from_warehouse, check.warnings);
        }
        check.into_business_result()?;

        sqlx::query(
            "INSERT INTO transfer_request_items (id, transfer_request_id, item_code, quantity) VALUES (?, ?, ?, ?)"
        )
            .bind(Uuid::new_v4().to_string())
            .bind(&id)
            .bind(&item_code)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;

        let qty = line.quantity;
        inventory::apply_to(&mut *tx, &source, &movement, |s| s.hold(qty)).await?;
    }

    let transfer = load_with_items(&mut *tx, &id).await?;
    tx.commit().await?;

    log::info!(
        "Transfer {} {} -> {} requested by {}",
        request_no, from_warehouse, to_warehouse, user_id
    );
    Ok(HttpResponse::Created().json(ApiResponse::success(transfer)))
}

pub async fn approve_transfer_request(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let transfer = load_with_items(&mut *tx, &id).await?;
    let status = parse_status(&transfer.request)?;
    if status != TransferStatus::Pending {
        return Err(ApiError::invalid_transition("Transfer request", status.as_ref(), "APPROVED"));
    }

    let movement = Movement {
        reference_type: ReferenceType::TransferRequest,
        reference_no: &transfer.request.request_no,
        remarks: Some("Transfer approved"),
        user_id: &user_id,
    };

    for item in &transfer.items {
        let qty = item.quantity;
        let source = inventory::find_stock(&mut *tx, &item.item_code, &transfer.request.from_warehouse).await?;
        inventory::apply_to(&mut *tx, &source, &movement, |s| s.transfer_out(qty)).await?;
        inventory::apply_or_create(
            &mut *tx,
            &item.item_code,
            &transfer.request.to_warehouse,
            Some(&source),
            &movement,
            |s| s.transfer_in(qty),
        ).await?;
    }

    let now = Utc::now();
    sqlx::query(
        "UPDATE transfer_requests SET status = 'APPROVED', decided_by = ?, decided_at = ?, updated_at = ? WHERE id = ?"
    )
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    let approved = load_with_items(&mut *tx, &id).await?;
    tx.commit().await?;

    log::info!("Transfer {} approved by {}", transfer.request.request_no, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(approved)))
}

pub async fn reject_transfer_request(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<RejectTransferRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    request.validate()?;

    let mut tx = app_state.db_pool.begin().await?;

    let transfer = load_with_items(&mut *tx, &id).await?;
    let status = parse_status(&transfer.request)?;
    if status != TransferStatus::Pending {
        return Err(ApiError::invalid_transition("Transfer request", status.as_ref(), "REJECTED"));
    }

    release_holds(&mut *tx, &transfer, "Transfer rejected", &user_id).await?;

    let now = Utc::now();
    sqlx::query(
        "UPDATE transfer_requests SET status = 'REJECTED', rejection_reason = ?, decided_by = ?, decided_at = ?, updated_at = ? WHERE id = ?"
    )
        .bind(&request.reason)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    let rejected = load_with_items(&mut *tx, &id).await?;
    tx.commit().await?;

    log::info!("Transfer {} rejected by {}", transfer.request.request_no, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(rejected)))
}

pub async fn delete_transfer_request(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let transfer = load_with_items(&mut *tx, &id).await?;
    match parse_status(&transfer.request)? {
        TransferStatus::Approved => {
            return Err(ApiError::Conflict(format!(
                "Transfer {} is approved and cannot be deleted",
                transfer.request.request_no
            )));
        }
        TransferStatus::Pending => {
            release_holds(&mut *tx, &transfer, "Transfer deleted", &user_id).await?;
        }
        TransferStatus::Rejected => {}
    }

    sqlx::query("DELETE FROM transfer_request_items WHERE transfer_request_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM transfer_requests WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    log::info!("🗑️ Transfer {} deleted by user {}", transfer.request.request_no, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Transfer request deleted successfully".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;

    fn transfer(lines: &[(&str, f64)]) -> CreateTransferRequest {
        CreateTransferRequest {
            from_warehouse: "main".to_string(),
            to_warehouse: "north".to_string(),
            remarks: None,
            items: lines
                .iter()
                .map(|(code, qty)| TransferLineRequest { item_code: code.to_string(), quantity: *qty })
                .collect(),
        }
    }

    async fn create(state: &web::Data<Arc<AppState>>, lines: &[(&str, f64)]) -> String {
        let resp = create_transfer_request(state.clone(), web::Json(transfer(lines)), "u1".into()).await.unwrap();
        body_json(resp).await["data"]["id"].as_str().unwrap().to_string()
    }

    fn no_reason() -> web::Json<RejectTransferRequest> {
        web::Json(RejectTransferRequest { reason: Some("not needed".to_string()) })
    }

    #[actix_rt::test]
    async fn test_create_holds_at_source() {
        let state = app_state().await;
        let pool = &state.db_pool;
        seed_stock(pool, "BOLT", "MAIN", 50.0, 0.0).await;

        let resp = create_transfer_request(state.clone(), web::Json(transfer(&[("bolt", 20.0)])), "u1".into())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["request_no"], "TR-000001");
        assert_eq!(body["data"]["from_warehouse"], "MAIN");
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (50.0, 20.0, 30.0));
    }

    #[actix_rt::test]
    async fn test_insufficient_stock_rolls_back_all_lines() {
        let state = app_state().await;
        let pool = &state.db_pool;
        seed_stock(pool, "BOLT", "MAIN", 50.0, 0.0).await;
        seed_stock(pool, "NUT", "MAIN", 5.0, 0.0).await;

        let err = create_transfer_request(state.clone(), web::Json(transfer(&[("BOLT", 10.0), ("NUT", 6.0)])), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (50.0, 0.0, 50.0));

        let requests: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfer_requests").fetch_one(pool).await.unwrap();
        assert_eq!(requests, 0);

        let mut same = transfer(&[("BOLT", 1.0)]);
        same.to_warehouse = "MAIN".to_string();
        let err = create_transfer_request(state.clone(), web::Json(same), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[actix_rt::test]
    async fn test_approve_moves_stock_and_opens_destination() {
        let state = app_state().await;
        let pool = &state.db_pool;
        seed_stock(pool, "BOLT", "MAIN", 50.0, 0.0).await;

        let id = create(&state, &[("BOLT", 20.0)]).await;
        approve_transfer_request(state.clone(), web::Path::from(id.clone()), "u2".into()).await.unwrap();

        assert_eq!(stock(pool, "BOLT", "MAIN").await, (30.0, 0.0, 30.0));
        assert_eq!(stock(pool, "BOLT", "NORTH").await, (20.0, 0.0, 20.0));
        let cost: f64 = sqlx::query_scalar("SELECT unit_cost FROM inventory_main WHERE warehouse = 'NORTH'")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(cost, 2.5);
        assert_eq!(tracker_rows(pool, "TR").await, 3);

        let err = reject_transfer_request(state.clone(), web::Path::from(id.clone()), no_reason(), "u2".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let err = delete_transfer_request(state.clone(), web::Path::from(id), "u2".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn test_reject_and_delete_release_holds() {
        let state = app_state().await;
        let pool = &state.db_pool;
        seed_stock(pool, "BOLT", "MAIN", 50.0, 0.0).await;

        let rejected = create(&state, &[("BOLT", 15.0)]).await;
        let resp = reject_transfer_request(state.clone(), web::Path::from(rejected.clone()), no_reason(), "u2".into())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["status"], "REJECTED");
        assert_eq!(body["data"]["rejection_reason"], "not needed");
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (50.0, 0.0, 50.0));

        // rejected requests delete without another release
        delete_transfer_request(state.clone(), web::Path::from(rejected), "u2".into()).await.unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (50.0, 0.0, 50.0));

        let pending = create(&state, &[("BOLT", 12.0)]).await;
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (50.0, 12.0, 38.0));
        delete_transfer_request(state.clone(), web::Path::from(pending), "u2".into()).await.unwrap();
        assert_eq!(stock(pool, "BOLT", "MAIN").await, (50.0, 0.0, 50.0));
    }
}
