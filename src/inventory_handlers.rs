// src/inventory_handlers.rs
//! Inventory rows per (item, warehouse), stock counts and the movement log.

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::models::*;
use crate::error::{validate_quantity, ApiError, ApiResult};
use crate::handlers::{fetch_page, normalize_page, ApiResponse, PaginatedResponse};
use crate::inventory::{self, Movement, StockLevels};
use crate::query_builder::{FieldWhitelist, SafeQueryBuilder};
use crate::validator::{normalize_code, CustomValidate};

async fn find_item(pool: &sqlx::SqlitePool, id: &str) -> ApiResult<InventoryItem> {
    sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_main WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Inventory item"))
}

pub async fn get_inventory(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<InventoryQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);

    let whitelist = FieldWhitelist::for_inventory();
    let mut builder = SafeQueryBuilder::new(&whitelist);

    if let Some(ref search) = query.search {
        builder.add_search(&["item_code", "description"], search);
    }
    if let Some(ref warehouse) = query.warehouse {
        builder.add_exact_match("warehouse", normalize_code(warehouse));
    }
    if query.low_stock.unwrap_or(false) {
        builder.add_condition("available_quantity <= reorder_level", vec![]);
    }

    builder
        .order_by(
            query.sort_by.as_deref().unwrap_or("item_code"),
            query.sort_order.as_deref().unwrap_or("ASC"),
        )
        .limit(per_page)
        .offset(offset);

    let result = fetch_page::<InventoryItem>(&app_state.db_pool, &builder, page, per_page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn get_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let item = find_item(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

/// Every warehouse row of one item code.
pub async fn get_item_stock(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let item_code = normalize_code(&path.into_inner());
    let rows: Vec<InventoryItem> = sqlx::query_as(
        "SELECT * FROM inventory_main WHERE item_code = ? ORDER BY warehouse"
    )
        .bind(&item_code)
        .fetch_all(&app_state.db_pool)
        .await?;

    if rows.is_empty() {
        return Err(ApiError::NotFound(format!("Item '{}' is not stocked anywhere", item_code)));
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(rows)))
}

pub async fn create_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateInventoryRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;
    validate_quantity(request.quantity)?;

    let item_code = normalize_code(&request.item_code);
    let warehouse = normalize_code(&request.warehouse);
    let levels = StockLevels::new(request.quantity, request.quantity_on_hold.unwrap_or(0.0));
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();

    let mut tx = app_state.db_pool.begin().await?;

    sqlx::query(
        r#"INSERT INTO inventory_main (
            id, item_code, description, warehouse, unit,
            quantity, quantity_on_hold, available_quantity, unit_cost, reorder_level,
            created_by, updated_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&item_code)
        .bind(&request.description)
        .bind(&warehouse)
        .bind(request.unit.as_deref().map(normalize_code).unwrap_or_else(|| "PCS".to_string()))
        .bind(levels.quantity)
        .bind(levels.quantity_on_hold)
        .bind(levels.available_quantity)
        .bind(request.unit_cost.unwrap_or(0.0))
        .bind(request.reorder_level.unwrap_or(0.0))
        .bind(&user_id)
        .bind(&user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    let item: InventoryItem = sqlx::query_as("SELECT * FROM inventory_main WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;

    let movement = Movement {
        reference_type: ReferenceType::Adjustment,
        reference_no: "OPENING",
        remarks: Some("Opening balance"),
        user_id: &user_id,
    };
    inventory::record_movement(&mut *tx, &item, &StockLevels::default(), &levels, &movement).await?;

    tx.commit().await?;

    log::info!("Inventory row {} @ {} created by {}", item_code, warehouse, user_id);
    Ok(HttpResponse::Created().json(ApiResponse::success(item)))
}

pub async fn update_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateInventoryRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let item_id = path.into_inner();
    request.validate()?;
    find_item(&app_state.db_pool, &item_id).await?;

    sqlx::query(
        r#"UPDATE inventory_main SET
            description = COALESCE(?, description),
            unit = COALESCE(?, unit),
            unit_cost = COALESCE(?, unit_cost),
            reorder_level = COALESCE(?, reorder_level),
            updated_by = ?,
            updated_at = ?
        WHERE id = ?"#
    )
        .bind(&request.description)
        .bind(request.unit.as_deref().map(normalize_code))
        .bind(request.unit_cost)
        .bind(request.reorder_level)
        .bind(&user_id)
        .bind(Utc::now())
        .bind(&item_id)
        .execute(&app_state.db_pool)
        .await?;

    let item = find_item(&app_state.db_pool, &item_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

/// Stock count: physical quantity is set to the counted figure.
pub async fn adjust_inventory(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<AdjustInventoryRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let item_id = path.into_inner();
    request.validate()?;
    validate_quantity(request.quantity)?;

    let mut tx = app_state.db_pool.begin().await?;

    let item: InventoryItem = sqlx::query_as("SELECT * FROM inventory_main WHERE id = ?")
        .bind(&item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Inventory item"))?;

    let reference = format!("ADJ-{}", Utc::now().format("%Y%m%d%H%M%S"));
    let movement = Movement {
        reference_type: ReferenceType::Adjustment,
        reference_no: &reference,
        remarks: request.remarks.as_deref(),
        user_id: &user_id,
    };
    let counted = request.quantity;
    let after = inventory::apply_to(&mut *tx, &item, &movement, |s| s.adjust(counted)).await?;

    tx.commit().await?;

    log::info!(
        "Stock count {} @ {}: {} -> {} by {}",
        item.item_code, item.warehouse, item.quantity, after.quantity, user_id
    );

    let item = find_item(&app_state.db_pool, &item_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        item,
        "Inventory adjusted".to_string(),
    )))
}

pub async fn delete_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    let item_id = path.into_inner();
    let item = find_item(&app_state.db_pool, &item_id).await?;

    if item.quantity != 0.0 || item.quantity_on_hold != 0.0 {
        return Err(ApiError::Conflict(format!(
            "Inventory {} @ {} still carries stock (quantity {}, on hold {})",
            item.item_code, item.warehouse, item.quantity, item.quantity_on_hold
        )));
    }

    sqlx::query("DELETE FROM inventory_main WHERE id = ?")
        .bind(&item_id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("🗑️ Inventory {} @ {} deleted by user {}", item.item_code, item.warehouse, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message((), "Inventory item deleted successfully".to_string())))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub reference_type: Option<String>,
}

/// Movement log of one inventory row, newest first.
pub async fn get_inventory_history(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> ApiResult<HttpResponse> {
    let item = find_item(&app_state.db_pool, &path.into_inner()).await?;
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);
    let reference_type = query.reference_type.as_deref().map(str::to_uppercase);

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM inventory_tracker WHERE item_code = ? AND warehouse = ? AND (? IS NULL OR reference_type = ?)"
    )
        .bind(&item.item_code)
        .bind(&item.warehouse)
        .bind(&reference_type)
        .bind(&reference_type)
        .fetch_one(&app_state.db_pool)
        .await?;

    let entries: Vec<InventoryTrackerEntry> = sqlx::query_as(
        r#"SELECT * FROM inventory_tracker
           WHERE item_code = ? AND warehouse = ? AND (? IS NULL OR reference_type = ?)
           ORDER BY created_at DESC, rowid DESC
           LIMIT ? OFFSET ?"#
    )
        .bind(&item.item_code)
        .bind(&item.warehouse)
        .bind(&reference_type)
        .bind(&reference_type)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(entries, total, page, per_page))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;

    fn new_item(code: &str, warehouse: &str, qty: f64) -> CreateInventoryRequest {
        CreateInventoryRequest {
            item_code: code.to_string(),
            description: Some("Hex bolt M10".to_string()),
            warehouse: warehouse.to_string(),
            unit: None,
            quantity: qty,
            quantity_on_hold: None,
            unit_cost: Some(3.5),
            reorder_level: Some(10.0),
        }
    }

    async fn created_id(resp: HttpResponse) -> String {
        body_json(resp).await["data"]["id"].as_str().unwrap().to_string()
    }

    #[actix_rt::test]
    async fn test_create_derives_available_and_logs_opening() {
        let state = app_state().await;
        let resp = create_inventory_item(state.clone(), web::Json(new_item("bolt-10", "main", 40.0)), "u1".into())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["item_code"], "BOLT-10");
        assert_eq!(body["data"]["warehouse"], "MAIN");
        assert_eq!(body["data"]["available_quantity"], 40.0);
        assert_eq!(tracker_rows(&state.db_pool, "ADJ").await, 1);

        let err = create_inventory_item(state.clone(), web::Json(new_item("BOLT-10", "MAIN", 1.0)), "u1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn test_adjust_uses_save_path() {
        let state = app_state().await;
        seed_stock(&state.db_pool, "NUT", "MAIN", 20.0, 15.0).await;
        let id: String = sqlx::query_scalar("SELECT id FROM inventory_main WHERE item_code = 'NUT'")
            .fetch_one(&state.db_pool)
            .await
            .unwrap();

        let request = AdjustInventoryRequest { quantity: 12.0, remarks: Some("cycle count".to_string()) };
        adjust_inventory(state.clone(), web::Path::from(id.clone()), web::Json(request), "u1".into())
            .await
            .unwrap();

        // available re-derived without clamping
        assert_eq!(stock(&state.db_pool, "NUT", "MAIN").await, (12.0, 15.0, -3.0));

        let resp = get_inventory_history(
            state.clone(),
            web::Path::from(id),
            web::Query(HistoryQuery { page: None, per_page: None, reference_type: Some("adj".to_string()) }),
        )
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["data"][0]["quantity_change"], -8.0);
        assert_eq!(body["data"]["data"][0]["remarks"], "cycle count");
    }

    #[actix_rt::test]
    async fn test_delete_requires_empty_row() {
        let state = app_state().await;
        let resp = create_inventory_item(state.clone(), web::Json(new_item("WASHER", "MAIN", 5.0)), "u1".into())
            .await
            .unwrap();
        let id = created_id(resp).await;

        let err = delete_inventory_item(state.clone(), web::Path::from(id.clone()), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let request = AdjustInventoryRequest { quantity: 0.0, remarks: None };
        adjust_inventory(state.clone(), web::Path::from(id.clone()), web::Json(request), "u1".into()).await.unwrap();
        delete_inventory_item(state.clone(), web::Path::from(id), "u1".into()).await.unwrap();
    }

    #[actix_rt::test]
    async fn test_low_stock_filter() {
        let state = app_state().await;
        create_inventory_item(state.clone(), web::Json(new_item("A1", "MAIN", 5.0)), "u1".into()).await.unwrap();
        create_inventory_item(state.clone(), web::Json(new_item("A2", "MAIN", 50.0)), "u1".into()).await.unwrap();

        let query = InventoryQuery {
            page: None,
            per_page: None,
            search: None,
            warehouse: Some("main".to_string()),
            low_stock: Some(true),
            sort_by: None,
            sort_order: None,
        };
        let body = body_json(get_inventory(state.clone(), web::Query(query)).await.unwrap()).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["data"][0]["item_code"], "A1");
    }
}
