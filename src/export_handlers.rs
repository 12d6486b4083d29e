// src/export_handlers.rs
//! CSV downloads of stock and sales orders.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use chrono::NaiveDate;
use crate::AppState;
use crate::models::*;
use crate::error::{ApiError, ApiResult};
use crate::validator::normalize_code;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub search: Option<String>,
    pub warehouse: Option<String>,
    pub status: Option<String>,
}

fn csv_error(e: csv::Error) -> ApiError {
    ApiError::InternalServerError(e.to_string())
}

fn csv_response(filename: &str, data: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("Content-Disposition", format!("attachment; filename=\"{}\"", filename)))
        .body(data)
}

fn fmt_qty(value: f64) -> String {
    format!("{}", value)
}

pub async fn export_inventory(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ExportQuery>,
) -> ApiResult<HttpResponse> {
    let warehouse = query.warehouse.as_deref().map(normalize_code);
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));

    let items: Vec<InventoryItem> = sqlx::query_as(
        r#"SELECT * FROM inventory_main
           WHERE (? IS NULL OR warehouse = ?)
             AND (? IS NULL OR item_code LIKE ? OR description LIKE ?)
           ORDER BY item_code, warehouse"#
    )
        .bind(&warehouse)
        .bind(&warehouse)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .fetch_all(&app_state.db_pool)
        .await?;

    let mut csv_data = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut csv_data);

        writer.write_record(&[
            "Item Code", "Description", "Warehouse", "Unit", "Quantity",
            "On Hold", "Available", "Unit Cost", "Reorder Level",
        ]).map_err(csv_error)?;

        for item in items {
            writer.write_record(&[
                item.item_code,
                item.description.unwrap_or_default(),
                item.warehouse,
                item.unit,
                fmt_qty(item.quantity),
                fmt_qty(item.quantity_on_hold),
                fmt_qty(item.available_quantity),
                format!("{:.2}", item.unit_cost),
                fmt_qty(item.reorder_level),
            ]).map_err(csv_error)?;
        }

        writer.flush().map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    }

    Ok(csv_response("inventory.csv", csv_data))
}

#[derive(Debug, sqlx::FromRow)]
struct SalesOrderLineRow {
    so_number: String,
    customer_code: String,
    order_date: NaiveDate,
    status: String,
    item_code: String,
    warehouse: String,
    quantity: f64,
    delivered_quantity: f64,
    unit_price: f64,
    amount: f64,
}

/// One row per order line.
pub async fn export_sales_orders(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ExportQuery>,
) -> ApiResult<HttpResponse> {
    let status = query.status.as_deref().map(str::to_uppercase);
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));

    let rows: Vec<SalesOrderLineRow> = sqlx::query_as(
        r#"SELECT so.so_number, so.customer_code, so.order_date, so.status,
                  i.item_code, i.warehouse, i.quantity, i.delivered_quantity, i.unit_price, i.amount
           FROM sales_orders so
           JOIN sales_order_items i ON i.sales_order_id = so.id
           WHERE (? IS NULL OR so.status = ?)
             AND (? IS NULL OR so.so_number LIKE ? OR so.customer_code LIKE ?)
           ORDER BY so.so_number, i.rowid"#
    )
        .bind(&status)
        .bind(&status)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .fetch_all(&app_state.db_pool)
        .await?;

    let mut csv_data = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut csv_data);

        writer.write_record(&[
            "SO Number", "Customer", "Order Date", "Status", "Item Code", "Warehouse",
            "Quantity", "Delivered", "Unit Price", "Amount",
        ]).map_err(csv_error)?;

        for row in rows {
            writer.write_record(&[
                row.so_number,
                row.customer_code,
                row.order_date.format("%Y-%m-%d").to_string(),
                row.status,
                row.item_code,
                row.warehouse,
                fmt_qty(row.quantity),
                fmt_qty(row.delivered_quantity),
                format!("{:.2}", row.unit_price),
                format!("{:.2}", row.amount),
            ]).map_err(csv_error)?;
        }

        writer.flush().map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    }

    Ok(csv_response("sales_orders.csv", csv_data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;
    use crate::sales_order_handlers::test_support::{create_order, so_line};

    async fn body_text(resp: HttpResponse) -> String {
        let bytes = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn no_filter() -> web::Query<ExportQuery> {
        web::Query(ExportQuery { search: None, warehouse: None, status: None })
    }

    #[actix_rt::test]
    async fn test_inventory_csv() {
        let state = app_state().await;
        let pool = &state.db_pool;
        seed_stock(pool, "BOLT", "MAIN", 10.0, 2.0).await;
        seed_stock(pool, "BOLT", "NORTH", 3.0, 0.0).await;

        let resp = export_inventory(state.clone(), no_filter()).await.unwrap();
        assert_eq!(
            resp.headers().get("Content-Disposition").unwrap(),
            "attachment; filename=\"inventory.csv\""
        );
        let text = body_text(resp).await;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Item Code,Description,Warehouse"));
        assert_eq!(lines[1], "BOLT,,MAIN,PCS,10,2,8,2.50,0");

        let filtered = web::Query(ExportQuery { search: None, warehouse: Some("north".to_string()), status: None });
        let text = body_text(export_inventory(state.clone(), filtered).await.unwrap()).await;
        assert_eq!(text.lines().count(), 2);
    }

    #[actix_rt::test]
    async fn test_sales_order_csv_has_a_row_per_line() {
        let state = app_state().await;
        let pool = &state.db_pool;
        let customer = seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 100.0, 0.0).await;
        seed_stock(pool, "NUT", "MAIN", 100.0, 0.0).await;
        create_order(&state, &customer, vec![so_line("BOLT", "MAIN", 3.0), so_line("NUT", "MAIN", 2.0)]).await;

        let text = body_text(export_sales_orders(state.clone(), no_filter()).await.unwrap()).await;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("SO-000001,ACME,"));
        assert!(lines[1].ends_with(",PENDING,BOLT,MAIN,3,0,10.00,30.00"));

        let completed = web::Query(ExportQuery { search: None, warehouse: None, status: Some("completed".to_string()) });
        let text = body_text(export_sales_orders(state.clone(), completed).await.unwrap()).await;
        assert_eq!(text.lines().count(), 1);
    }
}
