// src/handlers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use crate::AppState;
use crate::auth::{require_permission, Action, Resource};
use crate::models::DashboardStats;
use crate::error::ApiResult;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        Self {
            data,
            total,
            page,
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        }
    }
}

/// (page, per_page, offset) with page >= 1 and per_page in 1..=100.
pub fn normalize_page(page: Option<i64>, per_page: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1).saturating_mul(per_page);
    (page, per_page, offset)
}

/// Run a builder-produced SELECT/COUNT pair and wrap the page.
pub async fn fetch_page<T>(
    pool: &sqlx::SqlitePool,
    builder: &crate::query_builder::SafeQueryBuilder<'_>,
    page: i64,
    per_page: i64,
) -> ApiResult<PaginatedResponse<T>>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin,
{
    let (count_sql, count_params) = builder.build_count();
    let (select_sql, select_params) = builder.build();

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &count_params {
        count_query = count_query.bind(p);
    }
    let total: i64 = count_query.fetch_one(pool).await?;

    let mut select_query = sqlx::query_as::<_, T>(&select_sql);
    for p in &select_params {
        select_query = select_query.bind(p);
    }
    let rows: Vec<T> = select_query.fetch_all(pool).await?;

    Ok(PaginatedResponse::new(rows, total, page, per_page))
}

// ==================== HEALTH ====================

pub async fn health_check(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&app_state.db_pool).await.is_ok();

    let body = serde_json::json!({
        "status": if db_ok { "healthy" } else { "degraded" },
        "database": db_ok,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    });

    if db_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

// ==================== DASHBOARD ====================

pub async fn load_dashboard_stats(pool: &sqlx::SqlitePool) -> ApiResult<DashboardStats> {
    let count = |sql: &'static str| async move {
        sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await
    };

    let receivable_balance: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(balance), 0.0) FROM accounts_receivable WHERE status IN ('OPEN', 'PARTIAL')"
    )
        .fetch_one(pool)
        .await?;

    let payable_balance: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(balance), 0.0) FROM accounts_payable WHERE status IN ('OPEN', 'PARTIAL')"
    )
        .fetch_one(pool)
        .await?;

    Ok(DashboardStats {
        total_customers: count("SELECT COUNT(*) FROM customers WHERE status = 'ACTIVE'").await?,
        open_sales_orders: count("SELECT COUNT(*) FROM sales_orders WHERE status IN ('PENDING', 'PARTIAL')").await?,
        prepared_deliveries: count("SELECT COUNT(*) FROM deliveries WHERE status = 'PREPARED'").await?,
        pending_transfers: count("SELECT COUNT(*) FROM transfer_requests WHERE status = 'PENDING'").await?,
        pending_purchase_orders: count("SELECT COUNT(*) FROM purchase_orders WHERE status IN ('PENDING', 'APPROVED')").await?,
        low_stock_items: count("SELECT COUNT(*) FROM inventory_main WHERE available_quantity <= reorder_level").await?,
        receivable_balance,
        payable_balance,
    })
}

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, Resource::Inventory, Action::View)?;
    let stats = load_dashboard_stats(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ActivityEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub description: Option<String>,
    pub changes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
    pub entity_type: Option<String>,
}

pub async fn get_recent_activity(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ActivityQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, Resource::AuditLog, Action::View)?;
    let limit = query.limit.unwrap_or(20).clamp(1, 200);

    let entries: Vec<ActivityEntry> = sqlx::query_as(
        r#"SELECT a.id, a.user_id, u.username, a.action, a.entity_type, a.entity_id,
                  a.description, a.changes, a.created_at
           FROM audit_logs a
           LEFT JOIN users u ON u.id = a.user_id
           WHERE (? IS NULL OR a.entity_type = ?)
           ORDER BY a.created_at DESC
           LIMIT ?"#
    )
        .bind(&query.entity_type)
        .bind(&query.entity_type)
        .bind(limit)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(entries)))
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::config::Config;
    use crate::db::test_support::memory_pool;
    use uuid::Uuid;

    pub async fn app_state() -> web::Data<Arc<AppState>> {
        let pool = memory_pool().await;
        web::Data::new(Arc::new(AppState {
            db_pool: pool,
            config: Config::default(),
        }))
    }

    pub async fn seed_customer(pool: &sqlx::SqlitePool, code: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO customers (id, customer_code, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)"
        )
            .bind(&id)
            .bind(code)
            .bind(format!("{} Trading", code))
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    /// Stock row with available derived from quantity and on-hold.
    pub async fn seed_stock(pool: &sqlx::SqlitePool, item_code: &str, warehouse: &str, quantity: f64, on_hold: f64) {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO inventory_main (
                id, item_code, warehouse, quantity, quantity_on_hold, available_quantity,
                unit_cost, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 2.5, ?, ?)"#
        )
            .bind(Uuid::new_v4().to_string())
            .bind(item_code)
            .bind(warehouse)
            .bind(quantity)
            .bind(on_hold)
            .bind(quantity - on_hold)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .unwrap();
    }

    /// (quantity, on_hold, available) of a stock row.
    pub async fn stock(pool: &sqlx::SqlitePool, item_code: &str, warehouse: &str) -> (f64, f64, f64) {
        sqlx::query_as(
            "SELECT quantity, quantity_on_hold, available_quantity FROM inventory_main WHERE item_code = ? AND warehouse = ?"
        )
            .bind(item_code)
            .bind(warehouse)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    pub async fn tracker_rows(pool: &sqlx::SqlitePool, reference_type: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM inventory_tracker WHERE reference_type = ?")
            .bind(reference_type)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    pub async fn body_json(resp: HttpResponse) -> serde_json::Value {
        let bytes = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::*;

    #[test]
    fn test_normalize_page() {
        assert_eq!(normalize_page(None, None), (1, 20, 0));
        assert_eq!(normalize_page(Some(3), Some(10)), (3, 10, 20));
        assert_eq!(normalize_page(Some(0), Some(1000)), (1, 100, 0));
        assert_eq!(normalize_page(Some(-4), Some(0)), (1, 1, 0));
        assert_eq!(normalize_page(Some(i64::MAX), Some(50)), (i64::MAX, 50, i64::MAX));
    }

    #[test]
    fn test_total_pages() {
        let page: PaginatedResponse<i32> = PaginatedResponse::new(vec![], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty: PaginatedResponse<i32> = PaginatedResponse::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[actix_rt::test]
    async fn test_dashboard_counts() {
        let state = app_state().await;
        let pool = &state.db_pool;
        seed_customer(pool, "ACME").await;
        seed_stock(pool, "BOLT", "MAIN", 5.0, 0.0).await;

        let stats = load_dashboard_stats(pool).await.unwrap();
        assert_eq!(stats.total_customers, 1);
        // reorder level defaults to 0, so only empty rows count as low
        assert_eq!(stats.low_stock_items, 0);
        assert_eq!(stats.open_sales_orders, 0);
        assert_eq!(stats.receivable_balance, 0.0);
    }
}
