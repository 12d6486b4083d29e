// src/monitoring.rs
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use tokio::time::{interval, sleep, Duration};

use crate::AppState;
use crate::auth::{require_permission, Action, Resource};
use crate::config::BusinessConfig;
use crate::error::ApiResult;
use crate::models::InventoryItem;

#[derive(Debug, Clone)]
pub struct Metrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub response_times: Arc<std::sync::Mutex<Vec<u64>>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            response_times: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Keeps the last 1000 samples.
    pub fn record_response_time(&self, time_ms: u64) {
        if let Ok(mut times) = self.response_times.lock() {
            times.push(time_ms);
            if times.len() > 1000 {
                times.remove(0);
            }
        }
    }

    pub fn average_response_time(&self) -> f64 {
        match self.response_times.lock() {
            Ok(times) if !times.is_empty() => times.iter().sum::<u64>() as f64 / times.len() as f64,
            _ => 0.0,
        }
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_response_time_ms: f64,
    pub database_connections: u32,
    pub idle_connections: usize,
}

pub async fn metrics_endpoint(
    metrics: web::Data<Arc<Metrics>>,
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, Resource::AuditLog, Action::View)?;

    let response = MetricsResponse {
        requests_total: metrics.request_count.load(Ordering::Relaxed),
        errors_total: metrics.error_count.load(Ordering::Relaxed),
        avg_response_time_ms: metrics.average_response_time(),
        database_connections: app_state.db_pool.size(),
        idle_connections: app_state.db_pool.num_idle(),
    };

    Ok(HttpResponse::Ok().json(response))
}

pub struct RequestLogger {
    metrics: Arc<Metrics>,
}

impl RequestLogger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> actix_web::dev::Transform<S, actix_web::dev::ServiceRequest> for RequestLogger
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggerMiddleware {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    metrics: Arc<Metrics>,
}

impl<S, B> actix_web::dev::Service<actix_web::dev::ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: actix_web::dev::ServiceRequest) -> Self::Future {
        let start_time = std::time::Instant::now();
        let metrics = self.metrics.clone();
        let method = req.method().clone();
        let path = req.path().to_string();
        let fut = self.service.call(req);

        Box::pin(async move {
            metrics.increment_requests();
            let res = fut.await;
            let elapsed = start_time.elapsed().as_millis() as u64;
            metrics.record_response_time(elapsed);

            if let Ok(ref response) = res {
                let status = response.status();
                if status.is_client_error() || status.is_server_error() {
                    metrics.increment_errors();
                }
                if status.is_server_error() {
                    log::warn!("{} {} -> {} in {}ms", method, path, status.as_u16(), elapsed);
                }
            }
            res
        })
    }
}

// ==================== BACKGROUND TASKS ====================

pub async fn start_maintenance_tasks(pool: SqlitePool, business: BusinessConfig) {
    let pool_clone1 = pool.clone();
    let pool_clone2 = pool.clone();
    let retention_days = business.audit_retention_days;
    let scan_minutes = business.low_stock_scan_minutes.max(1);

    tokio::spawn(async move {
        cleanup_old_audit_logs(pool_clone1, retention_days).await;
    });

    tokio::spawn(async move {
        watch_low_stock(pool_clone2, scan_minutes).await;
    });
}

/// Delete audit entries older than `retention_days`, 1000 rows at a time.
pub async fn purge_audit_logs(pool: &SqlitePool, retention_days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);
    let mut total_deleted = 0;

    loop {
        let res = sqlx::query(
            "DELETE FROM audit_logs
             WHERE id IN (
                 SELECT id FROM audit_logs
                 WHERE created_at < ?
                 LIMIT 1000
             )"
        )
            .bind(cutoff)
            .execute(pool)
            .await?;

        let count = res.rows_affected();
        total_deleted += count;
        if count < 1000 {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    Ok(total_deleted)
}

async fn cleanup_old_audit_logs(pool: SqlitePool, retention_days: i64) {
    let mut interval = interval(Duration::from_secs(24 * 3600));

    loop {
        interval.tick().await;
        log::info!("Starting daily cleanup of audit logs (retention {} days)...", retention_days);

        match purge_audit_logs(&pool, retention_days).await {
            Ok(0) => {}
            Ok(n) => log::info!("Cleaned up {} old audit log entries", n),
            Err(e) => log::error!("Failed to cleanup audit logs: {}", e),
        }
    }
}

/// Rows whose available quantity has dropped to the reorder level.
pub async fn find_low_stock(pool: &SqlitePool) -> Result<Vec<InventoryItem>, sqlx::Error> {
    sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_main WHERE reorder_level > 0 AND available_quantity <= reorder_level \
         ORDER BY item_code, warehouse"
    )
        .fetch_all(pool)
        .await
}

async fn watch_low_stock(pool: SqlitePool, every_minutes: u64) {
    let mut interval = interval(Duration::from_secs(every_minutes * 60));

    loop {
        interval.tick().await;

        match find_low_stock(&pool).await {
            Ok(items) if items.is_empty() => log::debug!("Low-stock scan: nothing below reorder level"),
            Ok(items) => {
                for item in &items {
                    log::warn!(
                        "Low stock: {} @ {} available {} (reorder level {})",
                        item.item_code, item.warehouse, item.available_quantity, item.reorder_level
                    );
                }
                log::info!("Low-stock scan flagged {} row(s)", items.len());
            }
            Err(e) => log::error!("Low-stock scan failed: {}", e),
        }
    }
}
