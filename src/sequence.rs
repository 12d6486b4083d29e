// src/sequence.rs
//! Human-readable document numbers (SO-000042, DR-000007, ...).
//!
//! The next number is the latest stored number plus one. Two requests
//! racing for the same number collide on the column's UNIQUE constraint and
//! the loser gets 409.

use sqlx::SqliteConnection;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    SalesOrder,
    Delivery,
    TransferRequest,
    PurchaseOrder,
    Payable,
    Receivable,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::SalesOrder => "SO",
            DocumentKind::Delivery => "DR",
            DocumentKind::TransferRequest => "TR",
            DocumentKind::PurchaseOrder => "PO",
            DocumentKind::Payable => "APV",
            DocumentKind::Receivable => "ARV",
        }
    }

    fn table_and_column(&self) -> (&'static str, &'static str) {
        match self {
            DocumentKind::SalesOrder => ("sales_orders", "so_number"),
            DocumentKind::Delivery => ("deliveries", "dr_no"),
            DocumentKind::TransferRequest => ("transfer_requests", "request_no"),
            DocumentKind::PurchaseOrder => ("purchase_orders", "po_number"),
            DocumentKind::Payable => ("accounts_payable", "voucher_no"),
            DocumentKind::Receivable => ("accounts_receivable", "voucher_no"),
        }
    }
}

/// Increment the numeric suffix of `last`; start at 1 when there is none or
/// it does not parse.
pub fn next_number(prefix: &str, last: Option<&str>, width: usize) -> ApiResult<String> {
    let current = last
        .and_then(|l| l.strip_prefix(prefix))
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|digits| digits.parse::<u64>().ok())
        .unwrap_or(0);
    let next = current
        .checked_add(1)
        .ok_or_else(|| ApiError::Conflict(format!("Document numbers for {} are exhausted", prefix)))?;
    Ok(format!("{}-{:0width$}", prefix, next, width = width))
}

pub async fn next_document_number(
    conn: &mut SqliteConnection,
    kind: DocumentKind,
    width: usize,
) -> ApiResult<String> {
    let (table, column) = kind.table_and_column();
    let prefix = kind.prefix();
    // digits-only suffixes, longest first so SO-1000000 sorts above SO-999999
    let sql = format!(
        "SELECT {col} FROM {table} \
         WHERE {col} GLOB ? AND SUBSTR({col}, ?) NOT GLOB '*[^0-9]*' \
         ORDER BY LENGTH({col}) DESC, {col} DESC LIMIT 1",
        col = column,
        table = table
    );
    let last: Option<String> = sqlx::query_scalar(&sql)
        .bind(format!("{}-[0-9]*", prefix))
        .bind(prefix.len() as i64 + 2)
        .fetch_optional(&mut *conn)
        .await?;

    next_number(prefix, last.as_deref(), width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    #[test]
    fn test_first_number() {
        assert_eq!(next_number("SO", None, 6).unwrap(), "SO-000001");
        assert_eq!(next_number("APV", None, 4).unwrap(), "APV-0001");
    }

    #[test]
    fn test_increment() {
        assert_eq!(next_number("DR", Some("DR-000041"), 6).unwrap(), "DR-000042");
        assert_eq!(next_number("PO", Some("PO-999999"), 6).unwrap(), "PO-1000000");
    }

    #[test]
    fn test_garbage_restarts_at_one() {
        assert_eq!(next_number("TR", Some("TR-ABC"), 6).unwrap(), "TR-000001");
        assert_eq!(next_number("TR", Some("XX-000010"), 6).unwrap(), "TR-000001");
    }

    #[test]
    fn test_exhausted_suffix_is_conflict() {
        let last = format!("SO-{}", u64::MAX);
        let err = next_number("SO", Some(&last), 6).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn test_next_document_number_reads_latest() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let first = next_document_number(&mut conn, DocumentKind::TransferRequest, 6).await.unwrap();
        assert_eq!(first, "TR-000001");

        for no in ["TR-000009", "TR-000010", "TR-000002"] {
            sqlx::query(
                "INSERT INTO transfer_requests (id, request_no, from_warehouse, to_warehouse, created_at, updated_at) \
                 VALUES (?, ?, 'MAIN', 'NORTH', datetime('now'), datetime('now'))"
            )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(no)
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        let next = next_document_number(&mut conn, DocumentKind::TransferRequest, 6).await.unwrap();
        assert_eq!(next, "TR-000011");

        // hand-typed numbers that sort above the real ones are skipped
        for no in ["TR-000010-OLD", "TR-MANUAL-0001"] {
            sqlx::query(
                "INSERT INTO transfer_requests (id, request_no, from_warehouse, to_warehouse, created_at, updated_at) \
                 VALUES (?, ?, 'MAIN', 'NORTH', datetime('now'), datetime('now'))"
            )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(no)
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        let next = next_document_number(&mut conn, DocumentKind::TransferRequest, 6).await.unwrap();
        assert_eq!(next, "TR-000011");
    }
}
