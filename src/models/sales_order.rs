// src/models/sales_order.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesOrderStatus {
    Pending,
    Partial,
    Completed,
    Cancelled,
}

impl SalesOrderStatus {
    /// Lines and header can still change, and reservations are still live.
    pub fn is_open(&self) -> bool {
        matches!(self, SalesOrderStatus::Pending | SalesOrderStatus::Partial)
    }

    /// Status implied by how much of each line has been delivered.
    /// Input pairs are (ordered, delivered).
    pub fn from_delivered(lines: &[(f64, f64)]) -> Self {
        let delivered_any = lines.iter().any(|(_, delivered)| *delivered > 0.0);
        let delivered_all = !lines.is_empty()
            && lines.iter().all(|(ordered, delivered)| delivered >= ordered);

        if delivered_all {
            SalesOrderStatus::Completed
        } else if delivered_any {
            SalesOrderStatus::Partial
        } else {
            SalesOrderStatus::Pending
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct SalesOrder {
    pub id: String,
    pub so_number: String,
    pub customer_id: String,
    pub customer_code: String,
    pub order_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub status: String,
    pub total_amount: f64,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct SalesOrderItem {
    pub id: String,
    pub sales_order_id: String,
    pub item_code: String,
    pub description: Option<String>,
    pub warehouse: String,
    pub quantity: f64,
    pub delivered_quantity: f64,
    pub unit_price: f64,
    pub amount: f64,
}

impl SalesOrderItem {
    /// Quantity still reserved against this line.
    pub fn remaining(&self) -> f64 {
        (self.quantity - self.delivered_quantity).max(0.0)
    }
}

#[derive(Debug, Serialize)]
pub struct SalesOrderWithItems {
    #[serde(flatten)]
    pub order: SalesOrder,
    pub items: Vec<SalesOrderItem>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct SalesOrderLineRequest {
    #[validate(length(min = 1, max = 50, message = "Item code must be between 1 and 50 characters"))]
    pub item_code: String,
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Warehouse must be between 1 and 50 characters"))]
    pub warehouse: String,
    #[validate(range(min = 0.001, message = "Quantity must be positive"))]
    pub quantity: f64,
    #[validate(range(min = 0.0, message = "Unit price must be non-negative"))]
    pub unit_price: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateSalesOrderRequest {
    #[validate(length(min = 1, message = "Customer is required"))]
    pub customer_id: String,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<SalesOrderLineRequest>,
}

/// `items`, when present, replaces every line of the order.
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateSalesOrderRequest {
    pub delivery_date: Option<NaiveDate>,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Option<Vec<SalesOrderLineRequest>>,
}

#[derive(Debug, Deserialize)]
pub struct SalesOrderQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub customer_id: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trips_through_text() {
        assert_eq!(SalesOrderStatus::from_str("PARTIAL").unwrap(), SalesOrderStatus::Partial);
        assert_eq!(SalesOrderStatus::Cancelled.to_string(), "CANCELLED");
        assert!(SalesOrderStatus::from_str("partial").is_err());
    }

    #[test]
    fn test_status_from_delivered() {
        assert_eq!(SalesOrderStatus::from_delivered(&[(10.0, 0.0), (5.0, 0.0)]), SalesOrderStatus::Pending);
        assert_eq!(SalesOrderStatus::from_delivered(&[(10.0, 4.0), (5.0, 0.0)]), SalesOrderStatus::Partial);
        assert_eq!(SalesOrderStatus::from_delivered(&[(10.0, 10.0), (5.0, 5.0)]), SalesOrderStatus::Completed);
        assert_eq!(SalesOrderStatus::from_delivered(&[]), SalesOrderStatus::Pending);
    }

    #[test]
    fn test_only_pending_and_partial_are_open() {
        assert!(SalesOrderStatus::Pending.is_open());
        assert!(SalesOrderStatus::Partial.is_open());
        assert!(!SalesOrderStatus::Completed.is_open());
        assert!(!SalesOrderStatus::Cancelled.is_open());
    }

    fn line(quantity: f64) -> SalesOrderLineRequest {
        SalesOrderLineRequest {
            item_code: "BOLT".to_string(),
            description: None,
            warehouse: "MAIN".to_string(),
            quantity,
            unit_price: Some(10.0),
        }
    }

    #[test]
    fn test_create_request_validates_lines() {
        let mut request = CreateSalesOrderRequest {
            customer_id: "c1".to_string(),
            order_date: None,
            delivery_date: None,
            remarks: None,
            items: vec![line(5.0)],
        };
        assert!(request.validate().is_ok());

        request.items = vec![line(0.0)];
        assert!(request.validate().is_err());

        request.items.clear();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("items"));
    }
}
