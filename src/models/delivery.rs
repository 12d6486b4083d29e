// src/models/delivery.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Prepared,
    Delivered,
    Completed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Prepared, Delivered) | (Prepared, Cancelled) | (Delivered, Completed)
        )
    }

    /// Only documents that never moved stock can be removed.
    pub fn is_deletable(&self) -> bool {
        matches!(self, DeliveryStatus::Prepared | DeliveryStatus::Cancelled)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Delivery {
    pub id: String,
    pub dr_no: String,
    pub sales_order_id: String,
    pub so_number: String,
    pub customer_id: String,
    pub delivery_date: NaiveDate,
    pub driver: Option<String>,
    pub plate_no: Option<String>,
    pub remarks: Option<String>,
    pub status: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct DeliveryItem {
    pub id: String,
    pub delivery_id: String,
    pub sales_order_item_id: String,
    pub item_code: String,
    pub warehouse: String,
    pub quantity: f64,
}

#[derive(Debug, Serialize)]
pub struct DeliveryWithItems {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub items: Vec<DeliveryItem>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct DeliveryLineRequest {
    #[validate(length(min = 1, message = "Sales order line is required"))]
    pub sales_order_item_id: String,
    #[validate(range(min = 0.001, message = "Quantity must be positive"))]
    pub quantity: f64,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateDeliveryRequest {
    #[validate(length(min = 1, message = "Sales order is required"))]
    pub sales_order_id: String,
    pub delivery_date: Option<NaiveDate>,
    #[validate(length(max = 100, message = "Driver cannot exceed 100 characters"))]
    pub driver: Option<String>,
    #[validate(length(max = 20, message = "Plate number cannot exceed 20 characters"))]
    pub plate_no: Option<String>,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<DeliveryLineRequest>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateDeliveryStatusRequest {
    pub status: DeliveryStatus,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub sales_order_id: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryStatus::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(Prepared.can_transition_to(Delivered));
        assert!(Prepared.can_transition_to(Cancelled));
        assert!(Delivered.can_transition_to(Completed));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Prepared.can_transition_to(Prepared));
        assert!(!Prepared.can_transition_to(Completed));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Prepared));
        assert!(!Completed.can_transition_to(Delivered));
        assert!(!Cancelled.can_transition_to(Prepared));
    }

    #[test]
    fn test_deletable() {
        assert!(Prepared.is_deletable());
        assert!(Cancelled.is_deletable());
        assert!(!Delivered.is_deletable());
        assert!(!Completed.is_deletable());
    }
}
