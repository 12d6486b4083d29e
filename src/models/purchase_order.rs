// src/models/purchase_order.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Pending,
    Approved,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn is_deletable(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Pending | PurchaseOrderStatus::Cancelled)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PurchaseOrder {
    pub id: String,
    pub po_number: String,
    pub supplier_name: String,
    pub order_date: NaiveDate,
    pub expected_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub status: String,
    pub total_amount: f64,
    pub created_by: Option<String>,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PurchaseOrderItem {
    pub id: String,
    pub purchase_order_id: String,
    pub item_code: String,
    pub description: Option<String>,
    pub warehouse: String,
    pub quantity: f64,
    pub received_quantity: f64,
    pub unit_cost: f64,
    pub amount: f64,
}

impl PurchaseOrderItem {
    pub fn outstanding(&self) -> f64 {
        (self.quantity - self.received_quantity).max(0.0)
    }
}

#[derive(Debug, Serialize)]
pub struct PurchaseOrderWithItems {
    #[serde(flatten)]
    pub order: PurchaseOrder,
    pub items: Vec<PurchaseOrderItem>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct PurchaseOrderLineRequest {
    #[validate(length(min = 1, max = 50, message = "Item code must be between 1 and 50 characters"))]
    pub item_code: String,
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Warehouse must be between 1 and 50 characters"))]
    pub warehouse: String,
    #[validate(range(min = 0.001, message = "Quantity must be positive"))]
    pub quantity: f64,
    #[validate(range(min = 0.0, message = "Unit cost must be non-negative"))]
    pub unit_cost: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreatePurchaseOrderRequest {
    #[validate(length(min = 1, max = 255, message = "Supplier must be between 1 and 255 characters"))]
    pub supplier_name: String,
    pub order_date: Option<NaiveDate>,
    pub expected_date: Option<NaiveDate>,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<PurchaseOrderLineRequest>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdatePurchaseOrderRequest {
    #[validate(length(min = 1, max = 255, message = "Supplier must be between 1 and 255 characters"))]
    pub supplier_name: Option<String>,
    pub expected_date: Option<NaiveDate>,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Option<Vec<PurchaseOrderLineRequest>>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ReceiveLineRequest {
    #[validate(length(min = 1, message = "Purchase order line is required"))]
    pub purchase_order_item_id: String,
    #[validate(range(min = 0.001, message = "Quantity must be positive"))]
    pub quantity: f64,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct ReceivePurchaseOrderRequest {
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<ReceiveLineRequest>,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseOrderQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}
