// src/models/inventory.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};

use crate::inventory::StockLevels;

// ==================== INVENTORY MAIN ====================

/// One stock row per (item code, warehouse).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct InventoryItem {
    pub id: String,
    pub item_code: String,
    pub description: Option<String>,
    pub warehouse: String,
    pub unit: String,
    pub quantity: f64,
    pub quantity_on_hold: f64,
    pub available_quantity: f64,
    pub unit_cost: f64,
    pub reorder_level: f64,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn levels(&self) -> StockLevels {
        StockLevels {
            quantity: self.quantity,
            quantity_on_hold: self.quantity_on_hold,
            available_quantity: self.available_quantity,
        }
    }
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateInventoryRequest {
    #[validate(length(min = 1, max = 50, message = "Item code must be between 1 and 50 characters"))]
    pub item_code: String,
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Warehouse must be between 1 and 50 characters"))]
    pub warehouse: String,
    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: Option<String>,
    #[validate(range(min = 0.0, message = "Quantity must be non-negative"))]
    pub quantity: f64,
    #[validate(range(min = 0.0, message = "Quantity on hold must be non-negative"))]
    pub quantity_on_hold: Option<f64>,
    #[validate(range(min = 0.0, message = "Unit cost must be non-negative"))]
    pub unit_cost: Option<f64>,
    #[validate(range(min = 0.0, message = "Reorder level must be non-negative"))]
    pub reorder_level: Option<f64>,
}

/// Header fields only; stock figures move through adjustments and documents.
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateInventoryRequest {
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: Option<String>,
    #[validate(range(min = 0.0, message = "Unit cost must be non-negative"))]
    pub unit_cost: Option<f64>,
    #[validate(range(min = 0.0, message = "Reorder level must be non-negative"))]
    pub reorder_level: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct AdjustInventoryRequest {
    #[validate(range(min = 0.0, message = "Counted quantity must be non-negative"))]
    pub quantity: f64,
    #[validate(length(max = 500, message = "Remarks cannot exceed 500 characters"))]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InventoryQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub warehouse: Option<String>,
    pub low_stock: Option<bool>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

// ==================== TRACKER ====================

/// Kind of document that moved stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
pub enum ReferenceType {
    #[strum(serialize = "SO")]
    #[serde(rename = "SO")]
    SalesOrder,
    #[strum(serialize = "DR")]
    #[serde(rename = "DR")]
    Delivery,
    #[strum(serialize = "TR")]
    #[serde(rename = "TR")]
    TransferRequest,
    #[strum(serialize = "PO")]
    #[serde(rename = "PO")]
    PurchaseOrder,
    #[strum(serialize = "ADJ")]
    #[serde(rename = "ADJ")]
    Adjustment,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct InventoryTrackerEntry {
    pub id: String,
    pub item_code: String,
    pub warehouse: String,
    pub reference_type: String,
    pub reference_no: String,
    pub quantity_change: f64,
    pub on_hold_change: f64,
    pub available_change: f64,
    pub quantity_after: f64,
    pub on_hold_after: f64,
    pub available_after: f64,
    pub remarks: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}
