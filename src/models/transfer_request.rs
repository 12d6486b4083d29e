// src/models/transfer_request.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct TransferRequest {
    pub id: String,
    pub request_no: String,
    pub from_warehouse: String,
    pub to_warehouse: String,
    pub remarks: Option<String>,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub requested_by: Option<String>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct TransferRequestItem {
    pub id: String,
    pub transfer_request_id: String,
    pub item_code: String,
    pub quantity: f64,
}

#[derive(Debug, Serialize)]
pub struct TransferRequestWithItems {
    #[serde(flatten)]
    pub request: TransferRequest,
    pub items: Vec<TransferRequestItem>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TransferLineRequest {
    #[validate(length(min = 1, max = 50, message = "Item code must be between 1 and 50 characters"))]
    pub item_code: String,
    #[validate(range(min = 0.001, message = "Quantity must be positive"))]
    pub quantity: f64,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateTransferRequest {
    #[validate(length(min = 1, max = 50, message = "Source warehouse must be between 1 and 50 characters"))]
    pub from_warehouse: String,
    #[validate(length(min = 1, max = 50, message = "Destination warehouse must be between 1 and 50 characters"))]
    pub to_warehouse: String,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<TransferLineRequest>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct RejectTransferRequest {
    #[validate(length(max = 1000, message = "Reason cannot exceed 1000 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub warehouse: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}
