// src/models/mod.rs

pub mod accounting;
pub mod customer;
pub mod delivery;
pub mod inventory;
pub mod purchase_order;
pub mod sales_order;
pub mod transfer_request;

pub use accounting::*;
pub use customer::*;
pub use delivery::*;
pub use inventory::*;
pub use purchase_order::*;
pub use sales_order::*;
pub use transfer_request::*;

use serde::Serialize;

// ==================== COMMON / SHARED ====================

/// Figures for the dashboard landing page
#[derive(Debug, Serialize, Default)]
pub struct DashboardStats {
    pub total_customers: i64,
    pub open_sales_orders: i64,
    pub prepared_deliveries: i64,
    pub pending_transfers: i64,
    pub pending_purchase_orders: i64,
    pub low_stock_items: i64,
    pub receivable_balance: f64,
    pub payable_balance: f64,
}
