// src/inventory.rs
//! Stock bookkeeping on `inventory_main`.
//!
//! Every row carries three figures: physical `quantity`, reserved
//! `quantity_on_hold` and `available_quantity`. Documents move them in
//! different ways:
//!
//! | document event                  | operation               |
//! |---------------------------------|-------------------------|
//! | sales order line qty change     | [`StockLevels::reserve_delta`] |
//! | delivery PREPARED -> DELIVERED  | [`StockLevels::deliver`]       |
//! | transfer request created        | [`StockLevels::hold`]          |
//! | transfer rejected / deleted     | [`StockLevels::release`]       |
//! | transfer approved               | [`StockLevels::transfer_out`] / [`StockLevels::transfer_in`] |
//! | purchase order received         | [`StockLevels::receive`]       |
//! | stock count                     | [`StockLevels::adjust`]        |
//!
//! The sales order path clamps on-hold and available at zero independently,
//! so `quantity == on_hold + available` is not guaranteed after it runs.
//! Receipts and counts go through the save path, which re-derives
//! `available = quantity - on_hold` without clamping.
//!
//! Callers run these helpers inside the request transaction; every change
//! appends an `inventory_tracker` row.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{InventoryItem, ReferenceType};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StockLevels {
    pub quantity: f64,
    pub quantity_on_hold: f64,
    pub available_quantity: f64,
}

impl StockLevels {
    pub fn new(quantity: f64, quantity_on_hold: f64) -> Self {
        let mut levels = Self {
            quantity,
            quantity_on_hold,
            available_quantity: 0.0,
        };
        levels.derive_available();
        levels
    }

    /// Save-path hook: available is whatever is not on hold, unclamped.
    pub fn derive_available(&mut self) {
        self.available_quantity = self.quantity - self.quantity_on_hold;
    }

    /// Sales order reservation change of `delta` (positive reserves more).
    pub fn reserve_delta(&mut self, delta: f64) {
        self.quantity_on_hold = (self.quantity_on_hold + delta).max(0.0);
        self.available_quantity = (self.available_quantity - delta).max(0.0);
    }

    /// Goods leave the warehouse against a reservation.
    pub fn deliver(&mut self, qty: f64) {
        self.quantity_on_hold = (self.quantity_on_hold - qty).max(0.0);
        self.quantity = (self.quantity - qty).max(0.0);
    }

    pub fn hold(&mut self, qty: f64) {
        self.available_quantity -= qty;
        self.quantity_on_hold += qty;
    }

    pub fn release(&mut self, qty: f64) {
        self.available_quantity += qty;
        self.quantity_on_hold -= qty;
    }

    /// Source side of an approved transfer: the held stock leaves.
    pub fn transfer_out(&mut self, qty: f64) {
        self.quantity -= qty;
        self.quantity_on_hold -= qty;
    }

    /// Destination side of an approved transfer.
    pub fn transfer_in(&mut self, qty: f64) {
        self.quantity += qty;
        self.available_quantity += qty;
    }

    pub fn receive(&mut self, qty: f64) {
        self.quantity += qty;
        self.derive_available();
    }

    pub fn adjust(&mut self, counted: f64) {
        self.quantity = counted;
        self.derive_available();
    }

    pub fn minus(&self, before: &StockLevels) -> StockLevels {
        StockLevels {
            quantity: self.quantity - before.quantity,
            quantity_on_hold: self.quantity_on_hold - before.quantity_on_hold,
            available_quantity: self.available_quantity - before.available_quantity,
        }
    }
}

/// Per-(item, warehouse) reservation changes between two versions of a
/// sales order's lines. Lines that only exist in `old` yield a negative
/// delta; zero deltas are dropped.
pub fn reservation_deltas(
    old: &[(String, String, f64)],
    new: &[(String, String, f64)],
) -> Vec<((String, String), f64)> {
    let mut deltas: BTreeMap<(String, String), f64> = BTreeMap::new();
    for (item_code, warehouse, qty) in old {
        *deltas.entry((item_code.clone(), warehouse.clone())).or_insert(0.0) -= qty;
    }
    for (item_code, warehouse, qty) in new {
        *deltas.entry((item_code.clone(), warehouse.clone())).or_insert(0.0) += qty;
    }
    deltas
        .into_iter()
        .filter(|(_, delta)| delta.abs() > f64::EPSILON)
        .collect()
}

/// Reference written to the tracker for each movement.
#[derive(Debug, Clone)]
pub struct Movement<'a> {
    pub reference_type: ReferenceType,
    pub reference_no: &'a str,
    pub remarks: Option<&'a str>,
    pub user_id: &'a str,
}

pub async fn find_stock_optional(
    conn: &mut SqliteConnection,
    item_code: &str,
    warehouse: &str,
) -> ApiResult<Option<InventoryItem>> {
    let item = sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_main WHERE item_code = ? AND warehouse = ?"
    )
        .bind(item_code)
        .bind(warehouse)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(item)
}

pub async fn find_stock(
    conn: &mut SqliteConnection,
    item_code: &str,
    warehouse: &str,
) -> ApiResult<InventoryItem> {
    find_stock_optional(conn, item_code, warehouse)
        .await?
        .ok_or_else(|| ApiError::inventory_not_found(item_code, warehouse))
}

async fn store_levels(
    conn: &mut SqliteConnection,
    item_id: &str,
    levels: &StockLevels,
    user_id: &str,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE inventory_main SET quantity = ?, quantity_on_hold = ?, available_quantity = ?, \
         updated_by = ?, updated_at = ? WHERE id = ?"
    )
        .bind(levels.quantity)
        .bind(levels.quantity_on_hold)
        .bind(levels.available_quantity)
        .bind(user_id)
        .bind(Utc::now())
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn record_movement(
    conn: &mut SqliteConnection,
    item: &InventoryItem,
    before: &StockLevels,
    after: &StockLevels,
    movement: &Movement<'_>,
) -> ApiResult<()> {
    let change = after.minus(before);
    sqlx::query(
        r#"INSERT INTO inventory_tracker (
            id, item_code, warehouse, reference_type, reference_no,
            quantity_change, on_hold_change, available_change,
            quantity_after, on_hold_after, available_after,
            remarks, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(Uuid::new_v4().to_string())
        .bind(&item.item_code)
        .bind(&item.warehouse)
        .bind(movement.reference_type.to_string())
        .bind(movement.reference_no)
        .bind(change.quantity)
        .bind(change.quantity_on_hold)
        .bind(change.available_quantity)
        .bind(after.quantity)
        .bind(after.quantity_on_hold)
        .bind(after.available_quantity)
        .bind(movement.remarks)
        .bind(movement.user_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Load the row, run `op` on its figures, write them back and log the move.
pub async fn apply<F>(
    conn: &mut SqliteConnection,
    item_code: &str,
    warehouse: &str,
    movement: &Movement<'_>,
    op: F,
) -> ApiResult<StockLevels>
where
    F: FnOnce(&mut StockLevels),
{
    let item = find_stock(conn, item_code, warehouse).await?;
    apply_to(conn, &item, movement, op).await
}

pub async fn apply_to<F>(
    conn: &mut SqliteConnection,
    item: &InventoryItem,
    movement: &Movement<'_>,
    op: F,
) -> ApiResult<StockLevels>
where
    F: FnOnce(&mut StockLevels),
{
    let before = item.levels();
    let mut after = before;
    op(&mut after);

    store_levels(conn, &item.id, &after, movement.user_id).await?;
    record_movement(conn, item, &before, &after, movement).await?;

    tracing::debug!(
        item_code = %item.item_code,
        warehouse = %item.warehouse,
        reference = %movement.reference_no,
        quantity = after.quantity,
        on_hold = after.quantity_on_hold,
        available = after.available_quantity,
        "stock moved"
    );

    Ok(after)
}

/// Like [`apply`], but creates an empty row first when the item has never
/// been stocked in `warehouse`. `template` supplies description, unit and cost.
pub async fn apply_or_create<F>(
    conn: &mut SqliteConnection,
    item_code: &str,
    warehouse: &str,
    template: Option<&InventoryItem>,
    movement: &Movement<'_>,
    op: F,
) -> ApiResult<StockLevels>
where
    F: FnOnce(&mut StockLevels),
{
    let item = match find_stock_optional(conn, item_code, warehouse).await? {
        Some(item) => item,
        None => create_empty_row(conn, item_code, warehouse, template, movement.user_id).await?,
    };
    apply_to(conn, &item, movement, op).await
}

async fn create_empty_row(
    conn: &mut SqliteConnection,
    item_code: &str,
    warehouse: &str,
    template: Option<&InventoryItem>,
    user_id: &str,
) -> ApiResult<InventoryItem> {
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();

    log::info!("Opening inventory row {} @ {}", item_code, warehouse);

    sqlx::query(
        r#"INSERT INTO inventory_main (
            id, item_code, description, warehouse, unit,
            quantity, quantity_on_hold, available_quantity, unit_cost, reorder_level,
            created_by, updated_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 0.0, 0.0, 0.0, ?, 0.0, ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(item_code)
        .bind(template.and_then(|t| t.description.clone()))
        .bind(warehouse)
        .bind(template.map(|t| t.unit.clone()).unwrap_or_else(|| "PCS".to_string()))
        .bind(template.map(|t| t.unit_cost).unwrap_or(0.0))
        .bind(user_id)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    let item = sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_main WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(quantity: f64, on_hold: f64, available: f64) -> StockLevels {
        StockLevels {
            quantity,
            quantity_on_hold: on_hold,
            available_quantity: available,
        }
    }

    #[test]
    fn test_reserve_increase_moves_delta_between_fields() {
        let mut stock = levels(100.0, 10.0, 90.0);
        stock.reserve_delta(25.0);
        assert_eq!(stock, levels(100.0, 35.0, 65.0));
    }

    #[test]
    fn test_reserve_clamps_each_field_independently() {
        // available would go to -20, on-hold is not capped by quantity
        let mut stock = levels(30.0, 0.0, 30.0);
        stock.reserve_delta(50.0);
        assert_eq!(stock.quantity_on_hold, 50.0);
        assert_eq!(stock.available_quantity, 0.0);
        assert_ne!(stock.quantity, stock.quantity_on_hold + stock.available_quantity);

        // releasing more than held floors on-hold at zero but still credits available
        let mut stock = levels(30.0, 5.0, 25.0);
        stock.reserve_delta(-10.0);
        assert_eq!(stock.quantity_on_hold, 0.0);
        assert_eq!(stock.available_quantity, 35.0);
    }

    #[test]
    fn test_deliver_leaves_available_untouched() {
        let mut stock = levels(100.0, 40.0, 60.0);
        stock.deliver(15.0);
        assert_eq!(stock, levels(85.0, 25.0, 60.0));

        let mut stock = levels(5.0, 2.0, 3.0);
        stock.deliver(8.0);
        assert_eq!(stock, levels(0.0, 0.0, 3.0));
    }

    #[test]
    fn test_hold_and_release_are_unclamped_inverses() {
        let mut stock = levels(10.0, 0.0, 10.0);
        stock.hold(12.0);
        assert_eq!(stock, levels(10.0, 12.0, -2.0));
        stock.release(12.0);
        assert_eq!(stock, levels(10.0, 0.0, 10.0));
    }

    #[test]
    fn test_transfer_moves_held_stock() {
        let mut source = levels(50.0, 0.0, 50.0);
        source.hold(20.0);
        source.transfer_out(20.0);
        assert_eq!(source, levels(30.0, 0.0, 30.0));

        let mut destination = StockLevels::default();
        destination.transfer_in(20.0);
        assert_eq!(destination, levels(20.0, 0.0, 20.0));
    }

    #[test]
    fn test_save_path_rederives_available() {
        let mut stock = levels(30.0, 50.0, 0.0);
        stock.receive(10.0);
        assert_eq!(stock, levels(40.0, 50.0, -10.0));

        stock.adjust(80.0);
        assert_eq!(stock, levels(80.0, 50.0, 30.0));

        assert_eq!(StockLevels::new(12.0, 2.0), levels(12.0, 2.0, 10.0));
    }

    #[test]
    fn test_reservation_deltas() {
        let old = vec![
            ("BOLT".to_string(), "MAIN".to_string(), 10.0),
            ("NUT".to_string(), "MAIN".to_string(), 5.0),
            ("WASHER".to_string(), "MAIN".to_string(), 3.0),
        ];
        let new = vec![
            ("BOLT".to_string(), "MAIN".to_string(), 14.0),
            ("WASHER".to_string(), "MAIN".to_string(), 3.0),
            ("NUT".to_string(), "NORTH".to_string(), 2.0),
        ];
        let deltas = reservation_deltas(&old, &new);
        assert_eq!(deltas, vec![
            (("BOLT".to_string(), "MAIN".to_string()), 4.0),
            (("NUT".to_string(), "MAIN".to_string()), -5.0),
            (("NUT".to_string(), "NORTH".to_string()), 2.0),
        ]);
    }
}
