// src/db.rs - Database migrations and setup

use sqlx::SqlitePool;
use anyhow::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE CHECK(length(username) >= 3 AND length(username) <= 50),
        email TEXT NOT NULL UNIQUE CHECK(length(email) >= 5 AND length(email) <= 255),
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'viewer' CHECK(
            role IN ('admin', 'manager', 'staff', 'viewer')
        ),
        is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
        last_login DATETIME,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        failed_login_attempts INTEGER NOT NULL DEFAULT 0,
        locked_until DATETIME
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customers (
        id TEXT PRIMARY KEY,
        customer_code TEXT NOT NULL UNIQUE CHECK(length(customer_code) > 0 AND length(customer_code) <= 50),
        name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
        address TEXT,
        contact_person TEXT,
        phone TEXT,
        email TEXT,
        tin TEXT,
        payment_terms_days INTEGER NOT NULL DEFAULT 0,
        credit_limit REAL NOT NULL DEFAULT 0.0,
        status TEXT NOT NULL DEFAULT 'ACTIVE' CHECK(status IN ('ACTIVE', 'INACTIVE')),
        created_by TEXT,
        updated_by TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    // The three stock figures carry no CHECK: some paths write them unclamped.
    r#"
    CREATE TABLE IF NOT EXISTS inventory_main (
        id TEXT PRIMARY KEY,
        item_code TEXT NOT NULL CHECK(length(item_code) > 0 AND length(item_code) <= 50),
        description TEXT,
        warehouse TEXT NOT NULL CHECK(length(warehouse) > 0 AND length(warehouse) <= 50),
        unit TEXT NOT NULL DEFAULT 'PCS',
        quantity REAL NOT NULL DEFAULT 0.0,
        quantity_on_hold REAL NOT NULL DEFAULT 0.0,
        available_quantity REAL NOT NULL DEFAULT 0.0,
        unit_cost REAL NOT NULL DEFAULT 0.0,
        reorder_level REAL NOT NULL DEFAULT 0.0,
        created_by TEXT,
        updated_by TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        UNIQUE(item_code, warehouse)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_tracker (
        id TEXT PRIMARY KEY,
        item_code TEXT NOT NULL,
        warehouse TEXT NOT NULL,
        reference_type TEXT NOT NULL CHECK(reference_type IN ('SO', 'DR', 'TR', 'PO', 'ADJ')),
        reference_no TEXT NOT NULL,
        quantity_change REAL NOT NULL,
        on_hold_change REAL NOT NULL,
        available_change REAL NOT NULL,
        quantity_after REAL NOT NULL,
        on_hold_after REAL NOT NULL,
        available_after REAL NOT NULL,
        remarks TEXT,
        created_by TEXT,
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales_orders (
        id TEXT PRIMARY KEY,
        so_number TEXT NOT NULL UNIQUE,
        customer_id TEXT NOT NULL,
        customer_code TEXT NOT NULL,
        order_date DATE NOT NULL,
        delivery_date DATE,
        remarks TEXT,
        status TEXT NOT NULL DEFAULT 'PENDING' CHECK(
            status IN ('PENDING', 'PARTIAL', 'COMPLETED', 'CANCELLED')
        ),
        total_amount REAL NOT NULL DEFAULT 0.0,
        created_by TEXT,
        updated_by TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        FOREIGN KEY (customer_id) REFERENCES customers (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales_order_items (
        id TEXT PRIMARY KEY,
        sales_order_id TEXT NOT NULL,
        item_code TEXT NOT NULL,
        description TEXT,
        warehouse TEXT NOT NULL,
        quantity REAL NOT NULL CHECK(quantity > 0),
        delivered_quantity REAL NOT NULL DEFAULT 0.0,
        unit_price REAL NOT NULL DEFAULT 0.0,
        amount REAL NOT NULL DEFAULT 0.0,
        FOREIGN KEY (sales_order_id) REFERENCES sales_orders (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deliveries (
        id TEXT PRIMARY KEY,
        dr_no TEXT NOT NULL UNIQUE,
        sales_order_id TEXT NOT NULL,
        so_number TEXT NOT NULL,
        customer_id TEXT NOT NULL,
        delivery_date DATE NOT NULL,
        driver TEXT,
        plate_no TEXT,
        remarks TEXT,
        status TEXT NOT NULL DEFAULT 'PREPARED' CHECK(
            status IN ('PREPARED', 'DELIVERED', 'COMPLETED', 'CANCELLED')
        ),
        delivered_at DATETIME,
        created_by TEXT,
        updated_by TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        FOREIGN KEY (sales_order_id) REFERENCES sales_orders (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_items (
        id TEXT PRIMARY KEY,
        delivery_id TEXT NOT NULL,
        sales_order_item_id TEXT NOT NULL,
        item_code TEXT NOT NULL,
        warehouse TEXT NOT NULL,
        quantity REAL NOT NULL CHECK(quantity > 0),
        FOREIGN KEY (delivery_id) REFERENCES deliveries (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transfer_requests (
        id TEXT PRIMARY KEY,
        request_no TEXT NOT NULL UNIQUE,
        from_warehouse TEXT NOT NULL,
        to_warehouse TEXT NOT NULL,
        remarks TEXT,
        status TEXT NOT NULL DEFAULT 'PENDING' CHECK(
            status IN ('PENDING', 'APPROVED', 'REJECTED')
        ),
        rejection_reason TEXT,
        requested_by TEXT,
        decided_by TEXT,
        decided_at DATETIME,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transfer_request_items (
        id TEXT PRIMARY KEY,
        transfer_request_id TEXT NOT NULL,
        item_code TEXT NOT NULL,
        quantity REAL NOT NULL CHECK(quantity > 0),
        FOREIGN KEY (transfer_request_id) REFERENCES transfer_requests (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS purchase_orders (
        id TEXT PRIMARY KEY,
        po_number TEXT NOT NULL UNIQUE,
        supplier_name TEXT NOT NULL CHECK(length(supplier_name) > 0 AND length(supplier_name) <= 255),
        order_date DATE NOT NULL,
        expected_date DATE,
        remarks TEXT,
        status TEXT NOT NULL DEFAULT 'PENDING' CHECK(
            status IN ('PENDING', 'APPROVED', 'RECEIVED', 'CANCELLED')
        ),
        total_amount REAL NOT NULL DEFAULT 0.0,
        created_by TEXT,
        approved_by TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS purchase_order_items (
        id TEXT PRIMARY KEY,
        purchase_order_id TEXT NOT NULL,
        item_code TEXT NOT NULL,
        description TEXT,
        warehouse TEXT NOT NULL,
        quantity REAL NOT NULL CHECK(quantity > 0),
        received_quantity REAL NOT NULL DEFAULT 0.0,
        unit_cost REAL NOT NULL DEFAULT 0.0,
        amount REAL NOT NULL DEFAULT 0.0,
        FOREIGN KEY (purchase_order_id) REFERENCES purchase_orders (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chart_of_accounts (
        id TEXT PRIMARY KEY,
        account_code TEXT NOT NULL UNIQUE,
        account_name TEXT NOT NULL CHECK(length(account_name) > 0 AND length(account_name) <= 255),
        account_type TEXT NOT NULL CHECK(
            account_type IN ('ASSET', 'LIABILITY', 'EQUITY', 'REVENUE', 'EXPENSE')
        ),
        normal_balance TEXT NOT NULL CHECK(normal_balance IN ('DEBIT', 'CREDIT')),
        parent_code TEXT,
        is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS banks (
        id TEXT PRIMARY KEY,
        bank_code TEXT NOT NULL UNIQUE,
        bank_name TEXT NOT NULL,
        account_name TEXT NOT NULL,
        account_number TEXT NOT NULL,
        branch TEXT,
        account_code TEXT,
        is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts_payable (
        id TEXT PRIMARY KEY,
        voucher_no TEXT NOT NULL UNIQUE,
        supplier_name TEXT NOT NULL,
        po_number TEXT,
        invoice_no TEXT,
        invoice_date DATE NOT NULL,
        due_date DATE,
        amount REAL NOT NULL CHECK(amount > 0),
        amount_paid REAL NOT NULL DEFAULT 0.0,
        balance REAL NOT NULL,
        status TEXT NOT NULL DEFAULT 'OPEN' CHECK(status IN ('OPEN', 'PARTIAL', 'PAID', 'CANCELLED')),
        remarks TEXT,
        created_by TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts_receivable (
        id TEXT PRIMARY KEY,
        voucher_no TEXT NOT NULL UNIQUE,
        customer_id TEXT NOT NULL,
        so_number TEXT,
        dr_no TEXT,
        invoice_no TEXT,
        invoice_date DATE NOT NULL,
        due_date DATE,
        amount REAL NOT NULL CHECK(amount > 0),
        amount_paid REAL NOT NULL DEFAULT 0.0,
        balance REAL NOT NULL,
        status TEXT NOT NULL DEFAULT 'OPEN' CHECK(status IN ('OPEN', 'PARTIAL', 'PAID', 'CANCELLED')),
        remarks TEXT,
        created_by TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        FOREIGN KEY (customer_id) REFERENCES customers (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS voucher_payments (
        id TEXT PRIMARY KEY,
        ledger TEXT NOT NULL CHECK(ledger IN ('AP', 'AR')),
        voucher_id TEXT NOT NULL,
        bank_id TEXT,
        amount REAL NOT NULL CHECK(amount > 0),
        reference_no TEXT,
        paid_on DATE NOT NULL,
        created_by TEXT,
        created_at DATETIME NOT NULL,
        FOREIGN KEY (bank_id) REFERENCES banks (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        action TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT,
        description TEXT,
        changes TEXT,
        ip_address TEXT,
        user_agent TEXT,
        created_at DATETIME NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_inventory_item ON inventory_main(item_code)",
    "CREATE INDEX IF NOT EXISTS idx_inventory_warehouse ON inventory_main(warehouse)",
    "CREATE INDEX IF NOT EXISTS idx_tracker_item ON inventory_tracker(item_code, warehouse, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_tracker_reference ON inventory_tracker(reference_type, reference_no)",
    "CREATE INDEX IF NOT EXISTS idx_so_customer ON sales_orders(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_so_status ON sales_orders(status)",
    "CREATE INDEX IF NOT EXISTS idx_so_items_order ON sales_order_items(sales_order_id)",
    "CREATE INDEX IF NOT EXISTS idx_deliveries_so ON deliveries(sales_order_id)",
    "CREATE INDEX IF NOT EXISTS idx_delivery_items_delivery ON delivery_items(delivery_id)",
    "CREATE INDEX IF NOT EXISTS idx_tr_items_request ON transfer_request_items(transfer_request_id)",
    "CREATE INDEX IF NOT EXISTS idx_po_items_order ON purchase_order_items(purchase_order_id)",
    "CREATE INDEX IF NOT EXISTS idx_payments_voucher ON voucher_payments(ledger, voucher_id)",
    "CREATE INDEX IF NOT EXISTS idx_ar_customer ON accounts_receivable(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_logs(entity_type, entity_id)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    for statement in INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }

    log::info!("Database migrations applied ({} tables)", SCHEMA.len());
    Ok(())
}

#[cfg(test)]
pub mod test_support {
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    /// Single-connection in-memory database with the schema applied.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        super::run_migrations(&pool).await.expect("migrations");
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::memory_pool;

    #[actix_rt::test]
    async fn test_migrations_are_idempotent() {
        let pool = memory_pool().await;
        super::run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name"
        )
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in ["inventory_main", "inventory_tracker", "sales_orders", "deliveries",
                         "transfer_requests", "purchase_orders", "accounts_payable",
                         "accounts_receivable", "chart_of_accounts", "banks", "users"] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[actix_rt::test]
    async fn test_inventory_row_is_unique_per_warehouse() {
        let pool = memory_pool().await;
        let insert = "INSERT INTO inventory_main (id, item_code, warehouse, created_at, updated_at) \
                      VALUES (?, 'BOLT-10', 'MAIN', datetime('now'), datetime('now'))";
        sqlx::query(insert).bind("a").execute(&pool).await.unwrap();
        let err = sqlx::query(insert).bind("b").execute(&pool).await.unwrap_err();
        let api_err: crate::error::ApiError = err.into();
        assert!(matches!(api_err, crate::error::ApiError::Conflict(_)));
    }
}
