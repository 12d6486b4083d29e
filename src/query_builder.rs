// src/query_builder.rs
//! Whitelisted SELECT/COUNT construction for the list endpoints.

use std::collections::HashSet;

/// Columns a list endpoint may filter or sort on.
#[derive(Debug, Clone)]
pub struct FieldWhitelist {
    table: &'static str,
    fields: HashSet<String>,
}

impl FieldWhitelist {
    pub fn new(table: &'static str, fields: &[&str]) -> Self {
        Self {
            table,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn is_allowed(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    pub fn for_customers() -> Self {
        Self::new("customers", &[
            "customer_code", "name", "status", "contact_person", "email",
            "created_at", "updated_at",
        ])
    }

    pub fn for_inventory() -> Self {
        Self::new("inventory_main", &[
            "item_code", "description", "warehouse", "quantity", "quantity_on_hold",
            "available_quantity", "reorder_level", "created_at", "updated_at",
        ])
    }

    pub fn for_sales_orders() -> Self {
        Self::new("sales_orders", &[
            "so_number", "customer_id", "customer_code", "order_date", "status",
            "total_amount", "created_at", "updated_at",
        ])
    }

    pub fn for_deliveries() -> Self {
        Self::new("deliveries", &[
            "dr_no", "so_number", "customer_id", "delivery_date", "status",
            "created_at", "updated_at",
        ])
    }

    pub fn for_transfer_requests() -> Self {
        Self::new("transfer_requests", &[
            "request_no", "from_warehouse", "to_warehouse", "status",
            "created_at", "updated_at",
        ])
    }

    pub fn for_purchase_orders() -> Self {
        Self::new("purchase_orders", &[
            "po_number", "supplier_name", "order_date", "status", "total_amount",
            "created_at", "updated_at",
        ])
    }

    pub fn for_vouchers(table: &'static str) -> Self {
        Self::new(table, &[
            "voucher_no", "invoice_no", "invoice_date", "due_date", "status",
            "amount", "balance", "created_at", "updated_at",
        ])
    }
}

/// Builds `SELECT * FROM <table> WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
/// with every value passed as a bound parameter.
pub struct SafeQueryBuilder<'a> {
    whitelist: &'a FieldWhitelist,
    conditions: Vec<String>,
    params: Vec<String>,
    order_by: Option<(String, &'static str)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl<'a> SafeQueryBuilder<'a> {
    pub fn new(whitelist: &'a FieldWhitelist) -> Self {
        Self {
            whitelist,
            conditions: Vec::new(),
            params: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn add_exact_match(&mut self, field: &str, value: impl Into<String>) -> &mut Self {
        if self.whitelist.is_allowed(field) {
            self.conditions.push(format!("{} = ?", field));
            self.params.push(value.into());
        }
        self
    }

    /// OR-ed LIKE search across several columns.
    pub fn add_search(&mut self, fields: &[&str], term: &str) -> &mut Self {
        let term = term.trim();
        if term.is_empty() {
            return self;
        }
        let allowed: Vec<&str> = fields
            .iter()
            .copied()
            .filter(|f| self.whitelist.is_allowed(f))
            .collect();
        if allowed.is_empty() {
            return self;
        }
        let pattern = format!("%{}%", term);
        let clause = allowed
            .iter()
            .map(|f| format!("{} LIKE ?", f))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.conditions.push(format!("({})", clause));
        for _ in &allowed {
            self.params.push(pattern.clone());
        }
        self
    }

    pub fn add_condition(&mut self, condition: &str, params: Vec<String>) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.params.extend(params);
        self
    }

    pub fn order_by(&mut self, field: &str, direction: &str) -> &mut Self {
        if self.whitelist.is_allowed(field) {
            let dir = if direction.eq_ignore_ascii_case("ASC") { "ASC" } else { "DESC" };
            self.order_by = Some((field.to_string(), dir));
        }
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn build(&self) -> (String, Vec<String>) {
        let mut sql = format!("SELECT * FROM {}{}", self.whitelist.table(), self.where_clause());

        if let Some((field, dir)) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {} {}", field, dir));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        (sql, self.params.clone())
    }

    pub fn build_count(&self) -> (String, Vec<String>) {
        (
            format!("SELECT COUNT(*) FROM {}{}", self.whitelist.table(), self.where_clause()),
            self.params.clone(),
        )
    }
}
