// src/validator.rs - Centralized validation module
use std::collections::{HashMap, HashSet};
use serde::Serialize;
use regex::Regex;
use lazy_static::lazy_static;
use chrono::NaiveDate;
use crate::error::ApiError;
use crate::models::*;

lazy_static! {
    static ref CODE_REGEX: Regex = Regex::new(r"^[A-Z0-9][A-Z0-9._/-]*$").unwrap();
    static ref ACCOUNT_CODE_REGEX: Regex = Regex::new(r"^\d{3,10}(-\d{1,6})?$").unwrap();
    static ref TIN_REGEX: Regex = Regex::new(r"^\d{3}-?\d{3}-?\d{3}(-?\d{3,5})?$").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"^[0-9+()\s-]{5,50}$").unwrap();
}

/// Codes (item, warehouse, customer, bank) are stored upper-cased.
pub fn normalize_code(value: &str) -> String {
    value.trim().to_uppercase()
}

// ==================== VALIDATION RESULT ====================

#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    pub errors: HashMap<String, Vec<String>>,
    pub warnings: HashMap<String, Vec<String>>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn to_api_error(&self) -> ApiError {
        let mut fields: Vec<_> = self.errors.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        let message = fields
            .iter()
            .map(|(field, errors)| format!("{}: {}", field, errors.join(", ")))
            .collect::<Vec<_>>()
            .join("; ");

        ApiError::ValidationError(message)
    }

    /// Shortcut used by handlers: Err when any error was collected.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self.to_api_error())
        }
    }

    /// Like [`into_result`](Self::into_result), but stock and quantity rule
    /// violations surface as 400 rather than 422.
    pub fn into_business_result(self) -> Result<(), ApiError> {
        match self.into_result() {
            Err(ApiError::ValidationError(message)) => Err(ApiError::BadRequest(message)),
            other => other,
        }
    }
}

// ==================== FIELD VALIDATORS ====================

pub struct FieldValidator;

impl FieldValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            Err(format!("{} cannot be empty", field))
        } else {
            Ok(())
        }
    }

    pub fn code(value: &str, field: &str) -> Result<(), String> {
        let normalized = normalize_code(value);
        if normalized.is_empty() {
            return Err(format!("{} cannot be empty", field));
        }
        if !CODE_REGEX.is_match(&normalized) {
            return Err(format!(
                "{} may only contain letters, digits and . _ / -",
                field
            ));
        }
        Ok(())
    }

    pub fn account_code(value: &str) -> Result<(), String> {
        if !ACCOUNT_CODE_REGEX.is_match(value.trim()) {
            return Err("Account code must be 3-10 digits with an optional -suffix".to_string());
        }
        Ok(())
    }

    pub fn tin(value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Ok(());
        }
        if !TIN_REGEX.is_match(value.trim()) {
            return Err("Invalid TIN format (expected 000-000-000[-000])".to_string());
        }
        Ok(())
    }

    pub fn phone(value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Ok(());
        }
        if !PHONE_REGEX.is_match(value.trim()) {
            return Err("Invalid phone number".to_string());
        }
        Ok(())
    }

    pub fn date_order(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        start_field: &str,
        end_field: &str,
    ) -> Result<(), String> {
        match (start, end) {
            (Some(s), Some(e)) if e < s => Err(format!("{} cannot be before {}", end_field, start_field)),
            _ => Ok(()),
        }
    }

    /// Rejects repeated keys in a document's lines.
    pub fn unique_lines<K, I>(keys: I, field: &str) -> Result<(), String>
    where
        K: std::hash::Hash + Eq + std::fmt::Debug,
        I: IntoIterator<Item = K>,
    {
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key) {
                return Err(format!("{} contains duplicate lines", field));
            }
        }
        Ok(())
    }
}

// ==================== CUSTOM VALIDATION ====================

pub trait CustomValidate {
    fn custom_validate(&self) -> ValidationResult;
}

fn check(result: &mut ValidationResult, field: &str, outcome: Result<(), String>) {
    if let Err(e) = outcome {
        result.add_error(field, e);
    }
}

fn validate_so_lines(result: &mut ValidationResult, items: &[SalesOrderLineRequest]) {
    for (idx, line) in items.iter().enumerate() {
        check(result, &format!("items[{}].item_code", idx), FieldValidator::code(&line.item_code, "Item code"));
        check(result, &format!("items[{}].warehouse", idx), FieldValidator::code(&line.warehouse, "Warehouse"));
    }
    check(
        result,
        "items",
        FieldValidator::unique_lines(
            items.iter().map(|l| (normalize_code(&l.item_code), normalize_code(&l.warehouse))),
            "Items",
        ),
    );
}

impl CustomValidate for CreateInventoryRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(&mut result, "item_code", FieldValidator::code(&self.item_code, "Item code"));
        check(&mut result, "warehouse", FieldValidator::code(&self.warehouse, "Warehouse"));

        if let Some(on_hold) = self.quantity_on_hold {
            if on_hold > self.quantity {
                result.add_warning("quantity_on_hold", "On-hold quantity exceeds quantity; available will be negative");
            }
        }
        result
    }
}

impl CustomValidate for CreateCustomerRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(&mut result, "customer_code", FieldValidator::code(&self.customer_code, "Customer code"));
        check(&mut result, "name", FieldValidator::not_empty(&self.name, "Name"));
        if let Some(ref tin) = self.tin {
            check(&mut result, "tin", FieldValidator::tin(tin));
        }
        if let Some(ref phone) = self.phone {
            check(&mut result, "phone", FieldValidator::phone(phone));
        }
        result
    }
}

impl CustomValidate for UpdateCustomerRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        if let Some(ref name) = self.name {
            check(&mut result, "name", FieldValidator::not_empty(name, "Name"));
        }
        if let Some(ref tin) = self.tin {
            check(&mut result, "tin", FieldValidator::tin(tin));
        }
        if let Some(ref phone) = self.phone {
            check(&mut result, "phone", FieldValidator::phone(phone));
        }
        result
    }
}

impl CustomValidate for CreateSalesOrderRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        validate_so_lines(&mut result, &self.items);
        check(
            &mut result,
            "delivery_date",
            FieldValidator::date_order(self.order_date, self.delivery_date, "Order date", "Delivery date"),
        );
        result
    }
}

impl CustomValidate for UpdateSalesOrderRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        if let Some(ref items) = self.items {
            validate_so_lines(&mut result, items);
        }
        result
    }
}

impl CustomValidate for CreateDeliveryRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(
            &mut result,
            "items",
            FieldValidator::unique_lines(self.items.iter().map(|l| l.sales_order_item_id.as_str()), "Items"),
        );
        result
    }
}

impl CustomValidate for CreateTransferRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(&mut result, "from_warehouse", FieldValidator::code(&self.from_warehouse, "Source warehouse"));
        check(&mut result, "to_warehouse", FieldValidator::code(&self.to_warehouse, "Destination warehouse"));

        if normalize_code(&self.from_warehouse) == normalize_code(&self.to_warehouse) {
            result.add_error("to_warehouse", "Source and destination warehouse must differ");
        }

        for (idx, line) in self.items.iter().enumerate() {
            check(&mut result, &format!("items[{}].item_code", idx), FieldValidator::code(&line.item_code, "Item code"));
        }
        check(
            &mut result,
            "items",
            FieldValidator::unique_lines(self.items.iter().map(|l| normalize_code(&l.item_code)), "Items"),
        );
        result
    }
}

impl CustomValidate for CreatePurchaseOrderRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        for (idx, line) in self.items.iter().enumerate() {
            check(&mut result, &format!("items[{}].item_code", idx), FieldValidator::code(&line.item_code, "Item code"));
            check(&mut result, &format!("items[{}].warehouse", idx), FieldValidator::code(&line.warehouse, "Warehouse"));
        }
        check(
            &mut result,
            "items",
            FieldValidator::unique_lines(
                self.items.iter().map(|l| (normalize_code(&l.item_code), normalize_code(&l.warehouse))),
                "Items",
            ),
        );
        check(
            &mut result,
            "expected_date",
            FieldValidator::date_order(self.order_date, self.expected_date, "Order date", "Expected date"),
        );
        result
    }
}

impl CustomValidate for UpdatePurchaseOrderRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        if let Some(ref items) = self.items {
            for (idx, line) in items.iter().enumerate() {
                check(&mut result, &format!("items[{}].item_code", idx), FieldValidator::code(&line.item_code, "Item code"));
                check(&mut result, &format!("items[{}].warehouse", idx), FieldValidator::code(&line.warehouse, "Warehouse"));
            }
            check(
                &mut result,
                "items",
                FieldValidator::unique_lines(
                    items.iter().map(|l| (normalize_code(&l.item_code), normalize_code(&l.warehouse))),
                    "Items",
                ),
            );
        }
        result
    }
}

impl CustomValidate for ReceivePurchaseOrderRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(
            &mut result,
            "items",
            FieldValidator::unique_lines(self.items.iter().map(|l| l.purchase_order_item_id.as_str()), "Items"),
        );
        result
    }
}

impl CustomValidate for CreateAccountRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(&mut result, "account_code", FieldValidator::account_code(&self.account_code));
        if let Some(ref parent) = self.parent_code {
            check(&mut result, "parent_code", FieldValidator::account_code(parent));
            if parent.trim() == self.account_code.trim() {
                result.add_error("parent_code", "Account cannot be its own parent");
            }
        }
        result
    }
}

impl CustomValidate for CreateBankRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(&mut result, "bank_code", FieldValidator::code(&self.bank_code, "Bank code"));
        if let Some(ref code) = self.account_code {
            check(&mut result, "account_code", FieldValidator::account_code(code));
        }
        result
    }
}

impl CustomValidate for CreatePayableRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(
            &mut result,
            "due_date",
            FieldValidator::date_order(self.invoice_date, self.due_date, "Invoice date", "Due date"),
        );
        result
    }
}

impl CustomValidate for CreateReceivableRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check(
            &mut result,
            "due_date",
            FieldValidator::date_order(self.invoice_date, self.due_date, "Invoice date", "Due date"),
        );
        result
    }
}

// ==================== BUSINESS VALIDATORS ====================

pub struct BusinessValidator;

impl BusinessValidator {
    /// Transfers hold stock without clamping, so the caller must check
    /// availability up front.
    pub fn validate_transfer_hold(available: f64, requested: f64) -> ValidationResult {
        let mut result = ValidationResult::new();

        if requested <= 0.0 {
            result.add_error("quantity", "Requested quantity must be positive");
        }

        if requested > available {
            result.add_error(
                "quantity",
                format!("Insufficient quantity. Available: {}, Requested: {}", available, requested),
            );
        }

        if requested > available * 0.8 && requested <= available {
            result.add_warning("quantity", "Transferring more than 80% of available quantity");
        }

        result
    }

    /// Delivery lines cannot exceed what is still undelivered on the order line.
    pub fn validate_delivery_line(ordered: f64, delivered: f64, requested: f64) -> ValidationResult {
        let mut result = ValidationResult::new();
        let remaining = (ordered - delivered).max(0.0);

        if requested > remaining + f64::EPSILON {
            result.add_error(
                "quantity",
                format!("Only {} left to deliver, requested {}", remaining, requested),
            );
        }

        result
    }
}
