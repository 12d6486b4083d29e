// src/models/accounting.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use strum::{AsRefStr, Display, EnumString};

use crate::error::ApiError;

// ==================== CHART OF ACCOUNTS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalBalance {
    Debit,
    Credit,
}

impl AccountType {
    pub fn normal_balance(&self) -> NormalBalance {
        match self {
            AccountType::Asset | AccountType::Expense => NormalBalance::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => NormalBalance::Credit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ChartOfAccount {
    pub id: String,
    pub account_code: String,
    pub account_name: String,
    pub account_type: String,
    pub normal_balance: String,
    pub parent_code: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 20, message = "Account code must be between 1 and 20 characters"))]
    pub account_code: String,
    #[validate(length(min = 1, max = 255, message = "Account name must be between 1 and 255 characters"))]
    pub account_name: String,
    pub account_type: AccountType,
    #[validate(length(min = 1, max = 20, message = "Parent code must be between 1 and 20 characters"))]
    pub parent_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateAccountRequest {
    #[validate(length(min = 1, max = 255, message = "Account name must be between 1 and 255 characters"))]
    pub account_name: Option<String>,
    pub account_type: Option<AccountType>,
    #[validate(length(min = 1, max = 20, message = "Parent code must be between 1 and 20 characters"))]
    pub parent_code: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account_type: Option<String>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

// ==================== BANKS ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Bank {
    pub id: String,
    pub bank_code: String,
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    pub branch: Option<String>,
    pub account_code: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateBankRequest {
    #[validate(length(min = 1, max = 20, message = "Bank code must be between 1 and 20 characters"))]
    pub bank_code: String,
    #[validate(length(min = 1, max = 255, message = "Bank name must be between 1 and 255 characters"))]
    pub bank_name: String,
    #[validate(length(min = 1, max = 255, message = "Account name must be between 1 and 255 characters"))]
    pub account_name: String,
    #[validate(length(min = 1, max = 50, message = "Account number must be between 1 and 50 characters"))]
    pub account_number: String,
    #[validate(length(max = 255, message = "Branch cannot exceed 255 characters"))]
    pub branch: Option<String>,
    pub account_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateBankRequest {
    #[validate(length(min = 1, max = 255, message = "Bank name must be between 1 and 255 characters"))]
    pub bank_name: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Account name must be between 1 and 255 characters"))]
    pub account_name: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Account number must be between 1 and 50 characters"))]
    pub account_number: Option<String>,
    #[validate(length(max = 255, message = "Branch cannot exceed 255 characters"))]
    pub branch: Option<String>,
    pub account_code: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct BankQuery {
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

// ==================== VOUCHERS (AP / AR) ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherStatus {
    Open,
    Partial,
    Paid,
    Cancelled,
}

/// Which ledger a payment row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
pub enum Ledger {
    #[strum(serialize = "AP")]
    #[serde(rename = "AP")]
    Payable,
    #[strum(serialize = "AR")]
    #[serde(rename = "AR")]
    Receivable,
}

impl Ledger {
    pub fn table(&self) -> &'static str {
        match self {
            Ledger::Payable => "accounts_payable",
            Ledger::Receivable => "accounts_receivable",
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            Ledger::Payable => "Payable voucher",
            Ledger::Receivable => "Receivable voucher",
        }
    }
}

/// Balance bookkeeping shared by payables and receivables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoucherBalance {
    pub amount: f64,
    pub amount_paid: f64,
    pub balance: f64,
}

impl VoucherBalance {
    pub fn new(amount: f64) -> Self {
        Self {
            amount,
            amount_paid: 0.0,
            balance: amount,
        }
    }

    /// Apply a payment of `payment` against the current balance.
    pub fn pay(&self, payment: f64) -> Result<(VoucherBalance, VoucherStatus), ApiError> {
        if !payment.is_finite() || payment <= 0.0 {
            return Err(ApiError::bad_request("Payment amount must be greater than zero"));
        }
        // tolerate float noise from repeated partial payments
        if payment > self.balance + 0.005 {
            return Err(ApiError::BadRequest(format!(
                "Payment {:.2} exceeds outstanding balance {:.2}",
                payment, self.balance
            )));
        }

        let amount_paid = self.amount_paid + payment;
        let balance = (self.amount - amount_paid).max(0.0);
        let status = if balance < 0.005 {
            VoucherStatus::Paid
        } else {
            VoucherStatus::Partial
        };

        Ok((
            VoucherBalance {
                amount: self.amount,
                amount_paid,
                balance: if status == VoucherStatus::Paid { 0.0 } else { balance },
            },
            status,
        ))
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct AccountPayable {
    pub id: String,
    pub voucher_no: String,
    pub supplier_name: String,
    pub po_number: Option<String>,
    pub invoice_no: Option<String>,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub amount: f64,
    pub amount_paid: f64,
    pub balance: f64,
    pub status: String,
    pub remarks: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct AccountReceivable {
    pub id: String,
    pub voucher_no: String,
    pub customer_id: String,
    pub so_number: Option<String>,
    pub dr_no: Option<String>,
    pub invoice_no: Option<String>,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub amount: f64,
    pub amount_paid: f64,
    pub balance: f64,
    pub status: String,
    pub remarks: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct VoucherPayment {
    pub id: String,
    pub ledger: String,
    pub voucher_id: String,
    pub bank_id: Option<String>,
    pub amount: f64,
    pub reference_no: Option<String>,
    pub paid_on: NaiveDate,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct VoucherWithPayments<T> {
    #[serde(flatten)]
    pub voucher: T,
    pub payments: Vec<VoucherPayment>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreatePayableRequest {
    #[validate(length(min = 1, max = 255, message = "Supplier must be between 1 and 255 characters"))]
    pub supplier_name: String,
    pub po_number: Option<String>,
    #[validate(length(max = 50, message = "Invoice number cannot exceed 50 characters"))]
    pub invoice_no: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    #[validate(range(min = 0.01, message = "Amount must be greater than zero"))]
    pub amount: f64,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateReceivableRequest {
    #[validate(length(min = 1, message = "Customer is required"))]
    pub customer_id: String,
    pub so_number: Option<String>,
    pub dr_no: Option<String>,
    #[validate(length(max = 50, message = "Invoice number cannot exceed 50 characters"))]
    pub invoice_no: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    #[validate(range(min = 0.01, message = "Amount must be greater than zero"))]
    pub amount: f64,
    #[validate(length(max = 1000, message = "Remarks cannot exceed 1000 characters"))]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct RecordPaymentRequest {
    #[validate(range(min = 0.01, message = "Amount must be greater than zero"))]
    pub amount: f64,
    pub bank_id: Option<String>,
    #[validate(length(max = 100, message = "Reference cannot exceed 100 characters"))]
    pub reference_no: Option<String>,
    pub paid_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct VoucherQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_balance_follows_type() {
        assert_eq!(AccountType::Asset.normal_balance(), NormalBalance::Debit);
        assert_eq!(AccountType::Expense.normal_balance(), NormalBalance::Debit);
        assert_eq!(AccountType::Liability.normal_balance(), NormalBalance::Credit);
        assert_eq!(AccountType::Equity.normal_balance(), NormalBalance::Credit);
        assert_eq!(AccountType::Revenue.normal_balance(), NormalBalance::Credit);
    }

    #[test]
    fn test_partial_then_full_payment() {
        let open = VoucherBalance::new(1000.0);
        let (after_first, status) = open.pay(400.0).unwrap();
        assert_eq!(status, VoucherStatus::Partial);
        assert_eq!(after_first.amount_paid, 400.0);
        assert_eq!(after_first.balance, 600.0);

        let (settled, status) = after_first.pay(600.0).unwrap();
        assert_eq!(status, VoucherStatus::Paid);
        assert_eq!(settled.balance, 0.0);
        assert_eq!(settled.amount_paid, 1000.0);
    }

    #[test]
    fn test_overpayment_rejected() {
        let open = VoucherBalance::new(100.0);
        assert!(matches!(open.pay(100.5), Err(ApiError::BadRequest(_))));
        assert!(matches!(open.pay(0.0), Err(ApiError::BadRequest(_))));
        assert!(matches!(open.pay(-5.0), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_ledger_codes() {
        assert_eq!(Ledger::Payable.to_string(), "AP");
        assert_eq!(Ledger::Receivable.as_ref(), "AR");
        assert_eq!(Ledger::Receivable.table(), "accounts_receivable");
    }
}
