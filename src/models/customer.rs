// src/models/customer.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerStatus {
    Active,
    Inactive,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Customer {
    pub id: String,
    pub customer_code: String,
    pub name: String,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub tin: Option<String>,
    pub payment_terms_days: i64,
    pub credit_limit: f64,
    pub status: String,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, max = 50, message = "Customer code must be between 1 and 50 characters"))]
    pub customer_code: String,
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,
    #[validate(length(max = 500, message = "Address cannot exceed 500 characters"))]
    pub address: Option<String>,
    #[validate(length(max = 255, message = "Contact person cannot exceed 255 characters"))]
    pub contact_person: Option<String>,
    #[validate(length(max = 50, message = "Phone cannot exceed 50 characters"))]
    pub phone: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(max = 50, message = "TIN cannot exceed 50 characters"))]
    pub tin: Option<String>,
    #[validate(range(min = 0, max = 365, message = "Payment terms must be between 0 and 365 days"))]
    pub payment_terms_days: Option<i64>,
    #[validate(range(min = 0.0, message = "Credit limit must be non-negative"))]
    pub credit_limit: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateCustomerRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "Address cannot exceed 500 characters"))]
    pub address: Option<String>,
    #[validate(length(max = 255, message = "Contact person cannot exceed 255 characters"))]
    pub contact_person: Option<String>,
    #[validate(length(max = 50, message = "Phone cannot exceed 50 characters"))]
    pub phone: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(max = 50, message = "TIN cannot exceed 50 characters"))]
    pub tin: Option<String>,
    #[validate(range(min = 0, max = 365, message = "Payment terms must be between 0 and 365 days"))]
    pub payment_terms_days: Option<i64>,
    #[validate(range(min = 0.0, message = "Credit limit must be non-negative"))]
    pub credit_limit: Option<f64>,
    pub status: Option<CustomerStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}
