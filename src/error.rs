use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        if let ApiError::DatabaseError(err) = self {
            log::error!("Database error: {}", err);
        }

        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(error_response),
            ApiError::Conflict(_) => HttpResponse::Conflict().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::AuthError(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        // UNIQUE violations come from number sequences racing or duplicate codes
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return ApiError::Conflict(db_err.message().to_string());
            }
        }
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl ApiError {
    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{} not found", entity))
    }

    pub fn customer_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Customer with ID '{}' not found", id))
    }

    pub fn sales_order_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Sales order '{}' not found", id))
    }

    pub fn delivery_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Delivery '{}' not found", id))
    }

    pub fn inventory_not_found(item_code: &str, warehouse: &str) -> Self {
        ApiError::NotFound(format!(
            "Inventory item '{}' not found in warehouse '{}'",
            item_code, warehouse
        ))
    }

    pub fn invalid_transition(entity: &str, from: &str, to: &str) -> Self {
        ApiError::Conflict(format!("{} cannot move from {} to {}", entity, from, to))
    }

    pub fn not_editable(entity: &str, status: &str) -> Self {
        ApiError::Conflict(format!("{} in status {} cannot be modified", entity, status))
    }
}

pub fn validate_quantity(quantity: f64) -> Result<(), ApiError> {
    if !quantity.is_finite() {
        return Err(ApiError::ValidationError("Quantity must be a number".to_string()));
    }
    if quantity < 0.0 {
        return Err(ApiError::ValidationError("Quantity cannot be negative".to_string()));
    }
    if quantity > 1e9 {
        return Err(ApiError::ValidationError("Quantity too large".to_string()));
    }
    Ok(())
}

pub fn validate_amount(amount: f64) -> Result<(), ApiError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ApiError::ValidationError("Amount must be greater than zero".to_string()));
    }
    Ok(())
}
