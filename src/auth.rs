use bcrypt::{hash, verify};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use actix_web::web;
use actix_web::HttpMessage;
use validator::Validate;
use actix_web::{HttpRequest, dev::ServiceRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

// ======== RESOURCES & ACTIONS ========

/// Areas of the back-office guarded by role checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Customers,
    Inventory,
    SalesOrders,
    Deliveries,
    Transfers,
    PurchaseOrders,
    Accounting,
    Users,
    AuditLog,
    Export,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Customers => "customers",
            Resource::Inventory => "inventory",
            Resource::SalesOrders => "sales_orders",
            Resource::Deliveries => "deliveries",
            Resource::Transfers => "transfers",
            Resource::PurchaseOrders => "purchase_orders",
            Resource::Accounting => "accounting",
            Resource::Users => "users",
            Resource::AuditLog => "audit_log",
            Resource::Export => "export",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Resource::Customers,
            Resource::Inventory,
            Resource::SalesOrders,
            Resource::Deliveries,
            Resource::Transfers,
            Resource::PurchaseOrders,
            Resource::Accounting,
            Resource::Users,
            Resource::AuditLog,
            Resource::Export,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    /// Approve, reject, cancel, receive: status decisions on documents.
    Approve,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Approve => "approve",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Action::View, Action::Create, Action::Edit, Action::Delete, Action::Approve]
    }
}

// ======== USER ROLE ========

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Manager,
    Staff,
    Viewer,
}

impl UserRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "manager" => Some(UserRole::Manager),
            "staff" => Some(UserRole::Staff),
            "viewer" => Some(UserRole::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Staff => "staff",
            UserRole::Viewer => "viewer",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            UserRole::Admin => "Administrator",
            UserRole::Manager => "Manager",
            UserRole::Staff => "Staff",
            UserRole::Viewer => "Viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            UserRole::Admin => "Full access to all system features including user management",
            UserRole::Manager => "Approves documents, manages accounting and can delete records",
            UserRole::Staff => "Prepares sales orders, deliveries, transfers and purchase orders",
            UserRole::Viewer => "Read-only access",
        }
    }

    pub fn can(&self, resource: Resource, action: Action) -> bool {
        match self {
            UserRole::Admin => true,
            UserRole::Manager => !matches!(
                (resource, action),
                (Resource::Users, Action::Create)
                    | (Resource::Users, Action::Edit)
                    | (Resource::Users, Action::Delete)
            ),
            UserRole::Staff => match resource {
                Resource::Users | Resource::AuditLog => false,
                Resource::Accounting => action == Action::View,
                Resource::Export => action == Action::View,
                _ => matches!(action, Action::View | Action::Create | Action::Edit),
            },
            UserRole::Viewer => {
                action == Action::View
                    && !matches!(resource, Resource::Users | Resource::AuditLog | Resource::Export)
            }
        }
    }

    pub fn can_manage_users(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    /// Get all available roles
    pub fn all_roles() -> Vec<Self> {
        vec![UserRole::Admin, UserRole::Manager, UserRole::Staff, UserRole::Viewer]
    }

    /// Get all valid role strings
    pub fn all_role_strings() -> Vec<&'static str> {
        vec!["admin", "manager", "staff", "viewer"]
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, message = "New password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            role: user.get_role(),
            id: user.id,
            username: user.username,
            email: user.email,
            is_active: user.is_active,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiration_hours: i64,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            token_expiration_hours: config.token_expiration_hours,
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    pub fn token_lifetime_seconds(&self) -> i64 {
        self.token_expiration_hours * 3600
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        validate_password_strength(password)?;
        hash(password, self.bcrypt_cost)
            .map_err(|e| ApiError::InternalServerError(format!("Failed to hash password: {}", e)))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> ApiResult<bool> {
        verify(password, hash)
            .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))
    }

    pub fn generate_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.token_expiration_hours);

        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.get_role(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature =>
                        ApiError::AuthError("Token expired".to_string()),
                    jsonwebtoken::errors::ErrorKind::InvalidToken =>
                        ApiError::AuthError("Invalid token".to_string()),
                    _ =>
                        ApiError::AuthError("Token verification failed".to_string()),
                }
            })
    }
}

// ======== PASSWORD VALIDATION ========

pub fn validate_password_strength(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::ValidationError("Password must be at least 8 characters".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one uppercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one lowercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiError::ValidationError("Password must contain at least one digit".to_string()));
    }
    Ok(())
}

// ======== USER METHODS ========

impl User {
    pub async fn find_by_username(pool: &SqlitePool, username: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    }

    pub async fn create(
        pool: &SqlitePool,
        username: &str,
        email: &str,
        password: &str,
        role: UserRole,
        auth_service: &AuthService,
    ) -> ApiResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let password_hash = auth_service.hash_password(password)?;

        sqlx::query(
            r#"INSERT INTO users (
                id, username, email, password_hash, role, is_active,
                created_at, updated_at, failed_login_attempts, locked_until
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?, 0, NULL)"#
        )
            .bind(&id)
            .bind(username)
            .bind(email)
            .bind(&password_hash)
            .bind(role.as_str())
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;

        Self::find_by_id(pool, &id).await
    }

    pub async fn update_last_login(&self, pool: &SqlitePool) -> ApiResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        pool: &SqlitePool,
        current_password: &str,
        new_password: &str,
        auth_service: &AuthService
    ) -> ApiResult<()> {
        if !auth_service.verify_password(current_password, &self.password_hash)? {
            return Err(ApiError::AuthError("Current password is incorrect".to_string()));
        }

        let new_hash = auth_service.hash_password(new_password)?;

        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(&new_hash)
            .bind(Utc::now())
            .bind(&self.id)
            .execute(pool)
            .await?;

        Ok(())
    }

    // Methods for lock management
    pub fn is_locked(&self) -> bool {
        if let Some(locked_until) = self.locked_until {
            Utc::now() < locked_until
        } else {
            false
        }
    }

    pub async fn increment_failed_attempts(&mut self, pool: &SqlitePool) -> ApiResult<()> {
        self.failed_login_attempts += 1;
        sqlx::query("UPDATE users SET failed_login_attempts = ? WHERE id = ?")
            .bind(self.failed_login_attempts)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn lock_for_duration(&mut self, pool: &SqlitePool, duration: Duration) -> ApiResult<()> {
        self.locked_until = Some(Utc::now() + duration);
        sqlx::query("UPDATE users SET locked_until = ? WHERE id = ?")
            .bind(self.locked_until)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn reset_failed_attempts(&mut self, pool: &SqlitePool) -> ApiResult<()> {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL WHERE id = ?"
        )
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub fn get_role(&self) -> UserRole {
        UserRole::from_str(&self.role).unwrap_or(UserRole::Viewer)
    }
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>().cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

pub fn check_permission<F>(claims: &Claims, check: F) -> ApiResult<()>
where
    F: Fn(&UserRole) -> bool,
{
    if check(&claims.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

/// Claims of the caller, provided the role may perform `action` on `resource`.
pub fn require_permission(req: &HttpRequest, resource: Resource, action: Action) -> ApiResult<Claims> {
    let claims = get_current_user(req)?;
    check_permission(&claims, |role| role.can(resource, action))?;
    Ok(claims)
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<std::sync::Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    match auth_service.verify_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            Err((err.into(), req))
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Cheap bcrypt cost so tests stay fast.
    pub fn auth_service() -> AuthService {
        let config = AuthConfig {
            bcrypt_cost: 4,
            ..AuthConfig::default()
        };
        AuthService::new(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::auth_service;

    fn user(role: &str) -> User {
        let now = Utc::now();
        User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            role: role.to_string(),
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
            failed_login_attempts: 0,
            locked_until: None,
        }
    }

    #[test]
    fn test_role_matrix() {
        assert!(UserRole::Admin.can(Resource::Users, Action::Delete));
        assert!(UserRole::Manager.can(Resource::Transfers, Action::Approve));
        assert!(UserRole::Manager.can(Resource::Users, Action::View));
        assert!(!UserRole::Manager.can(Resource::Users, Action::Create));

        assert!(UserRole::Staff.can(Resource::SalesOrders, Action::Create));
        assert!(!UserRole::Staff.can(Resource::SalesOrders, Action::Delete));
        assert!(!UserRole::Staff.can(Resource::Transfers, Action::Approve));
        assert!(UserRole::Staff.can(Resource::Accounting, Action::View));
        assert!(!UserRole::Staff.can(Resource::Accounting, Action::Create));

        assert!(UserRole::Viewer.can(Resource::Inventory, Action::View));
        assert!(!UserRole::Viewer.can(Resource::Inventory, Action::Edit));
        assert!(!UserRole::Viewer.can(Resource::AuditLog, Action::View));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(UserRole::from_str("MANAGER"), Some(UserRole::Manager));
        assert_eq!(UserRole::from_str("researcher"), None);
        assert_eq!(user("unknown").get_role(), UserRole::Viewer);
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("Passw0rd").is_ok());
        assert!(validate_password_strength("password1").is_err());
        assert!(validate_password_strength("PASSWORD1").is_err());
        assert!(validate_password_strength("Short1").is_err());
    }

    #[test]
    fn test_hash_and_verify() {
        let svc = auth_service();
        let hashed = svc.hash_password("Secret123").unwrap();
        assert!(svc.verify_password("Secret123", &hashed).unwrap());
        assert!(!svc.verify_password("Secret124", &hashed).unwrap());
        assert!(svc.hash_password("weak").is_err());
    }

    #[test]
    fn test_token_round_trip() {
        let svc = auth_service();
        let token = svc.generate_token(&user("staff")).unwrap();
        let claims = svc.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, UserRole::Staff);
        assert!(svc.verify_token("not-a-token").is_err());
    }

    #[test]
    fn test_lock_state() {
        let mut u = user("staff");
        assert!(!u.is_locked());
        u.locked_until = Some(Utc::now() + Duration::minutes(5));
        assert!(u.is_locked());
        u.locked_until = Some(Utc::now() - Duration::minutes(5));
        assert!(!u.is_locked());
    }
}
