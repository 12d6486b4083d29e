// src/auth_handlers.rs - Authentication and user management handlers

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use chrono::{Duration, Utc};
use serde::{Serialize, Deserialize};

use crate::handlers::ApiResponse;
use crate::auth::{
    AuthService, User, LoginRequest, ChangePasswordRequest, LoginResponse, UserInfo,
    UserRole, Resource, Action, get_current_user, check_permission,
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

// ======== REQUEST STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub is_active: Option<bool>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeUserPasswordRequest {
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

/// Request for admin to create a new user
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "Role is required"))]
    pub role: String,
}

// ======== PERMISSION DEFINITIONS ========

/// Permission strings (`create_sales_orders`, `view_inventory`, ...) granted to a role.
pub fn get_role_permissions(role: &UserRole) -> Vec<String> {
    let mut permissions = Vec::new();
    for resource in Resource::all() {
        for action in Action::all() {
            if role.can(resource, action) {
                permissions.push(format!("{}_{}", action.as_str(), resource.as_str()));
            }
        }
    }
    permissions
}

fn parse_role(role: &str) -> ApiResult<UserRole> {
    UserRole::from_str(role).ok_or_else(|| ApiError::BadRequest(format!(
        "Invalid role '{}'. Valid roles: {}",
        role,
        UserRole::all_role_strings().join(", ")
    )))
}

// ======== AUTH HANDLERS ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let auth_config = &app_state.config.auth;

    let mut user = User::find_by_username(&app_state.db_pool, &request.username).await
        .map_err(|_| ApiError::AuthError("Invalid username or password".to_string()))?;

    if !user.is_active {
        return Err(ApiError::AuthError("Account is disabled".to_string()));
    }

    if user.is_locked() {
        return Err(ApiError::AuthError("Account is temporarily locked. Try again later.".to_string()));
    }

    if !auth_service.verify_password(&request.password, &user.password_hash)? {
        user.increment_failed_attempts(&app_state.db_pool).await?;

        if i64::from(user.failed_login_attempts) >= auth_config.max_login_attempts {
            user.lock_for_duration(
                &app_state.db_pool,
                Duration::minutes(auth_config.lockout_duration_minutes),
            ).await?;
            log::warn!("User {} locked after {} failed logins", user.username, user.failed_login_attempts);
            return Err(ApiError::AuthError(format!(
                "Account locked due to too many failed attempts. Try again in {} minutes.",
                auth_config.lockout_duration_minutes
            )));
        }

        return Err(ApiError::AuthError("Invalid username or password".to_string()));
    }

    user.reset_failed_attempts(&app_state.db_pool).await?;
    user.update_last_login(&app_state.db_pool).await?;

    let token = auth_service.generate_token(&user)?;

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_lifetime_seconds(),
        user: user.clone().into(),
    };

    log::info!("User {} logged in successfully", user.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;

    #[derive(Serialize)]
    struct ProfileResponse {
        #[serde(flatten)]
        user: UserInfo,
        permissions: Vec<String>,
    }

    let response = ProfileResponse {
        permissions: get_role_permissions(&user.get_role()),
        user: user.into(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn change_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<ChangePasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let claims = get_current_user(&http_request)?;

    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;

    user.change_password(
        &app_state.db_pool,
        &request.current_password,
        &request.new_password,
        &auth_service
    ).await?;

    log::info!("User {} changed password", user.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Password changed successfully".to_string(),
    )))
}

// ======== USER MANAGEMENT (ADMIN) ========

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can(Resource::Users, Action::View))?;

    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&app_state.db_pool)
        .await?;

    let user_infos: Vec<UserInfo> = users.into_iter().map(|u| u.into()).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_infos)))
}

pub async fn get_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can(Resource::Users, Action::View))?;

    let user = User::find_by_id(&app_state.db_pool, &user_id).await?;
    let user_info: UserInfo = user.into();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_info)))
}

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<CreateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    request.validate()?;
    let role = parse_role(&request.role)?;

    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM users WHERE username = ? OR email = ?"
    )
    .bind(&request.username)
    .bind(&request.email)
    .fetch_optional(&app_state.db_pool)
    .await?;

    if existing.is_some() {
        return Err(ApiError::Conflict(format!(
            "Username '{}' or email '{}' already exists",
            request.username, request.email
        )));
    }

    let user = User::create(
        &app_state.db_pool,
        &request.username,
        &request.email,
        &request.password,
        role.clone(),
        &auth_service,
    ).await?;

    log::info!("Admin {} created user {} with role {}", claims.username, request.username, role);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        UserInfo::from(user),
        "User created successfully".to_string(),
    )))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    request.validate()?;

    let role = request.role.as_deref().map(parse_role).transpose()?;

    if user_id == claims.sub {
        if let Some(ref role) = role {
            if *role != claims.role {
                return Err(ApiError::BadRequest("Cannot change your own role".to_string()));
            }
        }
        if request.is_active == Some(false) {
            return Err(ApiError::BadRequest("Cannot deactivate your own account".to_string()));
        }
    }

    let result = sqlx::query(
        r#"UPDATE users SET
            role = COALESCE(?, role),
            is_active = COALESCE(?, is_active),
            email = COALESCE(?, email),
            updated_at = ?
        WHERE id = ?"#
    )
        .bind(role.as_ref().map(|r| r.as_str()))
        .bind(request.is_active)
        .bind(&request.email)
        .bind(Utc::now())
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    log::info!("Admin {} updated user {}", claims.username, user_id);

    let user = User::find_by_id(&app_state.db_pool, &user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        UserInfo::from(user),
        "User updated successfully".to_string(),
    )))
}

pub async fn change_user_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    path: web::Path<String>,
    request: web::Json<ChangeUserPasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    request.validate()?;

    let new_password_hash = auth_service.hash_password(&request.new_password)?;

    // also lifts any lockout
    let result = sqlx::query(
        "UPDATE users SET password_hash = ?, updated_at = ?, failed_login_attempts = 0, locked_until = NULL WHERE id = ?"
    )
        .bind(&new_password_hash)
        .bind(Utc::now())
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() > 0 {
        log::info!("Admin {} changed password for user {}", claims.username, user_id);
        Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            (),
            "Password changed successfully".to_string(),
        )))
    } else {
        Err(ApiError::NotFound("User not found".to_string()))
    }
}

pub async fn delete_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    if user_id == claims.sub {
        return Err(ApiError::BadRequest("Cannot delete your own account".to_string()));
    }

    let admin_count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM users WHERE role = 'admin' AND is_active = 1"
    )
    .fetch_one(&app_state.db_pool)
    .await?;

    let target_user = User::find_by_id(&app_state.db_pool, &user_id).await?;

    if target_user.get_role() == UserRole::Admin && admin_count.0 <= 1 {
        return Err(ApiError::Conflict("Cannot delete the last admin user".to_string()));
    }

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Admin {} deleted user {}", claims.username, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "User deleted successfully".to_string(),
    )))
}

pub async fn get_roles(
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can(Resource::Users, Action::View))?;

    #[derive(Serialize)]
    struct RoleInfo {
        id: &'static str,
        name: &'static str,
        description: &'static str,
        permissions: Vec<String>,
    }

    let roles: Vec<RoleInfo> = UserRole::all_roles()
        .iter()
        .map(|role| RoleInfo {
            id: role.as_str(),
            name: role.display_name(),
            description: role.description(),
            permissions: get_role_permissions(role),
        })
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(roles)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::auth_service;
    use crate::handlers::test_support::app_state;

    #[test]
    fn test_role_permissions() {
        let admin = get_role_permissions(&UserRole::Admin);
        assert!(admin.contains(&"delete_users".to_string()));
        assert_eq!(admin.len(), Resource::all().len() * Action::all().len());

        let viewer = get_role_permissions(&UserRole::Viewer);
        assert!(viewer.contains(&"view_sales_orders".to_string()));
        assert!(viewer.iter().all(|p| p.starts_with("view_")));
    }

    #[actix_rt::test]
    async fn test_login_locks_after_repeated_failures() {
        let state = app_state().await;
        let svc = web::Data::new(Arc::new(auth_service()));
        User::create(&state.db_pool, "clerk", "clerk@example.com", "Clerk1234", UserRole::Staff, &svc)
            .await
            .unwrap();

        let bad = || web::Json(LoginRequest { username: "clerk".to_string(), password: "Wrong1234".to_string() });
        let max = state.config.auth.max_login_attempts;
        for _ in 0..max - 1 {
            let err = login(state.clone(), svc.clone(), bad()).await.unwrap_err();
            assert!(matches!(err, ApiError::AuthError(ref m) if m.contains("Invalid")));
        }
        let err = login(state.clone(), svc.clone(), bad()).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthError(ref m) if m.contains("locked")));

        // correct password is refused while locked
        let good = web::Json(LoginRequest { username: "clerk".to_string(), password: "Clerk1234".to_string() });
        assert!(login(state.clone(), svc.clone(), good).await.is_err());
    }

    #[actix_rt::test]
    async fn test_login_success_resets_counter() {
        let state = app_state().await;
        let svc = web::Data::new(Arc::new(auth_service()));
        User::create(&state.db_pool, "boss", "boss@example.com", "Boss12345", UserRole::Manager, &svc)
            .await
            .unwrap();

        let wrong = web::Json(LoginRequest { username: "boss".to_string(), password: "Nope12345".to_string() });
        assert!(login(state.clone(), svc.clone(), wrong).await.is_err());

        let good = web::Json(LoginRequest { username: "boss".to_string(), password: "Boss12345".to_string() });
        let resp = login(state.clone(), svc.clone(), good).await.unwrap();
        assert_eq!(resp.status(), actix_web::http::StatusCode::OK);

        let user = User::find_by_username(&state.db_pool, "boss").await.unwrap();
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.last_login.is_some());
    }
}
