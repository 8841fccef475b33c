// src/routes/user_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{hash_password, validate_new_password},
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, Role},
    validation,
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserPublicRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub roles: i16,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const USER_COLUMNS: &str = "user_id, username, display_name, email, phone, roles, is_active, created_at";

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<i16>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub display_name: String,
    pub password: String,
    pub roles: i16,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub roles: Option<i16>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/dentists", get(list_dentists))
        .route("/assistants", get(list_assistants))
        .route("/{user_id}", get(get_user).patch(update_user))
        .route("/{user_id}/disable", post(disable_user))
        .route("/{user_id}/enable", post(enable_user))
}

/// Active account holding `role`, or the given not-found message.
pub async fn load_active_with_role(
    state: &AppState,
    user_id: Uuid,
    role: Role,
    not_found: &str,
) -> Result<UserPublicRow, ApiError> {
    let user = fetch_user(state, user_id).await?;
    match user {
        Some(u) if u.is_active && u.roles == role.as_i16() => Ok(u),
        _ => Err(ApiError::not_found(not_found)),
    }
}

async fn fetch_user(state: &AppState, user_id: Uuid) -> Result<Option<UserPublicRow>, ApiError> {
    sqlx::query_as::<_, UserPublicRow>(&format!(
        "SELECT {USER_COLUMNS} FROM app_user WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)
}

fn validate_username(username: &str) -> Result<&str, ApiError> {
    let u = username.trim();
    if !(3..=64).contains(&u.len()) {
        return Err(ApiError::validation("username must be 3..64 characters"));
    }
    if !u.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(ApiError::validation("username may only contain letters, digits, '.', '_' and '-'"));
    }
    Ok(u)
}

fn validate_role(role: i16) -> Result<Role, ApiError> {
    Role::from_i16(role).ok_or_else(|| ApiError::validation("roles must be 0..5"))
}

/// Normalized (username, display_name, role, email, phone).
pub fn validate_create_user(
    req: &CreateUserRequest,
) -> Result<(String, String, Role, Option<String>, Option<String>), ApiError> {
    let username = validate_username(&req.username)?;
    let display_name = validation::required_text(&req.display_name, "display_name", 128)?;
    let role = validate_role(req.roles)?;
    validate_new_password(&req.password)?;
    let email = req
        .email
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(validation::email)
        .transpose()?
        .map(str::to_string);
    let phone = req
        .phone
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(validation::phone_number)
        .transpose()?;
    Ok((username.to_string(), display_name.to_string(), role, email, phone))
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListUsersQuery>,
) -> Result<Json<ApiOk<Vec<UserPublicRow>>>, ApiError> {
    auth.require(Role::MANAGERS)?;

    if let Some(r) = q.role {
        validate_role(r)?;
    }

    let users = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM app_user
        WHERE ($1::smallint IS NULL OR roles = $1)
        ORDER BY created_at DESC
        LIMIT 200
        "#
    ))
    .bind(q.role)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(users)))
}

async fn list_active_by_role(state: &AppState, role: Role) -> Result<Vec<UserPublicRow>, ApiError> {
    sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM app_user
        WHERE roles = $1 AND is_active = true
        ORDER BY display_name ASC
        "#
    ))
    .bind(role.as_i16())
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

pub async fn list_dentists(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<UserPublicRow>>>, ApiError> {
    auth.require(Role::STAFF)?;
    Ok(Json(ApiOk::new(list_active_by_role(&state, Role::Dentist).await?)))
}

pub async fn list_assistants(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<UserPublicRow>>>, ApiError> {
    auth.require(Role::STAFF)?;
    Ok(Json(ApiOk::new(list_active_by_role(&state, Role::Assistant).await?)))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    auth.require(Role::MANAGERS)?;
    let user = fetch_user(&state, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found(messages::USER_NOT_FOUND))?;
    Ok(Json(ApiOk::new(user)))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    auth.require(&[Role::Admin])?;

    let (username, display_name, role, email, phone) = validate_create_user(&req)?;
    let password_hash = hash_password(&req.password)?;

    let user = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        INSERT INTO app_user (username, display_name, email, phone, password_hash, roles)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(&username)
    .bind(&display_name)
    .bind(email)
    .bind(phone)
    .bind(password_hash)
    .bind(role.as_i16())
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(user_id = %user.user_id, role = role.as_str(), "user created");
    Ok(Json(ApiOk::new(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    auth.require(&[Role::Admin])?;

    let display_name = validation::optional_text(req.display_name.as_deref(), "display_name", 128)?;
    let role = req.roles.map(validate_role).transpose()?;
    let email = req
        .email
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(validation::email)
        .transpose()?;
    let phone = req
        .phone
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(validation::phone_number)
        .transpose()?;

    let user = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        UPDATE app_user
        SET display_name = COALESCE($2, display_name),
            roles = COALESCE($3, roles),
            email = COALESCE($4, email),
            phone = COALESCE($5, phone),
            updated_at = now()
        WHERE user_id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(display_name)
    .bind(role.map(Role::as_i16))
    .bind(email)
    .bind(phone)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::USER_NOT_FOUND))?;

    Ok(Json(ApiOk::new(user)))
}

pub async fn disable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(&[Role::Admin])?;
    if user_id == auth.user_id {
        return Err(ApiError::validation("you cannot disable your own account"));
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let res = sqlx::query(r#"UPDATE app_user SET is_active = false, updated_at = now() WHERE user_id = $1"#)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    if res.rows_affected() == 0 {
        return Err(ApiError::not_found(messages::USER_NOT_FOUND));
    }

    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1 AND revoked_at IS NULL
        "#,
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%user_id, "user disabled");
    Ok(Json(OkData::ok()))
}

pub async fn enable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(&[Role::Admin])?;

    let res = sqlx::query(r#"UPDATE app_user SET is_active = true, updated_at = now() WHERE user_id = $1"#)
        .bind(user_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;
    if res.rows_affected() == 0 {
        return Err(ApiError::not_found(messages::USER_NOT_FOUND));
    }

    Ok(Json(OkData::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> CreateUserRequest {
        CreateUserRequest {
            username: " dr.lan ".into(),
            display_name: "Dr. Lan".into(),
            password: "implant77".into(),
            roles: Role::Dentist.as_i16(),
            email: Some("lan@clinic.vn".into()),
            phone: None,
        }
    }

    #[test]
    fn valid_user_is_normalized() {
        let (username, display, role, email, phone) = validate_create_user(&req()).unwrap();
        assert_eq!(username, "dr.lan");
        assert_eq!(display, "Dr. Lan");
        assert_eq!(role, Role::Dentist);
        assert_eq!(email.as_deref(), Some("lan@clinic.vn"));
        assert_eq!(phone, None);
    }

    #[test]
    fn rejects_bad_username_role_and_password() {
        let mut r = req();
        r.username = "ab".into();
        assert!(validate_create_user(&r).is_err());

        let mut r = req();
        r.username = "dr lan".into();
        assert!(validate_create_user(&r).is_err());

        let mut r = req();
        r.roles = 9;
        assert!(validate_create_user(&r).is_err());

        let mut r = req();
        r.password = "short".into();
        assert!(validate_create_user(&r).is_err());
    }
}
