// src/routes/auth_routes.rs

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, validate_new_password, verify_password},
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::*,
};

const REMEMBER_ME_TTL_HOURS: i64 = 24 * 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/change_password", post(change_password))
}

fn profile(user: UserRow, patient_id: Option<uuid::Uuid>) -> UserProfile {
    UserProfile {
        user_id: user.user_id,
        username: user.username,
        display_name: user.display_name,
        role: Role::from_i16(user.roles).map(Role::as_str).unwrap_or("unknown").to_string(),
        patient_id,
    }
}

async fn load_user(state: &AppState, user_id: uuid::Uuid) -> Result<Option<UserRow>, ApiError> {
    sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM app_user
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)
}

async fn linked_patient(state: &AppState, user_id: uuid::Uuid) -> Result<Option<uuid::Uuid>, ApiError> {
    sqlx::query_scalar(r#"SELECT patient_id FROM patient WHERE user_id = $1 AND is_deleted = false"#)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)
}

/// The account state is only revealed to a caller who knows the password.
pub fn check_login(password_ok: bool, is_active: bool) -> Result<(), ApiError> {
    if !password_ok {
        return Err(ApiError::invalid_credentials());
    }
    if !is_active {
        return Err(ApiError::Forbidden("ACCOUNT_DISABLED", messages::ACCOUNT_DISABLED.into()));
    }
    Ok(())
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginResponseData>>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM app_user
        WHERE username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    let password_ok = verify_password(&req.password, &user.password_hash);
    if !password_ok {
        tracing::info!(username, "failed login");
    }
    check_login(password_ok, user.is_active)?;

    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);

    let ttl_hours = if req.remember_me.unwrap_or(false) {
        REMEMBER_ME_TTL_HOURS
    } else {
        state.session_ttl_hours
    };
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, device_name, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(user.user_id)
    .bind(&token_hash)
    .bind(req.device_name.as_deref())
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(user_id = %user.user_id, session = %session.session_token_id, "login");

    let patient_id = linked_patient(&state, user.user_id).await?;
    Ok(Json(ApiOk::new(LoginResponseData {
        access_token,
        expires_at: session.expires_at,
        user: profile(user, patient_id),
    })))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeResponseData>>, ApiError> {
    let user = load_user(&state, auth.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(ApiError::session_expired)?;

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    let patient_id = linked_patient(&state, user.user_id).await?;
    Ok(Json(ApiOk::new(MeResponseData {
        user: profile(user, patient_id),
        session: SessionInfo {
            session_token_id: session.session_token_id,
            expires_at: session.expires_at,
        },
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(OkData::ok()))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub fn validate_change_password(req: &ChangePasswordRequest) -> Result<(), ApiError> {
    if req.old_password.is_empty() || req.new_password.is_empty() {
        return Err(ApiError::validation("old_password and new_password are required"));
    }
    validate_new_password(&req.new_password)?;
    if req.old_password == req.new_password {
        return Err(ApiError::validation("new password must differ from the old one"));
    }
    Ok(())
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    validate_change_password(&req)?;

    let current_hash: String = sqlx::query_scalar(
        r#"
        SELECT password_hash
        FROM app_user
        WHERE user_id = $1
          AND is_active = true
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.old_password, &current_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE app_user
        SET password_hash = $1, updated_at = now()
        WHERE user_id = $2
        "#,
    )
    .bind(new_hash)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    // keep the current session, drop the rest
    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(user_id = %auth.user_id, "password changed");
    Ok(Json(OkData::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(old: &str, new: &str) -> ChangePasswordRequest {
        ChangePasswordRequest {
            old_password: old.into(),
            new_password: new.into(),
        }
    }

    #[test]
    fn change_password_requires_both_fields() {
        assert!(validate_change_password(&req("", "crown2026")).is_err());
        assert!(validate_change_password(&req("crown2025", "")).is_err());
    }

    #[test]
    fn change_password_rejects_reuse_and_weak_passwords() {
        assert!(validate_change_password(&req("crown2025", "crown2025")).is_err());
        assert!(validate_change_password(&req("crown2025", "weak")).is_err());
        assert!(validate_change_password(&req("crown2025", "crown2026")).is_ok());
    }

    #[test]
    fn wrong_password_hides_a_disabled_account() {
        assert!(matches!(check_login(false, false), Err(ApiError::Unauthorized("INVALID_CREDENTIALS", _))));
        assert!(matches!(check_login(false, true), Err(ApiError::Unauthorized("INVALID_CREDENTIALS", _))));
        assert!(matches!(check_login(true, false), Err(ApiError::Forbidden("ACCOUNT_DISABLED", _))));
        assert!(check_login(true, true).is_ok());
    }
}
