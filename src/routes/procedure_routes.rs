// src/routes/procedure_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, Role},
    validation,
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProcedureRow {
    pub procedure_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub duration_minutes: i32,
    pub warranty_months: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PROCEDURE_COLUMNS: &str =
    "procedure_id, name, description, price_cents, duration_minutes, warranty_months, is_active, created_at, updated_at";

pub const MAX_WARRANTY_MONTHS: i32 = 120;

#[derive(Debug, Deserialize)]
pub struct CreateProcedureRequest {
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub duration_minutes: i32,
    pub warranty_months: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProcedureRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<i32>,
    pub warranty_months: Option<i32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/procedures", get(list_procedures).post(create_procedure))
        .route("/procedures/{procedure_id}", patch(update_procedure))
        .route("/procedures/{procedure_id}/deactivate", post(deactivate_procedure))
}

fn validate_warranty_months(m: i32) -> Result<i32, ApiError> {
    if !(0..=MAX_WARRANTY_MONTHS).contains(&m) {
        return Err(ApiError::validation(format!(
            "warranty_months must be 0..{MAX_WARRANTY_MONTHS}"
        )));
    }
    Ok(m)
}

pub fn validate_create_procedure(req: &CreateProcedureRequest) -> Result<(), ApiError> {
    validation::required_text(&req.name, "name", 128)?;
    validation::optional_text(req.description.as_deref(), "description", 2000)?;
    validation::non_negative_amount(req.price_cents, "price_cents")?;
    validation::positive_i32(req.duration_minutes, "duration_minutes")?;
    req.warranty_months.map(validate_warranty_months).transpose()?;
    Ok(())
}

pub fn validate_update_procedure(req: &UpdateProcedureRequest) -> Result<(), ApiError> {
    validation::optional_text(req.name.as_deref(), "name", 128)?;
    validation::optional_text(req.description.as_deref(), "description", 2000)?;
    if let Some(p) = req.price_cents {
        validation::non_negative_amount(p, "price_cents")?;
    }
    if let Some(d) = req.duration_minutes {
        validation::positive_i32(d, "duration_minutes")?;
    }
    req.warranty_months.map(validate_warranty_months).transpose()?;
    Ok(())
}

/// Active procedure or 404.
pub async fn load_active_procedure(state: &AppState, procedure_id: Uuid) -> Result<ProcedureRow, ApiError> {
    sqlx::query_as::<_, ProcedureRow>(&format!(
        "SELECT {PROCEDURE_COLUMNS} FROM procedure WHERE procedure_id = $1 AND is_active = true"
    ))
    .bind(procedure_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::PROCEDURE_NOT_FOUND))
}

pub async fn list_procedures(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<ProcedureRow>>>, ApiError> {
    let rows = sqlx::query_as::<_, ProcedureRow>(&format!(
        r#"
        SELECT {PROCEDURE_COLUMNS}
        FROM procedure
        WHERE is_active = true
        ORDER BY name ASC
        "#
    ))
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn create_procedure(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateProcedureRequest>,
) -> Result<Json<ApiOk<ProcedureRow>>, ApiError> {
    auth.require(Role::MANAGERS)?;
    validate_create_procedure(&req)?;

    let row = sqlx::query_as::<_, ProcedureRow>(&format!(
        r#"
        INSERT INTO procedure (name, description, price_cents, duration_minutes, warranty_months, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        RETURNING {PROCEDURE_COLUMNS}
        "#
    ))
    .bind(req.name.trim())
    .bind(req.description.as_deref().map(str::trim).filter(|s| !s.is_empty()))
    .bind(req.price_cents)
    .bind(req.duration_minutes)
    .bind(req.warranty_months)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(procedure_id = %row.procedure_id, "procedure created");
    Ok(Json(ApiOk::new(row)))
}

pub async fn update_procedure(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(procedure_id): Path<Uuid>,
    Json(req): Json<UpdateProcedureRequest>,
) -> Result<Json<ApiOk<ProcedureRow>>, ApiError> {
    auth.require(Role::MANAGERS)?;
    validate_update_procedure(&req)?;

    let row = sqlx::query_as::<_, ProcedureRow>(&format!(
        r#"
        UPDATE procedure
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            price_cents = COALESCE($4, price_cents),
            duration_minutes = COALESCE($5, duration_minutes),
            warranty_months = COALESCE($6, warranty_months),
            updated_by = $7,
            updated_at = now()
        WHERE procedure_id = $1
        RETURNING {PROCEDURE_COLUMNS}
        "#
    ))
    .bind(procedure_id)
    .bind(req.name.as_deref().map(str::trim).filter(|s| !s.is_empty()))
    .bind(req.description.as_deref().map(str::trim).filter(|s| !s.is_empty()))
    .bind(req.price_cents)
    .bind(req.duration_minutes)
    .bind(req.warranty_months)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::PROCEDURE_NOT_FOUND))?;

    Ok(Json(ApiOk::new(row)))
}

pub async fn deactivate_procedure(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(procedure_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(Role::MANAGERS)?;

    let res = sqlx::query(
        r#"
        UPDATE procedure
        SET is_active = false, updated_by = $2, updated_at = now()
        WHERE procedure_id = $1
        "#,
    )
    .bind(procedure_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found(messages::PROCEDURE_NOT_FOUND));
    }
    Ok(Json(OkData::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> CreateProcedureRequest {
        CreateProcedureRequest {
            name: "Porcelain crown".into(),
            description: None,
            price_cents: 350_000_000,
            duration_minutes: 60,
            warranty_months: Some(60),
        }
    }

    #[test]
    fn create_accepts_valid_procedure() {
        assert!(validate_create_procedure(&req()).is_ok());
    }

    #[test]
    fn duration_must_be_positive() {
        let mut r = req();
        r.duration_minutes = 0;
        let err = validate_create_procedure(&r).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m.contains(messages::MSG95)));
    }

    #[test]
    fn price_and_warranty_bounds() {
        let mut r = req();
        r.price_cents = -1;
        assert!(validate_create_procedure(&r).is_err());

        let mut r = req();
        r.warranty_months = Some(121);
        assert!(validate_create_procedure(&r).is_err());

        let mut r = req();
        r.warranty_months = None;
        assert!(validate_create_procedure(&r).is_ok());
    }

    #[test]
    fn update_checks_only_supplied_fields() {
        let empty = UpdateProcedureRequest {
            name: None,
            description: None,
            price_cents: None,
            duration_minutes: None,
            warranty_months: None,
        };
        assert!(validate_update_procedure(&empty).is_ok());

        let bad = UpdateProcedureRequest {
            duration_minutes: Some(-5),
            ..empty
        };
        assert!(validate_update_procedure(&bad).is_err());
    }
}
