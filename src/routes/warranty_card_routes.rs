// src/routes/warranty_card_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    notifications::{self, Notice},
    routes::{
        procedure_routes::MAX_WARRANTY_MONTHS,
        treatment_record_routes::{load_record, RECORD_COMPLETED},
    },
    validation,
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WarrantyCardRow {
    pub warranty_card_id: Uuid,
    pub treatment_record_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    #[serde(skip_serializing)]
    pub patient_user_id: Option<Uuid>,
    pub procedure_name: String,
    pub tooth_position: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub term_months: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const WARRANTY_SELECT: &str = r#"
    SELECT
      w.warranty_card_id,
      w.treatment_record_id,
      p.patient_id,
      p.full_name AS patient_name,
      p.user_id AS patient_user_id,
      pr.name AS procedure_name,
      tr.tooth_position,
      w.start_date,
      w.end_date,
      w.term_months,
      w.is_active,
      w.created_at,
      w.updated_at
    FROM warranty_card w
    JOIN treatment_record tr ON tr.treatment_record_id = w.treatment_record_id
    JOIN appointment a ON a.appointment_id = tr.appointment_id
    JOIN patient p ON p.patient_id = a.patient_id
    JOIN procedure pr ON pr.procedure_id = tr.procedure_id
"#;

#[derive(Debug, Deserialize)]
pub struct CreateWarrantyRequest {
    pub treatment_record_id: Uuid,
    pub start_date: Option<NaiveDate>,
    pub term_months: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWarrantyRequest {
    pub term_months: i32,
}

#[derive(Debug, Deserialize)]
pub struct ListWarrantyQuery {
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/warranty_cards", get(list_cards).post(create_card))
        .route("/warranty_cards/mine", get(list_my_cards))
        .route("/warranty_cards/{warranty_card_id}", get(get_card).patch(update_card))
        .route("/warranty_cards/{warranty_card_id}/deactivate", post(deactivate_card))
}

/// Explicit term wins, otherwise the procedure's default; one of them must exist.
pub fn resolve_term(requested: Option<i32>, procedure_default: Option<i32>) -> Result<i32, ApiError> {
    let term = requested
        .or(procedure_default)
        .ok_or_else(|| ApiError::validation("term_months is required for this procedure"))?;
    if !(1..=MAX_WARRANTY_MONTHS).contains(&term) {
        return Err(ApiError::validation(format!(
            "term_months must be between 1 and {MAX_WARRANTY_MONTHS}"
        )));
    }
    Ok(term)
}

/// End of coverage; month-end starts clamp to the last day of the target month.
pub fn warranty_end(start: NaiveDate, term_months: i32) -> Result<NaiveDate, ApiError> {
    let months = u32::try_from(term_months).map_err(|_| ApiError::validation(messages::INVALID_NUMBER))?;
    start
        .checked_add_months(Months::new(months))
        .ok_or_else(|| ApiError::validation("warranty end date is out of range"))
}

async fn load_card(state: &AppState, warranty_card_id: Uuid) -> Result<WarrantyCardRow, ApiError> {
    sqlx::query_as::<_, WarrantyCardRow>(&format!("{WARRANTY_SELECT} WHERE w.warranty_card_id = $1"))
        .bind(warranty_card_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found(messages::WARRANTY_CARD_NOT_FOUND))
}

pub async fn create_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateWarrantyRequest>,
) -> Result<Json<ApiOk<WarrantyCardRow>>, ApiError> {
    auth.require(Role::FRONT_DESK)?;

    let record = load_record(&state, req.treatment_record_id).await?;
    if record.status != RECORD_COMPLETED {
        return Err(ApiError::validation(messages::RECORD_NOT_COMPLETED));
    }

    let procedure_default =
        sqlx::query_scalar::<_, Option<i32>>("SELECT warranty_months FROM procedure WHERE procedure_id = $1")
            .bind(record.procedure_id)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .flatten();
    let term_months = resolve_term(req.term_months, procedure_default)?;

    let start_date = req.start_date.unwrap_or(record.treatment_date);
    if start_date < record.treatment_date {
        return Err(ApiError::validation("start_date cannot be before the treatment date"));
    }
    let end_date = warranty_end(start_date, term_months)?;

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM warranty_card WHERE treatment_record_id = $1 AND is_active = true)",
    )
    .bind(record.treatment_record_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;
    if exists {
        return Err(ApiError::conflict(messages::WARRANTY_EXISTS));
    }

    let warranty_card_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO warranty_card (treatment_record_id, start_date, end_date, term_months, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING warranty_card_id
        "#,
    )
    .bind(record.treatment_record_id)
    .bind(start_date)
    .bind(end_date)
    .bind(term_months)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%warranty_card_id, treatment_record_id = %record.treatment_record_id, term_months, "warranty card issued");

    let card = load_card(&state, warranty_card_id).await?;
    notifications::dispatch_opt(
        &state,
        card.patient_user_id,
        Notice::new(
            "warranty_card",
            messages::NOTIFY_WARRANTY_CREATED,
            format!("{} until {}", card.procedure_name, card.end_date),
        )
        .about(warranty_card_id),
    )
    .await;

    Ok(Json(ApiOk::new(card)))
}

pub async fn deactivate_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(warranty_card_id): Path<Uuid>,
) -> Result<Json<ApiOk<WarrantyCardRow>>, ApiError> {
    auth.require(Role::FRONT_DESK)?;

    let card = load_card(&state, warranty_card_id).await?;
    if !card.is_active {
        return Err(ApiError::validation(messages::WARRANTY_INACTIVE));
    }

    sqlx::query(
        r#"
        UPDATE warranty_card
        SET is_active = false, updated_by = $2, updated_at = now()
        WHERE warranty_card_id = $1
        "#,
    )
    .bind(warranty_card_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%warranty_card_id, "warranty card deactivated");

    notifications::dispatch_opt(
        &state,
        card.patient_user_id,
        Notice::new("warranty_card", messages::NOTIFY_WARRANTY_DEACTIVATED, card.procedure_name.clone())
            .about(warranty_card_id),
    )
    .await;

    Ok(Json(ApiOk::new(load_card(&state, warranty_card_id).await?)))
}

pub async fn update_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(warranty_card_id): Path<Uuid>,
    Json(req): Json<UpdateWarrantyRequest>,
) -> Result<Json<ApiOk<WarrantyCardRow>>, ApiError> {
    auth.require(Role::MANAGERS)?;

    let card = load_card(&state, warranty_card_id).await?;
    if !card.is_active {
        return Err(ApiError::validation(messages::WARRANTY_INACTIVE));
    }
    let term_months = resolve_term(Some(req.term_months), None)?;
    let end_date = warranty_end(card.start_date, term_months)?;

    sqlx::query(
        r#"
        UPDATE warranty_card
        SET term_months = $2, end_date = $3, updated_by = $4, updated_at = now()
        WHERE warranty_card_id = $1
        "#,
    )
    .bind(warranty_card_id)
    .bind(term_months)
    .bind(end_date)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(load_card(&state, warranty_card_id).await?)))
}

pub async fn list_cards(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListWarrantyQuery>,
) -> Result<Json<ApiOk<Vec<WarrantyCardRow>>>, ApiError> {
    auth.require(Role::STAFF)?;

    let rows = sqlx::query_as::<_, WarrantyCardRow>(&format!(
        r#"
        {WARRANTY_SELECT}
        WHERE ($1::boolean IS NULL OR w.is_active = $1)
        ORDER BY w.created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(q.active)
    .bind(validation::clamp_limit(q.limit))
    .bind(validation::clamp_offset(q.offset))
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn get_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(warranty_card_id): Path<Uuid>,
) -> Result<Json<ApiOk<WarrantyCardRow>>, ApiError> {
    let card = load_card(&state, warranty_card_id).await?;
    auth.ensure_patient_access(&state, card.patient_id).await?;
    Ok(Json(ApiOk::new(card)))
}

pub async fn list_my_cards(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<WarrantyCardRow>>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient_id = auth.require_linked_patient(&state).await?;

    let rows = sqlx::query_as::<_, WarrantyCardRow>(&format!(
        "{WARRANTY_SELECT} WHERE p.patient_id = $1 ORDER BY w.is_active DESC, w.end_date DESC"
    ))
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn term_falls_back_to_procedure_default() {
        assert_eq!(resolve_term(None, Some(24)).unwrap(), 24);
        assert_eq!(resolve_term(Some(6), Some(24)).unwrap(), 6);
        assert!(resolve_term(None, None).is_err());
    }

    #[test]
    fn term_bounds() {
        assert!(resolve_term(Some(0), None).is_err());
        assert!(resolve_term(Some(121), None).is_err());
        assert!(resolve_term(Some(120), None).is_ok());
    }

    #[test]
    fn end_date_adds_calendar_months() {
        assert_eq!(warranty_end(d(2026, 3, 15), 12).unwrap(), d(2027, 3, 15));
        assert_eq!(warranty_end(d(2026, 1, 31), 1).unwrap(), d(2026, 2, 28));
        assert!(warranty_end(d(2026, 1, 1), -1).is_err());
    }
}
