// src/routes/treatment_progress_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, patch},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    notifications::{self, Notice},
    routes::treatment_record_routes::{load_record, RECORD_CANCELED},
    validation,
};

/*
Progress status:
0 pending
1 in progress
2 completed
3 canceled
*/
pub const PROGRESS_PENDING: i16 = 0;
pub const PROGRESS_COMPLETED: i16 = 2;
pub const PROGRESS_CANCELED: i16 = 3;

const PROGRESS_WRITERS: &[Role] = &[Role::Dentist, Role::Assistant];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProgressRow {
    pub progress_id: Uuid,
    pub treatment_record_id: Uuid,
    pub progress_name: String,
    pub progress_content: Option<String>,
    pub status: i16,
    pub duration_minutes: Option<i32>,
    pub end_time: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PROGRESS_COLUMNS: &str = "progress_id, treatment_record_id, progress_name, progress_content, status, duration_minutes, end_time, note, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress_name: String,
    pub progress_content: Option<String>,
    pub status: Option<i16>,
    pub duration_minutes: Option<i32>,
    pub end_time: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProgressRequest {
    pub progress_name: Option<String>,
    pub progress_content: Option<String>,
    pub status: Option<i16>,
    pub duration_minutes: Option<i32>,
    pub end_time: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/treatment_records/{treatment_record_id}/progress",
            get(list_progress).post(create_progress),
        )
        .route("/treatment_progress/{progress_id}", patch(update_progress))
}

pub fn validate_progress(
    name: &str,
    status: i16,
    duration_minutes: Option<i32>,
    end_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    validation::required_text(name, "progress_name", 128)?;
    if !(PROGRESS_PENDING..=PROGRESS_CANCELED).contains(&status) {
        return Err(ApiError::validation(messages::INVALID_STATUS));
    }
    if let Some(d) = duration_minutes {
        validation::positive_i32(d, "duration_minutes")?;
    }
    if let Some(end) = end_time {
        validation::not_in_past(end, now)?;
    }
    Ok(())
}

/// Progress cannot be added to or edited on a canceled record, and a completed entry is final.
pub fn check_progress_writable(record_status: i16, progress_status: Option<i16>) -> Result<(), ApiError> {
    if record_status == RECORD_CANCELED {
        return Err(ApiError::validation(messages::RECORD_CANCELED));
    }
    if progress_status == Some(PROGRESS_COMPLETED) {
        return Err(ApiError::validation(messages::PROGRESS_LOCKED));
    }
    Ok(())
}

async fn load_progress(state: &AppState, progress_id: Uuid) -> Result<ProgressRow, ApiError> {
    sqlx::query_as::<_, ProgressRow>(&format!(
        "SELECT {PROGRESS_COLUMNS} FROM treatment_progress WHERE progress_id = $1 AND is_deleted = false"
    ))
    .bind(progress_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::PROGRESS_NOT_FOUND))
}

/// Progress entries of several records at once, oldest first.
pub async fn list_progress_for_records(state: &AppState, record_ids: &[Uuid]) -> Result<Vec<ProgressRow>, ApiError> {
    if record_ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_as::<_, ProgressRow>(&format!(
        r#"
        SELECT {PROGRESS_COLUMNS}
        FROM treatment_progress
        WHERE treatment_record_id = ANY($1)
          AND is_deleted = false
        ORDER BY created_at ASC
        "#
    ))
    .bind(record_ids)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

pub async fn create_progress(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(treatment_record_id): Path<Uuid>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<ApiOk<ProgressRow>>, ApiError> {
    auth.require(PROGRESS_WRITERS)?;

    let status = req.status.unwrap_or(PROGRESS_PENDING);
    validate_progress(&req.progress_name, status, req.duration_minutes, req.end_time, Utc::now())?;
    let content = validation::optional_text(req.progress_content.as_deref(), "progress_content", 2000)?;
    let note = validation::optional_text(req.note.as_deref(), "note", 2000)?;

    let record = load_record(&state, treatment_record_id).await?;
    check_progress_writable(record.status, None)?;

    let row = sqlx::query_as::<_, ProgressRow>(&format!(
        r#"
        INSERT INTO treatment_progress (
          treatment_record_id, progress_name, progress_content, status,
          duration_minutes, end_time, note, created_by, updated_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING {PROGRESS_COLUMNS}
        "#
    ))
    .bind(treatment_record_id)
    .bind(req.progress_name.trim())
    .bind(content)
    .bind(status)
    .bind(req.duration_minutes)
    .bind(req.end_time)
    .bind(note)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(progress_id = %row.progress_id, %treatment_record_id, "treatment progress added");

    notifications::dispatch_opt(
        &state,
        record.patient_user_id,
        Notice::new("treatment_progress", messages::NOTIFY_TREATMENT_PROGRESS, row.progress_name.clone())
            .about(treatment_record_id),
    )
    .await;

    Ok(Json(ApiOk::new(row)))
}

pub async fn update_progress(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(progress_id): Path<Uuid>,
    Json(req): Json<UpdateProgressRequest>,
) -> Result<Json<ApiOk<ProgressRow>>, ApiError> {
    auth.require(PROGRESS_WRITERS)?;

    let current = load_progress(&state, progress_id).await?;
    let record = load_record(&state, current.treatment_record_id).await?;
    check_progress_writable(record.status, Some(current.status))?;

    let name = req.progress_name.as_deref().unwrap_or(&current.progress_name);
    let status = req.status.unwrap_or(current.status);
    // an unchanged end time may already be behind us
    let new_end = req.end_time.filter(|t| Some(*t) != current.end_time);
    validate_progress(name, status, req.duration_minutes, new_end, Utc::now())?;
    let content = validation::optional_text(req.progress_content.as_deref(), "progress_content", 2000)?;
    let note = validation::optional_text(req.note.as_deref(), "note", 2000)?;

    let row = sqlx::query_as::<_, ProgressRow>(&format!(
        r#"
        UPDATE treatment_progress
        SET progress_name = $2,
            progress_content = COALESCE($3, progress_content),
            status = $4,
            duration_minutes = COALESCE($5, duration_minutes),
            end_time = COALESCE($6, end_time),
            note = COALESCE($7, note),
            updated_by = $8,
            updated_at = now()
        WHERE progress_id = $1
        RETURNING {PROGRESS_COLUMNS}
        "#
    ))
    .bind(progress_id)
    .bind(name.trim())
    .bind(content)
    .bind(status)
    .bind(req.duration_minutes)
    .bind(req.end_time)
    .bind(note)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%progress_id, status, "treatment progress updated");

    notifications::dispatch_opt(
        &state,
        record.patient_user_id,
        Notice::new("treatment_progress", messages::NOTIFY_TREATMENT_PROGRESS, row.progress_name.clone())
            .about(row.treatment_record_id),
    )
    .await;

    Ok(Json(ApiOk::new(row)))
}

pub async fn list_progress(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(treatment_record_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<ProgressRow>>>, ApiError> {
    let record = load_record(&state, treatment_record_id).await?;
    auth.ensure_patient_access(&state, record.patient_id).await?;
    Ok(Json(ApiOk::new(list_progress_for_records(&state, &[treatment_record_id]).await?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::treatment_record_routes::{RECORD_COMPLETED, RECORD_PLANNED};
    use chrono::Duration;

    #[test]
    fn accepts_minimal_progress() {
        assert!(validate_progress("Root canal, visit 1", PROGRESS_PENDING, None, None, Utc::now()).is_ok());
    }

    #[test]
    fn name_is_required_and_bounded() {
        let now = Utc::now();
        assert!(validate_progress(" ", PROGRESS_PENDING, None, None, now).is_err());
        assert!(validate_progress(&"x".repeat(129), PROGRESS_PENDING, None, None, now).is_err());
    }

    #[test]
    fn status_duration_and_end_time() {
        let now = Utc::now();
        assert!(validate_progress("Scaling", 4, None, None, now).is_err());
        assert!(validate_progress("Scaling", PROGRESS_PENDING, Some(0), None, now).is_err());
        assert!(validate_progress("Scaling", PROGRESS_PENDING, Some(30), None, now).is_ok());
        assert!(validate_progress("Scaling", PROGRESS_PENDING, None, Some(now - Duration::hours(1)), now).is_err());
        assert!(validate_progress("Scaling", PROGRESS_COMPLETED, None, Some(now + Duration::hours(1)), now).is_ok());
    }

    #[test]
    fn canceled_records_take_no_progress() {
        let err = check_progress_writable(RECORD_CANCELED, None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m == messages::RECORD_CANCELED));
        let err = check_progress_writable(RECORD_CANCELED, Some(PROGRESS_PENDING)).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m == messages::RECORD_CANCELED));
    }

    #[test]
    fn completed_progress_is_final() {
        let err = check_progress_writable(RECORD_PLANNED, Some(PROGRESS_COMPLETED)).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m == messages::PROGRESS_LOCKED));
        assert!(check_progress_writable(RECORD_PLANNED, Some(PROGRESS_PENDING)).is_ok());
        assert!(check_progress_writable(RECORD_COMPLETED, None).is_ok());
    }
}
