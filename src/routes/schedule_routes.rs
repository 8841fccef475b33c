// src/routes/schedule_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, Role},
    notifications::{self, Notice},
    validation,
};

/*
Shift: 0 morning, 1 afternoon, 2 evening
Status: 0 pending, 1 approved, 2 rejected
*/
pub const SHIFT_EVENING: i16 = 2;

pub const SCHEDULE_PENDING: i16 = 0;
pub const SCHEDULE_APPROVED: i16 = 1;
pub const SCHEDULE_REJECTED: i16 = 2;

pub const MAX_RANGE_DAYS: i64 = 31;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScheduleRow {
    pub schedule_id: Uuid,
    pub dentist_user_id: Uuid,
    pub dentist_name: String,
    pub work_date: NaiveDate,
    pub shift: i16,
    pub status: i16,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SCHEDULE_SELECT: &str = r#"
    SELECT
      s.schedule_id,
      s.dentist_user_id,
      u.display_name AS dentist_name,
      s.work_date,
      s.shift,
      s.status,
      s.note,
      s.created_at,
      s.updated_at
    FROM schedule s
    JOIN app_user u ON u.user_id = s.dentist_user_id
    WHERE s.is_deleted = false
"#;

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub work_date: NaiveDate,
    pub shift: i16,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRangeQuery {
    pub start: String,
    pub days: Option<i64>,
    pub dentist_id: Option<Uuid>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/{schedule_id}", delete(delete_schedule))
        .route("/schedules/{schedule_id}/approve", post(approve_schedule))
        .route("/schedules/{schedule_id}/reject", post(reject_schedule))
}

pub fn validate_schedule(req: &CreateScheduleRequest, today: NaiveDate) -> Result<(), ApiError> {
    validation::date_not_in_past(req.work_date, today)?;
    if !(0..=SHIFT_EVENING).contains(&req.shift) {
        return Err(ApiError::validation("shift must be 0, 1 or 2"));
    }
    validation::optional_text(req.note.as_deref(), "note", 500)?;
    Ok(())
}

/// A dentist removes only their own entries; managers remove any. Decided
/// entries in the past stay as history.
pub fn check_schedule_delete(auth: &AuthContext, row: &ScheduleRow, today: NaiveDate) -> Result<(), ApiError> {
    let owner = auth.is(Role::Dentist) && row.dentist_user_id == auth.user_id;
    if !owner && !Role::MANAGERS.contains(&auth.role) {
        return Err(ApiError::forbidden());
    }
    if row.status != SCHEDULE_PENDING && row.work_date < today {
        return Err(ApiError::validation(messages::DATE_IN_PAST));
    }
    Ok(())
}

fn shift_label(shift: i16) -> &'static str {
    match shift {
        0 => "morning",
        1 => "afternoon",
        _ => "evening",
    }
}

async fn load_schedule(state: &AppState, schedule_id: Uuid) -> Result<ScheduleRow, ApiError> {
    sqlx::query_as::<_, ScheduleRow>(&format!("{SCHEDULE_SELECT} AND s.schedule_id = $1"))
        .bind(schedule_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found(messages::SCHEDULE_NOT_FOUND))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    auth.require(&[Role::Dentist])?;
    validate_schedule(&req, Utc::now().date_naive())?;

    let taken: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1 FROM schedule
          WHERE dentist_user_id = $1 AND work_date = $2 AND shift = $3 AND is_deleted = false
        )
        "#,
    )
    .bind(auth.user_id)
    .bind(req.work_date)
    .bind(req.shift)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;
    if taken {
        return Err(ApiError::conflict(messages::SCHEDULE_DUPLICATE));
    }

    let schedule_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO schedule (dentist_user_id, work_date, shift, note, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $1, $1)
        RETURNING schedule_id
        "#,
    )
    .bind(auth.user_id)
    .bind(req.work_date)
    .bind(req.shift)
    .bind(req.note.as_deref().map(str::trim).filter(|s| !s.is_empty()))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%schedule_id, work_date = %req.work_date, shift = req.shift, "schedule submitted");

    let row = load_schedule(&state, schedule_id).await?;
    notifications::dispatch_to_role(
        &state,
        Role::Owner,
        Notice::new(
            "schedule",
            messages::NOTIFY_SCHEDULE_SUBMITTED,
            format!("{}: {} {}", row.dentist_name, row.work_date, shift_label(row.shift)),
        )
        .about(schedule_id),
    )
    .await;

    Ok(Json(ApiOk::new(row)))
}

async fn decide(state: &AppState, auth: &AuthContext, schedule_id: Uuid, status: i16) -> Result<ScheduleRow, ApiError> {
    auth.require(Role::MANAGERS)?;

    let res = sqlx::query(
        r#"
        UPDATE schedule
        SET status = $2, updated_by = $3, updated_at = now()
        WHERE schedule_id = $1 AND status = $4 AND is_deleted = false
        "#,
    )
    .bind(schedule_id)
    .bind(status)
    .bind(auth.user_id)
    .bind(SCHEDULE_PENDING)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    let row = load_schedule(state, schedule_id).await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::validation(messages::SCHEDULE_NOT_PENDING));
    }

    tracing::info!(%schedule_id, status, "schedule decided");

    let verdict = if status == SCHEDULE_APPROVED { "approved" } else { "rejected" };
    notifications::dispatch(
        state,
        row.dentist_user_id,
        Notice::new(
            "schedule",
            messages::NOTIFY_SCHEDULE_DECIDED,
            format!("{} {}: {verdict}", row.work_date, shift_label(row.shift)),
        )
        .about(schedule_id),
    )
    .await;

    Ok(row)
}

pub async fn approve_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    Ok(Json(ApiOk::new(decide(&state, &auth, schedule_id, SCHEDULE_APPROVED).await?)))
}

pub async fn reject_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    Ok(Json(ApiOk::new(decide(&state, &auth, schedule_id, SCHEDULE_REJECTED).await?)))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let row = load_schedule(&state, schedule_id).await?;
    check_schedule_delete(&auth, &row, Utc::now().date_naive())?;

    sqlx::query(
        r#"
        UPDATE schedule
        SET is_deleted = true, updated_by = $2, updated_at = now()
        WHERE schedule_id = $1
        "#,
    )
    .bind(schedule_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%schedule_id, "schedule deleted");
    Ok(Json(OkData::ok()))
}

pub async fn list_schedules(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ScheduleRangeQuery>,
) -> Result<Json<ApiOk<Vec<ScheduleRow>>>, ApiError> {
    auth.require(Role::STAFF)?;

    let days = q.days.unwrap_or(7);
    if !(1..=MAX_RANGE_DAYS).contains(&days) {
        return Err(ApiError::validation(format!("days must be between 1 and {MAX_RANGE_DAYS}")));
    }
    let start = validation::parse_day(&q.start, "start")?;
    let end = validation::shift_day(start, days, "start")?;

    let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
        r#"
        {SCHEDULE_SELECT}
          AND s.work_date >= $1
          AND s.work_date < $2
          AND ($3::uuid IS NULL OR s.dentist_user_id = $3)
        ORDER BY s.work_date ASC, s.shift ASC, u.display_name ASC
        "#
    ))
    .bind(start)
    .bind(end)
    .bind(q.dentist_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth_context::test_auth;
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn row(dentist: Uuid, work_date: NaiveDate, status: i16) -> ScheduleRow {
        let now = Utc::now();
        ScheduleRow {
            schedule_id: Uuid::new_v4(),
            dentist_user_id: dentist,
            dentist_name: "Dr. Lan".into(),
            work_date,
            shift: 0,
            status,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn schedule_date_and_shift() {
        let ok = CreateScheduleRequest {
            work_date: today(),
            shift: 1,
            note: None,
        };
        assert!(validate_schedule(&ok, today()).is_ok());

        let past = CreateScheduleRequest {
            work_date: today() - Duration::days(1),
            ..ok
        };
        assert!(validate_schedule(&past, today()).is_err());

        let bad_shift = CreateScheduleRequest {
            work_date: today(),
            shift: 3,
            note: None,
        };
        assert!(validate_schedule(&bad_shift, today()).is_err());
    }

    #[test]
    fn dentist_deletes_only_own_schedule() {
        let dentist = test_auth(Role::Dentist);
        let own = row(dentist.user_id, today(), SCHEDULE_PENDING);
        assert!(check_schedule_delete(&dentist, &own, today()).is_ok());

        let other = row(Uuid::new_v4(), today(), SCHEDULE_PENDING);
        assert!(check_schedule_delete(&dentist, &other, today()).is_err());
        assert!(check_schedule_delete(&test_auth(Role::Owner), &other, today()).is_ok());
        assert!(check_schedule_delete(&test_auth(Role::Receptionist), &other, today()).is_err());
    }

    #[test]
    fn past_decided_schedule_is_kept() {
        let owner = test_auth(Role::Owner);
        let yesterday = today() - Duration::days(1);
        assert!(check_schedule_delete(&owner, &row(Uuid::new_v4(), yesterday, SCHEDULE_APPROVED), today()).is_err());
        assert!(check_schedule_delete(&owner, &row(Uuid::new_v4(), yesterday, SCHEDULE_PENDING), today()).is_ok());
        assert!(check_schedule_delete(&owner, &row(Uuid::new_v4(), today(), SCHEDULE_REJECTED), today()).is_ok());
    }
}
