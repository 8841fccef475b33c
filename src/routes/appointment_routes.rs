// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    notifications::{self, Notice},
    routes::{
        patient_routes::{load_patient, PatientRow},
        treatment_progress_routes::{list_progress_for_records, ProgressRow},
        treatment_record_routes::{list_records_for_appointment, TreatmentRecordRow},
        user_routes::load_active_with_role,
    },
    validation,
};

/*
Appointment status:
0 booked
1 confirmed
2 checked in
3 completed
4 canceled
*/
pub const STATUS_BOOKED: i16 = 0;
pub const STATUS_CONFIRMED: i16 = 1;
pub const STATUS_CHECKED_IN: i16 = 2;
pub const STATUS_COMPLETED: i16 = 3;
pub const STATUS_CANCELED: i16 = 4;

pub const MAX_APPOINTMENT_HOURS: i64 = 8;

const BOOKERS: &[Role] = &[Role::Admin, Role::Owner, Role::Receptionist, Role::Patient];
const STATUS_EDITORS: &[Role] = &[Role::Admin, Role::Owner, Role::Receptionist, Role::Dentist];

pub fn can_transition(from: i16, to: i16) -> bool {
    matches!(
        (from, to),
        (STATUS_BOOKED, STATUS_CONFIRMED)
            | (STATUS_BOOKED, STATUS_CANCELED)
            | (STATUS_CONFIRMED, STATUS_CHECKED_IN)
            | (STATUS_CONFIRMED, STATUS_CANCELED)
            | (STATUS_CHECKED_IN, STATUS_COMPLETED)
    )
}

pub fn is_locked(status: i16) -> bool {
    status == STATUS_COMPLETED || status == STATUS_CANCELED
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(create_appointment))
        .route("/appointments/week", get(get_appointments_week))
        .route("/appointments/mine", get(get_my_appointments))
        .route("/appointments/{appointment_id}", get(get_appointment).patch(edit_appointment))
        .route("/appointments/{appointment_id}/status", post(change_status))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/appointments/{appointment_id}/exam_sheet", get(get_exam_sheet))
}

/* ============================================================
   Rows / DTOs
   ============================================================ */

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    #[serde(skip_serializing)]
    pub patient_user_id: Option<Uuid>,
    pub dentist_user_id: Uuid,
    pub dentist_name: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: i16,
    pub content: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const APPOINTMENT_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.patient_id,
      p.full_name AS patient_name,
      p.user_id AS patient_user_id,
      a.dentist_user_id,
      d.display_name AS dentist_name,
      a.start_at,
      a.end_at,
      a.status,
      a.content,
      a.cancel_reason,
      a.created_at,
      a.updated_at
    FROM appointment a
    JOIN patient p ON p.patient_id = a.patient_id
    JOIN app_user d ON d.user_id = a.dentist_user_id
"#;

#[derive(Debug, Serialize)]
pub struct ExamSheetDto {
    pub appointment: AppointmentRow,
    pub patient: PatientRow,
    pub treatment_records: Vec<TreatmentRecordRow>,
    pub progress: Vec<ProgressRow>,
}

/* ============================================================
   Requests
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub dentist_user_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditAppointmentRequest {
    pub dentist_user_id: Option<Uuid>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: i16,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WeekQuery {
    pub start: String,
    pub days: Option<i64>,
    pub dentist_id: Option<Uuid>,
}

/* ============================================================
   Validation
   ============================================================ */

pub fn validate_time_range(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ApiError> {
    validation::not_in_past(start, now)?;
    validation::ordered(start, end)?;
    if end - start > Duration::hours(MAX_APPOINTMENT_HOURS) {
        return Err(ApiError::validation(format!(
            "appointment cannot be longer than {MAX_APPOINTMENT_HOURS} hours"
        )));
    }
    Ok(())
}

/// Which dentist's calendar a week view shows.
pub fn resolve_dentist_scope(auth: &AuthContext, requested: Option<Uuid>) -> Result<Uuid, ApiError> {
    auth.require(Role::STAFF)?;
    match requested {
        Some(id) => Ok(id),
        None if auth.is(Role::Dentist) => Ok(auth.user_id),
        None => Err(ApiError::validation("dentist_id is required")),
    }
}

/// Who may move an appointment to `to`, on top of the transition table.
pub fn check_status_change(auth: &AuthContext, appt: &AppointmentRow, to: i16) -> Result<(), ApiError> {
    auth.require(STATUS_EDITORS)?;
    if !(STATUS_BOOKED..=STATUS_CANCELED).contains(&to) {
        return Err(ApiError::validation(messages::INVALID_STATUS));
    }
    if auth.is(Role::Dentist) && appt.dentist_user_id != auth.user_id {
        return Err(ApiError::forbidden());
    }
    if to == STATUS_COMPLETED && auth.is(Role::Receptionist) {
        return Err(ApiError::forbidden());
    }
    if !can_transition(appt.status, to) {
        return Err(ApiError::validation(messages::INVALID_STATUS_TRANSITION));
    }
    Ok(())
}

fn describe(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!("{} - {}", start.format("%Y-%m-%d %H:%M"), end.format("%H:%M"))
}

/* ============================================================
   Helpers
   ============================================================ */

pub async fn load_appointment(state: &AppState, appointment_id: Uuid) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!("{APPOINTMENT_SELECT} WHERE a.appointment_id = $1"))
        .bind(appointment_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found(messages::APPOINTMENT_NOT_FOUND))
}

async fn ensure_no_overlap(
    state: &AppState,
    dentist_user_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Result<(), ApiError> {
    let overlapping: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1
          FROM appointment
          WHERE dentist_user_id = $1
            AND status <> $4
            AND start_at < $3
            AND end_at > $2
            AND ($5::uuid IS NULL OR appointment_id <> $5)
        )
        "#,
    )
    .bind(dentist_user_id)
    .bind(start)
    .bind(end)
    .bind(STATUS_CANCELED)
    .bind(exclude)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    if overlapping {
        return Err(ApiError::conflict(messages::APPOINTMENT_OVERLAP));
    }
    Ok(())
}

async fn ensure_can_view(state: &AppState, auth: &AuthContext, appt: &AppointmentRow) -> Result<(), ApiError> {
    auth.ensure_patient_access(state, appt.patient_id).await
}

/* ============================================================
   POST /appointments
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    auth.require(BOOKERS)?;

    let patient_id = if auth.is(Role::Patient) {
        let own = auth.require_linked_patient(&state).await?;
        if req.patient_id.is_some_and(|p| p != own) {
            return Err(ApiError::forbidden());
        }
        own
    } else {
        req.patient_id
            .ok_or_else(|| ApiError::validation("patient_id is required"))?
    };

    validate_time_range(req.start_at, req.end_at, Utc::now())?;
    let content = validation::optional_text(req.content.as_deref(), "content", 1000)?;

    load_patient(&state, patient_id).await?;
    load_active_with_role(&state, req.dentist_user_id, Role::Dentist, messages::DENTIST_NOT_FOUND).await?;
    ensure_no_overlap(&state, req.dentist_user_id, req.start_at, req.end_at, None).await?;

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment (patient_id, dentist_user_id, start_at, end_at, status, content, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        RETURNING appointment_id
        "#,
    )
    .bind(patient_id)
    .bind(req.dentist_user_id)
    .bind(req.start_at)
    .bind(req.end_at)
    .bind(STATUS_BOOKED)
    .bind(content)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%appointment_id, %patient_id, dentist = %req.dentist_user_id, "appointment booked");

    let appt = load_appointment(&state, appointment_id).await?;
    notifications::dispatch(
        &state,
        appt.dentist_user_id,
        Notice::new(
            "appointment",
            messages::NOTIFY_APPOINTMENT_BOOKED,
            format!("{}: {}", appt.patient_name, describe(appt.start_at, appt.end_at)),
        )
        .about(appointment_id),
    )
    .await;

    Ok(Json(ApiOk::new(appt)))
}

/* ============================================================
   PATCH /appointments/{id}
   ============================================================ */

pub async fn edit_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<EditAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    auth.require(Role::FRONT_DESK)?;

    let current = load_appointment(&state, appointment_id).await?;
    if is_locked(current.status) {
        return Err(ApiError::validation(messages::APPOINTMENT_LOCKED));
    }

    let start_at = req.start_at.unwrap_or(current.start_at);
    let end_at = req.end_at.unwrap_or(current.end_at);
    let dentist_user_id = req.dentist_user_id.unwrap_or(current.dentist_user_id);
    let time_changed = start_at != current.start_at || end_at != current.end_at;

    if time_changed {
        validate_time_range(start_at, end_at, Utc::now())?;
    }
    let content = validation::optional_text(req.content.as_deref(), "content", 1000)?;

    if dentist_user_id != current.dentist_user_id {
        load_active_with_role(&state, dentist_user_id, Role::Dentist, messages::DENTIST_NOT_FOUND).await?;
    }
    if time_changed || dentist_user_id != current.dentist_user_id {
        ensure_no_overlap(&state, dentist_user_id, start_at, end_at, Some(appointment_id)).await?;
    }

    sqlx::query(
        r#"
        UPDATE appointment
        SET dentist_user_id = $2,
            start_at = $3,
            end_at = $4,
            content = COALESCE($5, content),
            updated_by = $6,
            updated_at = now()
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(dentist_user_id)
    .bind(start_at)
    .bind(end_at)
    .bind(content)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%appointment_id, "appointment edited");

    let appt = load_appointment(&state, appointment_id).await?;
    let notice = Notice::new(
        "appointment",
        messages::NOTIFY_APPOINTMENT_CHANGED,
        format!("{}: {}", appt.patient_name, describe(appt.start_at, appt.end_at)),
    )
    .about(appointment_id);
    notifications::dispatch(&state, appt.dentist_user_id, notice.clone()).await;
    if appt.dentist_user_id != current.dentist_user_id {
        notifications::dispatch(&state, current.dentist_user_id, notice.clone()).await;
    }
    notifications::dispatch_opt(&state, appt.patient_user_id, notice).await;

    Ok(Json(ApiOk::new(appt)))
}

/* ============================================================
   Status changes
   ============================================================ */

pub async fn change_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let current = load_appointment(&state, appointment_id).await?;
    check_status_change(&auth, &current, req.status)?;

    let res = sqlx::query(
        r#"
        UPDATE appointment
        SET status = $2, updated_by = $3, updated_at = now()
        WHERE appointment_id = $1 AND status = $4
        "#,
    )
    .bind(appointment_id)
    .bind(req.status)
    .bind(auth.user_id)
    .bind(current.status)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;
    validation::transition_applied(res.rows_affected())?;

    tracing::info!(%appointment_id, from = current.status, to = req.status, "appointment status changed");

    let appt = load_appointment(&state, appointment_id).await?;
    notifications::dispatch_opt(
        &state,
        appt.patient_user_id,
        Notice::new(
            "appointment",
            messages::NOTIFY_APPOINTMENT_CHANGED,
            describe(appt.start_at, appt.end_at),
        )
        .about(appointment_id),
    )
    .await;

    Ok(Json(ApiOk::new(appt)))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    auth.require(BOOKERS)?;

    let current = load_appointment(&state, appointment_id).await?;
    if auth.is(Role::Patient) {
        let own = auth.require_linked_patient(&state).await?;
        if own != current.patient_id {
            return Err(ApiError::forbidden());
        }
    }
    if !can_transition(current.status, STATUS_CANCELED) {
        return Err(ApiError::validation(messages::INVALID_STATUS_TRANSITION));
    }
    let reason = validation::optional_text(req.reason.as_deref(), "reason", 500)?;

    let res = sqlx::query(
        r#"
        UPDATE appointment
        SET status = $2, cancel_reason = $3, updated_by = $4, updated_at = now()
        WHERE appointment_id = $1 AND status = $5
        "#,
    )
    .bind(appointment_id)
    .bind(STATUS_CANCELED)
    .bind(reason)
    .bind(auth.user_id)
    .bind(current.status)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;
    validation::transition_applied(res.rows_affected())?;

    tracing::info!(%appointment_id, "appointment canceled");

    let appt = load_appointment(&state, appointment_id).await?;
    notifications::dispatch(
        &state,
        appt.dentist_user_id,
        Notice::new(
            "appointment",
            messages::NOTIFY_APPOINTMENT_CANCELED,
            format!("{}: {}", appt.patient_name, describe(appt.start_at, appt.end_at)),
        )
        .about(appointment_id),
    )
    .await;

    Ok(Json(ApiOk::new(appt)))
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let appt = load_appointment(&state, appointment_id).await?;
    ensure_can_view(&state, &auth, &appt).await?;
    Ok(Json(ApiOk::new(appt)))
}

pub async fn get_appointments_week(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<WeekQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    let days = q.days.unwrap_or(7);
    if !(1..=14).contains(&days) {
        return Err(ApiError::validation("days must be between 1 and 14"));
    }
    let start_date = validation::parse_day(&q.start, "start")?;
    let dentist_user_id = resolve_dentist_scope(&auth, q.dentist_id)?;

    let start_ts = start_date.and_time(NaiveTime::MIN).and_utc();
    let end_ts = validation::shift_day(start_date, days, "start")?
        .and_time(NaiveTime::MIN)
        .and_utc();

    let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        {APPOINTMENT_SELECT}
        WHERE a.dentist_user_id = $1
          AND a.start_at >= $2
          AND a.start_at < $3
        ORDER BY a.start_at ASC
        "#
    ))
    .bind(dentist_user_id)
    .bind(start_ts)
    .bind(end_ts)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn get_my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient_id = auth.require_linked_patient(&state).await?;

    let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        {APPOINTMENT_SELECT}
        WHERE a.patient_id = $1
        ORDER BY a.start_at DESC
        LIMIT 200
        "#
    ))
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

/* ============================================================
   GET /appointments/{id}/exam_sheet
   ============================================================ */

pub async fn get_exam_sheet(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<ExamSheetDto>>, ApiError> {
    let appointment = load_appointment(&state, appointment_id).await?;
    ensure_can_view(&state, &auth, &appointment).await?;

    let patient = load_patient(&state, appointment.patient_id).await?;
    let treatment_records = list_records_for_appointment(&state, appointment_id).await?;
    let record_ids: Vec<Uuid> = treatment_records.iter().map(|r| r.treatment_record_id).collect();
    let progress = list_progress_for_records(&state, &record_ids).await?;

    Ok(Json(ApiOk::new(ExamSheetDto {
        appointment,
        patient,
        treatment_records,
        progress,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth_context::test_auth;

    fn appt(dentist: Uuid, status: i16) -> AppointmentRow {
        let now = Utc::now();
        AppointmentRow {
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            patient_name: "Tran Thi Binh".into(),
            patient_user_id: None,
            dentist_user_id: dentist,
            dentist_name: "Dr. Lan".into(),
            start_at: now,
            end_at: now + Duration::minutes(30),
            status,
            content: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn transition_table() {
        assert!(can_transition(STATUS_BOOKED, STATUS_CONFIRMED));
        assert!(can_transition(STATUS_CONFIRMED, STATUS_CHECKED_IN));
        assert!(can_transition(STATUS_CHECKED_IN, STATUS_COMPLETED));
        assert!(can_transition(STATUS_BOOKED, STATUS_CANCELED));
        assert!(!can_transition(STATUS_BOOKED, STATUS_COMPLETED));
        assert!(!can_transition(STATUS_CHECKED_IN, STATUS_CANCELED));
        assert!(!can_transition(STATUS_COMPLETED, STATUS_CANCELED));
        assert!(!can_transition(STATUS_CANCELED, STATUS_BOOKED));
    }

    #[test]
    fn time_range_rules() {
        let now = Utc::now();
        let start = now + Duration::hours(1);
        assert!(validate_time_range(start, start + Duration::minutes(30), now).is_ok());
        assert!(validate_time_range(now - Duration::minutes(5), now + Duration::minutes(30), now).is_err());
        assert!(validate_time_range(start, start, now).is_err());
        assert!(validate_time_range(start, start + Duration::hours(9), now).is_err());
    }

    #[test]
    fn dentist_scope() {
        let dentist = test_auth(Role::Dentist);
        assert_eq!(resolve_dentist_scope(&dentist, None).unwrap(), dentist.user_id);

        let other = Uuid::new_v4();
        let receptionist = test_auth(Role::Receptionist);
        assert_eq!(resolve_dentist_scope(&receptionist, Some(other)).unwrap(), other);
        assert!(resolve_dentist_scope(&receptionist, None).is_err());

        let patient = test_auth(Role::Patient);
        assert!(matches!(
            resolve_dentist_scope(&patient, Some(other)),
            Err(ApiError::Forbidden(..))
        ));
    }

    #[test]
    fn dentist_can_only_touch_own_appointments() {
        let dentist = test_auth(Role::Dentist);
        let own = appt(dentist.user_id, STATUS_CHECKED_IN);
        assert!(check_status_change(&dentist, &own, STATUS_COMPLETED).is_ok());

        let foreign = appt(Uuid::new_v4(), STATUS_CHECKED_IN);
        assert!(matches!(
            check_status_change(&dentist, &foreign, STATUS_COMPLETED),
            Err(ApiError::Forbidden(..))
        ));
    }

    #[test]
    fn receptionist_cannot_complete() {
        let receptionist = test_auth(Role::Receptionist);
        let a = appt(Uuid::new_v4(), STATUS_CHECKED_IN);
        assert!(check_status_change(&receptionist, &a, STATUS_COMPLETED).is_err());

        let booked = appt(Uuid::new_v4(), STATUS_BOOKED);
        assert!(check_status_change(&receptionist, &booked, STATUS_CONFIRMED).is_ok());
    }

    #[test]
    fn unknown_status_and_bad_transition_rejected() {
        let owner = test_auth(Role::Owner);
        let a = appt(Uuid::new_v4(), STATUS_BOOKED);
        assert!(check_status_change(&owner, &a, 9).is_err());
        assert!(check_status_change(&owner, &a, STATUS_COMPLETED).is_err());
        assert!(check_status_change(&test_auth(Role::Assistant), &a, STATUS_CONFIRMED).is_err());
    }
}
