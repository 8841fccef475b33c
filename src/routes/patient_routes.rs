// src/routes/patient_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
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
pub struct PatientRow {
    pub patient_id: Uuid,
    pub user_id: Option<Uuid>,
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub gender: i16,
    pub address: Option<String>,
    pub underlying_conditions: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

const PATIENT_COLUMNS: &str = "patient_id, user_id, full_name, phone, email, birthday, gender, address, underlying_conditions, created_at, updated_at";

const PATIENT_EDITORS: &[Role] = &[Role::Admin, Role::Owner, Role::Receptionist];
const PATIENT_CREATORS: &[Role] = &[Role::Admin, Role::Owner, Role::Receptionist, Role::Dentist];

#[derive(Debug, Deserialize)]
pub struct PatientRequest {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub gender: Option<i16>,
    pub address: Option<String>,
    pub underlying_conditions: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, PartialEq)]
pub struct ValidPatient {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub gender: i16,
    pub address: Option<String>,
    pub underlying_conditions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(search_patients).post(create_patient))
        .route(
            "/patients/{patient_id}",
            get(get_patient).patch(update_patient).delete(delete_patient),
        )
}

pub fn validate_patient(req: &PatientRequest, today: NaiveDate) -> Result<ValidPatient, ApiError> {
    let full_name = validation::required_text(&req.full_name, "full_name", 128)?;
    let phone = validation::phone_number(&req.phone)?;
    let email = validation::optional_text(req.email.as_deref(), "email", 254)?
        .map(validation::email)
        .transpose()?;
    if let Some(b) = req.birthday {
        validation::date_not_in_future(b, today)?;
    }
    let gender = req.gender.unwrap_or(0);
    if !(0..=2).contains(&gender) {
        return Err(ApiError::validation("gender must be 0, 1 or 2"));
    }
    let address = validation::optional_text(req.address.as_deref(), "address", 256)?;
    let conditions = validation::optional_text(req.underlying_conditions.as_deref(), "underlying_conditions", 2000)?;

    Ok(ValidPatient {
        full_name: full_name.to_string(),
        phone,
        email: email.map(str::to_string),
        birthday: req.birthday,
        gender,
        address: address.map(str::to_string),
        underlying_conditions: conditions.map(str::to_string),
    })
}

/// Non-deleted patient or 404.
pub async fn load_patient(state: &AppState, patient_id: Uuid) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patient WHERE patient_id = $1 AND is_deleted = false"
    ))
    .bind(patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::PATIENT_NOT_FOUND))
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(PATIENT_CREATORS)?;
    let p = validate_patient(&req, Utc::now().date_naive())?;

    if let Some(uid) = req.user_id {
        crate::routes::user_routes::load_active_with_role(&state, uid, Role::Patient, messages::USER_NOT_FOUND)
            .await?;
    }

    let row = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        INSERT INTO patient (user_id, full_name, phone, email, birthday, gender, address, underlying_conditions, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(req.user_id)
    .bind(&p.full_name)
    .bind(&p.phone)
    .bind(&p.email)
    .bind(p.birthday)
    .bind(p.gender)
    .bind(&p.address)
    .bind(&p.underlying_conditions)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(patient_id = %row.patient_id, "patient created");
    Ok(Json(ApiOk::new(row)))
}

pub async fn search_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<Vec<PatientRow>>>, ApiError> {
    auth.require(Role::STAFF)?;

    let limit = validation::clamp_limit(q.limit);
    let offset = validation::clamp_offset(q.offset);
    let pattern = q
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()));

    let rows = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE is_deleted = false
          AND ($1::text IS NULL OR lower(full_name) LIKE $1 OR phone LIKE $1)
        ORDER BY full_name ASC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.ensure_patient_access(&state, patient_id).await?;
    Ok(Json(ApiOk::new(load_patient(&state, patient_id).await?)))
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<PatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(PATIENT_EDITORS)?;
    let p = validate_patient(&req, Utc::now().date_naive())?;

    let row = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patient
        SET full_name = $2,
            phone = $3,
            email = $4,
            birthday = $5,
            gender = $6,
            address = $7,
            underlying_conditions = $8,
            updated_by = $9,
            updated_at = now()
        WHERE patient_id = $1 AND is_deleted = false
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(patient_id)
    .bind(&p.full_name)
    .bind(&p.phone)
    .bind(&p.email)
    .bind(p.birthday)
    .bind(p.gender)
    .bind(&p.address)
    .bind(&p.underlying_conditions)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::PATIENT_NOT_FOUND))?;

    Ok(Json(ApiOk::new(row)))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(Role::MANAGERS)?;

    let res = sqlx::query(
        r#"
        UPDATE patient
        SET is_deleted = true, updated_by = $2, updated_at = now()
        WHERE patient_id = $1 AND is_deleted = false
        "#,
    )
    .bind(patient_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found(messages::PATIENT_NOT_FOUND));
    }
    tracing::info!(%patient_id, "patient deleted");
    Ok(Json(OkData::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 10).unwrap()
    }

    fn req() -> PatientRequest {
        PatientRequest {
            full_name: "  Nguyen Van An ".into(),
            phone: "0912 345 678".into(),
            email: Some(" an@mail.vn ".into()),
            birthday: NaiveDate::from_ymd_opt(1990, 1, 1),
            gender: Some(1),
            address: Some("   ".into()),
            underlying_conditions: None,
            user_id: None,
        }
    }

    #[test]
    fn valid_patient_is_trimmed() {
        let p = validate_patient(&req(), today()).unwrap();
        assert_eq!(p.full_name, "Nguyen Van An");
        assert_eq!(p.phone, "0912345678");
        assert_eq!(p.email.as_deref(), Some("an@mail.vn"));
        assert_eq!(p.address, None);
    }

    #[test]
    fn name_and_phone_are_required() {
        let mut r = req();
        r.full_name = " ".into();
        assert!(validate_patient(&r, today()).is_err());

        let mut r = req();
        r.phone = "".into();
        assert!(validate_patient(&r, today()).is_err());
    }

    #[test]
    fn birthday_cannot_be_in_future() {
        let mut r = req();
        r.birthday = NaiveDate::from_ymd_opt(2026, 5, 11);
        assert!(validate_patient(&r, today()).is_err());
    }

    #[test]
    fn gender_range() {
        let mut r = req();
        r.gender = Some(3);
        assert!(validate_patient(&r, today()).is_err());
        r.gender = None;
        assert_eq!(validate_patient(&r, today()).unwrap().gender, 0);
    }
}
