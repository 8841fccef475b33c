// src/routes/treatment_record_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
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
    routes::{
        appointment_routes::{load_appointment, STATUS_CANCELED as APPOINTMENT_CANCELED},
        discount_program_routes::{best_discount_percent, discount_amount},
        procedure_routes::load_active_procedure,
    },
    validation,
};

/*
Treatment record status:
0 planned
1 in progress
2 completed
3 canceled
*/
pub const RECORD_PLANNED: i16 = 0;
pub const RECORD_COMPLETED: i16 = 2;
pub const RECORD_CANCELED: i16 = 3;

const RECORD_WRITERS: &[Role] = &[Role::Dentist, Role::Admin];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TreatmentRecordRow {
    pub treatment_record_id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    #[serde(skip_serializing)]
    pub patient_user_id: Option<Uuid>,
    pub dentist_user_id: Uuid,
    pub dentist_name: String,
    pub procedure_id: Uuid,
    pub procedure_name: String,
    pub tooth_position: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub symptoms: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_date: NaiveDate,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const RECORD_SELECT: &str = r#"
    SELECT
      tr.treatment_record_id,
      tr.appointment_id,
      a.patient_id,
      p.user_id AS patient_user_id,
      tr.dentist_user_id,
      d.display_name AS dentist_name,
      tr.procedure_id,
      pr.name AS procedure_name,
      tr.tooth_position,
      tr.quantity,
      tr.unit_price_cents,
      tr.discount_cents,
      tr.total_cents,
      tr.symptoms,
      tr.diagnosis,
      tr.treatment_date,
      tr.status,
      tr.created_at,
      tr.updated_at
    FROM treatment_record tr
    JOIN appointment a ON a.appointment_id = tr.appointment_id
    JOIN patient p ON p.patient_id = a.patient_id
    JOIN app_user d ON d.user_id = tr.dentist_user_id
    JOIN procedure pr ON pr.procedure_id = tr.procedure_id
    WHERE tr.is_deleted = false
"#;

#[derive(Debug, Deserialize)]
pub struct CreateTreatmentRecordRequest {
    pub appointment_id: Uuid,
    pub procedure_id: Uuid,
    pub tooth_position: String,
    pub quantity: i32,
    pub unit_price_cents: Option<i64>,
    pub discount_cents: Option<i64>,
    pub symptoms: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_date: NaiveDate,
    pub status: Option<i16>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTreatmentRecordRequest {
    pub tooth_position: Option<String>,
    pub quantity: Option<i32>,
    pub unit_price_cents: Option<i64>,
    pub discount_cents: Option<i64>,
    pub symptoms: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_date: Option<NaiveDate>,
    pub status: Option<i16>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/treatment_records", post(create_treatment_record))
        .route(
            "/treatment_records/{treatment_record_id}",
            get(get_treatment_record)
                .patch(update_treatment_record)
                .delete(delete_treatment_record),
        )
        .route("/patients/{patient_id}/treatment_records", get(list_patient_records))
}

/* ============================================================
   Validation / pricing
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

/// `subtotal = quantity * unit price`, `total = subtotal - discount`, discount within `0..=subtotal`.
pub fn price(quantity: i32, unit_price_cents: i64, discount_cents: i64) -> Result<Pricing, ApiError> {
    validation::positive_i32(quantity, "quantity")?;
    validation::non_negative_amount(unit_price_cents, "unit_price_cents")?;
    validation::non_negative_amount(discount_cents, "discount_cents")?;

    let subtotal_cents = unit_price_cents
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| ApiError::validation("amount is too large"))?;
    if discount_cents > subtotal_cents {
        return Err(ApiError::validation(messages::DISCOUNT_EXCEEDS_SUBTOTAL));
    }
    Ok(Pricing {
        subtotal_cents,
        discount_cents,
        total_cents: subtotal_cents - discount_cents,
    })
}

pub fn validate_record_fields(tooth_position: &str, status: i16) -> Result<(), ApiError> {
    validation::required_text(tooth_position, "tooth_position", 32)?;
    if !(RECORD_PLANNED..=RECORD_CANCELED).contains(&status) {
        return Err(ApiError::validation(messages::INVALID_STATUS));
    }
    Ok(())
}

pub fn is_record_locked(status: i16) -> bool {
    status == RECORD_COMPLETED || status == RECORD_CANCELED
}

fn ensure_own_record(auth: &AuthContext, record: &TreatmentRecordRow) -> Result<(), ApiError> {
    if auth.is(Role::Dentist) && record.dentist_user_id != auth.user_id {
        return Err(ApiError::forbidden());
    }
    Ok(())
}

/* ============================================================
   Loaders
   ============================================================ */

pub async fn load_record(state: &AppState, treatment_record_id: Uuid) -> Result<TreatmentRecordRow, ApiError> {
    sqlx::query_as::<_, TreatmentRecordRow>(&format!("{RECORD_SELECT} AND tr.treatment_record_id = $1"))
        .bind(treatment_record_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found(messages::TREATMENT_RECORD_NOT_FOUND))
}

pub async fn list_records_for_appointment(
    state: &AppState,
    appointment_id: Uuid,
) -> Result<Vec<TreatmentRecordRow>, ApiError> {
    sqlx::query_as::<_, TreatmentRecordRow>(&format!(
        "{RECORD_SELECT} AND tr.appointment_id = $1 ORDER BY tr.created_at ASC"
    ))
    .bind(appointment_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

/* ============================================================
   POST /treatment_records
   ============================================================ */

pub async fn create_treatment_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTreatmentRecordRequest>,
) -> Result<Json<ApiOk<TreatmentRecordRow>>, ApiError> {
    auth.require(RECORD_WRITERS)?;

    let status = req.status.unwrap_or(RECORD_PLANNED);
    validate_record_fields(&req.tooth_position, status)?;
    validation::positive_i32(req.quantity, "quantity")?;
    validation::date_not_in_past(req.treatment_date, Utc::now().date_naive())?;
    let symptoms = validation::optional_text(req.symptoms.as_deref(), "symptoms", 2000)?;
    let diagnosis = validation::optional_text(req.diagnosis.as_deref(), "diagnosis", 2000)?;

    let appointment = load_appointment(&state, req.appointment_id).await?;
    if appointment.status == APPOINTMENT_CANCELED {
        return Err(ApiError::validation(messages::APPOINTMENT_LOCKED));
    }
    let procedure = load_active_procedure(&state, req.procedure_id).await?;

    let unit_price_cents = req.unit_price_cents.unwrap_or(procedure.price_cents);
    let discount_cents = match req.discount_cents {
        Some(d) => d,
        None => {
            let pct = best_discount_percent(&state, procedure.procedure_id, req.treatment_date).await?;
            let subtotal_cents = price(req.quantity, unit_price_cents, 0)?.subtotal_cents;
            discount_amount(subtotal_cents, pct)
        }
    };
    let pricing = price(req.quantity, unit_price_cents, discount_cents)?;

    let dentist_user_id = if auth.is(Role::Dentist) {
        auth.user_id
    } else {
        appointment.dentist_user_id
    };

    let treatment_record_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO treatment_record (
          appointment_id, dentist_user_id, procedure_id, tooth_position, quantity,
          unit_price_cents, discount_cents, total_cents, symptoms, diagnosis,
          treatment_date, status, created_by, updated_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
        RETURNING treatment_record_id
        "#,
    )
    .bind(req.appointment_id)
    .bind(dentist_user_id)
    .bind(procedure.procedure_id)
    .bind(req.tooth_position.trim())
    .bind(req.quantity)
    .bind(unit_price_cents)
    .bind(pricing.discount_cents)
    .bind(pricing.total_cents)
    .bind(symptoms)
    .bind(diagnosis)
    .bind(req.treatment_date)
    .bind(status)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%treatment_record_id, appointment_id = %req.appointment_id, "treatment record created");

    let record = load_record(&state, treatment_record_id).await?;
    notifications::dispatch_opt(
        &state,
        record.patient_user_id,
        Notice::new(
            "treatment_record",
            messages::NOTIFY_TREATMENT_RECORD,
            format!("{} ({})", record.procedure_name, record.treatment_date),
        )
        .about(treatment_record_id),
    )
    .await;

    Ok(Json(ApiOk::new(record)))
}

/* ============================================================
   PATCH / DELETE
   ============================================================ */

pub async fn update_treatment_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(treatment_record_id): Path<Uuid>,
    Json(req): Json<UpdateTreatmentRecordRequest>,
) -> Result<Json<ApiOk<TreatmentRecordRow>>, ApiError> {
    auth.require(RECORD_WRITERS)?;

    let current = load_record(&state, treatment_record_id).await?;
    ensure_own_record(&auth, &current)?;
    if is_record_locked(current.status) {
        return Err(ApiError::validation(messages::RECORD_LOCKED));
    }

    let tooth_position = req.tooth_position.as_deref().unwrap_or(&current.tooth_position);
    let status = req.status.unwrap_or(current.status);
    validate_record_fields(tooth_position, status)?;

    let treatment_date = req.treatment_date.unwrap_or(current.treatment_date);
    if treatment_date != current.treatment_date {
        validation::date_not_in_past(treatment_date, Utc::now().date_naive())?;
    }

    let pricing = price(
        req.quantity.unwrap_or(current.quantity),
        req.unit_price_cents.unwrap_or(current.unit_price_cents),
        req.discount_cents.unwrap_or(current.discount_cents),
    )?;
    let symptoms = validation::optional_text(req.symptoms.as_deref(), "symptoms", 2000)?;
    let diagnosis = validation::optional_text(req.diagnosis.as_deref(), "diagnosis", 2000)?;

    sqlx::query(
        r#"
        UPDATE treatment_record
        SET tooth_position = $2,
            quantity = $3,
            unit_price_cents = $4,
            discount_cents = $5,
            total_cents = $6,
            symptoms = COALESCE($7, symptoms),
            diagnosis = COALESCE($8, diagnosis),
            treatment_date = $9,
            status = $10,
            updated_by = $11,
            updated_at = now()
        WHERE treatment_record_id = $1
        "#,
    )
    .bind(treatment_record_id)
    .bind(tooth_position.trim())
    .bind(req.quantity.unwrap_or(current.quantity))
    .bind(req.unit_price_cents.unwrap_or(current.unit_price_cents))
    .bind(pricing.discount_cents)
    .bind(pricing.total_cents)
    .bind(symptoms)
    .bind(diagnosis)
    .bind(treatment_date)
    .bind(status)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%treatment_record_id, status, "treatment record updated");
    Ok(Json(ApiOk::new(load_record(&state, treatment_record_id).await?)))
}

pub async fn delete_treatment_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(treatment_record_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(RECORD_WRITERS)?;

    let current = load_record(&state, treatment_record_id).await?;
    ensure_own_record(&auth, &current)?;

    sqlx::query(
        r#"
        UPDATE treatment_record
        SET is_deleted = true, updated_by = $2, updated_at = now()
        WHERE treatment_record_id = $1
        "#,
    )
    .bind(treatment_record_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%treatment_record_id, "treatment record deleted");
    Ok(Json(OkData::ok()))
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn get_treatment_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(treatment_record_id): Path<Uuid>,
) -> Result<Json<ApiOk<TreatmentRecordRow>>, ApiError> {
    let record = load_record(&state, treatment_record_id).await?;
    auth.ensure_patient_access(&state, record.patient_id).await?;
    Ok(Json(ApiOk::new(record)))
}

pub async fn list_patient_records(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<TreatmentRecordRow>>>, ApiError> {
    auth.ensure_patient_access(&state, patient_id).await?;

    let rows = sqlx::query_as::<_, TreatmentRecordRow>(&format!(
        "{RECORD_SELECT} AND a.patient_id = $1 ORDER BY tr.treatment_date DESC, tr.created_at DESC"
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
    use crate::middleware::auth_context::test_auth;

    #[test]
    fn pricing_subtracts_discount() {
        let p = price(2, 500_000, 100_000).unwrap();
        assert_eq!(p.subtotal_cents, 1_000_000);
        assert_eq!(p.total_cents, 900_000);
    }

    #[test]
    fn discount_cannot_exceed_subtotal() {
        let err = price(1, 100, 101).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m == messages::DISCOUNT_EXCEEDS_SUBTOTAL));
        assert_eq!(price(1, 100, 100).unwrap().total_cents, 0);
    }

    #[test]
    fn pricing_rejects_bad_numbers() {
        assert!(price(0, 100, 0).is_err());
        assert!(price(1, -1, 0).is_err());
        assert!(price(1, 100, -1).is_err());
        assert!(price(i32::MAX, i64::MAX, 0).is_err());
    }

    #[test]
    fn automatic_discount_on_a_huge_subtotal() {
        let subtotal_cents = price(1, 100_000_000_000_000_000, 0).unwrap().subtotal_cents;
        let discount_cents = discount_amount(subtotal_cents, 100);
        let p = price(1, 100_000_000_000_000_000, discount_cents).unwrap();
        assert_eq!(p.total_cents, 0);
    }

    #[test]
    fn record_fields() {
        assert!(validate_record_fields("36", RECORD_PLANNED).is_ok());
        assert!(validate_record_fields("  ", RECORD_PLANNED).is_err());
        assert!(validate_record_fields(&"1".repeat(33), RECORD_PLANNED).is_err());
        assert!(validate_record_fields("11", 7).is_err());
    }

    #[test]
    fn locked_statuses() {
        assert!(!is_record_locked(RECORD_PLANNED));
        assert!(!is_record_locked(1));
        assert!(is_record_locked(RECORD_COMPLETED));
        assert!(is_record_locked(RECORD_CANCELED));
    }

    #[test]
    fn dentists_only_edit_their_own_records() {
        let dentist = test_auth(Role::Dentist);
        let now = Utc::now();
        let mut record = TreatmentRecordRow {
            treatment_record_id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            patient_user_id: None,
            dentist_user_id: dentist.user_id,
            dentist_name: "Dr. Lan".into(),
            procedure_id: Uuid::new_v4(),
            procedure_name: "Filling".into(),
            tooth_position: "26".into(),
            quantity: 1,
            unit_price_cents: 300_000,
            discount_cents: 0,
            total_cents: 300_000,
            symptoms: None,
            diagnosis: None,
            treatment_date: now.date_naive(),
            status: RECORD_PLANNED,
            created_at: now,
            updated_at: now,
        };
        assert!(ensure_own_record(&dentist, &record).is_ok());
        record.dentist_user_id = Uuid::new_v4();
        assert!(ensure_own_record(&dentist, &record).is_err());
        assert!(ensure_own_record(&test_auth(Role::Admin), &record).is_ok());
    }
}
