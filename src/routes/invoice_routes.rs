// src/routes/invoice_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{is_known_payment_method, ApiOk, AppState, Role},
    notifications::{self, Notice},
    routes::{
        financial_transaction_routes::record_invoice_payment,
        treatment_record_routes::{load_record, RECORD_CANCELED},
    },
    validation,
};

/*
Invoice status:
0 pending
1 partially paid
2 paid
3 canceled
*/
pub const INVOICE_PENDING: i16 = 0;
pub const INVOICE_PARTIAL: i16 = 1;
pub const INVOICE_PAID: i16 = 2;
pub const INVOICE_CANCELED: i16 = 3;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InvoiceRow {
    pub invoice_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    #[serde(skip_serializing)]
    pub patient_user_id: Option<Uuid>,
    pub treatment_record_id: Uuid,
    pub procedure_name: String,
    pub payment_method: i16,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub remaining_cents: i64,
    pub status: i16,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const INVOICE_SELECT: &str = r#"
    SELECT
      i.invoice_id,
      i.patient_id,
      p.full_name AS patient_name,
      p.user_id AS patient_user_id,
      i.treatment_record_id,
      pr.name AS procedure_name,
      i.payment_method,
      i.subtotal_cents,
      i.discount_cents,
      i.total_cents,
      i.paid_cents,
      (i.total_cents - i.paid_cents) AS remaining_cents,
      i.status,
      i.description,
      i.created_at,
      i.updated_at
    FROM invoice i
    JOIN patient p ON p.patient_id = i.patient_id
    JOIN treatment_record tr ON tr.treatment_record_id = i.treatment_record_id
    JOIN procedure pr ON pr.procedure_id = tr.procedure_id
"#;

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub treatment_record_id: Uuid,
    pub payment_method: i16,
    pub discount_cents: Option<i64>,
    pub paid_cents: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount_cents: i64,
    pub payment_method: Option<i16>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub patient_id: Option<Uuid>,
    pub status: Option<i16>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route("/invoices/mine", get(list_my_invoices))
        .route("/invoices/{invoice_id}", get(get_invoice))
        .route("/invoices/{invoice_id}/payments", post(add_payment))
        .route("/invoices/{invoice_id}/cancel", post(cancel_invoice))
}

/* ============================================================
   Amounts
   ============================================================ */

pub fn derive_status(total_cents: i64, paid_cents: i64) -> i16 {
    if paid_cents >= total_cents {
        INVOICE_PAID
    } else if paid_cents > 0 {
        INVOICE_PARTIAL
    } else {
        INVOICE_PENDING
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceAmounts {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub status: i16,
}

pub fn compute_invoice(
    subtotal_cents: i64,
    discount_cents: i64,
    paid_cents: i64,
    payment_method: i16,
) -> Result<InvoiceAmounts, ApiError> {
    if !is_known_payment_method(payment_method) {
        return Err(ApiError::validation(messages::INVALID_PAYMENT_METHOD));
    }
    validation::non_negative_amount(discount_cents, "discount_cents")?;
    validation::non_negative_amount(paid_cents, "paid_cents")?;
    if discount_cents > subtotal_cents {
        return Err(ApiError::validation(messages::DISCOUNT_EXCEEDS_SUBTOTAL));
    }
    let total_cents = subtotal_cents - discount_cents;
    if paid_cents > total_cents {
        return Err(ApiError::validation(messages::OVERPAYMENT));
    }
    Ok(InvoiceAmounts {
        subtotal_cents,
        discount_cents,
        total_cents,
        paid_cents,
        status: derive_status(total_cents, paid_cents),
    })
}

/// New `(paid, status)` after taking `amount` on an open invoice.
pub fn apply_payment(status: i16, total_cents: i64, paid_cents: i64, amount_cents: i64) -> Result<(i64, i16), ApiError> {
    validation::positive_amount(amount_cents, "amount_cents")?;
    if status == INVOICE_PAID || status == INVOICE_CANCELED {
        return Err(ApiError::validation(messages::INVOICE_CLOSED));
    }
    let paid = paid_cents
        .checked_add(amount_cents)
        .filter(|p| *p <= total_cents)
        .ok_or_else(|| ApiError::validation(messages::OVERPAYMENT))?;
    Ok((paid, derive_status(total_cents, paid)))
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceLock {
    status: i16,
    total_cents: i64,
    paid_cents: i64,
    payment_method: i16,
}

async fn lock_invoice(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    invoice_id: Uuid,
) -> Result<InvoiceLock, ApiError> {
    sqlx::query_as::<_, InvoiceLock>(
        "SELECT status, total_cents, paid_cents, payment_method FROM invoice WHERE invoice_id = $1 FOR UPDATE",
    )
    .bind(invoice_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::INVOICE_NOT_FOUND))
}

async fn load_invoice(state: &AppState, invoice_id: Uuid) -> Result<InvoiceRow, ApiError> {
    sqlx::query_as::<_, InvoiceRow>(&format!("{INVOICE_SELECT} WHERE i.invoice_id = $1"))
        .bind(invoice_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found(messages::INVOICE_NOT_FOUND))
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn create_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<Json<ApiOk<InvoiceRow>>, ApiError> {
    auth.require(Role::FRONT_DESK)?;
    let description = validation::optional_text(req.description.as_deref(), "description", 500)?;

    let record = load_record(&state, req.treatment_record_id).await?;
    if record.status == RECORD_CANCELED {
        return Err(ApiError::validation(messages::RECORD_CANCELED));
    }
    let amounts = compute_invoice(
        record.total_cents,
        req.discount_cents.unwrap_or(0),
        req.paid_cents.unwrap_or(0),
        req.payment_method,
    )?;

    let open: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM invoice WHERE treatment_record_id = $1 AND status <> $2)",
    )
    .bind(record.treatment_record_id)
    .bind(INVOICE_CANCELED)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;
    if open {
        return Err(ApiError::conflict(messages::INVOICE_EXISTS));
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let invoice_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO invoice (
          patient_id, treatment_record_id, payment_method, subtotal_cents, discount_cents,
          total_cents, paid_cents, status, description, created_by, updated_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
        RETURNING invoice_id
        "#,
    )
    .bind(record.patient_id)
    .bind(record.treatment_record_id)
    .bind(req.payment_method)
    .bind(amounts.subtotal_cents)
    .bind(amounts.discount_cents)
    .bind(amounts.total_cents)
    .bind(amounts.paid_cents)
    .bind(amounts.status)
    .bind(description)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if amounts.paid_cents > 0 {
        record_invoice_payment(&mut tx, invoice_id, amounts.paid_cents, req.payment_method, auth.user_id).await?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%invoice_id, total = amounts.total_cents, paid = amounts.paid_cents, "invoice created");

    let invoice = load_invoice(&state, invoice_id).await?;
    notifications::dispatch_opt(
        &state,
        invoice.patient_user_id,
        Notice::new(
            "invoice",
            messages::NOTIFY_INVOICE_CREATED,
            format!("{}: {} due", invoice.procedure_name, invoice.remaining_cents),
        )
        .about(invoice_id),
    )
    .await;

    Ok(Json(ApiOk::new(invoice)))
}

pub async fn add_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<ApiOk<InvoiceRow>>, ApiError> {
    auth.require(Role::FRONT_DESK)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let current = lock_invoice(&mut tx, invoice_id).await?;

    let payment_method = req.payment_method.unwrap_or(current.payment_method);
    if !is_known_payment_method(payment_method) {
        return Err(ApiError::validation(messages::INVALID_PAYMENT_METHOD));
    }
    let (paid_cents, status) = apply_payment(current.status, current.total_cents, current.paid_cents, req.amount_cents)?;

    sqlx::query(
        r#"
        UPDATE invoice
        SET paid_cents = $2, status = $3, updated_by = $4, updated_at = now()
        WHERE invoice_id = $1
        "#,
    )
    .bind(invoice_id)
    .bind(paid_cents)
    .bind(status)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    record_invoice_payment(&mut tx, invoice_id, req.amount_cents, payment_method, auth.user_id).await?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%invoice_id, amount = req.amount_cents, paid = paid_cents, status, "invoice payment recorded");
    Ok(Json(ApiOk::new(load_invoice(&state, invoice_id).await?)))
}

pub async fn cancel_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<ApiOk<InvoiceRow>>, ApiError> {
    auth.require(Role::MANAGERS)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let current = lock_invoice(&mut tx, invoice_id).await?;
    if current.status == INVOICE_CANCELED {
        return Err(ApiError::validation(messages::INVOICE_CLOSED));
    }
    if current.paid_cents > 0 {
        return Err(ApiError::validation(messages::INVOICE_HAS_PAYMENTS));
    }

    sqlx::query(
        r#"
        UPDATE invoice
        SET status = $2, updated_by = $3, updated_at = now()
        WHERE invoice_id = $1
        "#,
    )
    .bind(invoice_id)
    .bind(INVOICE_CANCELED)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%invoice_id, "invoice canceled");
    Ok(Json(ApiOk::new(load_invoice(&state, invoice_id).await?)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListInvoicesQuery>,
) -> Result<Json<ApiOk<Vec<InvoiceRow>>>, ApiError> {
    auth.require(Role::STAFF)?;
    if let Some(s) = q.status {
        if !(INVOICE_PENDING..=INVOICE_CANCELED).contains(&s) {
            return Err(ApiError::validation(messages::INVALID_STATUS));
        }
    }

    let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
        r#"
        {INVOICE_SELECT}
        WHERE ($1::uuid IS NULL OR i.patient_id = $1)
          AND ($2::smallint IS NULL OR i.status = $2)
        ORDER BY i.created_at DESC
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(q.patient_id)
    .bind(q.status)
    .bind(validation::clamp_limit(q.limit))
    .bind(validation::clamp_offset(q.offset))
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn list_my_invoices(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<InvoiceRow>>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient_id = auth.require_linked_patient(&state).await?;

    let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
        "{INVOICE_SELECT} WHERE i.patient_id = $1 ORDER BY i.created_at DESC"
    ))
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<ApiOk<InvoiceRow>>, ApiError> {
    let invoice = load_invoice(&state, invoice_id).await?;
    auth.ensure_patient_access(&state, invoice.patient_id).await?;
    Ok(Json(ApiOk::new(invoice)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PAYMENT_BANK_TRANSFER, PAYMENT_CASH};

    #[test]
    fn status_follows_paid_amount() {
        assert_eq!(derive_status(1_000, 0), INVOICE_PENDING);
        assert_eq!(derive_status(1_000, 400), INVOICE_PARTIAL);
        assert_eq!(derive_status(1_000, 1_000), INVOICE_PAID);
        assert_eq!(derive_status(0, 0), INVOICE_PAID);
    }

    #[test]
    fn invoice_totals() {
        let a = compute_invoice(1_000_000, 100_000, 300_000, PAYMENT_CASH).unwrap();
        assert_eq!(a.total_cents, 900_000);
        assert_eq!(a.status, INVOICE_PARTIAL);

        let a = compute_invoice(500, 0, 0, PAYMENT_BANK_TRANSFER).unwrap();
        assert_eq!(a.status, INVOICE_PENDING);
    }

    #[test]
    fn invoice_rejects_bad_amounts() {
        assert!(compute_invoice(1_000, 1_001, 0, PAYMENT_CASH).is_err());
        assert!(compute_invoice(1_000, -1, 0, PAYMENT_CASH).is_err());
        assert!(compute_invoice(1_000, 100, 901, PAYMENT_CASH).is_err());
        assert!(compute_invoice(1_000, 0, 0, 9).is_err());
    }

    #[test]
    fn payments_accumulate_until_paid() {
        let (paid, status) = apply_payment(INVOICE_PENDING, 1_000, 0, 600).unwrap();
        assert_eq!((paid, status), (600, INVOICE_PARTIAL));
        let (paid, status) = apply_payment(status, 1_000, paid, 400).unwrap();
        assert_eq!((paid, status), (1_000, INVOICE_PAID));
    }

    #[test]
    fn payment_guards() {
        let err = apply_payment(INVOICE_PARTIAL, 1_000, 600, 401).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m == messages::OVERPAYMENT));
        assert!(apply_payment(INVOICE_PENDING, 1_000, 0, 0).is_err());
        assert!(apply_payment(INVOICE_PAID, 1_000, 1_000, 1).is_err());
        assert!(apply_payment(INVOICE_CANCELED, 1_000, 0, 1).is_err());
    }
}
