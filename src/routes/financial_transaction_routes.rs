// src/routes/financial_transaction_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{is_known_payment_method, ApiOk, AppState, OkData, Role},
    validation,
};

pub const MAX_RANGE_DAYS: i64 = 366;
const DEFAULT_RANGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TransactionRow {
    pub transaction_id: Uuid,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub is_income: bool,
    pub amount_cents: i64,
    pub payment_method: i16,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const TRANSACTION_COLUMNS: &str = "transaction_id, transaction_date, description, is_income, amount_cents, payment_method, invoice_id, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub transaction_date: Option<NaiveDate>,
    pub description: String,
    pub is_income: bool,
    pub amount_cents: i64,
    pub payment_method: i16,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTransactionRequest {
    pub transaction_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub is_income: Option<bool>,
    pub amount_cents: Option<i64>,
    pub payment_method: Option<i16>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub is_income: Option<bool>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SummaryDto {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub income_cents: i64,
    pub expense_cents: i64,
    pub net_cents: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/financial_transactions", get(list_transactions).post(create_transaction))
        .route("/financial_transactions/summary", get(get_summary))
        .route(
            "/financial_transactions/{transaction_id}",
            patch(update_transaction).delete(delete_transaction),
        )
}

/* ============================================================
   Validation
   ============================================================ */

pub fn validate_transaction(
    description: &str,
    amount_cents: i64,
    payment_method: i16,
    transaction_date: NaiveDate,
    today: NaiveDate,
) -> Result<(), ApiError> {
    validation::required_text(description, "description", 256)?;
    validation::positive_amount(amount_cents, "amount_cents")?;
    if !is_known_payment_method(payment_method) {
        return Err(ApiError::validation(messages::INVALID_PAYMENT_METHOD));
    }
    validation::date_not_in_future(transaction_date, today)?;
    Ok(())
}

/// Inclusive `from..=to`; missing ends default to the last 30 days up to today.
pub fn resolve_range(from: Option<&str>, to: Option<&str>, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let to = match to {
        Some(s) => validation::parse_day(s, "to")?,
        None => today,
    };
    let from = match from {
        Some(s) => validation::parse_day(s, "from")?,
        None => validation::shift_day(to, -DEFAULT_RANGE_DAYS, "to")?,
    };
    if from > to {
        return Err(ApiError::validation("from must not be after to"));
    }
    if (to - from).num_days() > MAX_RANGE_DAYS {
        return Err(ApiError::validation(format!("range cannot exceed {MAX_RANGE_DAYS} days")));
    }
    Ok((from, to))
}

/* ============================================================
   Invoice payments
   ============================================================ */

/// Income entry for an invoice payment, written inside the caller's transaction.
pub async fn record_invoice_payment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    invoice_id: Uuid,
    amount_cents: i64,
    payment_method: i16,
    user_id: Uuid,
) -> Result<Uuid, ApiError> {
    sqlx::query_scalar(
        r#"
        INSERT INTO financial_transaction (
          transaction_date, description, is_income, amount_cents, payment_method,
          invoice_id, created_by, updated_by
        )
        VALUES (CURRENT_DATE, $1, true, $2, $3, $4, $5, $5)
        RETURNING transaction_id
        "#,
    )
    .bind(format!("Invoice payment {invoice_id}"))
    .bind(amount_cents)
    .bind(payment_method)
    .bind(invoice_id)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(ApiError::db)
}

async fn load_transaction(state: &AppState, transaction_id: Uuid) -> Result<TransactionRow, ApiError> {
    sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM financial_transaction WHERE transaction_id = $1 AND is_deleted = false"
    ))
    .bind(transaction_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::TRANSACTION_NOT_FOUND))
}

fn ensure_manual(row: &TransactionRow) -> Result<(), ApiError> {
    if row.invoice_id.is_some() {
        return Err(ApiError::validation("invoice payments are changed through the invoice"));
    }
    Ok(())
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn create_transaction(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<Json<ApiOk<TransactionRow>>, ApiError> {
    auth.require(Role::FRONT_DESK)?;

    let today = Utc::now().date_naive();
    let transaction_date = req.transaction_date.unwrap_or(today);
    validate_transaction(&req.description, req.amount_cents, req.payment_method, transaction_date, today)?;

    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        INSERT INTO financial_transaction (
          transaction_date, description, is_income, amount_cents, payment_method, created_by, updated_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(transaction_date)
    .bind(req.description.trim())
    .bind(req.is_income)
    .bind(req.amount_cents)
    .bind(req.payment_method)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(transaction_id = %row.transaction_id, is_income = row.is_income, amount = row.amount_cents, "transaction recorded");
    Ok(Json(ApiOk::new(row)))
}

pub async fn update_transaction(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(transaction_id): Path<Uuid>,
    Json(req): Json<UpdateTransactionRequest>,
) -> Result<Json<ApiOk<TransactionRow>>, ApiError> {
    auth.require(Role::MANAGERS)?;

    let current = load_transaction(&state, transaction_id).await?;
    ensure_manual(&current)?;

    let description = req.description.as_deref().unwrap_or(&current.description);
    let amount_cents = req.amount_cents.unwrap_or(current.amount_cents);
    let payment_method = req.payment_method.unwrap_or(current.payment_method);
    let transaction_date = req.transaction_date.unwrap_or(current.transaction_date);
    validate_transaction(description, amount_cents, payment_method, transaction_date, Utc::now().date_naive())?;

    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        UPDATE financial_transaction
        SET transaction_date = $2,
            description = $3,
            is_income = $4,
            amount_cents = $5,
            payment_method = $6,
            updated_by = $7,
            updated_at = now()
        WHERE transaction_id = $1
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(transaction_id)
    .bind(transaction_date)
    .bind(description.trim())
    .bind(req.is_income.unwrap_or(current.is_income))
    .bind(amount_cents)
    .bind(payment_method)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(row)))
}

pub async fn delete_transaction(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(Role::MANAGERS)?;

    let current = load_transaction(&state, transaction_id).await?;
    ensure_manual(&current)?;

    sqlx::query(
        r#"
        UPDATE financial_transaction
        SET is_deleted = true, updated_by = $2, updated_at = now()
        WHERE transaction_id = $1
        "#,
    )
    .bind(transaction_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%transaction_id, "transaction deleted");
    Ok(Json(OkData::ok()))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<RangeQuery>,
) -> Result<Json<ApiOk<Vec<TransactionRow>>>, ApiError> {
    auth.require(Role::FRONT_DESK)?;
    let (from, to) = resolve_range(q.from.as_deref(), q.to.as_deref(), Utc::now().date_naive())?;

    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM financial_transaction
        WHERE is_deleted = false
          AND transaction_date BETWEEN $1 AND $2
          AND ($3::boolean IS NULL OR is_income = $3)
        ORDER BY transaction_date DESC, created_at DESC
        "#
    ))
    .bind(from)
    .bind(to)
    .bind(q.is_income)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn get_summary(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<RangeQuery>,
) -> Result<Json<ApiOk<SummaryDto>>, ApiError> {
    auth.require(Role::MANAGERS)?;
    let (from, to) = resolve_range(q.from.as_deref(), q.to.as_deref(), Utc::now().date_naive())?;

    let (income_cents, expense_cents): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
          COALESCE(SUM(amount_cents) FILTER (WHERE is_income), 0)::int8,
          COALESCE(SUM(amount_cents) FILTER (WHERE NOT is_income), 0)::int8
        FROM financial_transaction
        WHERE is_deleted = false
          AND transaction_date BETWEEN $1 AND $2
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(SummaryDto {
        from,
        to,
        income_cents,
        expense_cents,
        net_cents: income_cents - expense_cents,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
    }

    #[test]
    fn amount_must_be_positive() {
        let err = validate_transaction("Gloves", 0, 0, today(), today()).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m.contains(messages::MSG95)));
        assert!(validate_transaction("Gloves", 12_000, 0, today(), today()).is_ok());
    }

    #[test]
    fn description_method_and_date() {
        assert!(validate_transaction(" ", 1, 0, today(), today()).is_err());
        assert!(validate_transaction(&"d".repeat(257), 1, 0, today(), today()).is_err());
        assert!(validate_transaction("Rent", 1, 2, today(), today()).is_err());
        assert!(validate_transaction("Rent", 1, 1, today() + Duration::days(1), today()).is_err());
    }

    #[test]
    fn range_defaults_to_last_month() {
        let (from, to) = resolve_range(None, None, today()).unwrap();
        assert_eq!(to, today());
        assert_eq!(from, today() - Duration::days(30));
    }

    #[test]
    fn range_is_bounded() {
        assert!(resolve_range(Some("2026-07-02"), Some("2026-07-01"), today()).is_err());
        assert!(resolve_range(Some("2025-01-01"), Some("2026-07-01"), today()).is_err());
        assert!(resolve_range(Some("2025-07-01"), Some("2026-07-01"), today()).is_ok());
        assert!(resolve_range(Some("bad"), None, today()).is_err());
    }
}
