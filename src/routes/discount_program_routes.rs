// src/routes/discount_program_routes.rs

use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
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

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DiscountProgramRow {
    pub program_id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProgramProcedureRow {
    #[serde(skip_serializing)]
    pub program_id: Uuid,
    pub procedure_id: Uuid,
    pub procedure_name: String,
    pub discount_percent: i16,
}

#[derive(Debug, Serialize)]
pub struct DiscountProgramDto {
    #[serde(flatten)]
    pub program: DiscountProgramRow,
    pub procedures: Vec<ProgramProcedureRow>,
}

#[derive(Debug, Deserialize)]
pub struct ProgramProcedureInput {
    pub procedure_id: Uuid,
    pub discount_percent: i16,
}

#[derive(Debug, Deserialize)]
pub struct DiscountProgramRequest {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub procedures: Vec<ProgramProcedureInput>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub active_only: Option<bool>,
}

const PROGRAM_COLUMNS: &str = "program_id, name, start_date, end_date, is_active, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/discount_programs", get(list_programs).post(create_program))
        .route("/discount_programs/{program_id}", put(update_program))
        .route("/discount_programs/{program_id}/deactivate", post(deactivate_program))
}

pub fn validate_program(req: &DiscountProgramRequest, today: NaiveDate) -> Result<(), ApiError> {
    validation::required_text(&req.name, "name", 128)?;
    if req.start_date > req.end_date {
        return Err(ApiError::validation("start_date must not be after end_date"));
    }
    validation::date_not_in_past(req.end_date, today)?;
    if req.procedures.is_empty() {
        return Err(ApiError::validation("at least one procedure is required"));
    }
    let mut seen = HashSet::new();
    for p in &req.procedures {
        if !(1..=100).contains(&p.discount_percent) {
            return Err(ApiError::validation(format!(
                "discount_percent: {}",
                messages::INVALID_NUMBER
            )));
        }
        if !seen.insert(p.procedure_id) {
            return Err(ApiError::validation("procedures must not repeat"));
        }
    }
    Ok(())
}

/// `floor(subtotal * percent / 100)` for non-negative inputs, never more than the subtotal.
pub fn discount_amount(subtotal_cents: i64, percent: i32) -> i64 {
    if subtotal_cents <= 0 || percent <= 0 {
        return 0;
    }
    let scaled = i128::from(subtotal_cents) * i128::from(percent.min(100)) / 100;
    i64::try_from(scaled).unwrap_or(subtotal_cents)
}

/// Highest percentage any active program grants `procedure_id` on `day`; 0 when none.
pub async fn best_discount_percent(state: &AppState, procedure_id: Uuid, day: NaiveDate) -> Result<i32, ApiError> {
    sqlx::query_scalar::<_, i32>(
        r#"
        SELECT COALESCE(MAX(dpp.discount_percent), 0)::int4
        FROM discount_program_procedure dpp
        JOIN discount_program dp ON dp.program_id = dpp.program_id
        WHERE dpp.procedure_id = $1
          AND dp.is_active = true
          AND dp.start_date <= $2
          AND dp.end_date >= $2
        "#,
    )
    .bind(procedure_id)
    .bind(day)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)
}

async fn ensure_procedures_exist(state: &AppState, ids: &[Uuid]) -> Result<(), ApiError> {
    let found: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM procedure
        WHERE procedure_id = ANY($1) AND is_active = true
        "#,
    )
    .bind(ids)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    if found != ids.len() as i64 {
        return Err(ApiError::not_found(messages::PROCEDURE_NOT_FOUND));
    }
    Ok(())
}

async fn load_dtos(state: &AppState, programs: Vec<DiscountProgramRow>) -> Result<Vec<DiscountProgramDto>, ApiError> {
    let ids: Vec<Uuid> = programs.iter().map(|p| p.program_id).collect();
    let items = sqlx::query_as::<_, ProgramProcedureRow>(
        r#"
        SELECT dpp.program_id, dpp.procedure_id, pr.name AS procedure_name, dpp.discount_percent
        FROM discount_program_procedure dpp
        JOIN procedure pr ON pr.procedure_id = dpp.procedure_id
        WHERE dpp.program_id = ANY($1)
        ORDER BY pr.name ASC
        "#,
    )
    .bind(&ids)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let mut by_program: HashMap<Uuid, Vec<ProgramProcedureRow>> = HashMap::new();
    for it in items {
        by_program.entry(it.program_id).or_default().push(it);
    }

    Ok(programs
        .into_iter()
        .map(|program| {
            let procedures = by_program.remove(&program.program_id).unwrap_or_default();
            DiscountProgramDto { program, procedures }
        })
        .collect())
}

async fn load_dto(state: &AppState, program_id: Uuid) -> Result<DiscountProgramDto, ApiError> {
    let program = sqlx::query_as::<_, DiscountProgramRow>(&format!(
        "SELECT {PROGRAM_COLUMNS} FROM discount_program WHERE program_id = $1"
    ))
    .bind(program_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::DISCOUNT_PROGRAM_NOT_FOUND))?;

    load_dtos(state, vec![program])
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found(messages::DISCOUNT_PROGRAM_NOT_FOUND))
}

async fn insert_items(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    program_id: Uuid,
    items: &[ProgramProcedureInput],
) -> Result<(), ApiError> {
    for it in items {
        sqlx::query(
            r#"
            INSERT INTO discount_program_procedure (program_id, procedure_id, discount_percent)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(program_id)
        .bind(it.procedure_id)
        .bind(it.discount_percent)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::db)?;
    }
    Ok(())
}

pub async fn list_programs(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<DiscountProgramDto>>>, ApiError> {
    let active_only = q.active_only.unwrap_or(false);
    let programs = sqlx::query_as::<_, DiscountProgramRow>(&format!(
        r#"
        SELECT {PROGRAM_COLUMNS}
        FROM discount_program
        WHERE ($1 = false OR (is_active = true AND end_date >= CURRENT_DATE))
        ORDER BY start_date DESC
        LIMIT 200
        "#
    ))
    .bind(active_only)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(load_dtos(&state, programs).await?)))
}

pub async fn create_program(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<DiscountProgramRequest>,
) -> Result<Json<ApiOk<DiscountProgramDto>>, ApiError> {
    auth.require(Role::MANAGERS)?;
    validate_program(&req, Utc::now().date_naive())?;

    let ids: Vec<Uuid> = req.procedures.iter().map(|p| p.procedure_id).collect();
    ensure_procedures_exist(&state, &ids).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let program_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO discount_program (name, start_date, end_date, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $4)
        RETURNING program_id
        "#,
    )
    .bind(req.name.trim())
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    insert_items(&mut tx, program_id, &req.procedures).await?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%program_id, "discount program created");

    notifications::dispatch_to_role(
        &state,
        Role::Receptionist,
        Notice::new(
            "discount_program",
            messages::NOTIFY_DISCOUNT_PROGRAM,
            format!("{} ({} - {})", req.name.trim(), req.start_date, req.end_date),
        )
        .about(program_id),
    )
    .await;

    Ok(Json(ApiOk::new(load_dto(&state, program_id).await?)))
}

pub async fn update_program(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(program_id): Path<Uuid>,
    Json(req): Json<DiscountProgramRequest>,
) -> Result<Json<ApiOk<DiscountProgramDto>>, ApiError> {
    auth.require(Role::MANAGERS)?;
    load_dto(&state, program_id).await?;
    validate_program(&req, Utc::now().date_naive())?;

    let ids: Vec<Uuid> = req.procedures.iter().map(|p| p.procedure_id).collect();
    ensure_procedures_exist(&state, &ids).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE discount_program
        SET name = $2, start_date = $3, end_date = $4, updated_by = $5, updated_at = now()
        WHERE program_id = $1
        "#,
    )
    .bind(program_id)
    .bind(req.name.trim())
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    sqlx::query(r#"DELETE FROM discount_program_procedure WHERE program_id = $1"#)
        .bind(program_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    insert_items(&mut tx, program_id, &req.procedures).await?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%program_id, "discount program updated");
    Ok(Json(ApiOk::new(load_dto(&state, program_id).await?)))
}

pub async fn deactivate_program(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(program_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(Role::MANAGERS)?;

    let res = sqlx::query(
        r#"
        UPDATE discount_program
        SET is_active = false, updated_by = $2, updated_at = now()
        WHERE program_id = $1
        "#,
    )
    .bind(program_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found(messages::DISCOUNT_PROGRAM_NOT_FOUND));
    }
    Ok(Json(OkData::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
    }

    fn req() -> DiscountProgramRequest {
        DiscountProgramRequest {
            name: "Summer whitening".into(),
            start_date: day(1),
            end_date: day(30),
            procedures: vec![ProgramProcedureInput {
                procedure_id: Uuid::new_v4(),
                discount_percent: 20,
            }],
        }
    }

    #[test]
    fn accepts_valid_program() {
        assert!(validate_program(&req(), day(10)).is_ok());
    }

    #[test]
    fn date_rules() {
        let mut r = req();
        r.start_date = day(30);
        r.end_date = day(1);
        assert!(validate_program(&r, day(1)).is_err());

        // already over
        assert!(validate_program(&req(), NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()).is_err());
    }

    #[test]
    fn percent_and_procedure_rules() {
        let mut r = req();
        r.procedures[0].discount_percent = 0;
        let err = validate_program(&r, day(1)).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m.contains(messages::MSG95)));

        let mut r = req();
        r.procedures[0].discount_percent = 101;
        assert!(validate_program(&r, day(1)).is_err());

        let mut r = req();
        r.procedures.clear();
        assert!(validate_program(&r, day(1)).is_err());

        let mut r = req();
        let dup = r.procedures[0].procedure_id;
        r.procedures.push(ProgramProcedureInput {
            procedure_id: dup,
            discount_percent: 10,
        });
        assert!(validate_program(&r, day(1)).is_err());
    }

    #[test]
    fn discount_amount_rounds_down() {
        assert_eq!(discount_amount(999, 10), 99);
        assert_eq!(discount_amount(1_000_000, 15), 150_000);
        assert_eq!(discount_amount(500, 0), 0);
        assert_eq!(discount_amount(500, 150), 500);
        assert_eq!(discount_amount(0, 50), 0);
    }

    #[test]
    fn discount_amount_handles_huge_subtotals() {
        assert_eq!(discount_amount(100_000_000_000_000_000, 100), 100_000_000_000_000_000);
        assert_eq!(discount_amount(i64::MAX, 100), i64::MAX);
        assert_eq!(discount_amount(i64::MAX, 50), i64::MAX / 2);
    }
}
