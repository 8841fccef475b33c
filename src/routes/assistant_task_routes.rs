// src/routes/assistant_task_routes.rs

use axum::{
    extract::{Path, State},
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
    models::{ApiOk, AppState, Role},
    notifications::{self, Notice},
    routes::{treatment_record_routes::load_record, user_routes::load_active_with_role},
    validation,
};

/*
Task status:
0 pending
1 done
2 canceled
*/
pub const TASK_PENDING: i16 = 0;
pub const TASK_DONE: i16 = 1;
pub const TASK_CANCELED: i16 = 2;

/* ============================================================
   Router
   ============================================================ */

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assistant_tasks", post(create_task))
        .route("/assistant_tasks/mine", get(list_my_tasks))
        .route("/assistant_tasks/{task_id}/status", post(change_task_status))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskRow {
    pub task_id: Uuid,
    pub treatment_record_id: Uuid,
    pub assistant_user_id: Uuid,
    pub assistant_name: String,
    pub assigned_by_user_id: Uuid,
    pub assigned_by_name: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const TASK_SELECT: &str = r#"
    SELECT
      t.task_id,
      t.treatment_record_id,
      t.assistant_user_id,
      a.display_name AS assistant_name,
      t.assigned_by_user_id,
      d.display_name AS assigned_by_name,
      t.title,
      t.description,
      t.start_time,
      t.end_time,
      t.status,
      t.created_at,
      t.updated_at
    FROM assistant_task t
    JOIN app_user a ON a.user_id = t.assistant_user_id
    JOIN app_user d ON d.user_id = t.assigned_by_user_id
"#;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub assistant_user_id: Uuid,
    pub treatment_record_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusRequest {
    pub status: i16,
}

/* ============================================================
   Guards
   ============================================================ */

pub fn validate_task(req: &CreateTaskRequest, now: DateTime<Utc>) -> Result<(), ApiError> {
    validation::required_text(&req.title, "title", 128)?;
    validation::optional_text(req.description.as_deref(), "description", 2000)?;
    validation::ordered(req.start_time, req.end_time)?;
    validation::not_in_past(req.end_time, now)?;
    Ok(())
}

/// Only the assigned assistant or the assigning dentist may move a task, and only out of pending.
pub fn check_task_status_change(auth: &AuthContext, task: &TaskRow, to: i16) -> Result<(), ApiError> {
    if auth.user_id != task.assistant_user_id && auth.user_id != task.assigned_by_user_id {
        return Err(ApiError::forbidden());
    }
    if task.status != TASK_PENDING || !(to == TASK_DONE || to == TASK_CANCELED) {
        return Err(ApiError::validation(messages::INVALID_STATUS_TRANSITION));
    }
    Ok(())
}

async fn load_task(state: &AppState, task_id: Uuid) -> Result<TaskRow, ApiError> {
    sqlx::query_as::<_, TaskRow>(&format!("{TASK_SELECT} WHERE t.task_id = $1"))
        .bind(task_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found(messages::TASK_NOT_FOUND))
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<ApiOk<TaskRow>>, ApiError> {
    auth.require(&[Role::Dentist])?;
    validate_task(&req, Utc::now())?;

    let assistant =
        load_active_with_role(&state, req.assistant_user_id, Role::Assistant, messages::ASSISTANT_NOT_FOUND).await?;
    load_record(&state, req.treatment_record_id).await?;

    let task_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO assistant_task (
          treatment_record_id, assistant_user_id, assigned_by_user_id,
          title, description, start_time, end_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING task_id
        "#,
    )
    .bind(req.treatment_record_id)
    .bind(assistant.user_id)
    .bind(auth.user_id)
    .bind(req.title.trim())
    .bind(req.description.as_deref().map(str::trim).filter(|s| !s.is_empty()))
    .bind(req.start_time)
    .bind(req.end_time)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%task_id, assistant = %assistant.user_id, "assistant task assigned");

    notifications::dispatch(
        &state,
        assistant.user_id,
        Notice::new("assistant_task", messages::NOTIFY_TASK_ASSIGNED, req.title.trim().to_string()).about(task_id),
    )
    .await;

    Ok(Json(ApiOk::new(load_task(&state, task_id).await?)))
}

pub async fn change_task_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<Uuid>,
    Json(req): Json<TaskStatusRequest>,
) -> Result<Json<ApiOk<TaskRow>>, ApiError> {
    auth.require(&[Role::Dentist, Role::Assistant])?;

    let task = load_task(&state, task_id).await?;
    check_task_status_change(&auth, &task, req.status)?;

    // status re-checked here; a concurrent change matches no row
    let res = sqlx::query(
        r#"
        UPDATE assistant_task
        SET status = $2, updated_at = now()
        WHERE task_id = $1 AND status = $3
        "#,
    )
    .bind(task_id)
    .bind(req.status)
    .bind(TASK_PENDING)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    validation::transition_applied(res.rows_affected())?;

    tracing::info!(%task_id, status = req.status, "assistant task status changed");
    Ok(Json(ApiOk::new(load_task(&state, task_id).await?)))
}

/// Tasks assigned to the caller (assistant) or by the caller (dentist).
pub async fn list_my_tasks(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<TaskRow>>>, ApiError> {
    auth.require(&[Role::Assistant, Role::Dentist])?;

    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        r#"
        {TASK_SELECT}
        WHERE t.assistant_user_id = $1 OR t.assigned_by_user_id = $1
        ORDER BY t.status ASC, t.start_time ASC
        "#
    ))
    .bind(auth.user_id)
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

    fn req(now: DateTime<Utc>) -> CreateTaskRequest {
        CreateTaskRequest {
            assistant_user_id: Uuid::new_v4(),
            treatment_record_id: Uuid::new_v4(),
            title: "Prepare implant kit".into(),
            description: None,
            start_time: now + Duration::hours(1),
            end_time: now + Duration::hours(2),
        }
    }

    fn task(assistant: Uuid, dentist: Uuid, status: i16) -> TaskRow {
        let now = Utc::now();
        TaskRow {
            task_id: Uuid::new_v4(),
            treatment_record_id: Uuid::new_v4(),
            assistant_user_id: assistant,
            assistant_name: "Mai".into(),
            assigned_by_user_id: dentist,
            assigned_by_name: "Dr. Lan".into(),
            title: "Sterilize tools".into(),
            description: None,
            start_time: now,
            end_time: now + Duration::hours(1),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn task_times_are_checked() {
        let now = Utc::now();
        assert!(validate_task(&req(now), now).is_ok());

        let mut r = req(now);
        r.end_time = r.start_time;
        assert!(validate_task(&r, now).is_err());

        let mut r = req(now);
        r.start_time = now - Duration::hours(3);
        r.end_time = now - Duration::hours(2);
        let err = validate_task(&r, now).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m == messages::DATE_IN_PAST));

        let mut r = req(now);
        r.title = "".into();
        assert!(validate_task(&r, now).is_err());
    }

    #[test]
    fn assistant_can_finish_own_pending_task() {
        let assistant = test_auth(Role::Assistant);
        let t = task(assistant.user_id, Uuid::new_v4(), TASK_PENDING);
        assert!(check_task_status_change(&assistant, &t, TASK_DONE).is_ok());
        assert!(check_task_status_change(&assistant, &t, TASK_CANCELED).is_ok());
        assert!(check_task_status_change(&assistant, &t, TASK_PENDING).is_err());
    }

    #[test]
    fn finished_tasks_are_final() {
        let dentist = test_auth(Role::Dentist);
        let t = task(Uuid::new_v4(), dentist.user_id, TASK_DONE);
        let err = check_task_status_change(&dentist, &t, TASK_CANCELED).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m == messages::INVALID_STATUS_TRANSITION));
    }

    #[test]
    fn strangers_cannot_touch_a_task() {
        let other = test_auth(Role::Assistant);
        let t = task(Uuid::new_v4(), Uuid::new_v4(), TASK_PENDING);
        assert!(matches!(
            check_task_status_change(&other, &t, TASK_DONE),
            Err(ApiError::Forbidden(..))
        ));
    }
}
