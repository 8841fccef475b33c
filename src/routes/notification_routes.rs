// src/routes/notification_routes.rs

use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use uuid::Uuid;

use crate::{
    error::ApiError,
    messages,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
    notifications::NotificationRow,
    validation,
};

const KEEP_ALIVE_SECS: u64 = 15;

const NOTIFICATION_COLUMNS: &str = "notification_id, user_id, kind, title, body, related_id, is_read, created_at";

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub unread_only: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountDto {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ReadAllDto {
    pub updated: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread_count", get(unread_count))
        .route("/notifications/read_all", post(mark_all_read))
        .route("/notifications/stream", get(stream_notifications))
        .route("/notifications/{notification_id}/read", post(mark_read))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListNotificationsQuery>,
) -> Result<Json<ApiOk<Vec<NotificationRow>>>, ApiError> {
    let rows = sqlx::query_as::<_, NotificationRow>(&format!(
        r#"
        SELECT {NOTIFICATION_COLUMNS}
        FROM notification
        WHERE user_id = $1
          AND ($2 = false OR is_read = false)
        ORDER BY created_at DESC
        LIMIT $3
        "#
    ))
    .bind(auth.user_id)
    .bind(q.unread_only.unwrap_or(false))
    .bind(validation::clamp_limit(q.limit))
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn unread_count(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UnreadCountDto>>, ApiError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notification WHERE user_id = $1 AND is_read = false")
        .bind(auth.user_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(UnreadCountDto { count })))
}

/// Someone else's notification answers 404, same as a missing one.
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiOk<NotificationRow>>, ApiError> {
    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        r#"
        UPDATE notification
        SET is_read = true
        WHERE notification_id = $1 AND user_id = $2
        RETURNING {NOTIFICATION_COLUMNS}
        "#
    ))
    .bind(notification_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found(messages::NOTIFICATION_NOT_FOUND))?;

    Ok(Json(ApiOk::new(row)))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<ReadAllDto>>, ApiError> {
    let res = sqlx::query("UPDATE notification SET is_read = true WHERE user_id = $1 AND is_read = false")
        .bind(auth.user_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(ReadAllDto {
        updated: res.rows_affected(),
    })))
}

/// Live notifications of one user out of the shared broadcast.
pub fn user_feed(
    rx: broadcast::Receiver<NotificationRow>,
    user_id: Uuid,
) -> impl Stream<Item = NotificationRow> {
    BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(row) if row.user_id == user_id => Some(row),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(%user_id, skipped, "notification stream lagged");
            None
        }
    })
}

fn to_event(row: &NotificationRow) -> Option<Event> {
    match Event::default().event("notification").json_data(row) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::warn!(notification_id = %row.notification_id, "failed to encode notification: {e}");
            None
        }
    }
}

pub async fn stream_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(user_id = %auth.user_id, "notification stream opened");

    let events = user_feed(state.notifier.subscribe(), auth.user_id)
        .filter_map(|row| to_event(&row))
        .map(Ok::<Event, Infallible>);

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Notifier;
    use chrono::Utc;

    fn row(user_id: Uuid, title: &str) -> NotificationRow {
        NotificationRow {
            notification_id: Uuid::new_v4(),
            user_id,
            kind: "invoice".into(),
            title: title.into(),
            body: "".into(),
            related_id: None,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn feed_only_yields_own_notifications() {
        let notifier = Notifier::new(16);
        let me = Uuid::new_v4();
        let feed = user_feed(notifier.subscribe(), me);
        tokio::pin!(feed);

        notifier.publish(row(Uuid::new_v4(), "someone else"));
        notifier.publish(row(me, "mine"));

        let got = feed.next().await.unwrap();
        assert_eq!(got.user_id, me);
        assert_eq!(got.title, "mine");
    }

    #[tokio::test]
    async fn lagging_feed_keeps_going() {
        let notifier = Notifier::new(1);
        let me = Uuid::new_v4();
        let feed = user_feed(notifier.subscribe(), me);
        tokio::pin!(feed);

        notifier.publish(row(me, "dropped"));
        notifier.publish(row(me, "latest"));

        assert_eq!(feed.next().await.unwrap().title, "latest");
    }

    #[test]
    fn rows_encode_as_sse_events() {
        assert!(to_event(&row(Uuid::new_v4(), "Invoice created")).is_some());
    }
}
