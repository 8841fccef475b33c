//! Notification dispatch.
//!
//! A notification is persisted first and then pushed to whichever clients are
//! listening on `/notifications/stream`. Nothing here is allowed to fail the
//! request that triggered it: errors are logged and swallowed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{AppState, Role};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NotificationRow {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub related_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// What to tell a user; the recipient is supplied at dispatch time.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: &'static str,
    pub title: &'static str,
    pub body: String,
    pub related_id: Option<Uuid>,
}

impl Notice {
    pub fn new(kind: &'static str, title: &'static str, body: impl Into<String>) -> Self {
        Self {
            kind,
            title,
            body: body.into(),
            related_id: None,
        }
    }

    pub fn about(mut self, related_id: Uuid) -> Self {
        self.related_id = Some(related_id);
        self
    }
}

/// In-process fan-out of saved notifications to live streams.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<NotificationRow>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationRow> {
        self.tx.subscribe()
    }

    /// Returns how many live streams received it. Zero listeners is normal.
    pub fn publish(&self, row: NotificationRow) -> usize {
        self.tx.send(row).unwrap_or(0)
    }
}

async fn insert(state: &AppState, recipient: Uuid, notice: &Notice) -> Result<NotificationRow, sqlx::Error> {
    sqlx::query_as::<_, NotificationRow>(
        r#"
        INSERT INTO notification (user_id, kind, title, body, related_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING notification_id, user_id, kind, title, body, related_id, is_read, created_at
        "#,
    )
    .bind(recipient)
    .bind(notice.kind)
    .bind(notice.title)
    .bind(&notice.body)
    .bind(notice.related_id)
    .fetch_one(&state.db)
    .await
}

pub async fn dispatch(state: &AppState, recipient: Uuid, notice: Notice) {
    match insert(state, recipient, &notice).await {
        Ok(row) => {
            let delivered = state.notifier.publish(row);
            tracing::debug!(%recipient, kind = notice.kind, delivered, "notification dispatched");
        }
        Err(e) => {
            tracing::warn!(%recipient, kind = notice.kind, "failed to store notification: {e}");
        }
    }
}

/// Same as `dispatch`, skipped when there is no account to notify (e.g. a
/// patient record without a portal login).
pub async fn dispatch_opt(state: &AppState, recipient: Option<Uuid>, notice: Notice) {
    if let Some(user_id) = recipient {
        dispatch(state, user_id, notice).await;
    }
}

pub async fn dispatch_to_role(state: &AppState, role: Role, notice: Notice) {
    let recipients: Vec<Uuid> = match sqlx::query_scalar(
        r#"
        SELECT user_id
        FROM app_user
        WHERE roles = $1
          AND is_active = true
        "#,
    )
    .bind(role.as_i16())
    .fetch_all(&state.db)
    .await
    {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(role = role.as_str(), "failed to load notification recipients: {e}");
            return;
        }
    };

    for user_id in recipients {
        dispatch(state, user_id, notice.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(user_id: Uuid) -> NotificationRow {
        NotificationRow {
            notification_id: Uuid::new_v4(),
            user_id,
            kind: "appointment".into(),
            title: "New appointment".into(),
            body: "Tomorrow 09:00".into(),
            related_id: None,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn publish_without_listeners_is_not_an_error() {
        let notifier = Notifier::new(8);
        assert_eq!(notifier.publish(sample(Uuid::new_v4())), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_published_rows() {
        let notifier = Notifier::new(8);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();
        let user = Uuid::new_v4();

        assert_eq!(notifier.publish(sample(user)), 2);
        assert_eq!(rx1.recv().await.unwrap().user_id, user);
        assert_eq!(rx2.recv().await.unwrap().user_id, user);
    }

    #[test]
    fn notice_builder_sets_related_id() {
        let id = Uuid::new_v4();
        let n = Notice::new("warranty", "Warranty card issued", "12 months").about(id);
        assert_eq!(n.related_id, Some(id));
        assert_eq!(n.body, "12 months");
    }
}
