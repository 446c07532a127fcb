//! Notification persistence and delivery.

use async_trait::async_trait;
use rusqlite::params;
use serde::Serialize;

use crate::db::models::Notification;
use crate::db::{now_rfc3339, StoreError};
use crate::state::DbPool;

const LIST_LIMIT: i64 = 50;

/// One event for one user. `data` carries ids the client uses for deep links.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Delivery is fire-and-forget from the caller's point of view: failures are
/// logged, never propagated into lifecycle state.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, user_id: &str, event: NotificationEvent) -> Result<(), StoreError>;
}

pub struct SqliteNotificationSink {
    pool: DbPool,
}

impl SqliteNotificationSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSink for SqliteNotificationSink {
    async fn deliver(&self, user_id: &str, event: NotificationEvent) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO notifications (id, user_id, type, title, body, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid::Uuid::now_v7().to_string(),
                user_id,
                event.kind,
                event.title,
                event.body,
                serde_json::to_string(&event.data)?,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }
}

pub fn list(pool: &DbPool, user_id: &str, unread_only: bool) -> Result<Vec<Notification>, StoreError> {
    let conn = pool.get()?;
    let sql = if unread_only {
        "SELECT id, user_id, type, title, body, data, read_at, created_at FROM notifications
         WHERE user_id = ?1 AND read_at IS NULL ORDER BY created_at DESC LIMIT ?2"
    } else {
        "SELECT id, user_id, type, title, body, data, read_at, created_at FROM notifications
         WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2"
    };
    let mut stmt = conn.prepare(sql)?;
    let notifications = stmt
        .query_map(params![user_id, LIST_LIMIT], |row| {
            let data: Option<String> = row.get(5)?;
            Ok(Notification {
                id: row.get(0)?,
                user_id: row.get(1)?,
                kind: row.get(2)?,
                title: row.get(3)?,
                body: row.get(4)?,
                data: data.and_then(|d| serde_json::from_str(&d).ok()),
                read_at: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(notifications)
}

pub fn mark_all_read(pool: &DbPool, user_id: &str) -> Result<(), StoreError> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE notifications SET read_at = ?1 WHERE user_id = ?2 AND read_at IS NULL",
        params![now_rfc3339(), user_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed_user(pool: &DbPool, id: &str) {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, created_at)
             VALUES (?1, ?2, 'x', 'Test', ?3)",
            params![id, format!("{id}@example.com"), now_rfc3339()],
        )
        .unwrap();
    }

    fn event(kind: &str) -> NotificationEvent {
        NotificationEvent {
            kind: kind.into(),
            title: "Title".into(),
            body: "Body".into(),
            data: serde_json::json!({ "questId": "q1" }),
        }
    }

    #[tokio::test]
    async fn deliver_persists_a_row() {
        let pool = db::test_pool();
        seed_user(&pool, "u1");

        let sink = SqliteNotificationSink::new(pool.clone());
        sink.deliver("u1", event("quest_joined")).await.unwrap();

        let notifications = list(&pool, "u1", false).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, "quest_joined");
        assert_eq!(notifications[0].data.as_ref().unwrap()["questId"], "q1");
        assert!(notifications[0].read_at.is_none());
    }

    #[tokio::test]
    async fn unread_filter_hides_read_notifications() {
        let pool = db::test_pool();
        seed_user(&pool, "u1");

        let sink = SqliteNotificationSink::new(pool.clone());
        sink.deliver("u1", event("quest_joined")).await.unwrap();
        mark_all_read(&pool, "u1").unwrap();
        sink.deliver("u1", event("quest_completed")).await.unwrap();

        let unread = list(&pool, "u1", true).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, "quest_completed");

        let all = list(&pool, "u1", false).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn notifications_are_scoped_per_user() {
        let pool = db::test_pool();
        seed_user(&pool, "u1");
        seed_user(&pool, "u2");

        let sink = SqliteNotificationSink::new(pool.clone());
        sink.deliver("u1", event("quest_joined")).await.unwrap();

        assert_eq!(list(&pool, "u2", false).unwrap().len(), 0);
    }
}
