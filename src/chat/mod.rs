//! Per-instance chat: persistence, participant gating and notification
//! fan-out. Live delivery goes through [`rooms::RoomRegistry`].

pub mod rooms;

use std::sync::Arc;

use rusqlite::params;
use serde_json::json;

use crate::db::models::ChatMessage;
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::notifications::{NotificationEvent, NotificationSink};
use crate::state::DbPool;

const HISTORY_LIMIT: i64 = 200;
const NOTIFY_PREVIEW_CHARS: usize = 120;

pub struct ChatService {
    pool: DbPool,
    notifier: Arc<dyn NotificationSink>,
}

impl ChatService {
    pub fn new(pool: DbPool, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { pool, notifier }
    }

    pub fn is_participant(&self, instance_id: &str, user_id: &str) -> AppResult<bool> {
        let conn = self.pool.get()?;
        let joined: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM quest_participants WHERE instance_id = ?1 AND user_id = ?2",
            params![instance_id, user_id],
            |row| row.get(0),
        )?;
        Ok(joined)
    }

    pub fn list_messages(&self, instance_id: &str, user_id: &str) -> AppResult<Vec<ChatMessage>> {
        if !self.is_participant(instance_id, user_id)? {
            return Err(AppError::BadRequest("Join the quest to view chat".into()));
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT m.id, m.instance_id, m.user_id, u.name, m.text, m.created_at
             FROM chat_messages m
             JOIN users u ON u.id = m.user_id
             WHERE m.instance_id = ?1
             ORDER BY m.created_at ASC
             LIMIT ?2",
        )?;
        let messages = stmt
            .query_map(params![instance_id, HISTORY_LIMIT], |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    instance_id: row.get(1)?,
                    user_id: row.get(2)?,
                    user_name: row.get(3)?,
                    text: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Persist a message. Callers publish the returned record to the room
    /// registry after this returns, so nothing is broadcast that was not
    /// durably recorded first.
    pub fn send_message(
        &self,
        instance_id: &str,
        user_id: &str,
        text: &str,
    ) -> AppResult<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::BadRequest("Message required".into()));
        }
        if !self.is_participant(instance_id, user_id)? {
            return Err(AppError::BadRequest("Join the quest to chat".into()));
        }

        let conn = self.pool.get()?;
        let id = uuid::Uuid::now_v7().to_string();
        let created_at = now_rfc3339();
        conn.execute(
            "INSERT INTO chat_messages (id, instance_id, user_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, instance_id, user_id, text, created_at],
        )?;

        let user_name: String = conn.query_row(
            "SELECT name FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(ChatMessage {
            id,
            instance_id: instance_id.to_string(),
            user_id: user_id.to_string(),
            user_name,
            text: text.to_string(),
            created_at,
        })
    }

    /// Best-effort chat notifications for everyone in the instance except
    /// the sender.
    pub async fn notify_participants(&self, instance_id: &str, sender_id: &str, text: &str) {
        let targets: Vec<String> = {
            let conn = match self.pool.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Chat notification query failed: {}", e);
                    return;
                }
            };
            let result = conn
                .prepare(
                    "SELECT user_id FROM quest_participants
                     WHERE instance_id = ?1 AND user_id != ?2",
                )
                .and_then(|mut stmt| {
                    stmt.query_map(params![instance_id, sender_id], |row| row.get(0))?
                        .collect::<Result<Vec<String>, _>>()
                });
            match result {
                Ok(targets) => targets,
                Err(e) => {
                    tracing::warn!("Chat notification query failed: {}", e);
                    return;
                }
            }
        };

        let preview: String = text.chars().take(NOTIFY_PREVIEW_CHARS).collect();
        for target in targets {
            let event = NotificationEvent {
                kind: "chat_message".into(),
                title: "New chat message".into(),
                body: preview.clone(),
                data: json!({ "instanceId": instance_id }),
            };
            if let Err(e) = self.notifier.deliver(&target, event).await {
                tracing::warn!("Chat notification delivery failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::notifications::SqliteNotificationSink;

    fn service() -> (ChatService, DbPool) {
        let pool = db::test_pool();
        let notifier = Arc::new(SqliteNotificationSink::new(pool.clone()));
        (ChatService::new(pool.clone(), notifier), pool)
    }

    fn seed_instance_with_members(pool: &DbPool, members: &[&str]) {
        let conn = pool.get().unwrap();
        let now = now_rfc3339();
        for member in members {
            conn.execute(
                "INSERT INTO users (id, email, password_hash, name, created_at)
                 VALUES (?1, ?2, 'x', ?1, ?3)",
                params![member, format!("{member}@example.com"), now],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO locations (id, place_name, lat, lng, created_at)
             VALUES ('l1', 'Park', 1.0, 2.0, ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO quest_templates (id, creator_id, title, description, vibe_tag,
             location_id, start_time, duration_minutes, max_participants, created_at)
             VALUES ('t1', ?1, 'T', 'D', 'chill', 'l1', ?2, 60, 8, ?2)",
            params![members[0], now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO quest_instances (id, template_id, start_time, duration_minutes,
             location_id, created_at) VALUES ('i1', 't1', ?1, 60, 'l1', ?1)",
            params![now],
        )
        .unwrap();
        for member in members {
            conn.execute(
                "INSERT INTO quest_participants (instance_id, user_id, joined_at)
                 VALUES ('i1', ?1, ?2)",
                params![member, now],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn non_participant_cannot_send_or_read() {
        let (chat, pool) = service();
        seed_instance_with_members(&pool, &["alice"]);
        {
            let conn = pool.get().unwrap();
            conn.execute(
                "INSERT INTO users (id, email, password_hash, name, created_at)
                 VALUES ('mallory', 'm@example.com', 'x', 'Mallory', ?1)",
                params![now_rfc3339()],
            )
            .unwrap();
        }

        assert!(chat.send_message("i1", "mallory", "hi").is_err());
        assert!(chat.list_messages("i1", "mallory").is_err());
    }

    #[tokio::test]
    async fn send_then_list_roundtrip() {
        let (chat, pool) = service();
        seed_instance_with_members(&pool, &["alice", "bob"]);

        chat.send_message("i1", "alice", "  first  ").unwrap();
        chat.send_message("i1", "bob", "second").unwrap();

        let messages = chat.list_messages("i1", "alice").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "first");
        assert_eq!(messages[0].user_name, "alice");
        assert_eq!(messages[1].text, "second");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (chat, pool) = service();
        seed_instance_with_members(&pool, &["alice"]);
        assert!(chat.send_message("i1", "alice", "   ").is_err());
    }

    #[tokio::test]
    async fn notify_skips_the_sender() {
        let (chat, pool) = service();
        seed_instance_with_members(&pool, &["alice", "bob", "carol"]);

        chat.notify_participants("i1", "alice", "see you there").await;

        assert_eq!(crate::notifications::list(&pool, "alice", false).unwrap().len(), 0);
        assert_eq!(crate::notifications::list(&pool, "bob", false).unwrap().len(), 1);
        assert_eq!(crate::notifications::list(&pool, "carol", false).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn long_messages_are_previewed_in_notifications() {
        let (chat, pool) = service();
        seed_instance_with_members(&pool, &["alice", "bob"]);

        let long = "x".repeat(500);
        chat.notify_participants("i1", "alice", &long).await;

        let bobs = crate::notifications::list(&pool, "bob", false).unwrap();
        assert_eq!(bobs[0].body.len(), NOTIFY_PREVIEW_CHARS);
    }
}
