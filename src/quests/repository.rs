//! Storage port for quest templates, instances and participation records.
//! All database side effects for the quest lifecycle live behind `QuestStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::db::models::{Checkin, Location, Post, QuestInstance, QuestTemplate, Rating};
use crate::db::{now_rfc3339, ts_column, StoreError};
use crate::quests::domain::{self, InstanceStatus};
use crate::state::DbPool;

/// Outcome of a capacity-guarded join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
    Full,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestSummary {
    #[serde(flatten)]
    pub template: QuestTemplate,
    pub location: Location,
    pub participants_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorInfo {
    pub id: String,
    pub name: String,
    pub alias: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestDetail {
    #[serde(flatten)]
    pub template: QuestTemplate,
    pub location: Location,
    pub creator: CreatorInfo,
    pub instances: Vec<QuestInstance>,
    pub participants_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestWithLocation {
    #[serde(flatten)]
    pub template: QuestTemplate,
    pub location: Location,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedQuest {
    pub instance_id: String,
    pub quest: QuestWithLocation,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
}

/// An instance plus the coordinates of its venue, enough to run the
/// check-in and post guards.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub instance: QuestInstance,
    pub venue: (f64, f64),
}

#[async_trait]
pub trait QuestStore: Send + Sync {
    async fn insert_location(&self, location: &Location) -> Result<(), StoreError>;
    async fn insert_template(&self, template: &QuestTemplate) -> Result<(), StoreError>;
    async fn insert_instance(&self, instance: &QuestInstance) -> Result<(), StoreError>;

    async fn template(&self, id: &str) -> Result<Option<QuestTemplate>, StoreError>;
    async fn template_detail(&self, id: &str) -> Result<Option<QuestDetail>, StoreError>;
    async fn template_summaries(&self, limit: i64) -> Result<Vec<QuestSummary>, StoreError>;

    async fn instance_for_start(
        &self,
        template_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Option<QuestInstance>, StoreError>;
    async fn instance_context(&self, id: &str) -> Result<Option<InstanceContext>, StoreError>;

    /// Membership and capacity are decided inside one transaction so two
    /// racing joins cannot both take the last seat.
    async fn join(
        &self,
        instance_id: &str,
        user_id: &str,
        max_participants: i64,
    ) -> Result<JoinOutcome, StoreError>;

    async fn is_participant(&self, instance_id: &str, user_id: &str) -> Result<bool, StoreError>;

    async fn upsert_checkin(
        &self,
        instance_id: &str,
        user_id: &str,
        lat: f64,
        lng: f64,
    ) -> Result<Checkin, StoreError>;
    async fn has_checkin(&self, instance_id: &str, user_id: &str) -> Result<bool, StoreError>;

    /// Returns false when the instance does not exist.
    async fn mark_completed(&self, instance_id: &str) -> Result<bool, StoreError>;

    async fn insert_post(&self, post: &Post) -> Result<(), StoreError>;

    async fn upsert_rating(
        &self,
        instance_id: &str,
        user_id: &str,
        rating: i64,
        comment: Option<&str>,
    ) -> Result<Rating, StoreError>;

    async fn upsert_save(&self, quest_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn blocked_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError>;
    async fn saved_templates(&self, user_id: &str) -> Result<Vec<QuestWithLocation>, StoreError>;
    async fn joined_instances(&self, user_id: &str) -> Result<Vec<JoinedQuest>, StoreError>;
}

/// SQLite implementation.
pub struct SqliteQuestStore {
    pool: DbPool,
}

impl SqliteQuestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn template_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuestTemplate> {
    Ok(QuestTemplate {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        vibe_tag: row.get(4)?,
        image_url: row.get(5)?,
        location_id: row.get(6)?,
        start_time: ts_column(7, row.get(7)?)?,
        duration_minutes: row.get(8)?,
        max_participants: row.get(9)?,
        cost: row.get(10)?,
    })
}

fn location_from_row(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Location> {
    Ok(Location {
        id: row.get(base)?,
        place_name: row.get(base + 1)?,
        lat: row.get(base + 2)?,
        lng: row.get(base + 3)?,
        category: row.get(base + 4)?,
    })
}

fn instance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuestInstance> {
    let status_raw: String = row.get(6)?;
    let status = InstanceStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown instance status: {status_raw}").into(),
        )
    })?;
    Ok(QuestInstance {
        id: row.get(0)?,
        template_id: row.get(1)?,
        created_by: row.get(2)?,
        start_time: ts_column(3, row.get(3)?)?,
        duration_minutes: row.get(4)?,
        location_id: row.get(5)?,
        status,
    })
}

const TEMPLATE_COLS: &str = "t.id, t.creator_id, t.title, t.description, t.vibe_tag, t.image_url, \
     t.location_id, t.start_time, t.duration_minutes, t.max_participants, t.cost";
const INSTANCE_COLS: &str =
    "i.id, i.template_id, i.created_by, i.start_time, i.duration_minutes, i.location_id, i.status";
const LOCATION_COLS: &str = "l.id, l.place_name, l.lat, l.lng, l.category";

#[async_trait]
impl QuestStore for SqliteQuestStore {
    async fn insert_location(&self, location: &Location) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO locations (id, place_name, lat, lng, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                location.id,
                location.place_name,
                location.lat,
                location.lng,
                location.category,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn insert_template(&self, template: &QuestTemplate) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO quest_templates (id, creator_id, title, description, vibe_tag, image_url,
             location_id, start_time, duration_minutes, max_participants, cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                template.id,
                template.creator_id,
                template.title,
                template.description,
                template.vibe_tag,
                template.image_url,
                template.location_id,
                template.start_time.to_rfc3339(),
                template.duration_minutes,
                template.max_participants,
                template.cost,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn insert_instance(&self, instance: &QuestInstance) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO quest_instances (id, template_id, created_by, start_time,
             duration_minutes, location_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                instance.id,
                instance.template_id,
                instance.created_by,
                instance.start_time.to_rfc3339(),
                instance.duration_minutes,
                instance.location_id,
                instance.status.as_str(),
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn template(&self, id: &str) -> Result<Option<QuestTemplate>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLS} FROM quest_templates t WHERE t.id = ?1"
        ))?;
        match stmt.query_row(params![id], template_from_row) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn template_detail(&self, id: &str) -> Result<Option<QuestDetail>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLS}, {LOCATION_COLS}, u.id, u.name, u.alias, u.avatar_url
             FROM quest_templates t
             JOIN locations l ON l.id = t.location_id
             JOIN users u ON u.id = t.creator_id
             WHERE t.id = ?1"
        ))?;
        let header = match stmt.query_row(params![id], |row| {
            let template = template_from_row(row)?;
            let location = location_from_row(row, 11)?;
            let creator = CreatorInfo {
                id: row.get(16)?,
                name: row.get(17)?,
                alias: row.get(18)?,
                avatar_url: row.get(19)?,
            };
            Ok((template, location, creator))
        }) {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (template, location, creator) = header;

        let mut stmt = conn.prepare(&format!(
            "SELECT {INSTANCE_COLS} FROM quest_instances i
             WHERE i.template_id = ?1 ORDER BY i.start_time ASC"
        ))?;
        let instances: Vec<QuestInstance> = stmt
            .query_map(params![id], instance_from_row)?
            .collect::<Result<_, _>>()?;

        let participants_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM quest_participants p
             JOIN quest_instances i ON i.id = p.instance_id
             WHERE i.template_id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        Ok(Some(QuestDetail {
            template,
            location,
            creator,
            instances,
            participants_count,
        }))
    }

    async fn template_summaries(&self, limit: i64) -> Result<Vec<QuestSummary>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLS}, {LOCATION_COLS},
                    COALESCE((SELECT COUNT(*) FROM quest_participants p
                              JOIN quest_instances i ON i.id = p.instance_id
                              WHERE i.template_id = t.id), 0)
             FROM quest_templates t
             JOIN locations l ON l.id = t.location_id
             ORDER BY t.start_time ASC
             LIMIT ?1"
        ))?;
        let summaries = stmt
            .query_map(params![limit], |row| {
                Ok(QuestSummary {
                    template: template_from_row(row)?,
                    location: location_from_row(row, 11)?,
                    participants_count: row.get(16)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(summaries)
    }

    async fn instance_for_start(
        &self,
        template_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Option<QuestInstance>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSTANCE_COLS} FROM quest_instances i
             WHERE i.template_id = ?1 AND i.start_time = ?2"
        ))?;
        match stmt.query_row(
            params![template_id, start_time.to_rfc3339()],
            instance_from_row,
        ) {
            Ok(i) => Ok(Some(i)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn instance_context(&self, id: &str) -> Result<Option<InstanceContext>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSTANCE_COLS}, l.lat, l.lng FROM quest_instances i
             JOIN locations l ON l.id = i.location_id
             WHERE i.id = ?1"
        ))?;
        match stmt.query_row(params![id], |row| {
            let instance = instance_from_row(row)?;
            let venue = (row.get::<_, f64>(7)?, row.get::<_, f64>(8)?);
            Ok(InstanceContext { instance, venue })
        }) {
            Ok(ctx) => Ok(Some(ctx)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn join(
        &self,
        instance_id: &str,
        user_id: &str,
        max_participants: i64,
    ) -> Result<JoinOutcome, StoreError> {
        let conn = self.pool.get()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<JoinOutcome, StoreError> = (|| {
            let already: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM quest_participants
                 WHERE instance_id = ?1 AND user_id = ?2",
                params![instance_id, user_id],
                |row| row.get(0),
            )?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM quest_participants WHERE instance_id = ?1",
                params![instance_id],
                |row| row.get(0),
            )?;

            match domain::admit_join(already, count, max_participants) {
                Ok(()) if already => Ok(JoinOutcome::AlreadyJoined),
                Ok(()) => {
                    conn.execute(
                        "INSERT INTO quest_participants (instance_id, user_id, joined_at)
                         VALUES (?1, ?2, ?3)",
                        params![instance_id, user_id, now_rfc3339()],
                    )?;
                    Ok(JoinOutcome::Joined)
                }
                Err(_) => Ok(JoinOutcome::Full),
            }
        })();

        match result {
            Ok(outcome) => {
                conn.execute("COMMIT", [])?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    async fn is_participant(&self, instance_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let joined: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM quest_participants WHERE instance_id = ?1 AND user_id = ?2",
            params![instance_id, user_id],
            |row| row.get(0),
        )?;
        Ok(joined)
    }

    async fn upsert_checkin(
        &self,
        instance_id: &str,
        user_id: &str,
        lat: f64,
        lng: f64,
    ) -> Result<Checkin, StoreError> {
        let conn = self.pool.get()?;
        // A repeat check-in refreshes coordinates but keeps the original time.
        conn.execute(
            "INSERT INTO checkins (instance_id, user_id, lat, lng, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(instance_id, user_id) DO UPDATE SET
               lat = excluded.lat,
               lng = excluded.lng",
            params![instance_id, user_id, lat, lng, now_rfc3339()],
        )?;
        let checkin = conn.query_row(
            "SELECT instance_id, user_id, lat, lng, created_at FROM checkins
             WHERE instance_id = ?1 AND user_id = ?2",
            params![instance_id, user_id],
            |row| {
                Ok(Checkin {
                    instance_id: row.get(0)?,
                    user_id: row.get(1)?,
                    lat: row.get(2)?,
                    lng: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;
        Ok(checkin)
    }

    async fn has_checkin(&self, instance_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let present: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM checkins WHERE instance_id = ?1 AND user_id = ?2",
            params![instance_id, user_id],
            |row| row.get(0),
        )?;
        Ok(present)
    }

    async fn mark_completed(&self, instance_id: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE quest_instances SET status = 'completed' WHERE id = ?1",
            params![instance_id],
        )?;
        Ok(rows > 0)
    }

    async fn insert_post(&self, post: &Post) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO posts (id, instance_id, user_id, location_id, media_url, media_type,
             duration_seconds, caption, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                post.id,
                post.instance_id,
                post.user_id,
                post.location_id,
                post.media_url,
                post.media_type,
                post.duration_seconds,
                post.caption,
                post.created_at
            ],
        )?;
        Ok(())
    }

    async fn upsert_rating(
        &self,
        instance_id: &str,
        user_id: &str,
        rating: i64,
        comment: Option<&str>,
    ) -> Result<Rating, StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO ratings (instance_id, user_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(instance_id, user_id) DO UPDATE SET
               rating = excluded.rating,
               comment = excluded.comment",
            params![instance_id, user_id, rating, comment, now_rfc3339()],
        )?;
        let rating = conn.query_row(
            "SELECT instance_id, user_id, rating, comment, created_at FROM ratings
             WHERE instance_id = ?1 AND user_id = ?2",
            params![instance_id, user_id],
            |row| {
                Ok(Rating {
                    instance_id: row.get(0)?,
                    user_id: row.get(1)?,
                    rating: row.get(2)?,
                    comment: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;
        Ok(rating)
    }

    async fn upsert_save(&self, quest_id: &str, user_id: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO saves (quest_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![quest_id, user_id, now_rfc3339()],
        )?;
        Ok(())
    }

    async fn blocked_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT blocked_id FROM blocks WHERE blocker_id = ?1")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    async fn saved_templates(&self, user_id: &str) -> Result<Vec<QuestWithLocation>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLS}, {LOCATION_COLS}
             FROM saves s
             JOIN quest_templates t ON t.id = s.quest_id
             JOIN locations l ON l.id = t.location_id
             WHERE s.user_id = ?1
             ORDER BY s.created_at DESC"
        ))?;
        let saved = stmt
            .query_map(params![user_id], |row| {
                Ok(QuestWithLocation {
                    template: template_from_row(row)?,
                    location: location_from_row(row, 11)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(saved)
    }

    async fn joined_instances(&self, user_id: &str) -> Result<Vec<JoinedQuest>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLS}, {LOCATION_COLS}, i.id, i.start_time, i.duration_minutes
             FROM quest_participants p
             JOIN quest_instances i ON i.id = p.instance_id
             JOIN quest_templates t ON t.id = i.template_id
             JOIN locations l ON l.id = t.location_id
             WHERE p.user_id = ?1
             ORDER BY p.joined_at DESC"
        ))?;
        let joined = stmt
            .query_map(params![user_id], |row| {
                Ok(JoinedQuest {
                    quest: QuestWithLocation {
                        template: template_from_row(row)?,
                        location: location_from_row(row, 11)?,
                    },
                    instance_id: row.get(16)?,
                    start_time: ts_column(17, row.get(17)?)?,
                    duration_minutes: row.get(18)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(joined)
    }
}
