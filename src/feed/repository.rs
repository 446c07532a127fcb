//! Storage port feeding the ranker with candidates and requester context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::models::Location;
use crate::db::{ts_column, StoreError};
use crate::feed::ranker::{FeedAuthor, PostCandidate, QuestCandidate};
use crate::state::DbPool;

#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn interest_names(&self, user_id: &str) -> Result<Vec<String>, StoreError>;
    async fn blocked_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError>;
    /// Soonest-starting templates with venue and instance count.
    async fn quest_candidates(&self, limit: i64) -> Result<Vec<QuestCandidate>, StoreError>;
    /// Newest posts with venue, author and like count.
    async fn post_candidates(&self, limit: i64) -> Result<Vec<PostCandidate>, StoreError>;
    /// Posts created at or after `since`, newest first.
    async fn posts_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostCandidate>, StoreError>;
}

pub struct SqliteFeedStore {
    pool: DbPool,
}

impl SqliteFeedStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn post_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostCandidate> {
    Ok(PostCandidate {
        id: row.get(0)?,
        media_url: row.get(1)?,
        media_type: row.get(2)?,
        caption: row.get(3)?,
        created_at: ts_column(4, row.get(4)?)?,
        user: FeedAuthor {
            id: row.get(5)?,
            name: row.get(6)?,
            alias: row.get(7)?,
            avatar_url: row.get(8)?,
        },
        location: Location {
            id: row.get(9)?,
            place_name: row.get(10)?,
            lat: row.get(11)?,
            lng: row.get(12)?,
            category: row.get(13)?,
        },
        like_count: row.get(14)?,
    })
}

const POST_SELECT: &str = "SELECT p.id, p.media_url, p.media_type, p.caption, p.created_at,
            u.id, u.name, u.alias, u.avatar_url,
            l.id, l.place_name, l.lat, l.lng, l.category,
            COALESCE((SELECT COUNT(*) FROM post_likes pl WHERE pl.post_id = p.id), 0)
     FROM posts p
     JOIN users u ON u.id = p.user_id
     JOIN locations l ON l.id = p.location_id";

#[async_trait]
impl FeedStore for SqliteFeedStore {
    async fn interest_names(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT t.name FROM user_interests ui
             JOIN interest_tags t ON t.id = ui.tag_id
             WHERE ui.user_id = ?1",
        )?;
        let names = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(names)
    }

    async fn blocked_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT blocked_id FROM blocks WHERE blocker_id = ?1")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    async fn quest_candidates(&self, limit: i64) -> Result<Vec<QuestCandidate>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.creator_id, t.title, t.description, t.vibe_tag, t.image_url,
                    t.start_time, t.duration_minutes, t.max_participants, t.cost,
                    l.id, l.place_name, l.lat, l.lng, l.category,
                    COALESCE((SELECT COUNT(*) FROM quest_instances i WHERE i.template_id = t.id), 0)
             FROM quest_templates t
             JOIN locations l ON l.id = t.location_id
             ORDER BY t.start_time ASC
             LIMIT ?1",
        )?;
        let candidates = stmt
            .query_map(params![limit], |row| {
                Ok(QuestCandidate {
                    id: row.get(0)?,
                    creator_id: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    vibe_tag: row.get(4)?,
                    image_url: row.get(5)?,
                    start_time: ts_column(6, row.get(6)?)?,
                    duration_minutes: row.get(7)?,
                    max_participants: row.get(8)?,
                    cost: row.get(9)?,
                    location: Location {
                        id: row.get(10)?,
                        place_name: row.get(11)?,
                        lat: row.get(12)?,
                        lng: row.get(13)?,
                        category: row.get(14)?,
                    },
                    instance_count: row.get(15)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(candidates)
    }

    async fn post_candidates(&self, limit: i64) -> Result<Vec<PostCandidate>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare(&format!("{POST_SELECT} ORDER BY p.created_at DESC LIMIT ?1"))?;
        let posts = stmt
            .query_map(params![limit], post_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    async fn posts_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostCandidate>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "{POST_SELECT} WHERE p.created_at >= ?1 ORDER BY p.created_at DESC LIMIT ?2"
        ))?;
        let posts = stmt
            .query_map(params![since.to_rfc3339(), limit], post_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }
}
