use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::params;
use serde::Serialize;

use crate::db::models::{Location, Post};
use crate::db::ts_column;
use crate::error::{AppError, AppResult};
use crate::feed::ranker::FeedAuthor;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationQuest {
    pub id: String,
    pub title: String,
    pub vibe_tag: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
pub struct LocationPost {
    #[serde(flatten)]
    pub post: Post,
    pub user: FeedAuthor,
}

#[derive(Serialize)]
pub struct LocationDetail {
    #[serde(flatten)]
    pub location: Location,
    pub quests: Vec<LocationQuest>,
    pub posts: Vec<LocationPost>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/locations/{id}", get(get_location))
}

async fn get_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<LocationDetail>> {
    let conn = state.db.get()?;

    let location = conn
        .query_row(
            "SELECT id, place_name, lat, lng, category FROM locations WHERE id = ?1",
            params![id],
            |row| {
                Ok(Location {
                    id: row.get(0)?,
                    place_name: row.get(1)?,
                    lat: row.get(2)?,
                    lng: row.get(3)?,
                    category: row.get(4)?,
                })
            },
        )
        .map_err(|_| AppError::NotFound)?;

    let quests = {
        let mut stmt = conn.prepare(
            "SELECT id, title, vibe_tag, start_time FROM quest_templates
             WHERE location_id = ?1 ORDER BY start_time ASC",
        )?;
        let result = stmt.query_map(params![id], |row| {
            Ok(LocationQuest {
                id: row.get(0)?,
                title: row.get(1)?,
                vibe_tag: row.get(2)?,
                start_time: ts_column(3, row.get(3)?)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
        result
    };

    let posts = {
        let mut stmt = conn.prepare(
            "SELECT p.id, p.instance_id, p.user_id, p.location_id, p.media_url, p.media_type,
                    p.duration_seconds, p.caption, p.created_at,
                    u.id, u.name, u.alias, u.avatar_url
             FROM posts p
             JOIN users u ON u.id = p.user_id
             WHERE p.location_id = ?1
             ORDER BY p.created_at DESC",
        )?;
        let result = stmt.query_map(params![id], |row| {
            Ok(LocationPost {
                post: Post {
                    id: row.get(0)?,
                    instance_id: row.get(1)?,
                    user_id: row.get(2)?,
                    location_id: row.get(3)?,
                    media_url: row.get(4)?,
                    media_type: row.get(5)?,
                    duration_seconds: row.get(6)?,
                    caption: row.get(7)?,
                    created_at: row.get(8)?,
                },
                user: FeedAuthor {
                    id: row.get(9)?,
                    name: row.get(10)?,
                    alias: row.get(11)?,
                    avatar_url: row.get(12)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
        result
    };

    Ok(Json(LocationDetail {
        location,
        quests,
        posts,
    }))
}
