use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use rusqlite::params;
use serde::Serialize;

use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: i64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/posts/{id}/like", post(toggle_like))
}

async fn toggle_like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<LikeResponse>> {
    let conn = state.db.get()?;

    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM posts WHERE id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(AppError::NotFound);
    }

    let already_liked: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
        params![post_id, user.id],
        |row| row.get(0),
    )?;

    if already_liked {
        conn.execute(
            "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user.id],
        )?;
    } else {
        conn.execute(
            "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![post_id, user.id, now_rfc3339()],
        )?;
    }

    let like_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;

    Ok(Json(LikeResponse {
        liked: !already_liked,
        like_count,
    }))
}
