use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::{Checkin, Post, QuestInstance, Rating};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::quests::CreatePost;
use crate::routes::validate_coords;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CheckinRequest {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRequest {
    pub rating: i64,
    pub comment: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quest-instances/{id}/checkin", post(checkin))
        .route("/quest-instances/{id}/complete", post(complete))
        .route("/quest-instances/{id}/posts", post(create_post))
        .route("/quest-instances/{id}/rate", post(rate))
}

async fn checkin(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CheckinRequest>,
) -> AppResult<Json<Checkin>> {
    validate_coords(req.lat, req.lng)?;
    let checkin = state.quests.checkin(&id, &user.id, req.lat, req.lng).await?;
    Ok(Json(checkin))
}

async fn complete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<QuestInstance>> {
    let instance = state.quests.complete(&id, &user.id).await?;
    Ok(Json(instance))
}

async fn create_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(input): Json<CreatePost>,
) -> AppResult<Json<Post>> {
    if !input.media_url.starts_with("http") {
        return Err(AppError::BadRequest("Valid media URL required".into()));
    }
    if let Some(seconds) = input.duration_seconds {
        if !(15..=60).contains(&seconds) {
            return Err(AppError::BadRequest(
                "Video duration must be 15 to 60 seconds".into(),
            ));
        }
    }
    if input.caption.as_deref().is_some_and(|c| c.len() > 240) {
        return Err(AppError::BadRequest(
            "Caption must be 240 characters or less".into(),
        ));
    }

    let post = state.quests.create_post(&id, &user.id, input).await?;
    Ok(Json(post))
}

async fn rate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<RateRequest>,
) -> AppResult<Json<Rating>> {
    let rating = state
        .quests
        .rate(&id, &user.id, req.rating, req.comment.as_deref())
        .await?;
    Ok(Json(rating))
}
