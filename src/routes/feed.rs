use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::MaybeUser;
use crate::feed::ranker::{FeedItem, PostCandidate};
use crate::routes::validate_coords;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FeedQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feed", get(feed))
        .route("/feed/stories", get(stories))
}

async fn feed(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<FeedQuery>,
) -> AppResult<Json<Vec<FeedItem>>> {
    let observer = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => {
            validate_coords(lat, lng)?;
            Some((lat, lng))
        }
        _ => None,
    };
    let items = state
        .feed
        .feed(user.as_ref().map(|u| u.id.as_str()), observer)
        .await?;
    Ok(Json(items))
}

async fn stories(State(state): State<AppState>) -> AppResult<Json<Vec<PostCandidate>>> {
    Ok(Json(state.feed.stories().await?))
}
