use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::Notification;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::notifications;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub unread: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/read", post(mark_all_read))
}

async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Notification>>> {
    let unread_only = query.unread.as_deref() == Some("1");
    Ok(Json(notifications::list(&state.db, &user.id, unread_only)?))
}

async fn mark_all_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<serde_json::Value>> {
    notifications::mark_all_read(&state.db, &user.id)?;
    Ok(Json(json!({ "ok": true })))
}
