use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::models::{QuestInstance, QuestTemplate};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::quests::repository::{QuestDetail, QuestSummary};
use crate::quests::CreateQuest;
use crate::routes::validate_coords;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedoRequest {
    pub start_time: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct CreateQuestResponse {
    pub template: QuestTemplate,
    pub instance: QuestInstance,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quests", get(list).post(create))
        .route("/quests/{id}", get(get_by_id))
        .route("/quests/{id}/join", post(join))
        .route("/quests/{id}/save", post(save))
        .route("/quests/{id}/redo", post(redo))
}

fn validate_quest_input(input: &CreateQuest) -> AppResult<()> {
    let title = input.title.trim();
    if title.len() < 2 || title.len() > 80 {
        return Err(AppError::BadRequest(
            "Title must be 2 to 80 characters".into(),
        ));
    }
    let description = input.description.trim();
    if description.len() < 10 || description.len() > 600 {
        return Err(AppError::BadRequest(
            "Description must be 10 to 600 characters".into(),
        ));
    }
    if !(15..=360).contains(&input.duration_minutes) {
        return Err(AppError::BadRequest(
            "Duration must be 15 to 360 minutes".into(),
        ));
    }
    if !(1..=50).contains(&input.max_participants) {
        return Err(AppError::BadRequest(
            "Max participants must be 1 to 50".into(),
        ));
    }
    validate_coords(input.location.lat, input.location.lng)
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateQuest>,
) -> AppResult<Json<CreateQuestResponse>> {
    validate_quest_input(&input)?;
    let (template, instance) = state.quests.create(&user.id, input).await?;
    Ok(Json(CreateQuestResponse { template, instance }))
}

async fn list(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<QuestSummary>>> {
    let observer = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => {
            validate_coords(lat, lng)?;
            Some((lat, lng))
        }
        _ => None,
    };
    let quests = state
        .quests
        .list(observer, query.radius_km, user.as_ref().map(|u| u.id.as_str()))
        .await?;
    Ok(Json(quests))
}

async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<QuestDetail>> {
    Ok(Json(state.quests.get(&id).await?))
}

async fn join(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let instance = state.quests.join(&id, &user.id).await?;
    Ok(Json(json!({ "instanceId": instance.id })))
}

async fn save(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    state.quests.save(&id, &user.id).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn redo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<RedoRequest>,
) -> AppResult<Json<QuestInstance>> {
    let instance = state.quests.redo(&id, &user.id, req.start_time).await?;
    Ok(Json(instance))
}
