use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rusqlite::params;
use serde::Deserialize;
use serde_json::json;

use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub blocked_id: String,
}

/// What a report points at. One variant per reportable kind keeps the
/// target columns mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "targetType", content = "targetId", rename_all = "lowercase")]
pub enum ReportTarget {
    User(String),
    Quest(String),
    Post(String),
}

#[derive(Deserialize)]
pub struct ReportRequest {
    #[serde(flatten)]
    pub target: ReportTarget,
    pub reason: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/blocks", post(block))
        .route("/reports", post(report))
}

async fn block(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<BlockRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
        params![req.blocked_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(AppError::NotFound);
    }

    conn.execute(
        "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3)",
        params![user.id, req.blocked_id, now_rfc3339()],
    )?;
    Ok(Json(json!({ "ok": true })))
}

async fn report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ReportRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let reason = req.reason.trim();
    if reason.len() < 4 || reason.len() > 240 {
        return Err(AppError::BadRequest(
            "Reason must be 4 to 240 characters".into(),
        ));
    }

    let (table, column, target_id) = match &req.target {
        ReportTarget::User(id) => ("users", "reported_user_id", id),
        ReportTarget::Quest(id) => ("quest_templates", "reported_quest_id", id),
        ReportTarget::Post(id) => ("posts", "reported_post_id", id),
    };

    let conn = state.db.get()?;
    let exists: bool = conn.query_row(
        &format!("SELECT COUNT(*) > 0 FROM {table} WHERE id = ?1"),
        params![target_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(AppError::NotFound);
    }

    let report_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        &format!(
            "INSERT INTO reports (id, reporter_id, reason, {column}, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)"
        ),
        params![report_id, user.id, reason, target_id, now_rfc3339()],
    )?;

    Ok(Json(json!({ "id": report_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_target_deserializes_tagged_form() {
        let req: ReportRequest = serde_json::from_str(
            r#"{"targetType":"quest","targetId":"q-1","reason":"spam listing"}"#,
        )
        .unwrap();
        assert_eq!(req.target, ReportTarget::Quest("q-1".into()));
        assert_eq!(req.reason, "spam listing");
    }

    #[test]
    fn report_target_rejects_unknown_kind() {
        let result = serde_json::from_str::<ReportRequest>(
            r#"{"targetType":"comment","targetId":"c-1","reason":"spam"}"#,
        );
        assert!(result.is_err());
    }
}
