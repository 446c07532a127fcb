use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> AppResult<Json<TokenResponse>> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(AppError::BadRequest("Valid email required".into()));
    }
    if req.password.len() < 8 {
        return Err(AppError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }
    let username = req.username.trim().to_string();
    if username.len() < 2 {
        return Err(AppError::BadRequest("Username required".into()));
    }

    let user_id = uuid::Uuid::now_v7().to_string();
    {
        let conn = state.db.get()?;
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        if taken {
            return Err(AppError::BadRequest("Email already in use".into()));
        }

        let password_hash = auth::hash_password(&req.password)?;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, alias, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user_id, email, password_hash, username, username, now_rfc3339()],
        )?;
    }

    let access_token = auth::create_session(&state.db, &user_id, state.config.auth.token_hours)?;
    Ok(Json(TokenResponse { access_token }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let email = req.email.trim().to_lowercase();

    let row: Option<(String, String)> = {
        let conn = state.db.get()?;
        match conn.query_row(
            "SELECT id, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        }
    };

    let (user_id, password_hash) = row.ok_or(AppError::Unauthorized)?;
    if !auth::verify_password(&req.password, &password_hash) {
        return Err(AppError::Unauthorized);
    }

    let access_token = auth::create_session(&state.db, &user_id, state.config.auth.token_hours)?;
    Ok(Json(TokenResponse { access_token }))
}
