use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::models::{InterestTag, User};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::quests::repository::{JoinedQuest, QuestWithLocation};
use crate::state::{AppState, DbPool};

const AGE_RANGES: &[&str] = &["18-24", "25-34", "35-44", "45-54", "55+"];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfile {
    pub name: String,
    pub alias: Option<String>,
    pub age_range: Option<String>,
    pub city: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub interests: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub interests: Vec<InterestTag>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/interests", get(list_interests))
        .route(
            "/users/me",
            get(me).put(update_profile).post(update_profile),
        )
        .route("/users/me/saves", get(saved))
        .route("/users/me/joined", get(joined))
}

fn load_profile(pool: &DbPool, user_id: &str) -> AppResult<Profile> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            "SELECT id, email, name, alias, age_range, city, bio, avatar_url
             FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    alias: row.get(3)?,
                    age_range: row.get(4)?,
                    city: row.get(5)?,
                    bio: row.get(6)?,
                    avatar_url: row.get(7)?,
                })
            },
        )
        .map_err(|_| AppError::NotFound)?;

    let mut stmt = conn.prepare(
        "SELECT t.id, t.name FROM user_interests ui
         JOIN interest_tags t ON t.id = ui.tag_id
         WHERE ui.user_id = ?1
         ORDER BY t.name ASC",
    )?;
    let interests = stmt
        .query_map(params![user_id], |row| {
            Ok(InterestTag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Profile { user, interests })
}

async fn list_interests(State(state): State<AppState>) -> AppResult<Json<Vec<InterestTag>>> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare("SELECT id, name FROM interest_tags ORDER BY name ASC")?;
    let tags = stmt
        .query_map([], |row| {
            Ok(InterestTag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(tags))
}

async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Profile>> {
    Ok(Json(load_profile(&state.db, &user.id)?))
}

/// Profile update. Interests are a replace-all set: every update clears the
/// old rows and inserts the submitted tag ids inside one transaction.
async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<UpdateProfile>,
) -> AppResult<Json<Profile>> {
    let name = input.name.trim();
    if name.len() < 2 || name.len() > 64 {
        return Err(AppError::BadRequest("Name must be 2 to 64 characters".into()));
    }
    if input.bio.as_deref().is_some_and(|b| b.len() > 240) {
        return Err(AppError::BadRequest(
            "Bio must be 240 characters or less".into(),
        ));
    }
    if let Some(ref age_range) = input.age_range {
        if !AGE_RANGES.contains(&age_range.as_str()) {
            return Err(AppError::BadRequest("Unknown age range".into()));
        }
    }

    {
        let conn = state.db.get()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<(), rusqlite::Error> = (|| {
            conn.execute(
                "UPDATE users SET name = ?1, alias = ?2, age_range = ?3, city = ?4,
                 bio = ?5, avatar_url = ?6 WHERE id = ?7",
                params![
                    name,
                    input.alias,
                    input.age_range,
                    input.city,
                    input.bio,
                    input.avatar_url,
                    user.id
                ],
            )?;

            if let Some(ref interests) = input.interests {
                conn.execute(
                    "DELETE FROM user_interests WHERE user_id = ?1",
                    params![user.id],
                )?;
                for tag_id in interests {
                    // Unknown tag ids are dropped rather than failing the
                    // whole update.
                    conn.execute(
                        "INSERT OR IGNORE INTO user_interests (user_id, tag_id)
                         SELECT ?1, id FROM interest_tags WHERE id = ?2",
                        params![user.id, tag_id],
                    )?;
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                return Err(e.into());
            }
        }
    }

    Ok(Json(load_profile(&state.db, &user.id)?))
}

async fn saved(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<QuestWithLocation>>> {
    Ok(Json(state.quests.saved(&user.id).await?))
}

async fn joined(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<JoinedQuest>>> {
    Ok(Json(state.quests.joined(&user.id).await?))
}
