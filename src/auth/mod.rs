//! Bearer-token authentication backed by the sessions table.

use rand::Rng;
use rusqlite::params;

use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

/// The identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub alias: Option<String>,
}

/// Create a new session for a user. Returns the bearer token.
pub fn create_session(pool: &DbPool, user_id: &str, hours: u64) -> AppResult<String> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at, created_at)
         VALUES (?1, ?2, ?3, datetime('now', ?4), ?5)",
        params![id, user_id, token, format!("+{} hours", hours), now_rfc3339()],
    )?;

    Ok(token)
}

/// Resolve a bearer token to its user, if the session is still live.
pub fn lookup_session(pool: &DbPool, token: &str) -> AppResult<Option<AuthUser>> {
    let conn = pool.get()?;
    match conn.query_row(
        "SELECT u.id, u.name, u.alias FROM sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
        params![token],
        |row| {
            Ok(AuthUser {
                id: row.get(0)?,
                name: row.get(1)?,
                alias: row.get(2)?,
            })
        },
    ) {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter2!").unwrap();
        assert!(verify_password("hunter2!", &hash));
        assert!(!verify_password("hunter3!", &hash));
    }

    #[test]
    fn session_roundtrip() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, created_at)
             VALUES ('u1', 'a@example.com', 'x', 'Alice', ?1)",
            params![now_rfc3339()],
        )
        .unwrap();
        drop(conn);

        let token = create_session(&pool, "u1", 1).unwrap();
        let user = lookup_session(&pool, &token).unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.name, "Alice");

        assert!(lookup_session(&pool, "bogus-token").unwrap().is_none());
    }

    #[test]
    fn expired_session_is_rejected() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, created_at)
             VALUES ('u1', 'a@example.com', 'x', 'Alice', ?1)",
            params![now_rfc3339()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sessions (id, user_id, token, expires_at, created_at)
             VALUES ('s1', 'u1', 'stale', datetime('now', '-1 hours'), ?1)",
            params![now_rfc3339()],
        )
        .unwrap();
        drop(conn);

        assert!(lookup_session(&pool, "stale").unwrap().is_none());
    }
}
