pub mod auth;
pub mod chat;
pub mod feed;
pub mod instances;
pub mod locations;
pub mod moderation;
pub mod notifications;
pub mod posts;
pub mod quests;
pub mod users;

use crate::error::{AppError, AppResult};

/// Reject coordinates outside the WGS84 domain before they reach any core
/// logic.
pub(crate) fn validate_coords(lat: f64, lng: f64) -> AppResult<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(AppError::BadRequest("Invalid coordinates".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_within_domain_pass() {
        assert!(validate_coords(0.0, 0.0).is_ok());
        assert!(validate_coords(-90.0, 180.0).is_ok());
        assert!(validate_coords(90.0, -180.0).is_ok());
    }

    #[test]
    fn coordinates_outside_domain_fail() {
        assert!(validate_coords(90.1, 0.0).is_err());
        assert!(validate_coords(0.0, -180.5).is_err());
    }
}
