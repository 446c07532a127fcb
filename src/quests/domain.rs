//! Quest lifecycle rules, free of storage and transport concerns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo;

pub const CHECKIN_RADIUS_METERS: f64 = 200.0;
pub const CHECKIN_WINDOW_MINUTES: i64 = 60;

/// Instance progression is one-way: scheduled -> completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Scheduled,
    Completed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VibeTag {
    Chill,
    Active,
    Creative,
    Curious,
}

impl VibeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chill => "chill",
            Self::Active => "active",
            Self::Creative => "creative",
            Self::Curious => "curious",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Quest not found")]
    TemplateNotFound,

    #[error("Quest instance not found")]
    InstanceNotFound,

    #[error("Quest is full")]
    Full,

    #[error("Join the quest first")]
    NotJoined,

    #[error("Check-in outside allowed time window")]
    OutsideWindow,

    #[error("Check-in outside allowed radius")]
    OutsideRadius,

    #[error("Check-in required")]
    CheckinRequired,

    #[error("Quest not completed")]
    NotCompleted,
}

/// Check-in is open for an hour either side of the scheduled start,
/// boundaries included.
pub fn within_checkin_window(start_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let window = Duration::minutes(CHECKIN_WINDOW_MINUTES);
    now >= start_time - window && now <= start_time + window
}

pub fn within_checkin_radius(reported: (f64, f64), venue: (f64, f64)) -> bool {
    geo::haversine_m(reported.0, reported.1, venue.0, venue.1) <= CHECKIN_RADIUS_METERS
}

/// Both check-in guards. Window is checked first: a caller outside the
/// window gets the window error regardless of where they are standing.
pub fn validate_checkin(
    start_time: DateTime<Utc>,
    now: DateTime<Utc>,
    reported: (f64, f64),
    venue: (f64, f64),
) -> Result<(), LifecycleError> {
    if !within_checkin_window(start_time, now) {
        return Err(LifecycleError::OutsideWindow);
    }
    if !within_checkin_radius(reported, venue) {
        return Err(LifecycleError::OutsideRadius);
    }
    Ok(())
}

/// Join admission. An existing member is always admitted again (idempotent
/// join); everyone else needs a free seat.
pub fn admit_join(
    already_member: bool,
    participant_count: i64,
    max_participants: i64,
) -> Result<(), LifecycleError> {
    if already_member {
        return Ok(());
    }
    if participant_count >= max_participants {
        return Err(LifecycleError::Full);
    }
    Ok(())
}
