//! Feed scoring. Blends interest overlap, geo-distance, recency and
//! popularity into one ranked list of quests and posts.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::Location;
use crate::geo;

pub const FEED_LIMIT: usize = 50;

const QUEST_INTEREST_WEIGHT: f64 = 0.30;
const QUEST_DISTANCE_WEIGHT: f64 = 0.20;
const QUEST_RECENCY_WEIGHT: f64 = 0.25;
const QUEST_POPULARITY_WEIGHT: f64 = 0.15;
const QUEST_REDO_WEIGHT: f64 = 0.10;

const POST_DISTANCE_WEIGHT: f64 = 0.35;
const POST_RECENCY_WEIGHT: f64 = 0.45;
const POST_POPULARITY_WEIGHT: f64 = 0.20;
// Post popularity is dampened a second time inside its weighted term,
// leaving it an effective 0.04 of the final score.
const POST_POPULARITY_DAMPING: f64 = 0.2;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestCandidate {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub description: String,
    pub vibe_tag: String,
    pub image_url: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub max_participants: i64,
    pub cost: String,
    pub location: Location,
    pub instance_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedAuthor {
    pub id: String,
    pub name: String,
    pub alias: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCandidate {
    pub id: String,
    pub media_url: String,
    pub media_type: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user: FeedAuthor,
    pub location: Location,
    pub like_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedItem {
    Quest { score: f64, data: QuestCandidate },
    Post { score: f64, data: PostCandidate },
}

impl FeedItem {
    pub fn score(&self) -> f64 {
        match self {
            Self::Quest { score, .. } | Self::Post { score, .. } => *score,
        }
    }
}

/// Scale a raw signal against a batch maximum into [0, 1].
pub fn normalize(value: f64, max: f64) -> f64 {
    if max == 0.0 {
        return 0.0;
    }
    (value / max).min(1.0)
}

/// Saturates at 1 for co-located or just-now items and decays toward 0.
fn inverse_decay(x: f64) -> f64 {
    1.0 / (1.0 + x)
}

fn distance_score(observer: Option<(f64, f64)>, location: &Location) -> f64 {
    match observer {
        Some((lat, lng)) => normalize(
            inverse_decay(geo::haversine_km(lat, lng, location.lat, location.lng)),
            1.0,
        ),
        None => 0.0,
    }
}

fn hours_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (a - b).num_milliseconds() as f64 / 3_600_000.0
}

fn quest_interest_overlap(quest: &QuestCandidate, interests: &[String]) -> f64 {
    let text = format!("{} {}", quest.title, quest.description).to_lowercase();
    let overlap = interests.iter().filter(|name| text.contains(*name)).count();
    normalize(overlap as f64, interests.len().max(1) as f64)
}

fn quest_score(
    quest: &QuestCandidate,
    interests: &[String],
    observer: Option<(f64, f64)>,
    now: DateTime<Utc>,
    max_participants: f64,
    max_instances: f64,
) -> f64 {
    let interest_overlap = quest_interest_overlap(quest, interests);
    let distance = distance_score(observer, &quest.location);
    // Two-directional: quests far in the past and far in the future both
    // score low, a quest starting right now scores 1.
    let recency = normalize(
        inverse_decay(hours_between(quest.start_time, now).abs()),
        1.0,
    );
    let popularity = normalize(quest.max_participants as f64, max_participants);
    let redo = normalize(quest.instance_count as f64, max_instances);

    QUEST_INTEREST_WEIGHT * interest_overlap
        + QUEST_DISTANCE_WEIGHT * distance
        + QUEST_RECENCY_WEIGHT * recency
        + QUEST_POPULARITY_WEIGHT * popularity
        + QUEST_REDO_WEIGHT * redo
}

fn post_score(
    post: &PostCandidate,
    observer: Option<(f64, f64)>,
    now: DateTime<Utc>,
    max_likes: f64,
) -> f64 {
    let distance = distance_score(observer, &post.location);
    // One-directional, unlike the quest variant: wall-clock age only.
    let recency = normalize(inverse_decay(hours_between(now, post.created_at)), 1.0);
    let popularity = normalize(post.like_count as f64, max_likes) * POST_POPULARITY_DAMPING;

    POST_DISTANCE_WEIGHT * distance
        + POST_RECENCY_WEIGHT * recency
        + POST_POPULARITY_WEIGHT * popularity
}

/// Score both candidate sets, drop blocked creators and authors, merge and
/// keep the top [`FEED_LIMIT`]. The sort is stable, so equal scores keep
/// quests-before-posts fetch order.
pub fn rank_feed(
    quests: Vec<QuestCandidate>,
    posts: Vec<PostCandidate>,
    interests: &[String],
    blocked: &HashSet<String>,
    observer: Option<(f64, f64)>,
    now: DateTime<Utc>,
) -> Vec<FeedItem> {
    // Batch maxima come from everything fetched, and never drop below 1.
    let max_participants = quests
        .iter()
        .map(|q| q.max_participants)
        .fold(1, i64::max) as f64;
    let max_instances = quests.iter().map(|q| q.instance_count).fold(1, i64::max) as f64;
    let max_likes = posts.iter().map(|p| p.like_count).fold(1, i64::max) as f64;

    let mut merged: Vec<FeedItem> = quests
        .into_iter()
        .filter(|q| !blocked.contains(&q.creator_id))
        .map(|q| FeedItem::Quest {
            score: quest_score(&q, interests, observer, now, max_participants, max_instances),
            data: q,
        })
        .chain(
            posts
                .into_iter()
                .filter(|p| !blocked.contains(&p.user.id))
                .map(|p| FeedItem::Post {
                    score: post_score(&p, observer, now, max_likes),
                    data: p,
                }),
        )
        .collect();

    merged.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(FEED_LIMIT);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn location(lat: f64, lng: f64) -> Location {
        Location {
            id: "loc".into(),
            place_name: "Somewhere".into(),
            lat,
            lng,
            category: None,
        }
    }

    fn quest(id: &str, title: &str, lat: f64, lng: f64, start: DateTime<Utc>) -> QuestCandidate {
        QuestCandidate {
            id: id.into(),
            creator_id: format!("creator-{id}"),
            title: title.into(),
            description: "An outing".into(),
            vibe_tag: "chill".into(),
            image_url: None,
            start_time: start,
            duration_minutes: 60,
            max_participants: 4,
            cost: "free".into(),
            location: location(lat, lng),
            instance_count: 1,
        }
    }

    fn post(id: &str, lat: f64, lng: f64, created: DateTime<Utc>, likes: i64) -> PostCandidate {
        PostCandidate {
            id: id.into(),
            media_url: "https://example.com/p.jpg".into(),
            media_type: "photo".into(),
            caption: None,
            created_at: created,
            user: FeedAuthor {
                id: format!("author-{id}"),
                name: "Author".into(),
                alias: None,
                avatar_url: None,
            },
            location: location(lat, lng),
            like_count: likes,
        }
    }

    #[test]
    fn normalize_stays_in_unit_interval() {
        assert_eq!(normalize(0.0, 10.0), 0.0);
        assert_eq!(normalize(5.0, 10.0), 0.5);
        assert_eq!(normalize(25.0, 10.0), 1.0);
    }

    #[test]
    fn normalize_with_zero_max_is_zero() {
        assert_eq!(normalize(7.0, 0.0), 0.0);
    }

    #[test]
    fn nearer_quest_scores_strictly_higher() {
        let now = Utc::now();
        // Same start time, one ~1 km from the observer and one ~40 km away.
        let observer = Some((37.7694, -122.4862));
        let near = quest("near", "Walk", 37.7784, -122.4862, now);
        let far = quest("far", "Walk", 38.1291, -122.4862, now);

        let ranked = rank_feed(
            vec![far, near],
            vec![],
            &[],
            &HashSet::new(),
            observer,
            now,
        );
        assert_eq!(ranked.len(), 2);
        match &ranked[0] {
            FeedItem::Quest { data, .. } => assert_eq!(data.id, "near"),
            _ => panic!("expected quest"),
        }
        assert!(ranked[0].score() > ranked[1].score());
    }

    #[test]
    fn interest_match_outranks_non_match() {
        let now = Utc::now();
        let interests = vec!["hiking".to_string()];
        let hiking = quest("a", "Hiking Trip", 37.0, -122.0, now);
        let books = quest("b", "Book Club", 37.0, -122.0, now);

        let ranked = rank_feed(
            vec![books, hiking],
            vec![],
            &interests,
            &HashSet::new(),
            None,
            now,
        );
        match &ranked[0] {
            FeedItem::Quest { data, score } => {
                assert_eq!(data.id, "a");
                // The full interest weight separates the two.
                assert!((score - ranked[1].score() - 0.30).abs() < 1e-9);
            }
            _ => panic!("expected quest"),
        }
    }

    #[test]
    fn interest_overlap_is_zero_without_interests() {
        let q = quest("a", "Hiking Trip", 37.0, -122.0, Utc::now());
        assert_eq!(quest_interest_overlap(&q, &[]), 0.0);
    }

    #[test]
    fn interest_overlap_is_case_insensitive_substring() {
        let q = quest("a", "HIKING trip", 37.0, -122.0, Utc::now());
        let interests = vec!["hiking".to_string(), "coffee".to_string()];
        assert_eq!(quest_interest_overlap(&q, &interests), 0.5);
    }

    #[test]
    fn quest_recency_is_two_directional() {
        let now = Utc::now();
        let soon = quest("soon", "Walk", 37.0, -122.0, now + Duration::hours(1));
        let past = quest("past", "Walk", 37.0, -122.0, now - Duration::hours(1));
        let s_soon = quest_score(&soon, &[], None, now, 1.0, 1.0);
        let s_past = quest_score(&past, &[], None, now, 1.0, 1.0);
        assert!((s_soon - s_past).abs() < 1e-9);
    }

    #[test]
    fn post_popularity_is_double_dampened() {
        let now = Utc::now();
        let liked = post("liked", 37.0, -122.0, now, 10);
        let ignored = post("ignored", 37.0, -122.0, now, 0);

        let s_liked = post_score(&liked, None, now, 10.0);
        let s_ignored = post_score(&ignored, None, now, 10.0);
        // Full like advantage is worth 0.20 * 0.2 = 0.04, not 0.20.
        assert!((s_liked - s_ignored - 0.04).abs() < 1e-9);
    }

    #[test]
    fn blocked_creators_and_authors_are_excluded() {
        let now = Utc::now();
        let q = quest("q1", "Walk", 37.0, -122.0, now);
        let p = post("p1", 37.0, -122.0, now, 0);
        let blocked: HashSet<String> =
            ["creator-q1".to_string(), "author-p1".to_string()].into();

        let ranked = rank_feed(vec![q], vec![p], &[], &blocked, None, now);
        assert!(ranked.is_empty());
    }

    #[test]
    fn feed_is_truncated_to_fifty() {
        let now = Utc::now();
        let quests: Vec<_> = (0..40)
            .map(|i| quest(&format!("q{i}"), "Walk", 37.0, -122.0, now))
            .collect();
        let posts: Vec<_> = (0..40)
            .map(|i| post(&format!("p{i}"), 37.0, -122.0, now, 0))
            .collect();

        let ranked = rank_feed(quests, posts, &[], &HashSet::new(), None, now);
        assert_eq!(ranked.len(), FEED_LIMIT);
    }

    #[test]
    fn empty_batches_rank_without_panicking() {
        let ranked = rank_feed(
            vec![],
            vec![],
            &[],
            &HashSet::new(),
            Some((0.0, 0.0)),
            Utc::now(),
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn missing_observer_zeroes_distance() {
        let now = Utc::now();
        let q = quest("a", "Walk", 37.0, -122.0, now);
        let with = quest_score(&q, &[], Some((37.0, -122.0)), now, 4.0, 1.0);
        let without = quest_score(&q, &[], None, now, 4.0, 1.0);
        assert!((with - without - 0.20).abs() < 1e-9);
    }
}
