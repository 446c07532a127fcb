//! End-to-end lifecycle flow against a real on-disk database:
//! signup -> create -> join -> check-in -> complete -> story post,
//! then feed and stories reflect the results.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rusqlite::params;
use tempfile::TempDir;

use fom_server::auth;
use fom_server::db;
use fom_server::feed::ranker::FeedItem;
use fom_server::feed::repository::SqliteFeedStore;
use fom_server::feed::FeedService;
use fom_server::notifications::{self, SqliteNotificationSink};
use fom_server::quests::repository::SqliteQuestStore;
use fom_server::quests::{CreatePost, CreateQuest, MediaType, NewLocation, QuestService};
use fom_server::quests::domain::{InstanceStatus, VibeTag};
use fom_server::state::DbPool;

const PARK: (f64, f64) = (37.7694, -122.4862);

struct Harness {
    _tmp: TempDir,
    pool: DbPool,
    quests: QuestService,
    feed: FeedService,
}

fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let pool = db::create_pool(&tmp.path().join("fom.db")).unwrap();
    db::run_migrations(&pool).unwrap();

    let notifier = Arc::new(SqliteNotificationSink::new(pool.clone()));
    let quests = QuestService::new(Arc::new(SqliteQuestStore::new(pool.clone())), notifier);
    let feed = FeedService::new(Arc::new(SqliteFeedStore::new(pool.clone())));

    Harness {
        _tmp: tmp,
        pool,
        quests,
        feed,
    }
}

fn signup(pool: &DbPool, id: &str) {
    let conn = pool.get().unwrap();
    conn.execute(
        "INSERT INTO users (id, email, password_hash, name, created_at)
         VALUES (?1, ?2, 'x', ?1, ?3)",
        params![id, format!("{id}@example.com"), Utc::now().to_rfc3339()],
    )
    .unwrap();
}

fn quest_input(start: chrono::DateTime<Utc>) -> CreateQuest {
    CreateQuest {
        title: "Hidden Stairway Hunt".into(),
        description: "Find the mosaic stairs and climb them together.".into(),
        vibe_tag: VibeTag::Curious,
        image_url: None,
        location: NewLocation {
            place_name: "Golden Gate Park".into(),
            lat: PARK.0,
            lng: PARK.1,
            category: Some("park".into()),
        },
        start_time: start,
        duration_minutes: 90,
        max_participants: 6,
    }
}

#[tokio::test]
async fn full_lifecycle_reaches_the_feed() {
    let h = harness();
    signup(&h.pool, "alice");
    signup(&h.pool, "bob");

    // Alice creates a quest starting now.
    let (template, _) = h.quests.create("alice", quest_input(Utc::now())).await.unwrap();

    // Bob joins, checks in at the venue, completes and posts his story.
    let instance = h.quests.join(&template.id, "bob").await.unwrap();
    h.quests
        .checkin(&instance.id, "bob", PARK.0, PARK.1)
        .await
        .unwrap();
    let completed = h.quests.complete(&instance.id, "bob").await.unwrap();
    assert_eq!(completed.status, InstanceStatus::Completed);

    let post = h
        .quests
        .create_post(
            &instance.id,
            "bob",
            CreatePost {
                media_url: "https://cdn.example.com/stairs.jpg".into(),
                media_type: MediaType::Photo,
                duration_seconds: None,
                caption: Some("made it".into()),
            },
        )
        .await
        .unwrap();

    // Every stage left a notification trail.
    let alice_kinds: Vec<String> = notifications::list(&h.pool, "alice", false)
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
    assert!(alice_kinds.contains(&"quest_created".to_string()));

    let bob_kinds: Vec<String> = notifications::list(&h.pool, "bob", false)
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
    for kind in ["quest_joined", "quest_completed", "story_posted"] {
        assert!(bob_kinds.contains(&kind.to_string()), "missing {kind}");
    }

    // The ranked feed now carries both the quest and the story.
    let items = h.feed.feed(Some("bob"), Some(PARK)).await.unwrap();
    assert!(items.iter().any(
        |item| matches!(item, FeedItem::Quest { data, .. } if data.id == template.id)
    ));
    assert!(items
        .iter()
        .any(|item| matches!(item, FeedItem::Post { data, .. } if data.id == post.id)));

    // And the story rail sees the fresh post.
    let stories = h.feed.stories().await.unwrap();
    assert_eq!(stories.len(), 1);
    assert_eq!(stories[0].id, post.id);
    assert_eq!(stories[0].user.id, "bob");
}

#[tokio::test]
async fn capacity_one_admits_exactly_one_user() {
    let h = harness();
    signup(&h.pool, "alice");
    signup(&h.pool, "bob");
    signup(&h.pool, "carol");

    let mut input = quest_input(Utc::now());
    input.max_participants = 1;
    let (template, _) = h.quests.create("alice", input).await.unwrap();

    // First join takes the only seat; a second distinct user is turned away.
    h.quests.join(&template.id, "bob").await.unwrap();
    assert!(h.quests.join(&template.id, "carol").await.is_err());

    // The seated user can re-join without error or duplication.
    h.quests.join(&template.id, "bob").await.unwrap();

    let count: i64 = {
        let conn = h.pool.get().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM quest_participants",
            [],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert_eq!(count, 1);
}

#[tokio::test]
async fn redo_runs_a_second_cycle_against_a_new_instance() {
    let h = harness();
    signup(&h.pool, "alice");
    signup(&h.pool, "bob");

    let (template, _) = h.quests.create("alice", quest_input(Utc::now())).await.unwrap();
    let first = h.quests.join(&template.id, "bob").await.unwrap();
    h.quests
        .checkin(&first.id, "bob", PARK.0, PARK.1)
        .await
        .unwrap();
    h.quests.complete(&first.id, "bob").await.unwrap();

    // A redo instance starts scheduled even though the first completed, and
    // it demands its own join and check-in.
    let redo = h
        .quests
        .redo(&template.id, "bob", Utc::now() + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(redo.status, InstanceStatus::Scheduled);
    assert!(h
        .quests
        .checkin(&redo.id, "bob", PARK.0, PARK.1)
        .await
        .is_err());

    let conn = h.pool.get().unwrap();
    let mut stmt = conn
        .prepare("SELECT COUNT(*) FROM quest_instances WHERE template_id = ?1")
        .unwrap();
    let instances: i64 = stmt.query_row(params![template.id], |row| row.get(0)).unwrap();
    assert_eq!(instances, 2);
}

#[tokio::test]
async fn bearer_sessions_authenticate_requests() {
    let h = harness();
    signup(&h.pool, "alice");

    let token = auth::create_session(&h.pool, "alice", 1).unwrap();
    let user = auth::lookup_session(&h.pool, &token).unwrap().unwrap();
    assert_eq!(user.id, "alice");
}
