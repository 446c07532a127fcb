//! The ranked home feed and the unscored 24-hour story rail.

pub mod ranker;
pub mod repository;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::error::AppResult;
use crate::feed::ranker::{FeedItem, PostCandidate};
use crate::feed::repository::FeedStore;

const CANDIDATE_LIMIT: i64 = 50;
const STORY_WINDOW_HOURS: i64 = 24;

pub struct FeedService {
    store: Arc<dyn FeedStore>,
}

impl FeedService {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    /// Ranked feed. Anonymous callers get no interest or block
    /// personalization; callers without coordinates get no distance signal.
    pub async fn feed(
        &self,
        user_id: Option<&str>,
        observer: Option<(f64, f64)>,
    ) -> AppResult<Vec<FeedItem>> {
        let interests: Vec<String> = match user_id {
            Some(u) => self
                .store
                .interest_names(u)
                .await?
                .into_iter()
                .map(|name| name.to_lowercase())
                .collect(),
            None => Vec::new(),
        };
        let blocked: HashSet<String> = match user_id {
            Some(u) => self.store.blocked_ids(u).await?.into_iter().collect(),
            None => HashSet::new(),
        };

        let quests = self.store.quest_candidates(CANDIDATE_LIMIT).await?;
        let posts = self.store.post_candidates(CANDIDATE_LIMIT).await?;

        Ok(ranker::rank_feed(
            quests,
            posts,
            &interests,
            &blocked,
            observer,
            Utc::now(),
        ))
    }

    /// Posts from the last 24 hours, newest first, unscored.
    pub async fn stories(&self) -> AppResult<Vec<PostCandidate>> {
        let since = Utc::now() - Duration::hours(STORY_WINDOW_HOURS);
        Ok(self.store.posts_since(since, CANDIDATE_LIMIT).await?)
    }
}
