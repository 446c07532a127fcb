//! Quest lifecycle: templates, instances, joins, check-ins, completion,
//! story posts, ratings and saves.

pub mod domain;
pub mod repository;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{Checkin, Location, Post, QuestInstance, QuestTemplate, Rating};
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::geo;
use crate::notifications::{NotificationEvent, NotificationSink};
use crate::quests::domain::{InstanceStatus, LifecycleError, VibeTag};
use crate::quests::repository::{
    JoinOutcome, JoinedQuest, QuestDetail, QuestStore, QuestSummary, QuestWithLocation,
};

pub const MAX_RADIUS_KM: f64 = 50.0;
const DEFAULT_RADIUS_KM: f64 = 10.0;
const LISTING_LIMIT: i64 = 100;
/// Joined quests drop off the "joined" list a day after their start.
const JOINED_VISIBILITY_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocation {
    pub place_name: String,
    pub lat: f64,
    pub lng: f64,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuest {
    pub title: String,
    pub description: String,
    pub vibe_tag: VibeTag,
    pub image_url: Option<String>,
    pub location: NewLocation,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub max_participants: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePost {
    pub media_url: String,
    pub media_type: MediaType,
    pub duration_seconds: Option<i64>,
    pub caption: Option<String>,
}

pub struct QuestService {
    store: Arc<dyn QuestStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl QuestService {
    pub fn new(store: Arc<dyn QuestStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { store, notifier }
    }

    pub async fn create(
        &self,
        user_id: &str,
        input: CreateQuest,
    ) -> AppResult<(QuestTemplate, QuestInstance)> {
        let location = Location {
            id: uuid::Uuid::now_v7().to_string(),
            place_name: input.location.place_name,
            lat: input.location.lat,
            lng: input.location.lng,
            category: input.location.category,
        };
        self.store.insert_location(&location).await?;

        let template = QuestTemplate {
            id: uuid::Uuid::now_v7().to_string(),
            creator_id: user_id.to_string(),
            title: input.title,
            description: input.description,
            vibe_tag: input.vibe_tag.as_str().to_string(),
            image_url: input.image_url,
            location_id: location.id,
            start_time: input.start_time,
            duration_minutes: input.duration_minutes,
            max_participants: input.max_participants,
            cost: "free".to_string(),
        };
        self.store.insert_template(&template).await?;

        self.notify(
            user_id,
            NotificationEvent {
                kind: "quest_created".into(),
                title: "Quest created".into(),
                body: format!("Your quest \"{}\" is live.", template.title),
                data: json!({ "questId": template.id }),
            },
        )
        .await;

        let instance = QuestInstance {
            id: uuid::Uuid::now_v7().to_string(),
            template_id: template.id.clone(),
            created_by: None,
            start_time: template.start_time,
            duration_minutes: template.duration_minutes,
            location_id: template.location_id.clone(),
            status: InstanceStatus::Scheduled,
        };
        self.store.insert_instance(&instance).await?;

        Ok((template, instance))
    }

    pub async fn list(
        &self,
        observer: Option<(f64, f64)>,
        radius_km: Option<f64>,
        user_id: Option<&str>,
    ) -> AppResult<Vec<QuestSummary>> {
        let radius = radius_km.unwrap_or(DEFAULT_RADIUS_KM).min(MAX_RADIUS_KM);
        let templates = self.store.template_summaries(LISTING_LIMIT).await?;
        let blocked: HashSet<String> = match user_id {
            Some(u) => self.store.blocked_ids(u).await?.into_iter().collect(),
            None => HashSet::new(),
        };

        Ok(templates
            .into_iter()
            .filter(|t| match observer {
                Some((lat, lng)) => {
                    geo::haversine_km(lat, lng, t.location.lat, t.location.lng) <= radius
                }
                None => true,
            })
            .filter(|t| !blocked.contains(&t.template.creator_id))
            .collect())
    }

    pub async fn get(&self, id: &str) -> AppResult<QuestDetail> {
        Ok(self
            .store
            .template_detail(id)
            .await?
            .ok_or(LifecycleError::TemplateNotFound)?)
    }

    /// Join the instance at the template's canonical start time, creating it
    /// on first join.
    pub async fn join(&self, template_id: &str, user_id: &str) -> AppResult<QuestInstance> {
        let template = self
            .store
            .template(template_id)
            .await?
            .ok_or(LifecycleError::TemplateNotFound)?;

        let instance = match self
            .store
            .instance_for_start(template_id, template.start_time)
            .await?
        {
            Some(instance) => instance,
            None => {
                let instance = QuestInstance {
                    id: uuid::Uuid::now_v7().to_string(),
                    template_id: template.id.clone(),
                    created_by: None,
                    start_time: template.start_time,
                    duration_minutes: template.duration_minutes,
                    location_id: template.location_id.clone(),
                    status: InstanceStatus::Scheduled,
                };
                self.store.insert_instance(&instance).await?;
                instance
            }
        };

        match self
            .store
            .join(&instance.id, user_id, template.max_participants)
            .await?
        {
            JoinOutcome::Full => return Err(LifecycleError::Full.into()),
            JoinOutcome::Joined | JoinOutcome::AlreadyJoined => {}
        }

        self.notify(
            user_id,
            NotificationEvent {
                kind: "quest_joined".into(),
                title: "Quest joined".into(),
                body: format!("You're in for \"{}\".", template.title),
                data: json!({ "questId": template.id, "instanceId": instance.id }),
            },
        )
        .await;

        Ok(instance)
    }

    pub async fn save(&self, template_id: &str, user_id: &str) -> AppResult<()> {
        self.store
            .template(template_id)
            .await?
            .ok_or(LifecycleError::TemplateNotFound)?;
        self.store.upsert_save(template_id, user_id).await?;
        Ok(())
    }

    /// Start a fresh instance of an existing template at a caller-chosen
    /// time, independent of any earlier run.
    pub async fn redo(
        &self,
        template_id: &str,
        user_id: &str,
        start_time: DateTime<Utc>,
    ) -> AppResult<QuestInstance> {
        let template = self
            .store
            .template(template_id)
            .await?
            .ok_or(LifecycleError::TemplateNotFound)?;

        let instance = QuestInstance {
            id: uuid::Uuid::now_v7().to_string(),
            template_id: template.id,
            created_by: Some(user_id.to_string()),
            start_time,
            duration_minutes: template.duration_minutes,
            location_id: template.location_id,
            status: InstanceStatus::Scheduled,
        };
        self.store.insert_instance(&instance).await?;
        Ok(instance)
    }

    pub async fn checkin(
        &self,
        instance_id: &str,
        user_id: &str,
        lat: f64,
        lng: f64,
    ) -> AppResult<Checkin> {
        let ctx = self
            .store
            .instance_context(instance_id)
            .await?
            .ok_or(LifecycleError::InstanceNotFound)?;

        if !self.store.is_participant(instance_id, user_id).await? {
            return Err(LifecycleError::NotJoined.into());
        }

        domain::validate_checkin(ctx.instance.start_time, Utc::now(), (lat, lng), ctx.venue)?;

        Ok(self
            .store
            .upsert_checkin(instance_id, user_id, lat, lng)
            .await?)
    }

    /// Any checked-in participant may mark the shared instance completed.
    /// Completing an already-completed instance is a no-op success.
    pub async fn complete(&self, instance_id: &str, user_id: &str) -> AppResult<QuestInstance> {
        if !self.store.has_checkin(instance_id, user_id).await? {
            return Err(LifecycleError::CheckinRequired.into());
        }
        if !self.store.mark_completed(instance_id).await? {
            return Err(LifecycleError::InstanceNotFound.into());
        }

        self.notify(
            user_id,
            NotificationEvent {
                kind: "quest_completed".into(),
                title: "Quest completed".into(),
                body: "You completed a quest. Post your story now.".into(),
                data: json!({ "instanceId": instance_id }),
            },
        )
        .await;

        let ctx = self
            .store
            .instance_context(instance_id)
            .await?
            .ok_or(LifecycleError::InstanceNotFound)?;
        Ok(ctx.instance)
    }

    pub async fn create_post(
        &self,
        instance_id: &str,
        user_id: &str,
        input: CreatePost,
    ) -> AppResult<Post> {
        let ctx = self
            .store
            .instance_context(instance_id)
            .await?
            .ok_or(LifecycleError::InstanceNotFound)?;
        if ctx.instance.status != InstanceStatus::Completed {
            return Err(LifecycleError::NotCompleted.into());
        }
        if !self.store.has_checkin(instance_id, user_id).await? {
            return Err(LifecycleError::CheckinRequired.into());
        }

        let post = Post {
            id: uuid::Uuid::now_v7().to_string(),
            instance_id: instance_id.to_string(),
            user_id: user_id.to_string(),
            location_id: ctx.instance.location_id.clone(),
            media_url: input.media_url,
            media_type: input.media_type.as_str().to_string(),
            duration_seconds: input.duration_seconds,
            caption: input.caption,
            created_at: now_rfc3339(),
        };
        self.store.insert_post(&post).await?;

        self.notify(
            user_id,
            NotificationEvent {
                kind: "story_posted".into(),
                title: "Story posted".into(),
                body: "Your quest story is live.".into(),
                data: json!({ "instanceId": instance_id, "postId": post.id }),
            },
        )
        .await;

        Ok(post)
    }

    /// Ratings are accepted at any lifecycle stage.
    pub async fn rate(
        &self,
        instance_id: &str,
        user_id: &str,
        rating: i64,
        comment: Option<&str>,
    ) -> AppResult<Rating> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::BadRequest(
                "Rating must be between 1 and 5".into(),
            ));
        }
        self.store
            .instance_context(instance_id)
            .await?
            .ok_or(LifecycleError::InstanceNotFound)?;
        Ok(self
            .store
            .upsert_rating(instance_id, user_id, rating, comment)
            .await?)
    }

    pub async fn saved(&self, user_id: &str) -> AppResult<Vec<QuestWithLocation>> {
        Ok(self.store.saved_templates(user_id).await?)
    }

    pub async fn joined(&self, user_id: &str) -> AppResult<Vec<JoinedQuest>> {
        let now = Utc::now();
        Ok(self
            .store
            .joined_instances(user_id)
            .await?
            .into_iter()
            .filter(|j| now <= j.start_time + Duration::hours(JOINED_VISIBILITY_HOURS))
            .collect())
    }

    async fn notify(&self, user_id: &str, event: NotificationEvent) {
        // Best-effort: lifecycle state is never rolled back over a failed
        // notification.
        if let Err(e) = self.notifier.deliver(user_id, event).await {
            tracing::warn!("Notification delivery failed: {}", e);
        }
    }
}
