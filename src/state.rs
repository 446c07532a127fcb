use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::chat::rooms::RoomRegistry;
use crate::chat::ChatService;
use crate::config::Config;
use crate::feed::repository::SqliteFeedStore;
use crate::feed::FeedService;
use crate::notifications::SqliteNotificationSink;
use crate::quests::repository::SqliteQuestStore;
use crate::quests::QuestService;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub feed: Arc<FeedService>,
    pub quests: Arc<QuestService>,
    pub chat: Arc<ChatService>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    /// Wire the services onto one pool. The storage ports and the
    /// notification sink are injected here and nowhere else.
    pub fn build(db: DbPool, config: Config) -> Self {
        let notifier = Arc::new(SqliteNotificationSink::new(db.clone()));
        let quests = Arc::new(QuestService::new(
            Arc::new(SqliteQuestStore::new(db.clone())),
            notifier.clone(),
        ));
        let feed = Arc::new(FeedService::new(Arc::new(SqliteFeedStore::new(db.clone()))));
        let chat = Arc::new(ChatService::new(db.clone(), notifier));

        Self {
            db,
            config,
            feed,
            quests,
            chat,
            rooms: Arc::new(RoomRegistry::new()),
        }
    }
}
