use crate::error::NotifierError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{BotRecord, BotStatus};
use database::{DbError, DbRepository};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Bot lookups the notifier needs at dispatch time. Backed by Postgres in
/// live runs and by an in-memory map in paper mode and tests.
#[async_trait]
pub trait BotDirectory: Send + Sync {
    async fn bot(&self, bot_id: Uuid) -> Result<Option<BotRecord>, NotifierError>;

    /// Best-effort stamp of a subscription's last trigger time.
    async fn subscription_triggered(
        &self,
        subscription_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), NotifierError>;
}

#[async_trait]
impl BotDirectory for DbRepository {
    async fn bot(&self, bot_id: Uuid) -> Result<Option<BotRecord>, NotifierError> {
        match self.get_bot(bot_id).await {
            Ok(bot) => Ok(Some(bot)),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(NotifierError::Store(e.to_string())),
        }
    }

    async fn subscription_triggered(
        &self,
        subscription_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), NotifierError> {
        self.touch_subscription_triggered(subscription_id, at)
            .await
            .map_err(|e| NotifierError::Store(e.to_string()))
    }
}

/// The in-memory directory used by paper mode and tests.
#[derive(Default)]
pub struct InMemoryBotDirectory {
    bots: Mutex<HashMap<Uuid, BotRecord>>,
}

impl InMemoryBotDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bot: BotRecord) {
        self.bots.lock().expect("directory mutex").insert(bot.bot_id, bot);
    }

    pub fn set_status(&self, bot_id: Uuid, status: BotStatus) {
        if let Some(bot) = self.bots.lock().expect("directory mutex").get_mut(&bot_id) {
            bot.status = status;
        }
    }

    pub fn remove(&self, bot_id: Uuid) {
        self.bots.lock().expect("directory mutex").remove(&bot_id);
    }

    pub fn get(&self, bot_id: Uuid) -> Option<BotRecord> {
        self.bots.lock().expect("directory mutex").get(&bot_id).cloned()
    }

    pub fn all(&self) -> Vec<BotRecord> {
        self.bots.lock().expect("directory mutex").values().cloned().collect()
    }
}

#[async_trait]
impl BotDirectory for InMemoryBotDirectory {
    async fn bot(&self, bot_id: Uuid) -> Result<Option<BotRecord>, NotifierError> {
        Ok(self.get(bot_id))
    }

    async fn subscription_triggered(
        &self,
        _subscription_id: Uuid,
        _at: DateTime<Utc>,
    ) -> Result<(), NotifierError> {
        Ok(())
    }
}
