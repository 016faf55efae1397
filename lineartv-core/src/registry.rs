use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::catalog::{CatalogError, CatalogStore, Movie, ScheduleRow};
use crate::config::LinearTvConfig;
use crate::engine::process::{
    CommandExecutor, SpawnExecutor, SystemCommandExecutor, SystemSpawnExecutor,
};
use crate::engine::{ChannelEngine, ChannelHandle, ChannelStatus, EngineError, QueueRow};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Front door for the messaging/HTTP adapters: owns the shared catalog and
/// one engine handle per channel. Every call resolves to a message send
/// into the channel's mailbox, so per-channel ordering holds regardless of
/// the caller.
pub struct ChannelRegistry {
    config: Arc<LinearTvConfig>,
    catalog: Arc<CatalogStore>,
    spawner: Arc<dyn SpawnExecutor>,
    executor: Arc<dyn CommandExecutor>,
    channels: Mutex<HashMap<String, ChannelHandle>>,
}

impl ChannelRegistry {
    pub fn new(config: LinearTvConfig) -> RegistryResult<Self> {
        let catalog = Arc::new(CatalogStore::open(config.catalog_path())?);
        Ok(Self {
            config: Arc::new(config),
            catalog,
            spawner: Arc::new(SystemSpawnExecutor),
            executor: Arc::new(SystemCommandExecutor),
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Substitute process seams, for tests and embedding.
    pub fn with_executors(
        mut self,
        spawner: Arc<dyn SpawnExecutor>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        self.spawner = spawner;
        self.executor = executor;
        self
    }

    pub fn catalog(&self) -> Arc<CatalogStore> {
        Arc::clone(&self.catalog)
    }

    /// Creates the persisted record if absent and starts the channel's
    /// controller. Idempotent per channel id.
    pub async fn init(&self, id: &str, name: &str) -> RegistryResult<()> {
        let mut channels = self.channels.lock().await;
        if channels.contains_key(id) {
            return Ok(());
        }
        let created = self.catalog.upsert_channel(id, name)?;
        let handle = ChannelEngine::launch(
            id,
            name,
            &self.config,
            Arc::clone(&self.catalog),
            Arc::clone(&self.spawner),
            Arc::clone(&self.executor),
        )?;
        channels.insert(id.to_string(), handle);
        info!(channel = id, created, "channel initialized");
        Ok(())
    }

    pub async fn enqueue(&self, id: &str, movie: Movie) -> RegistryResult<()> {
        Ok(self.handle(id).await?.enqueue(movie).await?)
    }

    pub async fn status(&self, id: &str) -> RegistryResult<ChannelStatus> {
        Ok(self.handle(id).await?.status().await?)
    }

    pub async fn queue(&self, id: &str) -> RegistryResult<Vec<QueueRow>> {
        Ok(self.handle(id).await?.queue().await?)
    }

    pub async fn schedule(&self, id: &str) -> RegistryResult<Vec<ScheduleRow>> {
        Ok(self.handle(id).await?.schedule().await?)
    }

    /// Operator-requested transition to the next queued movie.
    pub async fn play_next(&self, id: &str) -> RegistryResult<()> {
        Ok(self.handle(id).await?.play_next().await?)
    }

    pub async fn shutdown(&self) {
        let mut channels = self.channels.lock().await;
        for (id, handle) in channels.drain() {
            if handle.shutdown().await.is_err() {
                info!(channel = %id, "channel already stopped");
            }
        }
    }

    async fn handle(&self, id: &str) -> RegistryResult<ChannelHandle> {
        self.channels
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownChannel(id.to_string()))
    }
}
