use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::{InMemoryReadModelCache, InMemorySchedulingStore, ReadModelCache, SchedulingStore};

use crate::clock::{Clock, SystemClock};
use crate::notify::{LoggingNotifier, NotificationDispatcher};

/// Collaborators shared by every cell router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SchedulingStore>,
    pub cache: Arc<dyn ReadModelCache>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn SchedulingStore>,
        cache: Arc<dyn ReadModelCache>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { config, store, cache, notifier, clock }
    }

    /// Process-local state: in-memory store and cache, log-only notifications.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(
            Arc::new(config),
            Arc::new(InMemorySchedulingStore::new()),
            Arc::new(InMemoryReadModelCache::new()),
            Arc::new(LoggingNotifier),
            Arc::new(SystemClock),
        )
    }
}
