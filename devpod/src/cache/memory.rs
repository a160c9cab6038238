use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::{DevPodCache, DevPodCacheEntry};
use crate::error::DevPodResult;

/// [`DevPodCache`] keeping entries in process memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevPodCache {
    entries: Arc<Mutex<BTreeMap<String, DevPodCacheEntry>>>,
}

impl MemoryDevPodCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DevPodCache for MemoryDevPodCache {
    async fn get_dev_pod(&self, name: &str) -> DevPodResult<Option<DevPodCacheEntry>> {
        let entries = self.entries.lock().await;

        Ok(entries.get(name).cloned())
    }

    async fn set_dev_pod(&self, entry: DevPodCacheEntry) -> DevPodResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(entry.name.clone(), entry);

        Ok(())
    }

    async fn delete_dev_pod(&self, name: &str) -> DevPodResult<Option<DevPodCacheEntry>> {
        let mut entries = self.entries.lock().await;

        Ok(entries.remove(name))
    }

    async fn list_dev_pods(&self) -> DevPodResult<Vec<DevPodCacheEntry>> {
        let entries = self.entries.lock().await;

        Ok(entries.values().cloned().collect())
    }

    async fn save(&self) -> DevPodResult<bool> {
        Ok(false)
    }
}
