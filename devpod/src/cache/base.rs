use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::DevPodResult;
use crate::workload::WorkloadKind;

/// What a replace left behind for a dev pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevPodCacheEntry {
    pub name: String,
    pub namespace: String,
    pub target_kind: WorkloadKind,
    pub target_name: String,
    pub shadow_deployment_name: String,
    /// Projects that started the dev pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
}

impl DevPodCacheEntry {
    /// Records `project` as a user of the dev pod, keeping the list sorted and unique.
    pub fn add_project(&mut self, project: &str) {
        if let Err(index) = self.projects.binary_search_by(|p| p.as_str().cmp(project)) {
            self.projects.insert(index, project.to_string());
        }
    }
}

/// Storage of [`DevPodCacheEntry`] values keyed by dev pod name.
///
/// Getters and setters operate on the in-memory view. [`DevPodCache::save`] persists that
/// view, which implementations may skip when nothing changed.
pub trait DevPodCache {
    /// Returns the entry of the dev pod `name`, if any.
    fn get_dev_pod(
        &self,
        name: &str,
    ) -> impl Future<Output = DevPodResult<Option<DevPodCacheEntry>>> + Send;

    /// Stores `entry` under its name, replacing any previous entry.
    fn set_dev_pod(&self, entry: DevPodCacheEntry) -> impl Future<Output = DevPodResult<()>> + Send;

    /// Removes the entry of the dev pod `name` and returns it.
    fn delete_dev_pod(
        &self,
        name: &str,
    ) -> impl Future<Output = DevPodResult<Option<DevPodCacheEntry>>> + Send;

    /// Returns all entries ordered by dev pod name.
    fn list_dev_pods(&self) -> impl Future<Output = DevPodResult<Vec<DevPodCacheEntry>>> + Send;

    /// Persists the entries. Returns `true` when something was written.
    fn save(&self) -> impl Future<Output = DevPodResult<bool>> + Send;
}
