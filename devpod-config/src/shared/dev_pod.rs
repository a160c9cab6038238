use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shared::{DevContainerConfig, PersistenceOptions, ValidationError};

/// Declarative description of a dev pod.
///
/// A dev pod selects one running workload, by labels or by image, and describes how its pod
/// template is turned into a development copy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DevPodConfig {
    /// Unique name of the dev pod. Used as the cache key.
    pub name: String,
    /// Namespace of the target workload. Defaults to the reconciler namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Exact-match label selector. Takes precedence over `image_selector`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
    /// Image reference the target's containers are matched against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_selector: Option<String>,
    /// Default container name for entries of `containers` without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Per-container overrides, applied in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<DevContainerConfig>,
    /// Settings of the volume claim backing persisted paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_options: Option<PersistenceOptions>,
    /// Patches applied to the pod template before the container overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchConfig>,
}

impl DevPodConfig {
    /// Returns the container name addressed by `dev_container`, if any.
    pub fn container_name<'a>(&'a self, dev_container: &'a DevContainerConfig) -> Option<&'a str> {
        dev_container
            .container
            .as_deref()
            .or(self.container.as_deref())
    }

    /// Returns `true` when at least one container persists a path.
    pub fn has_persistent_paths(&self) -> bool {
        self.containers
            .iter()
            .any(|container| !container.persist_paths.is_empty())
    }

    /// Validates the dev pod declaration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyDevPodName);
        }

        if self.label_selector.is_empty() && self.image_selector.is_none() {
            return Err(ValidationError::MissingSelector(self.name.clone()));
        }

        let has_empty_path = self
            .containers
            .iter()
            .flat_map(|container| container.persist_paths.iter())
            .any(|path| path.path.trim().is_empty());
        if has_empty_path {
            return Err(ValidationError::EmptyPersistentPath(self.name.clone()));
        }

        Ok(())
    }
}

/// Operation performed by a [`PatchConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOperation {
    Add,
    Replace,
    Remove,
}

/// A single patch applied to the pod template.
///
/// `path` is either a JSON pointer (`/spec/containers/0/image`) or a dotted path
/// (`spec.containers[0].image`, `spec.containers[name=web].image`) rooted at the pod template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchConfig {
    pub op: PatchOperation,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}
