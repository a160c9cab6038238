use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{DevPodConfig, ReconcilerConfig, ValidationError};

/// What the replacer binary does with the configured dev pods.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacerAction {
    /// Replaces every target with its shadow deployment.
    #[default]
    Start,
    /// Reverts every dev pod recorded in the cache.
    Stop,
}

/// Location of the dev pod cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CacheConfig {
    /// Name of the config map holding the cache.
    pub config_map_name: String,
    /// Namespace of the config map. Defaults to the reconciler namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            config_map_name: "devspace-cache".to_string(),
            namespace: None,
        }
    }
}

/// Complete configuration of the replacer binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplacerConfig {
    #[serde(default)]
    pub action: ReplacerAction,
    /// Project the dev pods belong to. Recorded in the cache and injected into logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Values substituted for `${name}` placeholders in dev pod images and selectors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_pods: Vec<DevPodConfig>,
}

impl ReplacerConfig {
    /// Validates the complete replacer configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.reconciler.validate()?;

        let mut names = HashSet::new();
        for dev_pod in &self.dev_pods {
            dev_pod.validate()?;

            if !names.insert(dev_pod.name.as_str()) {
                return Err(ValidationError::DuplicateDevPodName(dev_pod.name.clone()));
            }
        }

        Ok(())
    }
}

impl Config for ReplacerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
