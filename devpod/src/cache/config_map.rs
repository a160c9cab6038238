use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::cache::{DevPodCache, DevPodCacheEntry};
use crate::error::{DevPodResult, ErrorContext, ErrorKind};
use crate::k8s::K8sClient;

/// Key of the config map data holding the serialized entries.
pub const DEV_PODS_KEY: &str = "devPods";

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, DevPodCacheEntry>,
    /// Serialized entries as last read from or written to the cluster.
    persisted: Option<String>,
}

/// [`DevPodCache`] persisted as JSON in a config map.
///
/// [`DevPodCache::save`] only writes when the serialized entries differ from what was last
/// read or written.
#[derive(Clone)]
pub struct ConfigMapDevPodCache {
    client: Arc<dyn K8sClient>,
    namespace: String,
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl ConfigMapDevPodCache {
    /// Reads the entries stored in the config map `namespace/name`.
    ///
    /// A missing config map yields an empty cache.
    pub async fn load(
        client: Arc<dyn K8sClient>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> DevPodResult<Self> {
        let namespace = namespace.into();
        let name = name.into();

        let config_map = match client.get_config_map(&namespace, &name).await {
            Ok(config_map) => Some(config_map),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err).context("load dev pod cache"),
        };

        let persisted = config_map
            .and_then(|config_map| config_map.data)
            .and_then(|mut data| data.remove(DEV_PODS_KEY));

        let entries = match &persisted {
            Some(data) => match serde_json::from_str(data) {
                Ok(entries) => entries,
                Err(err) => bail!(
                    ErrorKind::CacheError,
                    "Dev pod cache contains malformed entries",
                    format!("{namespace}/{name}: {err}")
                ),
            },
            None => BTreeMap::new(),
        };

        debug!(
            "loaded {} dev pod cache entries from {namespace}/{name}",
            entries.len()
        );

        Ok(Self {
            client,
            namespace,
            name,
            inner: Arc::new(Mutex::new(Inner { entries, persisted })),
        })
    }
}

impl DevPodCache for ConfigMapDevPodCache {
    async fn get_dev_pod(&self, name: &str) -> DevPodResult<Option<DevPodCacheEntry>> {
        let inner = self.inner.lock().await;

        Ok(inner.entries.get(name).cloned())
    }

    async fn set_dev_pod(&self, entry: DevPodCacheEntry) -> DevPodResult<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(entry.name.clone(), entry);

        Ok(())
    }

    async fn delete_dev_pod(&self, name: &str) -> DevPodResult<Option<DevPodCacheEntry>> {
        let mut inner = self.inner.lock().await;

        Ok(inner.entries.remove(name))
    }

    async fn list_dev_pods(&self) -> DevPodResult<Vec<DevPodCacheEntry>> {
        let inner = self.inner.lock().await;

        Ok(inner.entries.values().cloned().collect())
    }

    async fn save(&self) -> DevPodResult<bool> {
        let mut inner = self.inner.lock().await;

        let data = serde_json::to_string(&inner.entries)?;
        if inner.persisted.as_deref() == Some(data.as_str()) {
            return Ok(false);
        }

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(DEV_PODS_KEY.to_string(), data.clone())])),
            ..Default::default()
        };

        self.client
            .create_or_update_config_map(&self.namespace, &config_map)
            .await
            .context("save dev pod cache")?;
        inner.persisted = Some(data);

        info!(
            "saved {} dev pod cache entries to {}/{}",
            inner.entries.len(),
            self.namespace,
            self.name
        );

        Ok(true)
    }
}
