use std::sync::Arc;

use devpod_config::shared::{DevPodConfig, ReconcilerConfig};
use tracing::{debug, info, warn};

use crate::annotations::REPLICAS_ANNOTATION;
use crate::cache::DevPodCacheEntry;
use crate::concurrency::cancel::CancelRx;
use crate::error::{DevPodResult, ErrorKind};
use crate::k8s::K8sClient;
use crate::locator::TargetLocator;
use crate::scale::scale_up;
use crate::shadow;
use crate::wait::PollSettings;
use crate::workload::Workload;

/// Undoes what a replace did: removes the shadow and restores the target's replicas.
#[derive(Clone)]
pub struct Reverter {
    client: Arc<dyn K8sClient>,
    locator: TargetLocator,
    config: ReconcilerConfig,
}

impl Reverter {
    pub fn new(
        client: Arc<dyn K8sClient>,
        locator: TargetLocator,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            client,
            locator,
            config,
        }
    }

    fn namespace<'a>(
        &'a self,
        dev_pod: &'a DevPodConfig,
        cached: Option<&'a DevPodCacheEntry>,
    ) -> &'a str {
        cached
            .map(|entry| entry.namespace.as_str())
            .or(dev_pod.namespace.as_deref())
            .unwrap_or(self.config.namespace.as_str())
    }

    /// Reverts the replace of `dev_pod`.
    ///
    /// The live shadow is deleted and its target scaled back up once the shadow's pods are
    /// gone. Without a live shadow, a target left scaled down by an interrupted replace is
    /// scaled back up instead. Returns `false` when there was nothing to revert.
    pub async fn revert(
        &self,
        dev_pod: &DevPodConfig,
        cached: Option<&DevPodCacheEntry>,
        cancel: &CancelRx,
    ) -> DevPodResult<bool> {
        let namespace = self.namespace(dev_pod, cached);

        if self.revert_shadow(dev_pod, namespace, cached, cancel).await? {
            return Ok(true);
        }

        let Some(target) = self
            .find_scaled_down_target(dev_pod, namespace, cached, cancel)
            .await?
        else {
            debug!("nothing to revert for dev pod {}", dev_pod.name);
            return Ok(false);
        };

        for orphan in shadow::list_shadows(self.client.as_ref(), namespace, cancel).await? {
            if !shadow::references(&orphan, &target) || !shadow::belongs_to(&orphan, &dev_pod.name)
            {
                continue;
            }

            let name = orphan.metadata.name.clone().unwrap_or_default();
            info!("deleting orphaned shadow {namespace}/{name}");
            shadow::delete_shadow(
                self.client.as_ref(),
                namespace,
                &name,
                shadow::pod_selector(&orphan).as_deref(),
                PollSettings::from(&self.config),
                cancel,
            )
            .await?;
        }

        scale_up(
            self.client.as_ref(),
            target.kind(),
            namespace,
            target.name(),
            cancel,
        )
        .await?;

        info!(
            "reverted dev pod {} by restoring {} {namespace}/{}",
            dev_pod.name,
            target.kind(),
            target.name()
        );

        Ok(true)
    }

    /// Deletes the live shadow of `dev_pod` and scales its parent back up.
    ///
    /// Returns `false` when no live shadow exists.
    async fn revert_shadow(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        cached: Option<&DevPodCacheEntry>,
        cancel: &CancelRx,
    ) -> DevPodResult<bool> {
        let mut live = None;
        if let Some(entry) = cached {
            live = shadow::get_shadow(
                self.client.as_ref(),
                namespace,
                &entry.shadow_deployment_name,
                cancel,
            )
            .await?
            .filter(|found| shadow::belongs_to(found, &dev_pod.name));
        }
        if live.is_none() {
            live = shadow::list_dev_pod_shadows(
                self.client.as_ref(),
                namespace,
                &dev_pod.name,
                cancel,
            )
            .await?
            .into_iter()
            .next();
        }

        let Some(live) = live else {
            return Ok(false);
        };

        let name = live.metadata.name.clone().unwrap_or_default();
        let parent = shadow::parent_reference(&live)
            .map(|(kind, name)| (kind, name.to_string()))
            .or_else(|| cached.map(|entry| (entry.target_kind, entry.target_name.clone())));

        shadow::delete_shadow(
            self.client.as_ref(),
            namespace,
            &name,
            shadow::pod_selector(&live).as_deref(),
            PollSettings::from(&self.config),
            cancel,
        )
        .await?;
        info!("deleted shadow {namespace}/{name} of dev pod {}", dev_pod.name);

        let Some((kind, target_name)) = parent else {
            warn!("shadow {namespace}/{name} does not reference a target, nothing to scale up");
            return Ok(true);
        };

        match scale_up(self.client.as_ref(), kind, namespace, &target_name, cancel).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("{kind} {namespace}/{target_name} no longer exists, nothing to scale up");
            }
            result => {
                result?;
            }
        }

        Ok(true)
    }

    /// Finds a target still scaled down by an earlier replace, preferring the cached one.
    async fn find_scaled_down_target(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        cached: Option<&DevPodCacheEntry>,
        cancel: &CancelRx,
    ) -> DevPodResult<Option<Workload>> {
        if let Some(entry) = cached {
            match self
                .locator
                .find_by_kind_name(entry.target_kind, namespace, &entry.target_name, cancel)
                .await
            {
                Ok(target) if target.annotation(REPLICAS_ANNOTATION).is_some() => {
                    return Ok(Some(target));
                }
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        self.locator
            .find_scaled_down_by_selector(dev_pod, namespace, cancel)
            .await
    }
}
