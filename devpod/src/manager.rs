use std::sync::Arc;

use devpod_config::shared::{DevPodConfig, ReconcilerConfig};
use futures::future::join_all;
use tracing::{Instrument, error, info};

use crate::builder::{SpecBuilder, needs_replace};
use crate::cache::{DevPodCache, DevPodCacheEntry};
use crate::concurrency::cancel::CancelRx;
use crate::error::{DevPodError, DevPodResult, ErrorContext};
use crate::image::ImageMatcher;
use crate::k8s::K8sClient;
use crate::locator::TargetLocator;
use crate::patch::PatchEngine;
use crate::replace::{ReplaceResult, Replacer};
use crate::resolve::RuntimeResolver;
use crate::revert::Reverter;

/// Collaborators shared by every flow of a [`DevPodManager`].
#[derive(Clone)]
pub struct Collaborators {
    pub client: Arc<dyn K8sClient>,
    pub resolver: Arc<dyn RuntimeResolver>,
    pub matcher: Arc<dyn ImageMatcher>,
    pub patch_engine: Arc<dyn PatchEngine>,
}

/// Runs replace and revert flows and records their results in a [`DevPodCache`].
///
/// Each flow reads its cache entry once before it starts and writes it once after it
/// completes. Flows of different dev pods run concurrently.
pub struct DevPodManager<C> {
    replacer: Replacer,
    reverter: Reverter,
    cache: C,
    project: Option<String>,
}

impl<C> DevPodManager<C>
where
    C: DevPodCache + Send + Sync,
{
    pub fn new(collaborators: Collaborators, config: ReconcilerConfig, cache: C) -> Self {
        let Collaborators {
            client,
            resolver,
            matcher,
            patch_engine,
        } = collaborators;

        let locator = TargetLocator::new(client.clone(), resolver.clone(), matcher.clone());
        let builder = SpecBuilder::new(resolver, matcher, patch_engine);

        Self {
            replacer: Replacer::new(client.clone(), locator.clone(), builder, config.clone()),
            reverter: Reverter::new(client, locator, config),
            cache,
            project: None,
        }
    }

    /// Records `project` in the cache entries of started dev pods.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn replacer(&self) -> &Replacer {
        &self.replacer
    }

    /// Replaces the target of `dev_pod` and records the result.
    ///
    /// Returns `None` when the dev pod does not change its target's pods. A shadow recorded
    /// by an earlier start is then reverted, otherwise the cluster is left untouched.
    pub async fn start(
        &self,
        dev_pod: &DevPodConfig,
        cancel: &CancelRx,
    ) -> DevPodResult<Option<ReplaceResult>> {
        let cached = self
            .cache
            .get_dev_pod(&dev_pod.name)
            .await
            .context("read dev pod cache")?;

        if !needs_replace(dev_pod) {
            info!(
                "dev pod {} does not modify its pods, skipping replace",
                dev_pod.name
            );
            // A shadow left from an earlier start would keep the target scaled down.
            if let Some(entry) = cached {
                self.reverter
                    .revert(dev_pod, Some(&entry), cancel)
                    .await?;
                self.forget(&dev_pod.name).await?;
                info!(
                    "reverted shadow {}/{} of dev pod {}",
                    entry.namespace, entry.shadow_deployment_name, dev_pod.name
                );
            }

            return Ok(None);
        }

        let mut result = self
            .replacer
            .replace(dev_pod, cached.as_ref(), cancel)
            .await?;

        if let Some(project) = &self.project {
            result.entry.add_project(project);
        }
        self.cache
            .set_dev_pod(result.entry.clone())
            .await
            .context("update dev pod cache")?;
        self.cache.save().await.context("save dev pod cache")?;

        info!(
            "dev pod {} is running in shadow {}/{} ({:?})",
            dev_pod.name, result.entry.namespace, result.entry.shadow_deployment_name, result.outcome
        );

        Ok(Some(result))
    }

    /// Reverts `dev_pod` and removes its cache entry.
    ///
    /// Returns `false` when nothing had to be reverted.
    pub async fn stop(&self, dev_pod: &DevPodConfig, cancel: &CancelRx) -> DevPodResult<bool> {
        let cached = self
            .cache
            .get_dev_pod(&dev_pod.name)
            .await
            .context("read dev pod cache")?;

        let reverted = self
            .reverter
            .revert(dev_pod, cached.as_ref(), cancel)
            .await?;

        self.forget(&dev_pod.name).await?;

        if reverted {
            info!("reverted dev pod {}", dev_pod.name);
        }

        Ok(reverted)
    }

    /// Removes the cache entry of the dev pod `name`, saving the cache if there was one.
    async fn forget(&self, name: &str) -> DevPodResult<()> {
        if self
            .cache
            .delete_dev_pod(name)
            .await
            .context("update dev pod cache")?
            .is_some()
        {
            self.cache.save().await.context("save dev pod cache")?;
        }

        Ok(())
    }

    /// Starts all `dev_pods` concurrently.
    ///
    /// Every flow runs to completion, failures are aggregated into one error.
    pub async fn start_all(
        &self,
        dev_pods: &[DevPodConfig],
        cancel: &CancelRx,
    ) -> DevPodResult<Vec<ReplaceResult>> {
        let tasks = dev_pods.iter().map(|dev_pod| {
            let span = tracing::info_span!("dev_pod", name = %dev_pod.name, action = "start");
            self.start(dev_pod, cancel).instrument(span)
        });

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (dev_pod, result) in dev_pods.iter().zip(join_all(tasks).await) {
            match result {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(err) => {
                    error!("failed to start dev pod {}: {err}", dev_pod.name);
                    errors.push(err);
                }
            }
        }

        if !errors.is_empty() {
            return Err(DevPodError::many(errors));
        }

        Ok(results)
    }

    /// Stops all `dev_pods` and every other dev pod recorded in the cache, concurrently.
    ///
    /// Returns the names of the dev pods that were reverted.
    pub async fn stop_all(
        &self,
        dev_pods: &[DevPodConfig],
        cancel: &CancelRx,
    ) -> DevPodResult<Vec<String>> {
        let mut targets = dev_pods.to_vec();
        for entry in self
            .cache
            .list_dev_pods()
            .await
            .context("read dev pod cache")?
        {
            if !targets.iter().any(|dev_pod| dev_pod.name == entry.name) {
                targets.push(recorded_dev_pod(&entry));
            }
        }

        let tasks = targets.iter().map(|dev_pod| {
            let span = tracing::info_span!("dev_pod", name = %dev_pod.name, action = "stop");
            self.stop(dev_pod, cancel).instrument(span)
        });

        let mut reverted = Vec::new();
        let mut errors = Vec::new();
        for (dev_pod, result) in targets.iter().zip(join_all(tasks).await) {
            match result {
                Ok(true) => reverted.push(dev_pod.name.clone()),
                Ok(false) => {}
                Err(err) => {
                    error!("failed to stop dev pod {}: {err}", dev_pod.name);
                    errors.push(err);
                }
            }
        }

        if !errors.is_empty() {
            return Err(DevPodError::many(errors));
        }

        Ok(reverted)
    }
}

/// Configuration of a dev pod known only from its cache entry.
///
/// It carries no selectors, so reverting it relies on the recorded shadow and target alone.
fn recorded_dev_pod(entry: &DevPodCacheEntry) -> DevPodConfig {
    DevPodConfig {
        name: entry.name.clone(),
        namespace: Some(entry.namespace.clone()),
        ..Default::default()
    }
}
