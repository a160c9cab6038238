use std::collections::BTreeMap;
use std::sync::Arc;

use devpod_config::shared::{DevPodConfig, ReconcilerConfig};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info, warn};

use crate::annotations::{
    CONFIG_HASH_ANNOTATION, DEV_POD_ANNOTATION, PARENT_HASH_ANNOTATION, shadow_name,
};
use crate::bail;
use crate::builder::{SpecBuilder, parent_hash};
use crate::cache::DevPodCacheEntry;
use crate::concurrency::cancel::CancelRx;
use crate::error::{DevPodResult, ErrorContext, ErrorKind};
use crate::k8s::K8sClient;
use crate::locator::TargetLocator;
use crate::pvc::reconcile_pvc;
use crate::scale::scale_down;
use crate::shadow;
use crate::wait::PollSettings;
use crate::workload::{Workload, WorkloadKind};

/// Prefix of the labels and annotations owned by dev pods.
const BOOKKEEPING_PREFIX: &str = "devspace.sh/";

/// State of the shadow deployment of a dev pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    /// No shadow exists.
    NoShadow,
    /// The shadow was built from the current target and configuration.
    UpToDate,
    /// The target or the configuration changed since the shadow was built.
    Stale,
    /// The shadow cannot be traced back to a live target.
    Invalid,
}

/// What a replace did to the shadow deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Created,
    Updated,
    Unchanged,
    Recreated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceResult {
    pub entry: DevPodCacheEntry,
    pub outcome: ReplaceOutcome,
}

/// Shadow and target as observed at the start of an attempt.
struct Inspection {
    state: ShadowState,
    shadow: Option<Deployment>,
    target: Option<Workload>,
}

enum Attempt {
    Done(ReplaceResult),
    /// Writing the shadow collided with an existing deployment or a concurrent change.
    Retry(String),
}

/// Returns the live shadow modified to match `desired`.
///
/// Bookkeeping annotations are replaced wholesale so stale ones do not survive, annotations
/// added by others are kept.
fn updated_shadow(live: &Deployment, desired: &Deployment) -> Deployment {
    let mut annotations: BTreeMap<String, String> = live
        .metadata
        .annotations
        .iter()
        .flatten()
        .filter(|(key, _)| !key.starts_with(BOOKKEEPING_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    annotations.extend(desired.metadata.annotations.clone().unwrap_or_default());

    let mut updated = live.clone();
    updated.metadata.labels = desired.metadata.labels.clone();
    updated.metadata.annotations = Some(annotations);
    updated.spec = desired.spec.clone();

    updated
}

/// Replaces the target workload of a dev pod with a shadow deployment.
#[derive(Clone)]
pub struct Replacer {
    client: Arc<dyn K8sClient>,
    locator: TargetLocator,
    builder: SpecBuilder,
    config: ReconcilerConfig,
}

impl Replacer {
    pub fn new(
        client: Arc<dyn K8sClient>,
        locator: TargetLocator,
        builder: SpecBuilder,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            client,
            locator,
            builder,
            config,
        }
    }

    /// Namespace the dev pod lives in.
    pub fn namespace<'a>(&'a self, dev_pod: &'a DevPodConfig) -> &'a str {
        dev_pod
            .namespace
            .as_deref()
            .unwrap_or(self.config.namespace.as_str())
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings::from(&self.config)
    }

    /// Brings the shadow of `dev_pod` in line with its target and configuration.
    ///
    /// `cached` is the entry recorded by an earlier replace, if any. A collision while writing
    /// the shadow restarts the flow, at most `max_replace_attempts` times.
    pub async fn replace(
        &self,
        dev_pod: &DevPodConfig,
        cached: Option<&DevPodCacheEntry>,
        cancel: &CancelRx,
    ) -> DevPodResult<ReplaceResult> {
        let namespace = self.namespace(dev_pod);
        let projects = cached
            .map(|entry| entry.projects.clone())
            .unwrap_or_default();
        let mut known_shadow = cached
            .filter(|entry| entry.namespace == namespace)
            .map(|entry| entry.shadow_deployment_name.clone());

        for attempt in 1..=self.config.max_replace_attempts {
            match self
                .replace_once(dev_pod, namespace, known_shadow.as_deref(), cancel)
                .await?
            {
                Attempt::Done(mut result) => {
                    result.entry.projects = projects;
                    return Ok(result);
                }
                Attempt::Retry(name) => {
                    warn!(
                        "shadow {namespace}/{name} changed concurrently, restarting replace of dev pod {} (attempt {attempt}/{})",
                        dev_pod.name, self.config.max_replace_attempts
                    );
                    known_shadow = Some(name);
                }
            }
        }

        bail!(
            ErrorKind::ReplaceRetriesExhausted,
            "Shadow deployment kept colliding with concurrent changes",
            format!(
                "dev pod {} after {} attempts",
                dev_pod.name, self.config.max_replace_attempts
            )
        )
    }

    /// Returns the state the shadow of `dev_pod` is currently in.
    pub async fn shadow_state(
        &self,
        dev_pod: &DevPodConfig,
        cached: Option<&DevPodCacheEntry>,
        cancel: &CancelRx,
    ) -> DevPodResult<ShadowState> {
        let namespace = self.namespace(dev_pod);
        let known_shadow = cached.map(|entry| entry.shadow_deployment_name.as_str());

        Ok(self
            .inspect(dev_pod, namespace, known_shadow, cancel)
            .await?
            .state)
    }

    async fn replace_once(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        known_shadow: Option<&str>,
        cancel: &CancelRx,
    ) -> DevPodResult<Attempt> {
        let inspection = self
            .inspect(dev_pod, namespace, known_shadow, cancel)
            .await?;
        debug!(
            "shadow of dev pod {} is {:?}",
            dev_pod.name, inspection.state
        );

        match (inspection.state, inspection.shadow, inspection.target) {
            (ShadowState::UpToDate, Some(shadow), Some(target)) => {
                self.keep(dev_pod, namespace, shadow, target, cancel).await
            }
            (ShadowState::Stale, Some(shadow), Some(target)) => {
                self.update(dev_pod, namespace, shadow, target, cancel)
                    .await
            }
            (ShadowState::Invalid, Some(shadow), _) => {
                let name = shadow.metadata.name.clone().unwrap_or_default();
                info!("shadow {namespace}/{name} is invalid, recreating it");
                self.delete_shadow(namespace, &name, cancel).await?;

                self.create(dev_pod, namespace, ReplaceOutcome::Recreated, cancel)
                    .await
            }
            _ => {
                self.create(dev_pod, namespace, ReplaceOutcome::Created, cancel)
                    .await
            }
        }
    }

    async fn inspect(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        known_shadow: Option<&str>,
        cancel: &CancelRx,
    ) -> DevPodResult<Inspection> {
        let Some(shadow) = self
            .find_shadow(dev_pod, namespace, known_shadow, cancel)
            .await?
        else {
            return Ok(Inspection {
                state: ShadowState::NoShadow,
                shadow: None,
                target: None,
            });
        };

        let invalid = |shadow: Deployment| Inspection {
            state: ShadowState::Invalid,
            shadow: Some(shadow),
            target: None,
        };

        let Some((kind, target_name)) = shadow::parent_reference(&shadow) else {
            return Ok(invalid(shadow));
        };

        let target = match self
            .locator
            .find_by_kind_name(kind, namespace, target_name, cancel)
            .await
        {
            Ok(target) => target,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(invalid(shadow)),
            Err(err) => return Err(err.with_context("get target")),
        };

        let up_to_date = shadow::annotation(&shadow, PARENT_HASH_ANNOTATION)
            == Some(parent_hash(&target)?.as_str())
            && shadow::annotation(&shadow, CONFIG_HASH_ANNOTATION)
                == Some(self.builder.config_hash(dev_pod)?.as_str());

        Ok(Inspection {
            state: if up_to_date {
                ShadowState::UpToDate
            } else {
                ShadowState::Stale
            },
            shadow: Some(shadow),
            target: Some(target),
        })
    }

    /// Finds the shadow of `dev_pod`, by its recorded name first and by its annotation
    /// otherwise. Surplus shadows of the same dev pod are deleted.
    async fn find_shadow(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        known_shadow: Option<&str>,
        cancel: &CancelRx,
    ) -> DevPodResult<Option<Deployment>> {
        if let Some(name) = known_shadow {
            let found = shadow::get_shadow(self.client.as_ref(), namespace, name, cancel).await?;
            if let Some(found) = found.filter(|found| shadow::belongs_to(found, &dev_pod.name)) {
                return Ok(Some(found));
            }
        }

        let mut shadows =
            shadow::list_dev_pod_shadows(self.client.as_ref(), namespace, &dev_pod.name, cancel)
                .await?
                .into_iter();

        let found = shadows.next();
        for surplus in shadows {
            let name = surplus.metadata.name.unwrap_or_default();
            warn!(
                "deleting surplus shadow {namespace}/{name} of dev pod {}",
                dev_pod.name
            );
            self.delete_shadow(namespace, &name, cancel).await?;
        }

        Ok(found)
    }

    async fn delete_shadow(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancelRx,
    ) -> DevPodResult<()> {
        shadow::delete_shadow(
            self.client.as_ref(),
            namespace,
            name,
            None,
            self.poll_settings(),
            cancel,
        )
        .await
    }

    fn entry(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        target: &Workload,
        shadow_name: &str,
    ) -> DevPodCacheEntry {
        DevPodCacheEntry {
            name: dev_pod.name.clone(),
            namespace: namespace.to_string(),
            target_kind: target.kind(),
            target_name: target.name().to_string(),
            shadow_deployment_name: shadow_name.to_string(),
            projects: Vec::new(),
        }
    }

    /// Leaves an up to date shadow alone.
    ///
    /// The target is scaled down again in case someone scaled it up by hand. That check is
    /// best effort: failures are logged and otherwise ignored.
    async fn keep(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        shadow: Deployment,
        target: Workload,
        cancel: &CancelRx,
    ) -> DevPodResult<Attempt> {
        match scale_down(
            self.client.as_ref(),
            target.kind(),
            namespace,
            target.name(),
            cancel,
        )
        .await
        {
            Err(err) if err.kind() == ErrorKind::Cancelled => return Err(err),
            Err(err) => warn!(
                "could not make sure {} {namespace}/{} is scaled down: {err}",
                target.kind(),
                target.name()
            ),
            Ok(_) => {}
        }

        reconcile_pvc(self.client.as_ref(), &shadow, dev_pod, &self.config, cancel)
            .await
            .context("reconcile persistent volume claim")?;

        let shadow_name = shadow.metadata.name.as_deref().unwrap_or_default();
        debug!("shadow {namespace}/{shadow_name} is up to date");

        Ok(Attempt::Done(ReplaceResult {
            entry: self.entry(dev_pod, namespace, &target, shadow_name),
            outcome: ReplaceOutcome::Unchanged,
        }))
    }

    /// Patches a stale shadow, recreating it when the cluster rejects the patch.
    async fn update(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        live: Deployment,
        target: Workload,
        cancel: &CancelRx,
    ) -> DevPodResult<Attempt> {
        let name = live.metadata.name.clone().unwrap_or_default();
        let desired = self.builder.build(&name, &target, dev_pod)?;

        scale_down(
            self.client.as_ref(),
            target.kind(),
            namespace,
            target.name(),
            cancel,
        )
        .await?;

        let updated = Workload::Deployment(updated_shadow(&live, &desired));
        let patch = Workload::Deployment(live.clone()).merge_patch_to(&updated)?;

        let (shadow, outcome) = match patch {
            None => (live, ReplaceOutcome::Unchanged),
            Some(patch) => {
                let patched = cancel
                    .run(async {
                        Ok(self
                            .client
                            .patch_workload(WorkloadKind::Deployment, namespace, &name, &patch)
                            .await?)
                    })
                    .await;

                match patched {
                    Ok(Workload::Deployment(shadow)) => (shadow, ReplaceOutcome::Updated),
                    Ok(_) => bail!(
                        ErrorKind::InvalidState,
                        "Patching a deployment returned another kind",
                        name
                    ),
                    Err(err) if err.kind() == ErrorKind::Conflict => {
                        return Ok(Attempt::Retry(name));
                    }
                    Err(err) if err.kind() == ErrorKind::Invalid => {
                        info!("shadow {namespace}/{name} cannot be patched, recreating it: {err}");
                        self.delete_shadow(namespace, &name, cancel).await?;

                        let Some(shadow) = self.create_shadow(namespace, &desired, cancel).await?
                        else {
                            return Ok(Attempt::Retry(name));
                        };
                        (shadow, ReplaceOutcome::Recreated)
                    }
                    Err(err) => return Err(err.with_context("patch shadow deployment")),
                }
            }
        };

        reconcile_pvc(self.client.as_ref(), &shadow, dev_pod, &self.config, cancel)
            .await
            .context("reconcile persistent volume claim")?;

        info!(
            "updated shadow {namespace}/{name} of {} {}",
            target.kind(),
            target.name()
        );

        Ok(Attempt::Done(ReplaceResult {
            entry: self.entry(dev_pod, namespace, &target, &name),
            outcome,
        }))
    }

    /// Creates the shadow, returning `None` when a deployment of that name already exists.
    async fn create_shadow(
        &self,
        namespace: &str,
        desired: &Deployment,
        cancel: &CancelRx,
    ) -> DevPodResult<Option<Deployment>> {
        cancel
            .run(async {
                match self.client.create_deployment(namespace, desired).await {
                    Ok(created) => Ok(Some(created)),
                    Err(err) if err.is_already_exists() => Ok(None),
                    Err(err) => Err(err.into()),
                }
            })
            .await
            .context("create deployment")
    }

    /// Locates the target, scales it down and creates a fresh shadow.
    ///
    /// The shadow is built before the first write, so configuration errors leave the cluster
    /// untouched.
    async fn create(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        outcome: ReplaceOutcome,
        cancel: &CancelRx,
    ) -> DevPodResult<Attempt> {
        let Some(target) = self
            .locator
            .find_by_selector(dev_pod, namespace, |_| true, cancel)
            .await
            .context("find target")?
        else {
            bail!(
                ErrorKind::TargetNotFound,
                "No workload matches the dev pod selectors",
                format!("dev pod {} in namespace {namespace}", dev_pod.name)
            );
        };

        let name = shadow_name(target.name());
        let desired = self.builder.build(&name, &target, dev_pod)?;

        self.delete_orphans(dev_pod, namespace, &target, cancel)
            .await?;

        scale_down(
            self.client.as_ref(),
            target.kind(),
            namespace,
            target.name(),
            cancel,
        )
        .await?;

        let Some(shadow) = self.create_shadow(namespace, &desired, cancel).await? else {
            return Ok(Attempt::Retry(name));
        };

        reconcile_pvc(self.client.as_ref(), &shadow, dev_pod, &self.config, cancel)
            .await
            .context("reconcile persistent volume claim")?;

        info!(
            "replaced {} {namespace}/{} with shadow {name}",
            target.kind(),
            target.name()
        );

        Ok(Attempt::Done(ReplaceResult {
            entry: self.entry(dev_pod, namespace, &target, &name),
            outcome,
        }))
    }

    /// Deletes shadows of `target` that no dev pod claims.
    async fn delete_orphans(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        target: &Workload,
        cancel: &CancelRx,
    ) -> DevPodResult<()> {
        for orphan in shadow::list_shadows(self.client.as_ref(), namespace, cancel).await? {
            if !shadow::references(&orphan, target)
                || shadow::annotation(&orphan, DEV_POD_ANNOTATION).is_some()
            {
                continue;
            }

            let name = orphan.metadata.name.clone().unwrap_or_default();
            info!(
                "deleting orphaned shadow {namespace}/{name} before replacing {} {} for dev pod {}",
                target.kind(),
                target.name(),
                dev_pod.name
            );
            self.delete_shadow(namespace, &name, cancel).await?;
        }

        Ok(())
    }
}
