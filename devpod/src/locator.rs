use std::collections::BTreeMap;
use std::sync::Arc;

use devpod_config::shared::DevPodConfig;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use tracing::{debug, warn};

use crate::annotations::REPLICAS_ANNOTATION;
use crate::concurrency::cancel::CancelRx;
use crate::error::{DevPodResult, ErrorContext};
use crate::image::ImageMatcher;
use crate::k8s::K8sClient;
use crate::resolve::RuntimeResolver;
use crate::workload::{Workload, WorkloadKind};

/// Renders a label map as a `key=value,key2=value2` selector.
pub fn label_selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Returns `true` when every selector entry is present with the same value in `labels`.
pub fn labels_match(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(labels) = labels else {
        return selector.is_empty();
    };

    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Finds the workload a dev pod replaces.
///
/// The locator never writes to the cluster and can be shared between concurrent flows.
#[derive(Clone)]
pub struct TargetLocator {
    client: Arc<dyn K8sClient>,
    resolver: Arc<dyn RuntimeResolver>,
    matcher: Arc<dyn ImageMatcher>,
}

impl TargetLocator {
    pub fn new(
        client: Arc<dyn K8sClient>,
        resolver: Arc<dyn RuntimeResolver>,
        matcher: Arc<dyn ImageMatcher>,
    ) -> Self {
        Self {
            client,
            resolver,
            matcher,
        }
    }

    /// Fetches a workload recorded by kind and name.
    pub async fn find_by_kind_name(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        cancel: &CancelRx,
    ) -> DevPodResult<Workload> {
        cancel
            .run(async { Ok(self.client.get_workload(kind, namespace, name).await?) })
            .await
    }

    /// Finds the workload addressed by the selectors of `dev_pod` and accepted by `filter`.
    ///
    /// Deployments are searched first, then ReplicaSets not owned by another object, then
    /// StatefulSets. Within a kind, candidates are ordered by name. Shadow deployments are
    /// never candidates.
    pub async fn find_by_selector<F>(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        filter: F,
        cancel: &CancelRx,
    ) -> DevPodResult<Option<Workload>>
    where
        F: Fn(&Workload) -> bool + Send + Sync,
    {
        let image_selector = self.resolved_image_selector(dev_pod)?;
        let mut candidates = Vec::new();

        for kind in WorkloadKind::SEARCH_ORDER {
            let mut workloads = cancel
                .run(async {
                    self.client
                        .list_workloads(kind, namespace, None)
                        .await
                        .context(&format!("list {kind}s"))
                })
                .await?;
            workloads.sort_by(|a, b| a.name().cmp(b.name()));

            for workload in workloads {
                if workload.is_shadow() || (kind == WorkloadKind::ReplicaSet && workload.is_owned())
                {
                    continue;
                }

                let Ok(template) = workload.pod_template() else {
                    continue;
                };

                if self.matches(dev_pod, image_selector.as_deref(), template) && filter(&workload)
                {
                    candidates.push(workload);
                }
            }
        }

        if candidates.len() > 1 {
            let names = candidates
                .iter()
                .map(|workload| format!("{} {}", workload.kind(), workload.name()))
                .collect::<Vec<_>>()
                .join(", ");
            warn!(
                "dev pod {} matches multiple workloads ({names}), using the first one",
                dev_pod.name
            );
        }

        let target = candidates.into_iter().next();
        if let Some(target) = &target {
            debug!(
                "dev pod {} targets {} {namespace}/{}",
                dev_pod.name,
                target.kind(),
                target.name()
            );
        }

        Ok(target)
    }

    /// Finds a target that still carries the scale down bookkeeping of an earlier replace.
    pub async fn find_scaled_down_by_selector(
        &self,
        dev_pod: &DevPodConfig,
        namespace: &str,
        cancel: &CancelRx,
    ) -> DevPodResult<Option<Workload>> {
        self.find_by_selector(
            dev_pod,
            namespace,
            |workload| workload.annotation(REPLICAS_ANNOTATION).is_some(),
            cancel,
        )
        .await
    }

    /// Resolves runtime variables in the image selector of `dev_pod`, if any.
    pub fn resolved_image_selector(&self, dev_pod: &DevPodConfig) -> DevPodResult<Option<String>> {
        dev_pod
            .image_selector
            .as_deref()
            .map(|selector| self.resolver.resolve(selector))
            .transpose()
    }

    fn matches(
        &self,
        dev_pod: &DevPodConfig,
        image_selector: Option<&str>,
        template: &PodTemplateSpec,
    ) -> bool {
        if !dev_pod.label_selector.is_empty() {
            let labels = template
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.labels.as_ref());
            return labels_match(&dev_pod.label_selector, labels);
        }

        let Some(image_selector) = image_selector else {
            return false;
        };

        let addressed: Vec<&str> = dev_pod
            .containers
            .iter()
            .filter_map(|dev_container| dev_pod.container_name(dev_container))
            .chain(dev_pod.container.as_deref())
            .collect();

        template
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .filter(|container| {
                addressed.is_empty() || addressed.contains(&container.name.as_str())
            })
            .any(|container| {
                container
                    .image
                    .as_deref()
                    .is_some_and(|image| self.matcher.matches(image_selector, image))
            })
    }
}
