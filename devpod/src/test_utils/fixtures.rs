use std::collections::BTreeMap;
use std::sync::Arc;

use devpod_config::shared::{DevContainerConfig, DevPodConfig, ReconcilerConfig};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, ReplicaSet, ReplicaSetSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, Pod, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

use crate::builder::SpecBuilder;
use crate::cache::memory::MemoryDevPodCache;
use crate::image::ReferenceImageMatcher;
use crate::locator::TargetLocator;
use crate::manager::{Collaborators, DevPodManager};
use crate::patch::JsonPatchEngine;
use crate::replace::Replacer;
use crate::resolve::VariableResolver;
use crate::revert::Reverter;
use crate::test_utils::cluster::FakeK8sClient;

pub const NAMESPACE: &str = "default";

/// Reconciler settings with short poll intervals.
pub fn test_reconciler_config() -> ReconcilerConfig {
    ReconcilerConfig {
        namespace: NAMESPACE.to_string(),
        poll_interval_ms: 10,
        wait_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..Default::default()
    }
}

/// Pod template with a single container `container` running `image`.
pub fn pod_template(pod_labels: &[(&str, &str)], container: &str, image: &str) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels(pod_labels)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: container.to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

pub fn deployment(name: &str, pod_labels: &[(&str, &str)], image: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: metadata(name),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels(pod_labels)),
                ..Default::default()
            },
            template: pod_template(pod_labels, name, image),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn replica_set(name: &str, pod_labels: &[(&str, &str)], image: &str, replicas: i32) -> ReplicaSet {
    ReplicaSet {
        metadata: metadata(name),
        spec: Some(ReplicaSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels(pod_labels)),
                ..Default::default()
            },
            template: Some(pod_template(pod_labels, name, image)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn stateful_set(
    name: &str,
    pod_labels: &[(&str, &str)],
    image: &str,
    replicas: i32,
    claim_templates: &[&str],
) -> StatefulSet {
    StatefulSet {
        metadata: metadata(name),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: name.to_string(),
            selector: LabelSelector {
                match_labels: Some(labels(pod_labels)),
                ..Default::default()
            },
            template: pod_template(pod_labels, name, image),
            volume_claim_templates: (!claim_templates.is_empty()).then(|| {
                claim_templates
                    .iter()
                    .map(|template| PersistentVolumeClaim {
                        metadata: ObjectMeta {
                            name: Some(template.to_string()),
                            ..Default::default()
                        },
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Running pod controlled by the object `owner_uid`.
pub fn pod(name: &str, pod_labels: &[(&str, &str)], owner_uid: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels(pod_labels)),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                name: name.to_string(),
                uid: owner_uid.to_string(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Dev pod selecting `app=<target>` and replacing the image of its only container.
pub fn dev_pod(name: &str, target: &str, dev_image: &str) -> DevPodConfig {
    DevPodConfig {
        name: name.to_string(),
        label_selector: labels(&[("app", target)]),
        containers: vec![DevContainerConfig {
            dev_image: Some(dev_image.to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn collaborators(client: &FakeK8sClient) -> Collaborators {
    Collaborators {
        client: Arc::new(client.clone()),
        resolver: Arc::new(VariableResolver::default()),
        matcher: Arc::new(ReferenceImageMatcher),
        patch_engine: Arc::new(JsonPatchEngine),
    }
}

pub fn locator(client: &FakeK8sClient) -> TargetLocator {
    let collaborators = collaborators(client);
    TargetLocator::new(
        collaborators.client,
        collaborators.resolver,
        collaborators.matcher,
    )
}

pub fn spec_builder() -> SpecBuilder {
    SpecBuilder::new(
        Arc::new(VariableResolver::default()),
        Arc::new(ReferenceImageMatcher),
        Arc::new(JsonPatchEngine),
    )
}

pub fn replacer(client: &FakeK8sClient) -> Replacer {
    Replacer::new(
        Arc::new(client.clone()),
        locator(client),
        spec_builder(),
        test_reconciler_config(),
    )
}

pub fn reverter(client: &FakeK8sClient) -> Reverter {
    Reverter::new(
        Arc::new(client.clone()),
        locator(client),
        test_reconciler_config(),
    )
}

pub fn manager(client: &FakeK8sClient) -> DevPodManager<MemoryDevPodCache> {
    DevPodManager::new(
        collaborators(client),
        test_reconciler_config(),
        MemoryDevPodCache::new(),
    )
}
