//! Builds the shadow deployment replacing a target workload.

mod container;
pub mod mutators;
pub mod persistence;
pub mod restart;

use std::collections::BTreeMap;
use std::sync::Arc;

use devpod_config::shared::{DevContainerConfig, DevPodConfig};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{PersistentVolumeClaimVolumeSource, PodTemplateSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use tracing::debug;

use crate::annotations::{
    CONFIG_HASH_ANNOTATION, CONTROLLER_LABELS, DEV_POD_ANNOTATION, IMAGE_SELECTOR_ANNOTATION,
    MATCHED_CONTAINER_ANNOTATION, PARENT_HASH_ANNOTATION, PARENT_KIND_ANNOTATION,
    PARENT_NAME_ANNOTATION, REPLACED_LABEL, REPLACED_LABEL_VALUE,
};
use crate::builder::container::{containers_mut, matched_containers, resolve_container};
use crate::builder::persistence::{claim_name, persist_paths};
use crate::builder::restart::{inject_restart_helper, restart_helper_path};
use crate::error::{DevPodResult, ErrorContext};
use crate::hash::{hash_json, sha256_hex};
use crate::image::ImageMatcher;
use crate::patch::PatchEngine;
use crate::resolve::RuntimeResolver;
use crate::workload::Workload;

/// Length of the image selector hash stored on shadow pods.
const IMAGE_SELECTOR_HASH_LEN: usize = 32;

/// Returns `true` when a dev container changes anything about the container it addresses.
pub fn needs_container(dev_container: &DevContainerConfig) -> bool {
    dev_container.dev_image.is_some()
        || dev_container.replaces_for_terminal()
        || dev_container.replaces_for_attach()
        || !dev_container.env.is_empty()
        || !dev_container.command.is_empty()
        || !dev_container.args.is_empty()
        || dev_container.working_dir.is_some()
        || dev_container.resources.is_some()
        || !dev_container.persist_paths.is_empty()
        || dev_container.needs_restart_helper()
}

/// Returns `true` when running `dev_pod` requires replacing its target.
///
/// Dev pods that only sync files or forward ports work against the original pods.
pub fn needs_replace(dev_pod: &DevPodConfig) -> bool {
    !dev_pod.patches.is_empty() || dev_pod.containers.iter().any(needs_container)
}

/// Hash of the pod template a shadow was built from.
pub fn parent_hash(target: &Workload) -> DevPodResult<String> {
    hash_json(target.pod_template()?)
}

/// Assembles shadow deployments from a target workload and a dev pod configuration.
///
/// Building never touches the cluster and never mutates the target, so every configuration
/// error surfaces before the first write.
#[derive(Clone)]
pub struct SpecBuilder {
    resolver: Arc<dyn RuntimeResolver>,
    matcher: Arc<dyn ImageMatcher>,
    patch_engine: Arc<dyn PatchEngine>,
}

impl SpecBuilder {
    pub fn new(
        resolver: Arc<dyn RuntimeResolver>,
        matcher: Arc<dyn ImageMatcher>,
        patch_engine: Arc<dyn PatchEngine>,
    ) -> Self {
        Self {
            resolver,
            matcher,
            patch_engine,
        }
    }

    /// Returns `dev_pod` with dev images and the image selector resolved.
    fn resolved_dev_pod(&self, dev_pod: &DevPodConfig) -> DevPodResult<DevPodConfig> {
        let mut resolved = dev_pod.clone();

        if let Some(image_selector) = &dev_pod.image_selector {
            resolved.image_selector = Some(self.resolver.resolve(image_selector)?);
        }
        for dev_container in &mut resolved.containers {
            if let Some(dev_image) = &dev_container.dev_image {
                dev_container.dev_image = Some(self.resolver.resolve(dev_image)?);
            }
        }

        Ok(resolved)
    }

    /// Hash of the dev pod configuration a shadow was built from.
    ///
    /// Runtime variables are resolved first, so a rebuilt dev image changes the hash.
    pub fn config_hash(&self, dev_pod: &DevPodConfig) -> DevPodResult<String> {
        hash_json(&self.resolved_dev_pod(dev_pod)?)
    }

    /// Builds the shadow deployment `name` replacing `target`.
    pub fn build(
        &self,
        name: &str,
        target: &Workload,
        dev_pod: &DevPodConfig,
    ) -> DevPodResult<Deployment> {
        let resolved = self.resolved_dev_pod(dev_pod)?;
        let source = target.pod_template()?;

        let mut template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: source
                    .metadata
                    .as_ref()
                    .and_then(|metadata| metadata.labels.clone()),
                annotations: source
                    .metadata
                    .as_ref()
                    .and_then(|metadata| metadata.annotations.clone()),
                ..Default::default()
            }),
            spec: source.spec.clone(),
        };

        if let Workload::StatefulSet(_) = target {
            wire_stateful_set(&mut template, target);
        }

        let matched = matched_containers(
            &template,
            resolved.image_selector.as_deref(),
            self.matcher.as_ref(),
        );

        let indices = resolve_containers(&template, &resolved, &matched)?;
        for (dev_container, index) in resolved.containers.iter().zip(&indices) {
            if let (Some(dev_image), Some(index)) = (&dev_container.dev_image, index) {
                if let Some(container) = containers_mut(&mut template).get_mut(*index) {
                    container.image = Some(dev_image.clone());
                }
            }
        }

        let mut template = self
            .patch_engine
            .apply(&template, &resolved.patches)
            .context("apply pod patches")?;

        // Patches may add or remove containers.
        let indices = resolve_containers(&template, &resolved, &matched)?;
        for (dev_container, index) in resolved.containers.iter().zip(&indices) {
            if let Some(index) = index {
                mutate_container(&mut template, *index, dev_container)?;
            }
        }

        persist_paths(&mut template, claim_name(name, dev_pod), &resolved, &indices)?;

        stamp_template(&mut template, &matched, resolved.image_selector.as_deref());

        let labels = template
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.labels.clone())
            .unwrap_or_default();

        let annotations = BTreeMap::from([
            (
                PARENT_KIND_ANNOTATION.to_string(),
                target.kind().to_string(),
            ),
            (PARENT_NAME_ANNOTATION.to_string(), target.name().to_string()),
            (PARENT_HASH_ANNOTATION.to_string(), parent_hash(target)?),
            (
                CONFIG_HASH_ANNOTATION.to_string(),
                self.config_hash(dev_pod)?,
            ),
            (DEV_POD_ANNOTATION.to_string(), dev_pod.name.clone()),
        ]);

        debug!(
            "built shadow {name} for {} {} with {} matched containers",
            target.kind(),
            target.name(),
            matched.len()
        );

        Ok(Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: target.namespace().map(str::to_string),
                labels: Some(BTreeMap::from([(
                    REPLACED_LABEL.to_string(),
                    REPLACED_LABEL_VALUE.to_string(),
                )])),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    ..Default::default()
                }),
                template,
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Gives the shadow pod the hostname of the first stateful set replica and mounts the claims
/// of that replica.
fn wire_stateful_set(template: &mut PodTemplateSpec, target: &Workload) {
    let stateful_set_name = target.name();
    let spec = template.spec.get_or_insert_with(Default::default);
    spec.hostname = Some(format!("{stateful_set_name}-0").replace('.', "-"));

    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    for claim_template in target.volume_claim_templates() {
        let template_name = claim_template
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "data".to_string());
        if volumes.iter().any(|volume| volume.name == template_name) {
            continue;
        }

        volumes.push(Volume {
            name: template_name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: format!("{template_name}-{stateful_set_name}-0"),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
}

fn resolve_containers(
    template: &PodTemplateSpec,
    dev_pod: &DevPodConfig,
    matched: &[String],
) -> DevPodResult<Vec<Option<usize>>> {
    dev_pod
        .containers
        .iter()
        .map(|dev_container| {
            if !needs_container(dev_container) {
                return Ok(None);
            }

            resolve_container(template, dev_pod.container_name(dev_container), matched)
                .map(Some)
        })
        .collect()
}

/// Runs the mutators in order on the container at `index`.
fn mutate_container(
    template: &mut PodTemplateSpec,
    index: usize,
    dev_container: &DevContainerConfig,
) -> DevPodResult<()> {
    let terminal = dev_container.replaces_for_terminal();
    let restart_helper = !terminal && dev_container.needs_restart_helper();

    let Some(container) = containers_mut(template).get_mut(index) else {
        return Ok(());
    };
    let operation = format!("configure container {}", container.name);

    mutators::apply_terminal(dev_container, container);
    mutators::apply_attach(dev_container, container);
    mutators::apply_env(dev_container, container);
    if !terminal {
        let helper_path = restart_helper.then(|| restart_helper_path(dev_container));
        mutators::apply_command(dev_container, container, helper_path).context(&operation)?;
    }
    mutators::apply_working_dir(dev_container, container);
    mutators::apply_resources(dev_container, container).context(&operation)?;

    if restart_helper {
        inject_restart_helper(template, index, dev_container);
    }

    Ok(())
}

/// Stamps the replaced label and selector bookkeeping onto the shadow pod template.
fn stamp_template(
    template: &mut PodTemplateSpec,
    matched: &[String],
    image_selector: Option<&str>,
) {
    let metadata = template.metadata.get_or_insert_with(Default::default);

    let labels = metadata.labels.get_or_insert_with(BTreeMap::new);
    for label in CONTROLLER_LABELS {
        labels.remove(*label);
    }
    labels.insert(
        REPLACED_LABEL.to_string(),
        REPLACED_LABEL_VALUE.to_string(),
    );

    let annotations = metadata.annotations.get_or_insert_with(BTreeMap::new);
    if !matched.is_empty() {
        annotations.insert(MATCHED_CONTAINER_ANNOTATION.to_string(), matched.join(";"));
    }
    if let Some(image_selector) = image_selector {
        let mut hash = sha256_hex(image_selector.as_bytes());
        hash.truncate(IMAGE_SELECTOR_HASH_LEN);
        annotations.insert(IMAGE_SELECTOR_ANNOTATION.to_string(), hash);
    }
}

#[cfg(test)]
mod tests {
    use devpod_config::shared::{
        PatchConfig, PatchOperation, SyncConfig, SyncOnUploadConfig, TerminalConfig,
    };
    use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
    use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, PodSpec, Probe};
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::image::ReferenceImageMatcher;
    use crate::patch::JsonPatchEngine;
    use crate::resolve::VariableResolver;

    fn builder() -> SpecBuilder {
        SpecBuilder::new(
            Arc::new(VariableResolver::new(BTreeMap::from([(
                "image.tag".to_string(),
                "dev-42".to_string(),
            )]))),
            Arc::new(ReferenceImageMatcher),
            Arc::new(JsonPatchEngine),
        )
    }

    fn template(containers: Vec<Container>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(BTreeMap::from([
                    ("app".to_string(), "web".to_string()),
                    ("pod-template-hash".to_string(), "abc123".to_string()),
                ])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
        }
    }

    fn web() -> Container {
        Container {
            name: "web".to_string(),
            image: Some("myapp:v1".to_string()),
            command: Some(vec!["/server".to_string()]),
            readiness_probe: Some(Probe::default()),
            ..Default::default()
        }
    }

    fn target(containers: Vec<Container>) -> Workload {
        Workload::Deployment(Deployment {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(3),
                template: template(containers),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn dev_pod(dev_container: DevContainerConfig) -> DevPodConfig {
        DevPodConfig {
            name: "app".to_string(),
            label_selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
            containers: vec![dev_container],
            ..Default::default()
        }
    }

    fn shadow_template(deployment: &Deployment) -> &PodTemplateSpec {
        &deployment.spec.as_ref().unwrap().template
    }

    fn first_container(deployment: &Deployment) -> &Container {
        &shadow_template(deployment).spec.as_ref().unwrap().containers[0]
    }

    #[test]
    fn test_build_replaces_image_and_stamps_bookkeeping() {
        let target = target(vec![web()]);
        let dev_pod = dev_pod(DevContainerConfig {
            container: Some("web".to_string()),
            dev_image: Some("myapp:${image.tag}".to_string()),
            ..Default::default()
        });

        let deployment = builder().build("app-devspace", &target, &dev_pod).unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("app-devspace"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("ns1"));
        let annotations = deployment.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations[PARENT_KIND_ANNOTATION], "Deployment");
        assert_eq!(annotations[PARENT_NAME_ANNOTATION], "app");
        assert_eq!(annotations[DEV_POD_ANNOTATION], "app");
        assert_eq!(
            annotations[PARENT_HASH_ANNOTATION],
            parent_hash(&target).unwrap()
        );

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        let labels = spec.template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(labels.get(REPLACED_LABEL).map(String::as_str), Some("true"));
        assert!(!labels.contains_key("pod-template-hash"));
        assert_eq!(spec.selector.match_labels.as_ref(), Some(labels));

        assert_eq!(
            first_container(&deployment).image.as_deref(),
            Some("myapp:dev-42")
        );
        // The dev image alone does not touch command or probes.
        assert!(first_container(&deployment).readiness_probe.is_some());
    }

    #[test]
    fn test_build_does_not_mutate_target() {
        let target = target(vec![web()]);
        let before = target.clone();
        let dev_pod = dev_pod(DevContainerConfig {
            terminal: Some(TerminalConfig::default()),
            ..Default::default()
        });

        builder().build("app-devspace", &target, &dev_pod).unwrap();

        assert_eq!(target, before);
    }

    #[test]
    fn test_restart_helper_wraps_command() {
        let dev_pod = dev_pod(DevContainerConfig {
            command: vec!["npm".to_string(), "start".to_string()],
            sync: vec![SyncConfig {
                path: "./:/app".to_string(),
                on_upload: Some(SyncOnUploadConfig {
                    restart_container: true,
                }),
            }],
            ..Default::default()
        });

        let deployment = builder()
            .build("app-devspace", &target(vec![web()]), &dev_pod)
            .unwrap();

        let command = first_container(&deployment).command.as_ref().unwrap();
        assert_eq!(command[0], restart::DEFAULT_RESTART_HELPER_PATH);
        assert_eq!(&command[1..], ["npm", "start"]);
    }

    #[test]
    fn test_restart_helper_without_command_is_config_error() {
        let dev_pod = dev_pod(DevContainerConfig {
            sync: vec![SyncConfig {
                path: "./:/app".to_string(),
                on_upload: Some(SyncOnUploadConfig {
                    restart_container: true,
                }),
            }],
            ..Default::default()
        });

        let err = builder()
            .build("app-devspace", &target(vec![web()]), &dev_pod)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingCommand);
        assert!(err.kind().is_config_error());
        assert_eq!(err.operation(), Some("configure container web"));
    }

    #[test]
    fn test_ambiguous_container_is_rejected() {
        let sidecar = Container {
            name: "sidecar".to_string(),
            image: Some("envoy".to_string()),
            ..Default::default()
        };
        let dev_pod = dev_pod(DevContainerConfig {
            dev_image: Some("myapp:dev".to_string()),
            ..Default::default()
        });

        let err = builder()
            .build("app-devspace", &target(vec![web(), sidecar]), &dev_pod)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AmbiguousContainer);
    }

    #[test]
    fn test_image_selector_addresses_matching_container() {
        let sidecar = Container {
            name: "sidecar".to_string(),
            image: Some("envoy".to_string()),
            ..Default::default()
        };
        let dev_pod = DevPodConfig {
            name: "app".to_string(),
            image_selector: Some("myapp".to_string()),
            containers: vec![DevContainerConfig {
                dev_image: Some("myapp:dev".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let deployment = builder()
            .build("app-devspace", &target(vec![sidecar, web()]), &dev_pod)
            .unwrap();

        let template = shadow_template(&deployment);
        let containers = &template.spec.as_ref().unwrap().containers;
        assert_eq!(containers[0].image.as_deref(), Some("envoy"));
        assert_eq!(containers[1].image.as_deref(), Some("myapp:dev"));

        let annotations = template.metadata.as_ref().unwrap().annotations.as_ref().unwrap();
        assert_eq!(annotations[MATCHED_CONTAINER_ANNOTATION], "web");
        assert_eq!(annotations[IMAGE_SELECTOR_ANNOTATION].len(), 32);
    }

    #[test]
    fn test_patches_apply_before_mutators() {
        let mut dev_pod = dev_pod(DevContainerConfig {
            working_dir: Some("/src".to_string()),
            ..Default::default()
        });
        dev_pod.patches = vec![
            PatchConfig {
                op: PatchOperation::Add,
                path: "spec.containers[name=web].workingDir".to_string(),
                value: Some(json!("/patched")),
            },
            PatchConfig {
                op: PatchOperation::Add,
                path: "spec.serviceAccountName".to_string(),
                value: Some(json!("dev")),
            },
        ];

        let deployment = builder()
            .build("app-devspace", &target(vec![web()]), &dev_pod)
            .unwrap();

        let template = shadow_template(&deployment);
        assert_eq!(
            template.spec.as_ref().unwrap().service_account_name.as_deref(),
            Some("dev")
        );
        assert_eq!(
            first_container(&deployment).working_dir.as_deref(),
            Some("/src")
        );
    }

    #[test]
    fn test_stateful_set_gets_hostname_and_claims() {
        let target = Workload::StatefulSet(StatefulSet {
            metadata: ObjectMeta {
                name: Some("db.primary".to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                template: template(vec![web()]),
                volume_claim_templates: Some(vec![PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some("data".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        let dev_pod = dev_pod(DevContainerConfig {
            dev_image: Some("myapp:dev".to_string()),
            ..Default::default()
        });

        let deployment = builder().build("db-devspace", &target, &dev_pod).unwrap();

        let spec = shadow_template(&deployment).spec.as_ref().unwrap();
        assert_eq!(spec.hostname.as_deref(), Some("db-primary-0"));
        let volume = &spec.volumes.as_ref().unwrap()[0];
        assert_eq!(volume.name, "data");
        assert_eq!(
            volume.persistent_volume_claim.as_ref().unwrap().claim_name,
            "data-db.primary-0"
        );
    }

    #[test]
    fn test_config_hash_follows_resolved_values() {
        let dev_pod = dev_pod(DevContainerConfig {
            dev_image: Some("myapp:${image.tag}".to_string()),
            ..Default::default()
        });
        let other_builder = SpecBuilder::new(
            Arc::new(VariableResolver::new(BTreeMap::from([(
                "image.tag".to_string(),
                "dev-43".to_string(),
            )]))),
            Arc::new(ReferenceImageMatcher),
            Arc::new(JsonPatchEngine),
        );

        let hash = builder().config_hash(&dev_pod).unwrap();

        assert_eq!(hash, builder().config_hash(&dev_pod).unwrap());
        assert_ne!(hash, other_builder.config_hash(&dev_pod).unwrap());
    }

    #[test]
    fn test_needs_replace() {
        let mut dev_pod = dev_pod(DevContainerConfig {
            sync: vec![SyncConfig {
                path: "./:/app".to_string(),
                on_upload: None,
            }],
            ..Default::default()
        });
        assert!(!needs_replace(&dev_pod));

        dev_pod.containers[0].env.push(devpod_config::shared::EnvVarConfig {
            name: "MODE".to_string(),
            value: "dev".to_string(),
        });
        assert!(needs_replace(&dev_pod));
    }
}
