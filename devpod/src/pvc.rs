use std::collections::BTreeMap;

use devpod_config::shared::{DevPodConfig, ReconcilerConfig};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::{info, warn};

use crate::builder::persistence::claim_name;
use crate::concurrency::cancel::CancelRx;
use crate::error::{DevPodResult, ErrorContext};
use crate::k8s::K8sClient;
use crate::quantity::{parse_quantity, same_quantity};
use crate::wait::{PollSettings, wait_for_pvc_deletion};
use crate::workload::WorkloadKind;

const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";
const STORAGE_RESOURCE: &str = "storage";

/// Builds the volume claim backing the persisted paths of `dev_pod`.
///
/// Claims named after the shadow are owned by it and go away with it. Claims with a custom
/// name outlive the shadow.
pub fn desired_pvc(
    shadow: &Deployment,
    dev_pod: &DevPodConfig,
    config: &ReconcilerConfig,
) -> DevPodResult<PersistentVolumeClaim> {
    let shadow_name = shadow.metadata.name.as_deref().unwrap_or_default();
    let name = claim_name(shadow_name, dev_pod);
    let options = dev_pod.persistence_options.clone().unwrap_or_default();

    let access_modes = if options.access_modes.is_empty() {
        vec![DEFAULT_ACCESS_MODE.to_string()]
    } else {
        options.access_modes.clone()
    };
    let size = options
        .size
        .as_deref()
        .unwrap_or(config.default_volume_size.as_str());

    let owner_references = match (&shadow.metadata.uid, name == shadow_name) {
        (Some(uid), true) => Some(vec![OwnerReference {
            api_version: WorkloadKind::Deployment.api_version().to_string(),
            kind: WorkloadKind::Deployment.to_string(),
            name: shadow_name.to_string(),
            uid: uid.clone(),
            controller: Some(true),
            ..Default::default()
        }]),
        _ => None,
    };

    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: shadow.metadata.namespace.clone(),
            owner_references,
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: options.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    STORAGE_RESOURCE.to_string(),
                    parse_quantity(size)?,
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn storage_request(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get(STORAGE_RESOURCE))
        .map(|quantity| quantity.0.as_str())
}

fn sorted_access_modes(pvc: &PersistentVolumeClaim) -> Vec<String> {
    let mut modes = pvc
        .spec
        .as_ref()
        .and_then(|spec| spec.access_modes.clone())
        .unwrap_or_default();
    modes.sort();
    modes
}

fn controller_uid(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.metadata
        .owner_references
        .iter()
        .flatten()
        .find(|owner| owner.controller == Some(true))
        .map(|owner| owner.uid.as_str())
}

/// Returns `true` when `existing` can serve as `desired`.
///
/// A claim `desired` to be owned by a shadow must already be controlled by that shadow.
/// Otherwise the garbage collector removes it once its previous owner is gone.
pub fn is_compatible(existing: &PersistentVolumeClaim, desired: &PersistentVolumeClaim) -> bool {
    if existing.metadata.deletion_timestamp.is_some() {
        return false;
    }

    if let Some(owner) = controller_uid(desired)
        && controller_uid(existing) != Some(owner)
    {
        return false;
    }

    if sorted_access_modes(existing) != sorted_access_modes(desired) {
        return false;
    }

    let desired_class = desired
        .spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.as_deref());
    let existing_class = existing
        .spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.as_deref());
    if desired_class.is_some() && desired_class != existing_class {
        return false;
    }

    match (storage_request(existing), storage_request(desired)) {
        (Some(existing), Some(desired)) => same_quantity(existing, desired),
        (None, None) => true,
        _ => false,
    }
}

/// Makes sure the claim used by `shadow` exists with a compatible spec.
///
/// A missing claim is created. An incompatible claim named after the shadow is deleted and
/// recreated once it is gone. An incompatible claim with a custom name is kept, since other
/// dev pods may share it.
pub async fn reconcile_pvc(
    client: &dyn K8sClient,
    shadow: &Deployment,
    dev_pod: &DevPodConfig,
    config: &ReconcilerConfig,
    cancel: &CancelRx,
) -> DevPodResult<()> {
    if !dev_pod.has_persistent_paths() {
        return Ok(());
    }

    let desired = desired_pvc(shadow, dev_pod, config)?;
    let namespace = desired.metadata.namespace.clone().unwrap_or_default();
    let name = desired.metadata.name.clone().unwrap_or_default();
    let generated = shadow.metadata.name.as_deref() == Some(name.as_str());

    let existing = cancel
        .run(async {
            match client.get_pvc(&namespace, &name).await {
                Ok(pvc) => Ok(Some(pvc)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err.into()),
            }
        })
        .await
        .context("get persistent volume claim")?;

    if let Some(existing) = existing {
        if is_compatible(&existing, &desired) {
            return Ok(());
        }

        if !generated {
            warn!(
                "persistent volume claim {namespace}/{name} does not match the persistence options of dev pod {}, keeping it",
                dev_pod.name
            );
            return Ok(());
        }

        info!("recreating persistent volume claim {namespace}/{name}");
        if existing.metadata.deletion_timestamp.is_none() {
            let deleted = cancel
                .run(async {
                    match client.delete_pvc(&namespace, &name).await {
                        Err(err) if !err.is_not_found() => Err(err.into()),
                        _ => Ok(()),
                    }
                })
                .await;
            deleted.context("delete persistent volume claim")?;
        }
        wait_for_pvc_deletion(client, &namespace, &name, PollSettings::from(config), cancel)
            .await
            .context("wait for persistent volume claim deletion")?;
    }

    let created = cancel
        .run(async {
            match client.create_pvc(&namespace, &desired).await {
                Ok(_) => Ok(()),
                // A claim with a custom name may be created concurrently by another dev pod.
                Err(err) if err.is_already_exists() && !generated => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
        .await;
    created.context("create persistent volume claim")?;

    info!("created persistent volume claim {namespace}/{name}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use devpod_config::shared::{DevContainerConfig, PersistenceOptions, PersistentPathConfig};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;
    use crate::error::ErrorKind;

    fn shadow() -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("app-devspace".to_string()),
                namespace: Some("ns1".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn dev_pod(options: Option<PersistenceOptions>) -> DevPodConfig {
        DevPodConfig {
            name: "app".to_string(),
            containers: vec![DevContainerConfig {
                persist_paths: vec![PersistentPathConfig {
                    path: "/data".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            persistence_options: options,
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_claim_is_owned_by_shadow() {
        let pvc = desired_pvc(&shadow(), &dev_pod(None), &ReconcilerConfig::default()).unwrap();

        assert_eq!(pvc.metadata.name.as_deref(), Some("app-devspace"));
        let owner = &pvc.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(storage_request(&pvc), Some("10Gi"));
        assert_eq!(sorted_access_modes(&pvc), vec!["ReadWriteOnce".to_string()]);
    }

    #[test]
    fn test_custom_claim_is_not_owned() {
        let options = PersistenceOptions {
            name: Some("shared".to_string()),
            size: Some("1Gi".to_string()),
            storage_class_name: Some("fast".to_string()),
            ..Default::default()
        };

        let pvc =
            desired_pvc(&shadow(), &dev_pod(Some(options)), &ReconcilerConfig::default()).unwrap();

        assert_eq!(pvc.metadata.name.as_deref(), Some("shared"));
        assert!(pvc.metadata.owner_references.is_none());
        assert_eq!(
            pvc.spec.unwrap().storage_class_name.as_deref(),
            Some("fast")
        );
    }

    #[test]
    fn test_invalid_size_is_rejected() {
        let options = PersistenceOptions {
            size: Some("big".to_string()),
            ..Default::default()
        };

        let err = desired_pvc(&shadow(), &dev_pod(Some(options)), &ReconcilerConfig::default())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
    }

    #[test]
    fn test_compatibility_compares_quantities_by_value() {
        let desired = desired_pvc(&shadow(), &dev_pod(None), &ReconcilerConfig::default()).unwrap();
        let mut existing = desired.clone();
        existing
            .spec
            .as_mut()
            .unwrap()
            .resources
            .as_mut()
            .unwrap()
            .requests
            .as_mut()
            .unwrap()
            .insert(STORAGE_RESOURCE.to_string(), Quantity("10240Mi".to_string()));
        assert!(is_compatible(&existing, &desired));

        existing.spec.as_mut().unwrap().access_modes = Some(vec!["ReadWriteMany".to_string()]);
        assert!(!is_compatible(&existing, &desired));
    }

    #[test]
    fn test_claim_of_another_owner_is_incompatible() {
        let desired = desired_pvc(&shadow(), &dev_pod(None), &ReconcilerConfig::default()).unwrap();

        let mut existing = desired.clone();
        existing.metadata.owner_references.as_mut().unwrap()[0].uid = "uid-0".to_string();
        assert!(!is_compatible(&existing, &desired));

        existing.metadata.owner_references = None;
        assert!(!is_compatible(&existing, &desired));
    }
}
