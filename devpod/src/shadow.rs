//! Lookup and removal of shadow deployments.

use k8s_openapi::api::apps::v1::Deployment;

use crate::annotations::{
    DEV_POD_ANNOTATION, PARENT_KIND_ANNOTATION, PARENT_NAME_ANNOTATION, REPLACED_LABEL,
    REPLACED_LABEL_VALUE,
};
use crate::concurrency::cancel::CancelRx;
use crate::error::{DevPodResult, ErrorContext};
use crate::k8s::K8sClient;
use crate::locator::label_selector_string;
use crate::wait::{PollSettings, wait_for_workload_deletion};
use crate::workload::{Workload, WorkloadKind};

pub fn annotation<'a>(shadow: &'a Deployment, key: &str) -> Option<&'a str> {
    shadow
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

pub fn is_shadow(deployment: &Deployment) -> bool {
    deployment
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(REPLACED_LABEL))
        .is_some_and(|value| value == REPLACED_LABEL_VALUE)
}

/// Returns `true` when `shadow` belongs to the dev pod `dev_pod_name`.
///
/// Shadows without the dev pod annotation are claimed by whichever dev pod finds them.
pub fn belongs_to(shadow: &Deployment, dev_pod_name: &str) -> bool {
    annotation(shadow, DEV_POD_ANNOTATION).is_none_or(|name| name == dev_pod_name)
}

/// Reads the parent reference of a shadow.
pub fn parent_reference(shadow: &Deployment) -> Option<(WorkloadKind, &str)> {
    let kind = annotation(shadow, PARENT_KIND_ANNOTATION)?;
    let name = annotation(shadow, PARENT_NAME_ANNOTATION)?;
    if name.is_empty() {
        return None;
    }

    Some((kind.parse().ok()?, name))
}

/// Returns `true` when `shadow` was built from `target`.
pub fn references(shadow: &Deployment, target: &Workload) -> bool {
    parent_reference(shadow).is_some_and(|(kind, name)| kind == target.kind() && name == target.name())
}

/// Label selector matching the pods of `shadow`, if it has one.
pub fn pod_selector(shadow: &Deployment) -> Option<String> {
    shadow
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.match_labels.as_ref())
        .filter(|labels| !labels.is_empty())
        .map(label_selector_string)
}

/// Fetches the shadow `name`, returning `None` when it does not exist or is no shadow.
pub async fn get_shadow(
    client: &dyn K8sClient,
    namespace: &str,
    name: &str,
    cancel: &CancelRx,
) -> DevPodResult<Option<Deployment>> {
    let found = cancel
        .run(async {
            match client
                .get_workload(WorkloadKind::Deployment, namespace, name)
                .await
            {
                Ok(Workload::Deployment(deployment)) => Ok(Some(deployment)),
                Ok(_) => Ok(None),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err.into()),
            }
        })
        .await
        .context("get shadow deployment")?;

    Ok(found.filter(is_shadow))
}

/// Lists all shadow deployments in `namespace`, ordered by name.
pub async fn list_shadows(
    client: &dyn K8sClient,
    namespace: &str,
    cancel: &CancelRx,
) -> DevPodResult<Vec<Deployment>> {
    let selector = format!("{REPLACED_LABEL}={REPLACED_LABEL_VALUE}");
    let workloads = cancel
        .run(async {
            client
                .list_workloads(WorkloadKind::Deployment, namespace, Some(&selector))
                .await
                .context("list shadow deployments")
        })
        .await?;

    let mut shadows: Vec<Deployment> = workloads
        .into_iter()
        .filter_map(|workload| match workload {
            Workload::Deployment(deployment) if is_shadow(&deployment) => Some(deployment),
            _ => None,
        })
        .collect();
    shadows.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    Ok(shadows)
}

/// Lists the shadows annotated with the dev pod `dev_pod_name`, ordered by name.
pub async fn list_dev_pod_shadows(
    client: &dyn K8sClient,
    namespace: &str,
    dev_pod_name: &str,
    cancel: &CancelRx,
) -> DevPodResult<Vec<Deployment>> {
    let mut shadows = list_shadows(client, namespace, cancel).await?;
    shadows.retain(|shadow| annotation(shadow, DEV_POD_ANNOTATION) == Some(dev_pod_name));

    Ok(shadows)
}

/// Deletes a shadow and waits until it is gone.
///
/// With a `pod_selector` the wait ends as soon as the shadow's pods are gone.
pub async fn delete_shadow(
    client: &dyn K8sClient,
    namespace: &str,
    name: &str,
    pod_selector: Option<&str>,
    settings: PollSettings,
    cancel: &CancelRx,
) -> DevPodResult<()> {
    cancel
        .run(async {
            match client
                .delete_workload(WorkloadKind::Deployment, namespace, name)
                .await
            {
                Err(err) if !err.is_not_found() => Err(err.into()),
                _ => Ok(()),
            }
        })
        .await
        .context("delete shadow deployment")?;

    wait_for_workload_deletion(
        client,
        WorkloadKind::Deployment,
        namespace,
        name,
        pod_selector,
        settings,
        cancel,
    )
    .await
    .context("wait for shadow deletion")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    use super::*;

    fn shadow(annotations: &[(&str, &str)]) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("app-devspace".to_string()),
                labels: Some(BTreeMap::from([(
                    REPLACED_LABEL.to_string(),
                    REPLACED_LABEL_VALUE.to_string(),
                )])),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(key, value)| (key.to_string(), value.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([
                        ("app".to_string(), "web".to_string()),
                        (REPLACED_LABEL.to_string(), REPLACED_LABEL_VALUE.to_string()),
                    ])),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parent_reference_requires_known_kind_and_name() {
        let valid = shadow(&[
            (PARENT_KIND_ANNOTATION, "StatefulSet"),
            (PARENT_NAME_ANNOTATION, "db"),
        ]);
        assert_eq!(
            parent_reference(&valid),
            Some((WorkloadKind::StatefulSet, "db"))
        );

        let unknown_kind = shadow(&[
            (PARENT_KIND_ANNOTATION, "DaemonSet"),
            (PARENT_NAME_ANNOTATION, "db"),
        ]);
        assert_eq!(parent_reference(&unknown_kind), None);

        assert_eq!(
            parent_reference(&shadow(&[(PARENT_KIND_ANNOTATION, "Deployment")])),
            None
        );
    }

    #[test]
    fn test_shadow_without_dev_pod_annotation_is_claimable() {
        let unclaimed = shadow(&[]);
        let claimed = shadow(&[(DEV_POD_ANNOTATION, "other")]);

        assert!(belongs_to(&unclaimed, "app"));
        assert!(!belongs_to(&claimed, "app"));
        assert!(is_shadow(&claimed));
    }

    #[test]
    fn test_pod_selector_uses_match_labels() {
        assert_eq!(
            pod_selector(&shadow(&[])).as_deref(),
            Some("app=web,devspace.sh/replaced=true")
        );

        let mut without_spec = shadow(&[]);
        without_spec.spec = None;
        assert_eq!(pod_selector(&without_spec), None);
    }
}
