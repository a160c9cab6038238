use tracing::{debug, info, warn};

use crate::annotations::REPLICAS_ANNOTATION;
use crate::concurrency::cancel::CancelRx;
use crate::error::{DevPodResult, ErrorContext, ErrorKind};
use crate::k8s::K8sClient;
use crate::workload::{Workload, WorkloadKind};

/// Number of times a scale patch is recomputed after the target changed underneath it.
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Computes the scaled copy of a freshly fetched workload, or `None` when nothing has to change.
type ScaleFn = fn(&Workload) -> DevPodResult<Option<Workload>>;

fn scaled_down(target: &Workload) -> DevPodResult<Option<Workload>> {
    let replicas = target.replicas();
    if replicas == 0 {
        return Ok(None);
    }

    let mut modified = target.clone();
    modified.set_annotation(REPLICAS_ANNOTATION, replicas.to_string());
    modified.set_replicas(0);

    Ok(Some(modified))
}

fn scaled_up(target: &Workload) -> DevPodResult<Option<Workload>> {
    let Some(replicas) = target.annotation(REPLICAS_ANNOTATION) else {
        return Ok(None);
    };
    let replicas = replicas.trim().parse::<i32>()?;

    let mut modified = target.clone();
    modified.remove_annotation(REPLICAS_ANNOTATION);
    modified.set_replicas(replicas);

    Ok(Some(modified))
}

/// Fetches the target, computes the change and patches it, recomputing on conflicts.
async fn rescale(
    client: &dyn K8sClient,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
    scale: ScaleFn,
    cancel: &CancelRx,
) -> DevPodResult<bool> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        let target = cancel
            .run(async { Ok(client.get_workload(kind, namespace, name).await?) })
            .await?;

        let Some(modified) = scale(&target)? else {
            return Ok(false);
        };
        let Some(patch) = target.merge_patch_to(&modified)? else {
            return Ok(false);
        };

        let result = cancel
            .run(async { Ok(client.patch_workload(kind, namespace, name, &patch).await?) })
            .await;

        match result {
            Ok(_) => return Ok(true),
            Err(err) if err.kind() == ErrorKind::Conflict && attempt < MAX_CONFLICT_RETRIES => {
                warn!("{kind} {namespace}/{name} changed while scaling, retrying: {err}");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Scales a target down to zero replicas, recording the previous count in an annotation.
///
/// Targets already at zero replicas are left untouched. Returns `true` when the target was
/// patched.
pub async fn scale_down(
    client: &dyn K8sClient,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
    cancel: &CancelRx,
) -> DevPodResult<bool> {
    let patched = rescale(client, kind, namespace, name, scaled_down, cancel)
        .await
        .context("scale down target")?;

    if patched {
        info!("scaled down {kind} {namespace}/{name}");
    } else {
        debug!("{kind} {namespace}/{name} is already scaled down");
    }

    Ok(patched)
}

/// Restores the replica count recorded by [`scale_down`] and removes the annotation.
///
/// Targets without the annotation are left untouched. Returns `true` when the target was
/// patched.
pub async fn scale_up(
    client: &dyn K8sClient,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
    cancel: &CancelRx,
) -> DevPodResult<bool> {
    let patched = rescale(client, kind, namespace, name, scaled_up, cancel)
        .await
        .context("scale up target")?;

    if patched {
        info!("restored replicas of {kind} {namespace}/{name}");
    }

    Ok(patched)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn stateful_set(replicas: Option<i32>) -> Workload {
        Workload::StatefulSet(StatefulSet {
            metadata: ObjectMeta {
                name: Some("db".to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_scaled_down_records_default_replicas() {
        let modified = scaled_down(&stateful_set(None)).unwrap().unwrap();

        assert_eq!(modified.replicas(), 0);
        assert_eq!(modified.annotation(REPLICAS_ANNOTATION), Some("1"));
    }

    #[test]
    fn test_scaled_down_skips_zero_replicas() {
        assert!(scaled_down(&stateful_set(Some(0))).unwrap().is_none());
    }

    #[test]
    fn test_scaled_up_restores_and_removes_annotation() {
        let mut target = stateful_set(Some(0));
        target.set_annotation(REPLICAS_ANNOTATION, "4".to_string());

        let modified = scaled_up(&target).unwrap().unwrap();

        assert_eq!(modified.replicas(), 4);
        assert_eq!(modified.annotation(REPLICAS_ANNOTATION), None);
    }

    #[test]
    fn test_scaled_up_without_annotation_is_noop() {
        assert!(scaled_up(&stateful_set(Some(0))).unwrap().is_none());
    }

    #[test]
    fn test_scaled_up_rejects_garbage_annotation() {
        let mut target = stateful_set(Some(0));
        target.set_annotation(REPLICAS_ANNOTATION, "many".to_string());

        assert_eq!(
            scaled_up(&target).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }
}
