#![cfg(feature = "test-utils")]

use devpod::annotations::{
    CONFIG_HASH_ANNOTATION, DEV_POD_ANNOTATION, PARENT_KIND_ANNOTATION, PARENT_NAME_ANNOTATION,
    REPLACED_LABEL, REPLICAS_ANNOTATION,
};
use devpod::concurrency::cancel::{CancelRx, create_cancel_channel};
use devpod::error::ErrorKind;
use devpod::replace::{ReplaceOutcome, ShadowState};
use devpod::test_utils::cluster::{Failure, FakeK8sClient, Operation};
use devpod::test_utils::fixtures::{
    NAMESPACE, deployment, dev_pod, labels, replacer, stateful_set,
};
use devpod::workload::{Workload, WorkloadKind};
use devpod_config::shared::DevContainerConfig;
use devpod_telemetry::tracing::init_test_tracing;

fn shadow_image(client: &FakeK8sClient, name: &str) -> Option<String> {
    client
        .deployment(NAMESPACE, name)?
        .spec?
        .template
        .spec?
        .containers
        .first()?
        .image
        .clone()
}

#[tokio::test]
async fn test_replace_creates_shadow_and_scales_down_target() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 2));
    let replacer = replacer(&client);

    let result = replacer
        .replace(&dev_pod("app", "app", "myapp:dev"), None, &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(result.outcome, ReplaceOutcome::Created);
    assert_eq!(result.entry.target_kind, WorkloadKind::Deployment);
    assert_eq!(result.entry.target_name, "app");
    assert_eq!(result.entry.shadow_deployment_name, "app-devspace");
    assert_eq!(result.entry.namespace, NAMESPACE);

    let target = client
        .workload(WorkloadKind::Deployment, NAMESPACE, "app")
        .unwrap();
    assert_eq!(target.replicas(), 0);
    assert_eq!(target.annotation(REPLICAS_ANNOTATION), Some("2"));

    let shadow = client.deployment(NAMESPACE, "app-devspace").unwrap();
    let shadow_labels = shadow.metadata.labels.clone().unwrap();
    assert_eq!(shadow_labels[REPLACED_LABEL], "true");
    let annotations = shadow.metadata.annotations.clone().unwrap();
    assert_eq!(annotations[PARENT_KIND_ANNOTATION], "Deployment");
    assert_eq!(annotations[PARENT_NAME_ANNOTATION], "app");
    assert_eq!(annotations[DEV_POD_ANNOTATION], "app");
    let spec = shadow.spec.unwrap();
    assert_eq!(spec.replicas, Some(1));
    assert_eq!(
        spec.selector.match_labels,
        Some(labels(&[("app", "app"), (REPLACED_LABEL, "true")]))
    );
    assert_eq!(
        shadow_image(&client, "app-devspace").as_deref(),
        Some("myapp:dev")
    );
}

#[tokio::test]
async fn test_replace_is_idempotent() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 2));
    let replacer = replacer(&client);
    let dev_pod = dev_pod("app", "app", "myapp:dev");

    let first = replacer
        .replace(&dev_pod, None, &CancelRx::never())
        .await
        .unwrap();
    client.clear_writes();

    let second = replacer
        .replace(&dev_pod, Some(&first.entry), &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(second.outcome, ReplaceOutcome::Unchanged);
    assert_eq!(second.entry, first.entry);
    assert_eq!(client.write_count(), 0);
    assert_eq!(
        replacer
            .shadow_state(&dev_pod, Some(&first.entry), &CancelRx::never())
            .await
            .unwrap(),
        ShadowState::UpToDate
    );
}

#[tokio::test]
async fn test_up_to_date_shadow_scales_target_down_again() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 2));
    let replacer = replacer(&client);
    let dev_pod = dev_pod("app", "app", "myapp:dev");

    replacer
        .replace(&dev_pod, None, &CancelRx::never())
        .await
        .unwrap();

    // Someone scales the target back up by hand.
    let mut target = client
        .workload(WorkloadKind::Deployment, NAMESPACE, "app")
        .unwrap();
    target.set_replicas(3);
    client.insert_workload(target);

    let result = replacer
        .replace(&dev_pod, None, &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(result.outcome, ReplaceOutcome::Unchanged);
    let target = client
        .workload(WorkloadKind::Deployment, NAMESPACE, "app")
        .unwrap();
    assert_eq!(target.replicas(), 0);
}

#[tokio::test]
async fn test_config_change_patches_shadow_in_place() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 1));
    let replacer = replacer(&client);

    let first = replacer
        .replace(&dev_pod("app", "app", "myapp:dev"), None, &CancelRx::never())
        .await
        .unwrap();
    let created = client.deployment(NAMESPACE, "app-devspace").unwrap();

    let changed = dev_pod("app", "app", "myapp:dev2");
    assert_eq!(
        replacer
            .shadow_state(&changed, Some(&first.entry), &CancelRx::never())
            .await
            .unwrap(),
        ShadowState::Stale
    );

    let second = replacer
        .replace(&changed, Some(&first.entry), &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(second.outcome, ReplaceOutcome::Updated);
    let patched = client.deployment(NAMESPACE, "app-devspace").unwrap();
    assert_eq!(patched.metadata.uid, created.metadata.uid);
    assert_ne!(
        patched.metadata.annotations.as_ref().unwrap()[CONFIG_HASH_ANNOTATION],
        created.metadata.annotations.as_ref().unwrap()[CONFIG_HASH_ANNOTATION]
    );
    assert_eq!(
        shadow_image(&client, "app-devspace").as_deref(),
        Some("myapp:dev2")
    );

    // The patched shadow converged: replacing again changes nothing.
    client.clear_writes();
    let third = replacer
        .replace(&changed, Some(&second.entry), &CancelRx::never())
        .await
        .unwrap();
    assert_eq!(third.outcome, ReplaceOutcome::Unchanged);
    assert_eq!(client.write_count(), 0);
}

#[tokio::test]
async fn test_stale_fields_are_removed_by_patch() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 1));
    let replacer = replacer(&client);

    let mut with_workdir = dev_pod("app", "app", "myapp:dev");
    with_workdir.containers[0].working_dir = Some("/src".to_string());

    let first = replacer
        .replace(&with_workdir, None, &CancelRx::never())
        .await
        .unwrap();

    replacer
        .replace(
            &dev_pod("app", "app", "myapp:dev"),
            Some(&first.entry),
            &CancelRx::never(),
        )
        .await
        .unwrap();

    let shadow = client.deployment(NAMESPACE, "app-devspace").unwrap();
    let container = &shadow.spec.unwrap().template.spec.unwrap().containers[0];
    assert_eq!(container.working_dir, None);
}

#[tokio::test]
async fn test_immutable_selector_change_recreates_shadow() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 1));
    let replacer = replacer(&client);
    let dev_pod = dev_pod("app", "app", "myapp:dev");

    let first = replacer
        .replace(&dev_pod, None, &CancelRx::never())
        .await
        .unwrap();
    let created = client.deployment(NAMESPACE, "app-devspace").unwrap();

    // New pod labels change the shadow selector, which the cluster refuses to patch.
    let mut target = client
        .workload(WorkloadKind::Deployment, NAMESPACE, "app")
        .unwrap();
    if let Workload::Deployment(deployment) = &mut target {
        let template = &mut deployment.spec.as_mut().unwrap().template;
        template
            .metadata
            .as_mut()
            .unwrap()
            .labels
            .as_mut()
            .unwrap()
            .insert("tier".to_string(), "web".to_string());
    }
    client.insert_workload(target);

    let second = replacer
        .replace(&dev_pod, Some(&first.entry), &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(second.outcome, ReplaceOutcome::Recreated);
    let recreated = client.deployment(NAMESPACE, "app-devspace").unwrap();
    assert_ne!(recreated.metadata.uid, created.metadata.uid);
    assert_eq!(
        recreated.spec.unwrap().selector.match_labels.unwrap()["tier"],
        "web"
    );
}

#[tokio::test]
async fn test_shadow_without_parent_is_recreated() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 1));
    let mut broken = deployment("app-devspace", &[("app", "app")], "myapp:dev", 1);
    broken.metadata.labels = Some(labels(&[(REPLACED_LABEL, "true")]));
    broken.metadata.annotations = Some(labels(&[(DEV_POD_ANNOTATION, "app")]));
    client.insert_workload(broken);
    let replacer = replacer(&client);

    let result = replacer
        .replace(&dev_pod("app", "app", "myapp:dev"), None, &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(result.outcome, ReplaceOutcome::Recreated);
    let shadow = client.deployment(NAMESPACE, "app-devspace").unwrap();
    assert_eq!(
        shadow.metadata.annotations.unwrap()[PARENT_NAME_ANNOTATION],
        "app"
    );
}

#[tokio::test]
async fn test_create_collision_is_retried() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 1));
    client.fail_next(Operation::CreateDeployment, Failure::AlreadyExists);
    let replacer = replacer(&client);

    let result = replacer
        .replace(&dev_pod("app", "app", "myapp:dev"), None, &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(result.outcome, ReplaceOutcome::Created);
    assert!(client.deployment(NAMESPACE, "app-devspace").is_some());
}

#[tokio::test]
async fn test_create_collisions_exhaust_retries() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 1));
    for _ in 0..3 {
        client.fail_next(Operation::CreateDeployment, Failure::AlreadyExists);
    }
    let replacer = replacer(&client);

    let err = replacer
        .replace(&dev_pod("app", "app", "myapp:dev"), None, &CancelRx::never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ReplaceRetriesExhausted);
    assert!(client.deployment(NAMESPACE, "app-devspace").is_none());
}

#[tokio::test]
async fn test_configuration_errors_happen_before_any_write() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 2));
    let replacer = replacer(&client);

    let mut dev_pod = dev_pod("app", "app", "myapp:dev");
    dev_pod.containers[0].container = Some("sidecar".to_string());

    let err = replacer
        .replace(&dev_pod, None, &CancelRx::never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ContainerNotFound);
    assert_eq!(client.write_count(), 0);
    let target = client
        .workload(WorkloadKind::Deployment, NAMESPACE, "app")
        .unwrap();
    assert_eq!(target.replicas(), 2);
}

#[tokio::test]
async fn test_missing_target_fails() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("web", &[("app", "web")], "nginx", 1));
    let replacer = replacer(&client);

    let err = replacer
        .replace(&dev_pod("app", "app", "myapp:dev"), None, &CancelRx::never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TargetNotFound);
    assert_eq!(client.write_count(), 0);
}

#[tokio::test]
async fn test_label_selector_takes_precedence_over_image_selector() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("api", &[("app", "api")], "acme/api:1", 1));
    client.insert_workload(deployment("web", &[("app", "web")], "nginx:1.25", 1));
    let replacer = replacer(&client);

    let mut dev_pod = dev_pod("web", "web", "nginx:dev");
    dev_pod.image_selector = Some("acme/api".to_string());

    let result = replacer
        .replace(&dev_pod, None, &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(result.entry.target_name, "web");
    let api = client
        .workload(WorkloadKind::Deployment, NAMESPACE, "api")
        .unwrap();
    assert_eq!(api.replicas(), 1);
}

#[tokio::test]
async fn test_image_selector_picks_matching_container() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("api", &[("app", "api")], "acme/api:1", 1));
    client.insert_workload(deployment("web", &[("app", "web")], "nginx:1.25", 1));
    let replacer = replacer(&client);

    let mut dev_pod = dev_pod("api", "api", "acme/api:dev");
    dev_pod.label_selector.clear();
    dev_pod.image_selector = Some("acme/api".to_string());

    let result = replacer
        .replace(&dev_pod, None, &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(result.entry.target_name, "api");
    assert_eq!(
        shadow_image(&client, "api-devspace").as_deref(),
        Some("acme/api:dev")
    );
}

#[tokio::test]
async fn test_stateful_set_target_is_wired() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(stateful_set("db", &[("app", "db")], "postgres:16", 3, &["data"]));
    let replacer = replacer(&client);

    let result = replacer
        .replace(&dev_pod("db", "db", "postgres:dev"), None, &CancelRx::never())
        .await
        .unwrap();

    assert_eq!(result.entry.target_kind, WorkloadKind::StatefulSet);
    let target = client
        .workload(WorkloadKind::StatefulSet, NAMESPACE, "db")
        .unwrap();
    assert_eq!(target.replicas(), 0);
    assert_eq!(target.annotation(REPLICAS_ANNOTATION), Some("3"));

    let spec = client
        .deployment(NAMESPACE, "db-devspace")
        .unwrap()
        .spec
        .unwrap()
        .template
        .spec
        .unwrap();
    assert_eq!(spec.hostname.as_deref(), Some("db-0"));
    let volume = &spec.volumes.unwrap()[0];
    assert_eq!(volume.name, "data");
    assert_eq!(
        volume.persistent_volume_claim.as_ref().unwrap().claim_name,
        "data-db-0"
    );
}

#[tokio::test]
async fn test_restart_helper_is_injected_for_restarting_sync() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 1));
    let replacer = replacer(&client);

    let mut dev_pod = dev_pod("app", "app", "myapp:dev");
    dev_pod.containers[0] = serde_json::from_value::<DevContainerConfig>(serde_json::json!({
        "dev_image": "myapp:dev",
        "command": ["npm", "start"],
        "sync": [{"on_upload": {"restart_container": true}}]
    }))
    .unwrap();

    replacer
        .replace(&dev_pod, None, &CancelRx::never())
        .await
        .unwrap();

    let spec = client
        .deployment(NAMESPACE, "app-devspace")
        .unwrap()
        .spec
        .unwrap()
        .template
        .spec
        .unwrap();
    let command = spec.containers[0].command.clone().unwrap();
    assert_eq!(command[0], "/.devspace/devspace-restart-helper");
    assert_eq!(command[1..], ["npm", "start"]);
    assert!(
        spec.volumes
            .unwrap()
            .iter()
            .any(|volume| volume.name == "devspace-restart-helper")
    );
}

#[tokio::test]
async fn test_cancelled_replace_writes_nothing() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    client.insert_workload(deployment("app", &[("app", "app")], "myapp:1", 1));
    let replacer = replacer(&client);

    let (tx, rx) = create_cancel_channel();
    tx.cancel().unwrap();

    let err = replacer
        .replace(&dev_pod("app", "app", "myapp:dev"), None, &rx)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(client.write_count(), 0);
}
