#![cfg(feature = "test-utils")]

use std::collections::BTreeMap;
use std::sync::Arc;

use devpod::cache::config_map::{ConfigMapDevPodCache, DEV_PODS_KEY};
use devpod::cache::{DevPodCache, DevPodCacheEntry};
use devpod::error::ErrorKind;
use devpod::k8s::K8sClient;
use devpod::test_utils::cluster::{FakeK8sClient, Operation};
use devpod::test_utils::fixtures::NAMESPACE;
use devpod::workload::WorkloadKind;
use devpod_telemetry::tracing::init_test_tracing;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

const CACHE_NAME: &str = "devspace-cache";

fn entry(name: &str) -> DevPodCacheEntry {
    DevPodCacheEntry {
        name: name.to_string(),
        namespace: NAMESPACE.to_string(),
        target_kind: WorkloadKind::Deployment,
        target_name: name.to_string(),
        shadow_deployment_name: format!("{name}-devspace"),
        projects: vec!["shop".to_string()],
    }
}

async fn load(client: &FakeK8sClient) -> ConfigMapDevPodCache {
    ConfigMapDevPodCache::load(Arc::new(client.clone()), NAMESPACE, CACHE_NAME)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_missing_config_map_is_empty_cache() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    let cache = load(&client).await;

    assert!(cache.list_dev_pods().await.unwrap().is_empty());
    assert!(cache.get_dev_pod("app").await.unwrap().is_none());
    assert_eq!(client.write_count(), 0);
}

#[tokio::test]
async fn test_saved_entries_survive_reload() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    let cache = load(&client).await;
    cache.set_dev_pod(entry("web")).await.unwrap();
    cache.set_dev_pod(entry("api")).await.unwrap();

    assert!(cache.save().await.unwrap());
    assert!(client.config_map(NAMESPACE, CACHE_NAME).is_some());

    let reloaded = load(&client).await;
    assert_eq!(
        reloaded.list_dev_pods().await.unwrap(),
        vec![entry("api"), entry("web")]
    );

    reloaded.delete_dev_pod("api").await.unwrap();
    assert!(reloaded.save().await.unwrap());
    assert_eq!(load(&client).await.list_dev_pods().await.unwrap(), vec![entry("web")]);
}

#[tokio::test]
async fn test_unchanged_save_writes_nothing() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    let cache = load(&client).await;
    cache.set_dev_pod(entry("web")).await.unwrap();
    assert!(cache.save().await.unwrap());
    client.clear_writes();

    // Writing back an identical entry leaves the serialized form unchanged.
    cache.set_dev_pod(entry("web")).await.unwrap();
    assert!(!cache.save().await.unwrap());
    assert!(!load(&client).await.save().await.unwrap());
    assert_eq!(client.write_count(), 0);

    cache.set_dev_pod(entry("api")).await.unwrap();
    assert!(cache.save().await.unwrap());
    let operations: Vec<Operation> = client
        .writes()
        .into_iter()
        .map(|write| write.operation)
        .collect();
    assert_eq!(operations, vec![Operation::WriteConfigMap]);
}

#[tokio::test]
async fn test_malformed_entries_fail_to_load() {
    init_test_tracing();

    let client = FakeK8sClient::new();
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(CACHE_NAME.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            DEV_PODS_KEY.to_string(),
            "{not json".to_string(),
        )])),
        ..Default::default()
    };
    client
        .create_or_update_config_map(NAMESPACE, &config_map)
        .await
        .unwrap();

    let err = ConfigMapDevPodCache::load(Arc::new(client.clone()), NAMESPACE, CACHE_NAME)
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::CacheError);
}
