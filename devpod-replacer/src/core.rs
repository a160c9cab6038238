use std::sync::Arc;

use devpod::cache::config_map::ConfigMapDevPodCache;
use devpod::concurrency::cancel::{CancelTx, create_cancel_channel};
use devpod::image::ReferenceImageMatcher;
use devpod::k8s::K8sClient;
use devpod::k8s::http::HttpK8sClient;
use devpod::manager::{Collaborators, DevPodManager};
use devpod::patch::JsonPatchEngine;
use devpod::resolve::VariableResolver;
use devpod_config::shared::{
    CacheConfig, DevPodConfig, ReconcilerConfig, ReplacerAction, ReplacerConfig,
};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs the configured action against the cluster.
///
/// Loads the dev pod cache, then replaces or reverts every configured dev pod. SIGINT and
/// SIGTERM cancel the flows still in progress.
pub async fn start_replacer_with_config(replacer_config: ReplacerConfig) -> anyhow::Result<()> {
    info!("starting replacer service");

    log_config(&replacer_config);

    let client: Arc<dyn K8sClient> = Arc::new(HttpK8sClient::new().await?);

    let cache_namespace = replacer_config
        .cache
        .namespace
        .clone()
        .unwrap_or_else(|| replacer_config.reconciler.namespace.clone());
    let cache = ConfigMapDevPodCache::load(
        client.clone(),
        cache_namespace,
        replacer_config.cache.config_map_name.clone(),
    )
    .await?;

    let collaborators = Collaborators {
        client,
        resolver: Arc::new(VariableResolver::new(replacer_config.variables.clone())),
        matcher: Arc::new(ReferenceImageMatcher),
        patch_engine: Arc::new(JsonPatchEngine),
    };

    let mut manager = DevPodManager::new(collaborators, replacer_config.reconciler, cache);
    if let Some(project) = replacer_config.project {
        manager = manager.with_project(project);
    }

    let (cancel_tx, cancel_rx) = create_cancel_channel();
    let shutdown_handle = spawn_shutdown_listener(cancel_tx);

    let result = match replacer_config.action {
        ReplacerAction::Start => manager
            .start_all(&replacer_config.dev_pods, &cancel_rx)
            .await
            .map(|results| {
                info!("{} dev pods are running", results.len());
            }),
        ReplacerAction::Stop => manager
            .stop_all(&replacer_config.dev_pods, &cancel_rx)
            .await
            .map(|reverted| {
                info!("reverted {} dev pods", reverted.len());
            }),
    };

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    info!("replacer service completed");

    Ok(())
}

/// Cancels in-flight flows on SIGINT or SIGTERM.
///
/// Cancelled flows stop before their next cluster write. Running the stop action afterwards
/// reverts whatever was left behind.
fn spawn_shutdown_listener(cancel_tx: CancelTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!("failed to register SIGTERM handler: {err}");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT (Ctrl+C) received, cancelling dev pod flows");
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling dev pod flows");
            }
        }

        if let Err(e) = cancel_tx.cancel() {
            warn!("failed to send cancellation signal: {:?}", e);
        }
    })
}

fn log_config(config: &ReplacerConfig) {
    debug!(
        action = ?config.action,
        project = config.project.as_deref(),
        variables = config.variables.len(),
        "replacer config"
    );
    log_cache_config(&config.cache);
    log_reconciler_config(&config.reconciler);
    for dev_pod in &config.dev_pods {
        log_dev_pod_config(dev_pod);
    }
}

fn log_cache_config(config: &CacheConfig) {
    debug!(
        config_map_name = config.config_map_name,
        namespace = config.namespace.as_deref(),
        "cache config"
    );
}

fn log_reconciler_config(config: &ReconcilerConfig) {
    debug!(
        namespace = config.namespace,
        poll_interval_ms = config.poll_interval_ms,
        wait_timeout_ms = config.wait_timeout_ms,
        max_replace_attempts = config.max_replace_attempts,
        default_volume_size = config.default_volume_size,
        "reconciler config"
    );
}

fn log_dev_pod_config(config: &DevPodConfig) {
    debug!(
        name = config.name,
        namespace = config.namespace.as_deref(),
        label_selector = ?config.label_selector,
        image_selector = config.image_selector.as_deref(),
        containers = config.containers.len(),
        patches = config.patches.len(),
        "dev pod config"
    );
}
