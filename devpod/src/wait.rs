use std::future::Future;
use std::time::Duration;

use devpod_config::shared::ReconcilerConfig;
use tokio::time::Instant;
use tracing::debug;

use crate::bail;
use crate::concurrency::cancel::CancelRx;
use crate::error::{DevPodResult, ErrorKind};
use crate::k8s::K8sClient;
use crate::workload::WorkloadKind;

/// Interval and upper bound of a poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&ReconcilerConfig> for PollSettings {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_millis(config.wait_timeout_ms),
        }
    }
}

/// Polls `check` until it returns `true`, the timeout elapses or `cancel` fires.
pub async fn poll_until<F, Fut>(
    what: &str,
    settings: PollSettings,
    cancel: &CancelRx,
    mut check: F,
) -> DevPodResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DevPodResult<bool>>,
{
    let deadline = Instant::now() + settings.timeout;

    loop {
        if cancel.run(check()).await? {
            return Ok(());
        }

        if Instant::now() >= deadline {
            bail!(
                ErrorKind::Timeout,
                "Timed out waiting for cluster state",
                what
            );
        }

        debug!("waiting for {what}");
        cancel.sleep(settings.interval).await?;
    }
}

/// Waits until a deleted workload is gone.
///
/// With a `pod_selector` the wait also ends as soon as no pod matches it anymore, even if the
/// workload object itself still lingers.
pub async fn wait_for_workload_deletion(
    client: &dyn K8sClient,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
    pod_selector: Option<&str>,
    settings: PollSettings,
    cancel: &CancelRx,
) -> DevPodResult<()> {
    let what = format!("deletion of {kind} {namespace}/{name}");

    poll_until(&what, settings, cancel, move || async move {
        match client.get_workload(kind, namespace, name).await {
            Err(err) if err.is_not_found() => return Ok(true),
            Err(err) => return Err(err.into()),
            Ok(_) => {}
        }

        match pod_selector {
            Some(selector) => Ok(client.list_pods(namespace, selector).await?.is_empty()),
            None => Ok(false),
        }
    })
    .await
}

/// Waits until a deleted volume claim is gone.
pub async fn wait_for_pvc_deletion(
    client: &dyn K8sClient,
    namespace: &str,
    name: &str,
    settings: PollSettings,
    cancel: &CancelRx,
) -> DevPodResult<()> {
    let what = format!("deletion of PersistentVolumeClaim {namespace}/{name}");

    poll_until(&what, settings, cancel, move || async move {
        match client.get_pvc(namespace, name).await {
            Err(err) if err.is_not_found() => Ok(true),
            Err(err) => Err(err.into()),
            Ok(_) => Ok(false),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::concurrency::cancel::create_cancel_channel;

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds_after_a_few_checks() {
        let checks = Arc::new(AtomicUsize::new(0));

        poll_until("counter", settings(), &CancelRx::never(), || {
            let checks = checks.clone();
            async move { Ok(checks.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await
        .unwrap();

        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let err = poll_until("never", settings(), &CancelRx::never(), || async { Ok(false) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.detail(), Some("never"));
    }

    #[tokio::test]
    async fn test_poll_until_honors_cancellation() {
        let (tx, rx) = create_cancel_channel();
        tx.cancel().unwrap();

        let err = poll_until("cancelled", settings(), &rx, || async { Ok(false) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
