use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};
use crate::devpod_error;
use crate::error::{DevPodResult, ErrorKind};

/// Sending half used to cancel in-flight replace and revert flows.
#[derive(Debug, Clone)]
pub struct CancelTx(SignalTx);

impl CancelTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    pub fn cancel(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> CancelRx {
        CancelRx(self.0.subscribe())
    }
}

/// Receiving half observed by every cluster call and poll loop.
///
/// Cancellation is sticky: once [`CancelTx::cancel`] was called, every later call to
/// [`CancelRx::run`] fails immediately. Dropping the sender without cancelling never cancels.
#[derive(Debug, Clone)]
pub struct CancelRx(SignalRx);

impl CancelRx {
    /// Returns a receiver that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = create_signal();
        Self(rx)
    }

    async fn cancelled(&mut self) {
        if self.0.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Runs `future` unless cancellation is requested first.
    pub async fn run<T, F>(&self, future: F) -> DevPodResult<T>
    where
        F: Future<Output = DevPodResult<T>>,
    {
        let mut rx = self.clone();

        tokio::select! {
            biased;

            _ = rx.cancelled() => {
                Err(devpod_error!(ErrorKind::Cancelled, "Operation was cancelled"))
            }
            result = future => result,
        }
    }

    /// Sleeps for `duration` unless cancellation is requested first.
    pub async fn sleep(&self, duration: Duration) -> DevPodResult<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

/// Creates a new pair of [`CancelTx`] and [`CancelRx`].
pub fn create_cancel_channel() -> (CancelTx, CancelRx) {
    let (tx, rx) = create_signal();
    (CancelTx::wrap(tx), CancelRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_without_cancellation() {
        let (_tx, rx) = create_cancel_channel();

        let result = rx.run(async { Ok(42) }).await.unwrap();

        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_cancellation_is_sticky() {
        let (tx, rx) = create_cancel_channel();
        tx.cancel().unwrap();

        for _ in 0..2 {
            let err = rx
                .run(std::future::pending::<DevPodResult<()>>())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let (tx, rx) = create_cancel_channel();

        let handle = tokio::spawn(async move { rx.sleep(Duration::from_secs(3600)).await });
        tx.cancel().unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_never_does_not_cancel() {
        let rx = CancelRx::never();

        rx.sleep(Duration::from_millis(1)).await.unwrap();
    }
}
