//! Cooperative shutdown signal shared by the server and background tasks.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable stop signal.
///
/// Every clone observes the same flag. Once stopped it stays stopped.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Create a handle that has not been stopped.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal every holder to stop.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the stop signal is sent.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_handle_is_running() {
        assert!(!ShutdownHandle::new().is_stopped());
    }

    #[test]
    fn test_stop_is_seen_by_clones() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        handle.stop();
        assert!(clone.is_stopped());
    }

    #[tokio::test]
    async fn test_wait_returns_after_stop() {
        let handle = ShutdownHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_on_stopped_handle_returns_immediately() {
        let handle = ShutdownHandle::new();
        handle.stop();
        handle.wait().await;
    }
}
