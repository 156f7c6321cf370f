//! Cooperative cancellation.
//!
//! A [`CancelHandle`]/[`CancelToken`] pair shares one flag: the caller keeps
//! the handle, everything that must stop gets a clone of the token. Setting
//! the flag signals intent; the executor checks it at well-defined
//! checkpoints (attempt start, around backoff waits) rather than preempting
//! work that is already running.

use tokio::sync::watch;

/// Create a connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Caller-side handle. Cancelling is idempotent.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Worker-side token, cloneable so it can be threaded through every
/// suspension point of an operation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that never fires, for call sites without a caller-side handle.
    pub fn never() -> Self {
        // The sender drops immediately: a closed channel still reads
        // `false`, and `cancelled()` treats it as pending forever.
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled.
    ///
    /// Dropping the handle without cancelling is not a cancellation: this
    /// future then stays pending forever, which makes it safe to race
    /// against timers and network calls in `select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_flag_propagates() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves_on_signal() {
        let (handle, token) = cancel_pair();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("cancelled() should resolve promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_is_not_a_cancellation() {
        let (handle, token) = cancel_pair();
        drop(handle);
        assert!(!token.is_cancelled());
        let outcome =
            tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(outcome.is_err(), "cancelled() must stay pending");
    }

    #[tokio::test]
    async fn test_never_token() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let outcome =
            tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(outcome.is_err());
        // The sender is long gone; the token still reads not-cancelled.
        assert!(!token.is_cancelled());
        assert!(!token.clone().is_cancelled());
    }
}
