//! Shutdown coordination primitives.
//!
//! - `CancelToken`: set once at stop time, observed cooperatively
//! - `ActiveSessions`: counts live sessions so stop can drain them

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Broadcast cancellation signal shared by the acceptor and every session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake every waiter. Never blocks.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Default)]
struct SessionsInner {
    count: AtomicUsize,
    idle: Notify,
}

/// Count of in-flight sessions.
///
/// Every session holds a [`SessionGuard`] for its whole lifetime; the count
/// goes up once in `enter` and down once when the guard drops.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<SessionsInner>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    pub fn enter(&self) -> SessionGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        SessionGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Wait until no sessions remain.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Membership of one session in [`ActiveSessions`].
#[derive(Debug)]
pub struct SessionGuard {
    inner: Arc<SessionsInner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;

        token.cancel();
        assert!(token.is_cancelled());
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_after_cancel_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("already-cancelled token should not block");
    }

    #[test]
    fn test_guard_symmetry() {
        let sessions = ActiveSessions::new();
        let a = sessions.enter();
        let b = sessions.enter();
        assert_eq!(sessions.count(), 2);

        drop(a);
        assert_eq!(sessions.count(), 1);
        drop(b);
        assert_eq!(sessions.count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_empty() {
        let sessions = ActiveSessions::new();
        timeout(Duration::from_millis(100), sessions.wait_idle())
            .await
            .expect("no sessions to wait for");
    }

    #[tokio::test]
    async fn test_wait_idle_after_last_guard() {
        let sessions = ActiveSessions::new();
        let guard = sessions.enter();

        let drainer = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drainer.is_finished());

        drop(guard);
        timeout(Duration::from_secs(1), drainer)
            .await
            .expect("drainer not woken")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_times_out_with_live_session() {
        let sessions = ActiveSessions::new();
        let _guard = sessions.enter();

        let result = timeout(Duration::from_secs(5), sessions.wait_idle()).await;
        assert!(result.is_err());
    }
}
