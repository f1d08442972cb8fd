use core::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A thread-safe single-use status indicator.
///
/// A `Flag` starts open and transitions to closed exactly once. The
/// transition is one-way: there is no way to reopen a closed flag.
///
/// Closing uses `Release` ordering and polling uses `Acquire` ordering, so
/// every write made before [`close`] is visible to any task that observes
/// the flag as closed through [`is_closed`] or [`wait`].
///
/// [`close`]: Flag::close
/// [`is_closed`]: Flag::is_closed
/// [`wait`]: Flag::wait
#[derive(Debug, Default)]
pub struct Flag {
    closed: AtomicBool,
    notify: Notify,
}

impl Flag {
    /// Creates an open flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the flag and wakes every task blocked in [`wait`].
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// flag was already closed. Concurrent calls are safe; exactly one of
    /// them observes `true`.
    ///
    /// [`wait`]: Flag::wait
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    /// Returns whether the flag has been closed, without blocking.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits until the flag is closed. Returns immediately if it already is.
    pub async fn wait(&self) {
        loop {
            // Register before checking, otherwise a close landing between
            // the check and the await would be missed.
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::time::timeout;

    use super::*;

    #[test]
    fn test_close_is_idempotent() {
        let flag = Flag::new();
        assert!(!flag.is_closed());
        assert!(flag.close());
        assert!(flag.is_closed());
        assert!(!flag.close());
        assert!(flag.is_closed());
    }

    #[tokio::test]
    async fn test_wait_on_closed_flag_returns_immediately() {
        let flag = Flag::new();
        flag.close();
        timeout(Duration::from_millis(100), flag.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_wakes_every_waiter() {
        let flag = Arc::new(Flag::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let flag = flag.clone();
                tokio::spawn(async move { flag.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        flag.close();
        for waiter in waiters {
            timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_has_single_winner() {
        let flag = Arc::new(Flag::new());
        let closers: Vec<_> = (0..8)
            .map(|_| {
                let flag = flag.clone();
                tokio::spawn(async move { flag.close() })
            })
            .collect();

        let mut winners = 0;
        for closer in closers {
            if closer.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(flag.is_closed());
    }
}
