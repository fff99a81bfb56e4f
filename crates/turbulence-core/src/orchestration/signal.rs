use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot wake-up that can be fired at most once.
///
/// Firing an already fired signal is a no-op reported through the return
/// value of [`Signal::fire`]. Waiters that arrive after the signal fired
/// return immediately.
#[derive(Debug, Default)]
pub struct Signal {
    fired: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually fired the signal.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent fire cannot slip between.
        notified.as_mut().enable();

        if self.is_fired() {
            return;
        }

        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn only_the_first_fire_counts() {
        let signal = Signal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn wait_after_fire_returns_immediately() {
        let signal = Signal::new();
        signal.fire();
        tokio::time::timeout(Duration::from_millis(50), signal.wait())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fire_wakes_every_pending_waiter() {
        let signal = Arc::new(Signal::new());
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let signal = signal.clone();
            waiters.push(tokio::spawn(async move { signal.wait().await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(signal.fire());

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
