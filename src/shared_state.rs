use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// SOC assumed until the load loop has read a real one.
/// Kept well above the relay threshold so nothing switches at start-up.
pub const INITIAL_SOC: f64 = 50.0;

/// Battery state of charge shared between the two loops.
/// Written by the load loop, read by the grid loop; last writer wins.
#[derive(Debug, Clone)]
pub struct SharedSoc {
    soc: Arc<RwLock<f64>>,
}

impl SharedSoc {
    pub fn new(initial: f64) -> Self {
        Self {
            soc: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get(&self) -> f64 {
        *self.soc.read().await
    }

    pub async fn set(&self, soc: f64) {
        *self.soc.write().await = soc;
    }
}

impl Default for SharedSoc {
    fn default() -> Self {
        Self::new(INITIAL_SOC)
    }
}

/// Process wide shutdown flag. Once triggered it stays triggered.
#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called
    pub async fn wait(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Sleeps for `period`, returning early with `true` if shutdown was requested
    pub async fn sleep(&self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => self.is_triggered(),
            _ = self.wait() => true,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_soc_last_writer_wins() {
        let soc = SharedSoc::default();
        assert_eq!(soc.get().await, INITIAL_SOC);

        let writer = soc.clone();
        writer.set(12.5).await;
        writer.set(4.0).await;
        assert_eq!(soc.get().await, 4.0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        shutdown.trigger();

        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_sleep_is_cut_short() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let stopped = tokio::time::timeout(
            Duration::from_millis(500),
            shutdown.sleep(Duration::from_secs(60)),
        )
        .await
        .expect("sleep should return immediately");
        assert!(stopped);
    }

    #[test]
    fn test_sleep_completes_without_shutdown() {
        let shutdown = Shutdown::new();
        let stopped = tokio_test::block_on(async {
            tokio::time::timeout(Duration::from_secs(1), shutdown.sleep(Duration::from_millis(10)))
                .await
        });
        assert!(!tokio_test::assert_ok!(stopped));
    }
}
