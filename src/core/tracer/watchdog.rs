// src/core/tracer/watchdog.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Timer that only ever raises a flag; the trace loop decides what to do
pub struct Watchdog {
    expired: Arc<AtomicBool>,
    notify: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Arm for `delay`; `None` gives a watchdog that never fires
    pub fn arm(delay: Option<Duration>) -> Self {
        let expired = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let task = delay.map(|delay| {
            let expired = expired.clone();
            let notify = notify.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                warn!("Trace timed out after {} ms", delay.as_millis());
                expired.store(true, Ordering::SeqCst);
                notify.notify_one();
            })
        });

        Self { expired, notify, task }
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Resolves once the timer has fired
    pub async fn expired(&self) {
        if self.task.is_none() {
            return std::future::pending().await;
        }
        if self.is_expired() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
