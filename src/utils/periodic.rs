use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A background loop running one cycle per interval until stopped
///
/// Cycles never overlap. Each cycle runs in its own task so a panic is logged
/// and the loop carries on at the next tick.
pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            name,
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Start the loop unless it is already running; returns whether it started
    pub fn ensure_started<F, Fut>(&self, interval: Duration, cycle: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return false;
        }

        self.stop_tx.send_replace(false);
        let mut stop_rx = self.stop_tx.subscribe();
        let name = self.name;

        *handle = Some(tokio::spawn(async move {
            debug!(task = name, "loop started");
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                if let Err(e) = tokio::spawn(cycle()).await {
                    error!(task = name, error = %e, "cycle panicked");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "loop stopped");
        }));
        true
    }

    /// Signal the loop and wait for the in-flight cycle to finish
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
