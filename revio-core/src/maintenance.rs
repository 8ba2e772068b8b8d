//! Periodic maintenance for the in-process abuse state
//!
//! The sweep runs on its own timer, independent of request traffic, and
//! stops on shutdown signal. Sweeps only remove entries that are stale under
//! their own snapshot; staleness is monotonic, so check-then-delete cannot
//! resurrect or destroy fresh state.

use std::sync::Arc;
use std::time::Duration;

/// A component holding time-windowed state that must be swept periodically.
pub trait Sweep: Send + Sync + 'static {
    /// Drop entries that are stale at the time of the call.
    fn sweep(&self);
}

/// Spawn the background sweep task.
///
/// Every `interval`, each component is swept in registration order. The task
/// exits when `shutdown` changes.
pub fn start_sweep_task(
    components: Vec<Arc<dyn Sweep>>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a freshly started
        // server does not sweep before serving anything.
        interval_timer.tick().await;

        loop {
            tokio::select! {
                _ = interval_timer.tick() => {
                    for component in &components {
                        component.sweep();
                    }
                    tracing::debug!(components = components.len(), "abuse-state sweep complete");
                }
                _ = shutdown.changed() => {
                    tracing::info!("Shutting down abuse-state sweep task");
                    break;
                }
            }
        }
    })
}
