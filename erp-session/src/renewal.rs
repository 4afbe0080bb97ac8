//! Background access token renewal
//!
//! While a session is authenticated a periodic task compares the stored
//! expiry with the clock and refreshes the token shortly before it lapses.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Result of one renewal check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// No authenticated user
    NoSession,
    /// Token still has more than the lead time left, or is already expired
    NotDue,
    Refreshed,
    /// Refresh was attempted and failed; the session has been cleared
    Failed,
}

/// Remaining lifetime is positive but below the lead time
pub fn renewal_due(expires_at_ms: i64, now_ms: i64, lead_time: Duration) -> bool {
    let remaining = expires_at_ms - now_ms;
    let lead_ms = i64::try_from(lead_time.as_millis()).unwrap_or(i64::MAX);
    remaining > 0 && remaining < lead_ms
}

/// Handle to the periodic renewal task; stops the task when stopped or dropped
pub(crate) struct RenewalTask {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RenewalTask {
    /// Spawn the task; `check` runs every `interval` and returns false once the
    /// session owner is gone
    pub(crate) fn spawn<F>(interval: Duration, check: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, bool> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !check().await {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            debug!("Token renewal task stopped");
        });

        debug!(interval_ms = interval.as_millis() as u64, "Token renewal task started");

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    pub(crate) fn stop(mut self) {
        self.signal_shutdown();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn signal_shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

impl Drop for RenewalTask {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}
