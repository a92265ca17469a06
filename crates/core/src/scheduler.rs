//! Refresh triggers.
//!
//! The scheduler only decides *when* to refresh. Every trigger, whatever its
//! origin, ends up in the same generation-tagged entry point of the
//! [`ReconcileEngine`](crate::reconcile::ReconcileEngine).

use std::time::Duration;

use anyhow::Result;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, info};

/// Why a refresh cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// First refresh once startup finished.
    Startup,
    /// Fixed-interval refresh.
    Interval,
    /// User asked for a refresh.
    Manual,
}

/// Emits refresh triggers on a fixed interval.
#[derive(Debug, Clone)]
pub struct RefreshScheduler {
    interval: Duration,
}

impl RefreshScheduler {
    /// Create a scheduler firing every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Send one [`RefreshTrigger::Startup`] immediately, then
    /// [`RefreshTrigger::Interval`] every interval until the receiver is dropped.
    ///
    /// Ticks never wait for earlier cycles to finish.
    pub async fn run(self, sender: mpsc::Sender<RefreshTrigger>) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "refresh scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        ticker.tick().await;
        if sender.send(RefreshTrigger::Startup).await.is_err() {
            return Ok(());
        }

        loop {
            ticker.tick().await;
            debug!("interval refresh");
            if sender.send(RefreshTrigger::Interval).await.is_err() {
                info!("refresh scheduler stopped");
                return Ok(());
            }
        }
    }

    /// Spawn [`RefreshScheduler::run`] and return the trigger receiver.
    pub fn spawn(self) -> mpsc::Receiver<RefreshTrigger> {
        let (sender, receiver) = mpsc::channel(8);
        tokio::spawn(async move {
            if let Err(err) = self.run(sender).await {
                tracing::error!("refresh scheduler error: {err}");
            }
        });
        receiver
    }
}
