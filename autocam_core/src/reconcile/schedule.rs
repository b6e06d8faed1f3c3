use crate::reconcile::engine::ReconciliationEngine;
use crate::reconcile::models::CycleSummary;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed-delay driver for the reconciliation engine.
///
/// The delay is measured from the end of one cycle to the start of the next,
/// so cycles never overlap no matter how long one takes.
pub struct Scheduler {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
}

impl Scheduler {
    #[tracing::instrument(level = "debug", skip(engine))]
    pub fn new(engine: Arc<ReconciliationEngine>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::InvalidInput("sync interval must be > 0".to_string()));
        }
        Ok(Self { engine, interval })
    }

    /// Run cycles until `cancel` fires.
    ///
    /// A cycle in progress is allowed to finish; a pending sleep is cut short.
    #[tracing::instrument(level = "info", skip_all, fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.engine.run_cycle().await {
                tracing::warn!(%e, "reconciliation cycle failed; retrying next cycle");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("reconciliation scheduler stopped");
    }

    /// Run exactly one cycle.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run_once(&self) -> Result<CycleSummary> {
        self.engine.run_cycle().await
    }
}
