//! Escalation sweep driver
//!
//! Ticks on a fixed interval and asks the registry to apply whatever
//! escalation is due. The decision logic lives in [`crate::escalation`];
//! this module only decides when to run it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::encounter::EncounterRegistry;
use crate::escalation::EscalationThresholds;

/// Background escalation sweeper
#[derive(Debug, Clone)]
pub struct Sweeper {
    registry: Arc<EncounterRegistry>,
    interval: Duration,
    thresholds: EscalationThresholds,
}

impl Sweeper {
    pub fn new(
        registry: Arc<EncounterRegistry>,
        interval: Duration,
        thresholds: EscalationThresholds,
    ) -> Self {
        Self {
            registry,
            interval,
            thresholds,
        }
    }

    /// Run one sweep at `now`; returns the number of transitions applied
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let applied = self.registry.sweep(now, &self.thresholds).await;
        if applied > 0 {
            info!(applied, "escalation sweep applied transitions");
        }
        applied
    }

    /// Sweep until `shutdown` flips
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(interval = ?self.interval, "sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick(Utc::now()).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("sweeper stopped");
        })
    }
}
