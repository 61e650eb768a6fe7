//! Background maintenance loop.
//!
//! Each tick retries payment notifications whose processing was deferred,
//! then sweeps expired holds. Ticks never overlap; a slow tick delays the next.

use chrono::Duration;
use raffle_core::environment::Clock;
use raffle_core::reconciliation::{ReconciliationEngine, StaleReport};
use raffle_core::sweeper::{ExpirySweeper, SweepReport};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub interval: std::time::Duration,
    /// Deferred payments untouched for this long are retried
    pub stale_after: Duration,
    /// Payment records retried per tick
    pub stale_batch: u32,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sweep result, if the sweep ran
    pub sweep: Option<SweepReport>,
    /// Stale pass result, if it ran
    pub stale: Option<StaleReport>,
}

/// Runs the sweeper and the stale-payment pass on an interval.
#[derive(Clone)]
pub struct Scheduler {
    sweeper: ExpirySweeper,
    engine: ReconciliationEngine,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        sweeper: ExpirySweeper,
        engine: ReconciliationEngine,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            sweeper,
            engine,
            clock,
            config,
        }
    }

    /// Run one tick. Failures are logged and the pass is retried next tick.
    ///
    /// Deferred payments go first so a paid purchase is not expired while its
    /// notification waits.
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();

        let older_than = self.clock.now() - self.config.stale_after;
        let stale = match self
            .engine
            .reconcile_stale(older_than, self.config.stale_batch)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Stale payment pass failed");
                None
            }
        };

        let sweep = match self.sweeper.sweep(None).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Sweep failed");
                None
            }
        };

        metrics::histogram!("raffle_sweep_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        TickReport { sweep, stale }
    }

    /// Tick until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.interval, "Scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

    use super::*;
    use raffle_core::types::{PurchaseStatus, TicketStatus};
    use raffle_testing::fixtures::Harness;

    fn scheduler(h: &Harness) -> Scheduler {
        Scheduler::new(
            h.sweeper.clone(),
            h.engine.clone(),
            Arc::new(h.clock.clone()),
            SchedulerConfig {
                interval: std::time::Duration::from_millis(10),
                stale_after: Duration::minutes(1),
                stale_batch: 10,
            },
        )
    }

    /// Test 1: a tick expires overdue holds and retries deferred payments.
    #[tokio::test]
    async fn test_tick() {
        let h = Harness::new();
        let raffle = h.active_raffle(10, 100).await;
        let abandoned = h.reserve(raffle.id, vec![1]).await.expect("reserve");
        let paid = h.reserve(raffle.id, vec![2]).await.expect("reserve");
        h.gateway.approve("pay-2", paid.purchase_id);
        h.engine.record_deferred("pay-2").await.expect("defer");

        h.clock.advance(Duration::minutes(30));
        let report = scheduler(&h).tick().await;

        assert_eq!(report.stale.map(|r| r.applied), Some(1));
        assert_eq!(report.sweep.map(|r| r.expired), Some(1));
        assert_eq!(h.store.ticket(raffle.id, 1).expect("ticket").status, TicketStatus::Available);
        assert_eq!(h.store.ticket(raffle.id, 2).expect("ticket").status, TicketStatus::Sold);
        assert_eq!(
            h.store.purchase(abandoned.purchase_id).expect("purchase").status,
            PurchaseStatus::Expired
        );
    }

    /// Test 2: a failing datastore is reported, not fatal.
    #[tokio::test]
    async fn test_tick_survives_outage() {
        let h = Harness::new();
        h.store.set_offline(true);

        let report = scheduler(&h).tick().await;

        assert_eq!(report, TickReport::default());
    }

    /// Test 3: the loop stops on shutdown.
    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = Harness::new();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(scheduler(&h).run(rx));

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        tx.send(true).expect("send");

        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("scheduler stops")
            .expect("task joins");
    }
}
