use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};

use feedpulse_common::error::AppResult;
use feedpulse_engine::{MaintenanceSummary, ScheduleHandler};

/// Interval between dispatch ticks. Matches the slot window width.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// The scheduling operations driven by the runner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Schedule: Send + Sync {
    async fn dispatch_refresh_rate(&self, refresh_rate_seconds: u32) -> AppResult<usize>;

    async fn run_maintenance_operations(&self) -> AppResult<MaintenanceSummary>;
}

#[async_trait]
impl Schedule for ScheduleHandler {
    async fn dispatch_refresh_rate(&self, refresh_rate_seconds: u32) -> AppResult<usize> {
        ScheduleHandler::dispatch_refresh_rate(self, refresh_rate_seconds).await
    }

    async fn run_maintenance_operations(&self) -> AppResult<MaintenanceSummary> {
        ScheduleHandler::run_maintenance_operations(self).await
    }
}

/// Drives dispatch ticks and periodic maintenance.
pub struct SchedulerRunner {
    schedule: Arc<dyn Schedule>,
    refresh_rates: BTreeSet<u32>,
    tick_interval: Duration,
    maintenance_interval: Duration,
}

impl SchedulerRunner {
    /// `refresh_rates` are dispatched until the first successful maintenance
    /// pass replaces them.
    pub fn new(
        schedule: Arc<dyn Schedule>,
        refresh_rates: BTreeSet<u32>,
        maintenance_interval: Duration,
    ) -> Self {
        Self {
            schedule,
            refresh_rates,
            tick_interval: TICK_INTERVAL,
            maintenance_interval,
        }
    }

    pub fn refresh_rates(&self) -> &BTreeSet<u32> {
        &self.refresh_rates
    }

    /// Run maintenance once, then tick until the task is cancelled.
    pub async fn run(&mut self) {
        self.run_maintenance().await;

        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut maintenance = tokio::time::interval_at(
            Instant::now() + self.maintenance_interval,
            self.maintenance_interval,
        );
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            tick_interval_secs = self.tick_interval.as_secs(),
            maintenance_interval_secs = self.maintenance_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.dispatch_all().await;
                }
                _ = maintenance.tick() => {
                    self.run_maintenance().await;
                }
            }
        }
    }

    /// Dispatch every scheduled rate. A failing rate does not stop the others.
    /// Returns the number of items dispatched.
    pub async fn dispatch_all(&self) -> usize {
        let mut dispatched = 0;

        for &rate in &self.refresh_rates {
            match self.schedule.dispatch_refresh_rate(rate).await {
                Ok(count) => {
                    if count > 0 {
                        tracing::debug!(rate_seconds = rate, count, "Dispatched due feeds");
                    }
                    dispatched += count;
                }
                Err(e) => {
                    tracing::error!(rate_seconds = rate, error = %e, "Failed to dispatch refresh rate");
                }
            }
        }

        dispatched
    }

    /// Run one maintenance pass. On failure the previous rates stay scheduled.
    pub async fn run_maintenance(&mut self) {
        match self.schedule.run_maintenance_operations().await {
            Ok(summary) => {
                self.refresh_rates = summary.refresh_rates;
            }
            Err(e) => {
                tracing::error!(error = %e, "Maintenance operations failed");
            }
        }
    }
}
