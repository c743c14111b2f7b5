//! Learning scheduler
//!
//! Holds a single timer and runs at most one cycle at a time. The window for
//! each cycle is derived from the persisted `last_run_at`, which only moves
//! forward when the cycle reaches a determinate outcome.

pub mod clock;
pub mod state;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use state::{SchedulerState, StateStore};

use crate::config::{Config, LearningConfig};
use crate::learning::cycle::{CycleReport, LearningCycle};
use crate::types::AnalysisWindow;

/// Parse a cron expression (seconds precision)
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::try_from(expr).map_err(|e| anyhow!("Invalid cron expression '{}': {}", expr, e))
}

pub struct LearningScheduler {
    cycle: LearningCycle,
    clock: Arc<dyn Clock>,
    state: StateStore,
    schedule: Schedule,
    learning: LearningConfig,
}

impl LearningScheduler {
    pub fn new(cycle: LearningCycle, config: &Config, clock: Arc<dyn Clock>, data_dir: &Path) -> Result<Self> {
        Ok(Self {
            cycle,
            clock,
            state: StateStore::new(data_dir),
            schedule: parse_schedule(&config.schedule.cron)?,
            learning: config.learning.clone(),
        })
    }

    pub fn cycle(&self) -> &LearningCycle {
        &self.cycle
    }

    pub fn state(&self) -> SchedulerState {
        self.state.load()
    }

    /// Window a cycle starting at `now` would analyze
    pub fn window_at(&self, now: DateTime<Utc>) -> AnalysisWindow {
        AnalysisWindow::derive(
            now,
            self.state.load().last_run_at,
            self.learning.min_lookback_hours,
            self.learning.max_lookback_hours,
        )
    }

    /// First cron instant strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Whether a scheduled cycle may start at `now`
    ///
    /// With no recorded eligibility (first start) the scheduler runs at once.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.state.load().next_eligible_run {
            Some(next) => now >= next,
            None => true,
        }
    }

    /// Run a cycle if the schedule allows it
    pub async fn run_if_due(&self) -> Result<Option<CycleReport>> {
        let now = self.clock.now();
        if !self.is_eligible(now) {
            return Ok(None);
        }
        self.execute(now).await.map(Some)
    }

    /// Run a cycle now, ignoring eligibility
    pub async fn trigger_now(&self) -> Result<CycleReport> {
        let now = self.clock.now();
        info!("Manual learning cycle triggered");
        self.execute(now).await
    }

    async fn execute(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut state = self.state.load();
        let window = AnalysisWindow::derive(
            now,
            state.last_run_at,
            self.learning.min_lookback_hours,
            self.learning.max_lookback_hours,
        );
        let result = self.cycle.run(window, state.last_run_at, now).await;

        state.last_attempt_at = Some(now);
        state.next_eligible_run = self.next_after(now);

        match &result {
            Ok(report) => {
                state.last_status = Some(report.outcome.status().to_string());
                if report.outcome.is_determinate() {
                    state.last_run_at = Some(now);
                } else {
                    warn!(
                        outcome = report.outcome.status(),
                        window_start = %window.start,
                        "Cycle outcome indeterminate; window will be retried"
                    );
                }
            }
            Err(e) => {
                state.last_status = Some("error".to_string());
                error!(error = %e, "Learning cycle could not record its outcome");
            }
        }

        self.state.save(&state)?;
        result
    }

    /// Run scheduled cycles until Ctrl-C
    pub async fn run_forever(&self) -> Result<()> {
        info!(cron = %self.schedule, "Learning scheduler started");

        loop {
            let now = self.clock.now();
            if self.is_eligible(now) {
                match self.execute(now).await {
                    Ok(report) => info!(outcome = %report.outcome, "Scheduled cycle finished"),
                    Err(e) => error!(error = %e, "Scheduled cycle failed"),
                }
            }

            let now = self.clock.now();
            let next = self
                .state
                .load()
                .next_eligible_run
                .or_else(|| self.next_after(now))
                .ok_or_else(|| anyhow!("Cron schedule has no upcoming runs"))?;
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "Waiting for next eligible run");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Learning scheduler shutting down");
                    return Ok(());
                }
            }
        }
    }
}
