//! Submission schedulers — decide *when* queued commands are applied.
//!
//! A root hands its [`SubmitEntities`] callback to the scheduler it was built
//! with. The scheduler never looks at commands; it only owns timing.
//!
//! - [`ManualScheduler`] submits on demand, which is what tests want.
//! - [`TickScheduler`] submits once per logical tick, driven by a blocking
//!   fixed-timestep loop or a `tokio` interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::commands::SubmissionReport;
use crate::config::TickConfig;
use crate::error::{EcsError, EcsResult};
use crate::root::SubmitEntities;

/// Strategy deciding when a root applies its queued commands.
pub trait EntitySubmissionScheduler {
    /// Take ownership of the root's "apply all queued commands now"
    /// callback. Called once, while the root is being constructed.
    fn schedule(&self, submit: SubmitEntities);
}

/// Submits only when [`ManualScheduler::submit_entities`] is called.
///
/// Clones share the registered callback.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    submit: Arc<Mutex<Option<SubmitEntities>>>,
}

impl ManualScheduler {
    /// Create a scheduler with no root attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once a root has registered its callback.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.submit.lock().is_some()
    }

    /// Apply everything queued on the attached root.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotScheduled`] if no root is attached,
    /// [`EcsError::RootDropped`] if it has been dropped.
    ///
    /// # Panics
    ///
    /// If a submission of the same root is already running.
    pub fn submit_entities(&self) -> EcsResult<SubmissionReport> {
        // Clone out so the lock is not held while engines run.
        let submit = self.submit.lock().clone().ok_or(EcsError::NotScheduled)?;
        submit.invoke()
    }
}

impl EntitySubmissionScheduler for ManualScheduler {
    fn schedule(&self, submit: SubmitEntities) {
        *self.submit.lock() = Some(submit);
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

/// Submits once per tick of an external fixed-timestep clock.
pub struct TickScheduler {
    /// Current tick counter.
    tick_id: AtomicU64,
    /// Tick configuration.
    config: TickConfig,
    submit: Mutex<Option<SubmitEntities>>,
}

impl TickScheduler {
    /// Create a tick scheduler with the given configuration.
    #[must_use]
    pub fn new(config: TickConfig) -> Self {
        Self {
            tick_id: AtomicU64::new(0),
            config,
            submit: Mutex::new(None),
        }
    }

    /// Returns the number of ticks submitted so far.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id.load(Ordering::Acquire)
    }

    /// Returns the tick configuration.
    #[must_use]
    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    /// Advance the tick counter and submit once.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotScheduled`] if no root is attached,
    /// [`EcsError::RootDropped`] if it has been dropped.
    pub fn tick(&self) -> EcsResult<SubmissionReport> {
        let submit = self.submit.lock().clone().ok_or(EcsError::NotScheduled)?;
        let tick_id = self.tick_id.fetch_add(1, Ordering::AcqRel) + 1;
        let report = submit.invoke()?;
        debug!(
            tick_id,
            commands = report.commands(),
            faults = report.faults.len(),
            "tick submitted"
        );
        Ok(report)
    }

    /// Blocking fixed-timestep loop.
    ///
    /// Each tick calls `update` with the upcoming tick id, then submits.
    /// Runs until the configured tick limit is reached, or forever. Returns
    /// the number of ticks run.
    ///
    /// # Errors
    ///
    /// Stops at the first failing [`Self::tick`].
    pub fn run<F>(&self, mut update: F) -> EcsResult<u64>
    where
        F: FnMut(u64),
    {
        let tick_duration = self.config.tick_duration();
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        loop {
            let start = Instant::now();

            update(self.tick_id() + 1);
            self.tick()?;

            tick_count += 1;
            if self.config.is_done(tick_count) {
                info!(ticks = tick_count, "tick loop complete");
                return Ok(tick_count);
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            } else {
                self.report_overrun(elapsed, tick_duration);
            }
        }
    }

    /// Async variant of [`Self::run`] paced by a `tokio` interval.
    ///
    /// Missed ticks are skipped rather than bursted. A zero tick duration
    /// yields to the runtime between ticks instead of sleeping.
    ///
    /// # Errors
    ///
    /// Stops at the first failing [`Self::tick`].
    pub async fn run_async<F>(&self, mut update: F) -> EcsResult<u64>
    where
        F: FnMut(u64),
    {
        let tick_duration = self.config.tick_duration();
        let mut interval = (!tick_duration.is_zero()).then(|| {
            let mut interval = tokio::time::interval(tick_duration);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting async tick loop"
        );

        loop {
            match interval.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => tokio::task::yield_now().await,
            }
            let start = Instant::now();

            update(self.tick_id() + 1);
            self.tick()?;

            tick_count += 1;
            if self.config.is_done(tick_count) {
                info!(ticks = tick_count, "tick loop complete");
                return Ok(tick_count);
            }

            let elapsed = start.elapsed();
            if elapsed > tick_duration {
                self.report_overrun(elapsed, tick_duration);
            }
        }
    }

    fn report_overrun(&self, elapsed: Duration, budget: Duration) {
        if budget.is_zero() {
            return;
        }
        warn!(
            tick_id = self.tick_id(),
            elapsed_ms = elapsed.as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            "tick exceeded time budget"
        );
    }
}

impl EntitySubmissionScheduler for TickScheduler {
    fn schedule(&self, submit: SubmitEntities) {
        *self.submit.lock() = Some(submit);
    }
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("tick_id", &self.tick_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
