//! Tick configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`TickScheduler`](crate::TickScheduler).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl TickConfig {
    /// Create a config with the given rate and no tick limit.
    #[must_use]
    pub fn new(tick_rate: f64) -> Self {
        Self {
            tick_rate,
            max_ticks: 0,
        }
    }

    /// Stop after `max_ticks` ticks.
    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Time budget of one tick.
    ///
    /// A non-positive or non-finite rate yields [`Duration::ZERO`], i.e. the
    /// loop runs unthrottled. A rate too small for its period to fit a
    /// [`Duration`] yields [`Duration::MAX`].
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        if self.tick_rate.is_finite() && self.tick_rate > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.tick_rate).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// Returns `true` once `ticks` reaches the configured limit.
    #[must_use]
    pub fn is_done(&self, ticks: u64) -> bool {
        self.max_ticks > 0 && ticks >= self.max_ticks
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}
