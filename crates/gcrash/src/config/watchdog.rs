//! Watchdog configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Watchdog timing configuration.
///
/// Periods are expressed in time-units (`time_unit_ms`, one second by default)
/// because that is what the scripting side passes to `startwatchdog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Smallest accepted period. Smaller requests use `default_period`.
    pub min_period: u64,

    /// Period used when the requested one is below `min_period`.
    pub default_period: u64,

    /// Heartbeats are scheduled every `period / pulse_divisor`.
    pub pulse_divisor: u32,

    /// Length of one time-unit in milliseconds.
    pub time_unit_ms: u64,

    /// Install the interpreter hook on the first missed deadline instead of
    /// dumping straight away on the second.
    pub escalation_hook: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            min_period: 10,
            default_period: 30,
            pulse_divisor: 3,
            time_unit_ms: 1000,
            escalation_hook: true,
        }
    }
}

impl WatchdogConfig {
    /// Length of one time-unit.
    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms.max(1))
    }

    /// Period in time-units after clamping a requested value.
    ///
    /// Out-of-range requests are not an error; they fall back to the default.
    pub fn effective_period_units(&self, requested: i64) -> u64 {
        match u64::try_from(requested) {
            Ok(units) if units >= self.min_period => units,
            _ => self.default_period,
        }
    }

    /// Period after clamping a requested value.
    pub fn effective_period(&self, requested: i64) -> Duration {
        let units = self.effective_period_units(requested);
        self.time_unit()
            .saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }

    /// Interval at which the host should deliver heartbeats for `period`.
    pub fn pulse_interval(&self, period: Duration) -> Duration {
        period / self.pulse_divisor.max(1)
    }
}
