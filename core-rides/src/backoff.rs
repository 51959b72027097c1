//! Reconnect backoff policy

use std::time::Duration;

use core_runtime::TrackingSettings;

/// What to do after a failed or dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule attempt number `attempt` (1-based) after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// `attempts` reconnects were already scheduled; give up.
    Exhausted { attempts: u32 },
}

/// Exponential backoff: `base_delay * 2^attempts`, capped at `max_delay`,
/// with at most `max_attempts` scheduled reconnects between successful opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&TrackingSettings::default())
    }
}

impl From<&TrackingSettings> for ReconnectPolicy {
    fn from(settings: &TrackingSettings) -> Self {
        Self {
            base_delay: settings.reconnect_base_delay,
            max_delay: settings.reconnect_max_delay,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the reconnect that follows `attempts` earlier ones.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decide the next step given the attempts made since the last open.
    pub fn next(&self, attempts: u32) -> ReconnectDecision {
        if attempts >= self.max_attempts {
            return ReconnectDecision::Exhausted { attempts };
        }
        ReconnectDecision::Retry {
            attempt: attempts + 1,
            delay: self.delay_for(attempts),
        }
    }
}
