use std::time::Duration;

use serde::{Deserialize, Serialize};

/// RFC 3261 timer base values (Appendix A) and the timers derived from them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// RTT estimate
    pub t1: Duration,
    /// Maximum retransmit interval for non-INVITE requests and INVITE responses
    pub t2: Duration,
    /// Maximum duration a message will remain in the network
    pub t4: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
        }
    }
}

impl TimerSettings {
    /// Settings with a custom T1; T2 and T4 keep their defaults
    pub fn with_t1(t1: Duration) -> Self {
        Self {
            t1,
            ..Self::default()
        }
    }

    /// Timer A initial interval
    pub fn timer_a(&self) -> Duration {
        self.t1
    }

    /// INVITE transaction timeout
    pub fn timer_b(&self) -> Duration {
        self.t1 * 64
    }

    /// Wait time for response retransmits; at least 32s on unreliable transports
    pub fn timer_d(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            (self.t1 * 64).max(Duration::from_secs(32))
        }
    }

    /// Timer E initial interval
    pub fn timer_e(&self) -> Duration {
        self.t1
    }

    /// Non-INVITE transaction timeout
    pub fn timer_f(&self) -> Duration {
        self.t1 * 64
    }

    /// Timer G initial interval
    pub fn timer_g(&self) -> Duration {
        self.t1
    }

    /// Wait time for ACK receipt
    pub fn timer_h(&self) -> Duration {
        self.t1 * 64
    }

    /// Wait time for ACK retransmits
    pub fn timer_i(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Wait time for non-INVITE request retransmits
    pub fn timer_j(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t1 * 64
        }
    }

    /// Wait time for response retransmits
    pub fn timer_k(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Doubles `current`, capped at T2
    pub fn backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.t2)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.t1.is_zero() {
            return Err("T1 must be greater than 0".to_string());
        }
        if self.t2 < self.t1 {
            return Err("T2 must not be smaller than T1".to_string());
        }
        if self.t4.is_zero() {
            return Err("T4 must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc_defaults() {
        let settings = TimerSettings::default();
        assert_eq!(settings.timer_b(), Duration::from_secs(32));
        assert_eq!(settings.timer_d(false), Duration::from_secs(32));
        assert_eq!(settings.timer_d(true), Duration::ZERO);
        assert_eq!(settings.timer_k(false), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_caps_at_t2() {
        let settings = TimerSettings::default();
        let mut interval = settings.t1;
        for _ in 0..10 {
            interval = settings.backoff(interval);
        }
        assert_eq!(interval, settings.t2);
    }

    #[test]
    fn test_timer_d_floor_with_small_t1() {
        let settings = TimerSettings::with_t1(Duration::from_millis(10));
        assert_eq!(settings.timer_d(false), Duration::from_secs(32));
        assert_eq!(settings.timer_b(), Duration::from_millis(640));
    }
}
