//! Wall-clock deadlines for operations.

use tcs_common::time::Timestamp;

/// Deadline of one operation; `deadline == None` never expires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyTimer {
    pub started: Timestamp,
    pub deadline: Option<Timestamp>,
}

impl SafetyTimer {
    /// A timer that never expires.
    pub fn unbounded(now: Timestamp) -> Self {
        Self {
            started: now,
            deadline: None,
        }
    }

    #[inline]
    pub fn elapsed(&self, now: Timestamp) -> f64 {
        now.secs_since(self.started)
    }
}

/// Start a timer; `timeout` in seconds, `None` for unbounded operations.
pub fn timer_started(now: Timestamp, timeout: Option<f64>) -> SafetyTimer {
    SafetyTimer {
        started: now,
        deadline: timeout.map(|secs| now.add_secs(secs)),
    }
}

#[inline]
pub fn timer_expired(timer: &SafetyTimer, now: Timestamp) -> bool {
    timer.deadline.is_some_and(|deadline| now >= deadline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_at_deadline() {
        let t0 = Timestamp::from_unix_secs(1000.0);
        let timer = timer_started(t0, Some(5.0));
        assert!(!timer_expired(&timer, t0.add_secs(4.9)));
        assert!(timer_expired(&timer, t0.add_secs(5.0)));
        assert!((timer.elapsed(t0.add_secs(2.0)) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unbounded_never_expires() {
        let t0 = Timestamp::from_unix_secs(0.0);
        assert!(!timer_expired(&timer_started(t0, None), t0.add_secs(1e9)));
        assert!(SafetyTimer::unbounded(t0).deadline.is_none());
    }
}
