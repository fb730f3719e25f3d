use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::time::Duration;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Stops calling an ads platform that keeps failing.
///
///   Closed   --[threshold consecutive transient failures]--> Open
///   Open     --[cooldown elapsed]---------------------------> HalfOpen
///   HalfOpen --[probe succeeds]-----------------------------> Closed
///   HalfOpen --[probe fails]--------------------------------> Open
///
/// Client errors (4xx) say nothing about platform health and are not counted.
pub struct CircuitBreaker {
    state: AtomicU8,
    failures: AtomicU32,
    threshold: u32,
    cooldown_ms: i64,
    opened_at_ms: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            cooldown_ms: cooldown.as_millis().min(i64::MAX as u128) as i64,
            opened_at_ms: AtomicI64::new(0),
        }
    }

    /// Current state. An open circuit whose cooldown has elapsed moves to
    /// HalfOpen here so exactly one caller wins the transition.
    pub fn state(&self) -> CircuitState {
        self.state_at(now_ms())
    }

    fn state_at(&self, now_ms: i64) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            CLOSED => CircuitState::Closed,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => {
                let opened = self.opened_at_ms.load(Ordering::Acquire);
                if now_ms.saturating_sub(opened) < self.cooldown_ms {
                    return CircuitState::Open;
                }
                match self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => CircuitState::HalfOpen,
                    Err(CLOSED) => CircuitState::Closed,
                    Err(OPEN) => CircuitState::Open,
                    Err(_) => CircuitState::HalfOpen,
                }
            }
        }
    }

    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.state.store(CLOSED, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        match self.state.load(Ordering::Acquire) {
            HALF_OPEN => self.open(),
            CLOSED if failures >= self.threshold => {
                tracing::warn!(failures, "Ads platform circuit opened");
                self.open();
            }
            _ => {}
        }
    }

    fn open(&self) {
        self.opened_at_ms.store(now_ms(), Ordering::Release);
        self.state.store(OPEN, Ordering::Release);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_until_threshold() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow_request());
        assert_eq!(cb.consecutive_failures(), 2);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 1);
    }

    #[test]
    fn open_moves_to_half_open_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure();
        let opened = cb.opened_at_ms.load(Ordering::Acquire);
        assert_eq!(cb.state_at(opened + 59_000), CircuitState::Open);
        assert_eq!(cb.state_at(opened + 60_000), CircuitState::HalfOpen);
    }

    #[test]
    fn zero_cooldown_probes_immediately() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
    }

    #[test]
    fn failed_probe_reopens_and_successful_probe_closes() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state.load(Ordering::Acquire), OPEN);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }
}
