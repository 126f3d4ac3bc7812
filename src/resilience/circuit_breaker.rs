use std::sync::Mutex;
use std::time::{Duration, Instant};

/// `{isOpen, failureCount, successCount, lastFailureTime, lastAttemptTime,
/// consecutiveSuccesses, resetAt}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub phase: BreakerPhase,
    pub failure_count: u32,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<Instant>,
    pub last_attempt_time: Option<Instant>,
    pub reset_at: Option<Instant>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            phase: BreakerPhase::Closed,
            failure_count: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            last_attempt_time: None,
            reset_at: None,
        }
    }
}

/// One instance per resilience scope (cache write, cache read, each storage
/// source). State transitions: `closed -> open` at `failure_threshold`,
/// `open -> half-open` at `reset_at`, `half-open -> closed` after
/// `success_threshold` consecutive successes, `half-open -> open` on any
/// failure.
pub struct CircuitBreaker {
    state: Mutex<CircuitBreakerState>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitBreakerState::default()),
            failure_threshold,
            success_threshold,
            reset_timeout,
        }
    }

    /// Whether a call should be attempted right now. Transitions `open` to
    /// `half-open` in place when `reset_at` has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.last_attempt_time = Some(Instant::now());
        match state.phase {
            BreakerPhase::Closed => true,
            BreakerPhase::HalfOpen => true,
            BreakerPhase::Open => {
                if let Some(reset_at) = state.reset_at {
                    if Instant::now() >= reset_at {
                        state.phase = BreakerPhase::HalfOpen;
                        state.consecutive_successes = 0;
                        return true;
                    }
                }
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state.lock().unwrap().phase, BreakerPhase::Open)
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        match state.phase {
            BreakerPhase::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.success_threshold {
                    state.phase = BreakerPhase::Closed;
                    state.failure_count = 0;
                    state.consecutive_successes = 0;
                    state.reset_at = None;
                }
            }
            BreakerPhase::Closed => {
                state.failure_count = 0;
            }
            BreakerPhase::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_failure_time = Some(Instant::now());
        match state.phase {
            BreakerPhase::HalfOpen => {
                state.phase = BreakerPhase::Open;
                state.consecutive_successes = 0;
                state.reset_at = Some(Instant::now() + self.reset_timeout);
            }
            BreakerPhase::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.failure_threshold {
                    state.phase = BreakerPhase::Open;
                    state.reset_at = Some(Instant::now() + self.reset_timeout);
                }
            }
            BreakerPhase::Open => {}
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.state.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new(3, 2, Duration::from_millis(10));
        assert!(cb.allow_request());
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = CircuitBreaker::new(1, 2, Duration::from_millis(1));
        cb.record_failure();
        assert!(cb.is_open());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.allow_request()); // transitions to half-open
        cb.record_success();
        assert!(cb.is_open() == false || cb.snapshot().phase == BreakerPhase::HalfOpen);
        cb.record_success();
        assert!(!cb.is_open());
    }

    #[test]
    fn half_open_reopens_on_failure() {
        let cb = CircuitBreaker::new(1, 3, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.allow_request());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn closed_request_allowed_by_default() {
        let cb = CircuitBreaker::new(5, 2, Duration::from_secs(30));
        assert!(cb.allow_request());
        assert!(!cb.is_open());
    }
}
