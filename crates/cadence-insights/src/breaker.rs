//! Circuit breaker for the AI provider.
//!
//! Counts consecutive failures; at the threshold the circuit opens for a
//! fixed cooldown and every call short-circuits to the fallback. The state
//! is per-provider-instance and advisory; a provider may be recreated per
//! job without correctness loss.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

#[derive(Debug)]
pub struct Breaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    /// Whether a call may proceed. An elapsed cooldown closes the circuit
    /// and allows the probe through.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        match state.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                info!("AI circuit breaker cooldown elapsed, probing provider again");
                state.open_until = None;
                state.consecutive_failures = 0;
                true
            }
            None => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    /// Record one failure; returns true when this failure tripped the
    /// circuit open.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.config.failure_threshold
            && state.open_until.is_none()
        {
            state.open_until = Some(Instant::now() + self.config.cooldown);
            warn!(
                failures = state.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "AI circuit breaker TRIPPED"
            );
            return true;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }
}

impl Default for Breaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> Breaker {
        Breaker::new(BreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_millis(50),
        })
    }

    #[test]
    fn trips_at_threshold_and_short_circuits() {
        let breaker = fast_breaker();
        for i in 1..=4 {
            assert!(!breaker.record_failure(), "not yet tripped at {i}");
            assert!(breaker.allow());
        }
        assert!(breaker.record_failure(), "fifth failure trips");
        assert!(!breaker.allow(), "open circuit rejects immediately");
    }

    #[test]
    fn cooldown_reopens_the_path() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow(), "probe allowed after cooldown");
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn success_resets_the_streak() {
        let breaker = fast_breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        for _ in 0..4 {
            assert!(!breaker.record_failure());
        }
    }
}
