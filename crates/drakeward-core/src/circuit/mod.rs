//! Circuit Breaker: per-provider health tracking that gates retries.
//!
//! Generalizes the teacher's per-call retry/backoff bookkeeping
//! (`orchestrator::orchestrator_retry`) from a counter scoped to one call
//! into a shared state machine scoped to one provider, consulted by every
//! caller of that provider.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-provider circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls proceed normally.
    Closed,
    /// Calls are rejected outright until the cooldown elapses.
    Open,
    /// A single probe call is admitted; its outcome decides `Closed` or `Open`.
    HalfOpen,
}

/// Configuration for one provider's breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures within the window required to trip to `Open`.
    pub failure_threshold: u32,
    /// How long the breaker stays `Open` before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    config: BreakerConfig,
}

impl Breaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            config,
        }
    }

    /// Advance `Open -> HalfOpen` once the cooldown has elapsed. Must be
    /// called before every admission check.
    fn refresh(&mut self) {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= self.config.cooldown {
                    self.state = CircuitState::HalfOpen;
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
    }

    fn record_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Rejection reason returned by [`CircuitBreaker::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderUnavailable;

/// Tracks one [`Breaker`] per provider name, shared process-wide.
pub struct CircuitBreaker {
    default_config: BreakerConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a call to `provider` may proceed.
    ///
    /// Returns `Ok(())` when `Closed` or when `HalfOpen` admits this call as
    /// its single probe; returns [`ProviderUnavailable`] when `Open`.
    pub fn admit(&self, provider: &str) -> Result<(), ProviderUnavailable> {
        let mut breakers = self.breakers.lock().expect("circuit breaker lock poisoned");
        let breaker = breakers
            .entry(provider.to_string())
            .or_insert_with(|| Breaker::new(self.default_config));

        breaker.refresh();

        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => Err(ProviderUnavailable),
        }
    }

    /// Record the outcome of a call admitted via [`Self::admit`].
    pub fn record(&self, provider: &str, succeeded: bool) {
        let mut breakers = self.breakers.lock().expect("circuit breaker lock poisoned");
        let breaker = breakers
            .entry(provider.to_string())
            .or_insert_with(|| Breaker::new(self.default_config));

        if succeeded {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    /// Current state for `provider`, for diagnostics/tests. Does not advance
    /// the `Open -> HalfOpen` cooldown transition.
    pub fn state_of(&self, provider: &str) -> CircuitState {
        let breakers = self.breakers.lock().expect("circuit breaker lock poisoned");
        breakers
            .get(provider)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(20),
        }
    }

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::new(test_config());
        assert!(breaker.admit("anthropic").is_ok());
        assert_eq!(breaker.state_of("anthropic"), CircuitState::Closed);
    }

    #[test]
    fn trips_open_after_threshold_failures() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            assert!(breaker.admit("anthropic").is_ok());
            breaker.record("anthropic", false);
        }
        assert_eq!(breaker.state_of("anthropic"), CircuitState::Open);
        assert!(breaker.admit("anthropic").is_err());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.record("anthropic", false);
        breaker.record("anthropic", false);
        breaker.record("anthropic", true);
        breaker.record("anthropic", false);
        breaker.record("anthropic", false);
        assert_eq!(breaker.state_of("anthropic"), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_cooldown_admits_probe() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            breaker.record("anthropic", false);
        }
        assert_eq!(breaker.state_of("anthropic"), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.admit("anthropic").is_ok());
    }

    #[test]
    fn failed_probe_reopens_circuit() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            breaker.record("anthropic", false);
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.admit("anthropic").is_ok());
        breaker.record("anthropic", false);
        assert_eq!(breaker.state_of("anthropic"), CircuitState::Open);
    }

    #[test]
    fn successful_probe_closes_circuit() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            breaker.record("anthropic", false);
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.admit("anthropic").is_ok());
        breaker.record("anthropic", true);
        assert_eq!(breaker.state_of("anthropic"), CircuitState::Closed);
    }

    #[test]
    fn providers_are_independent() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            breaker.record("anthropic", false);
        }
        assert_eq!(breaker.state_of("anthropic"), CircuitState::Open);
        assert_eq!(breaker.state_of("openai"), CircuitState::Closed);
    }
}
