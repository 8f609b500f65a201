//! Circuit breaker for remote dependencies.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: one probe call decides recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: first call after the cooldown deadline (becomes the probe)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (fresh cooldown)
//! ```
//!
//! Only the probe's outcome moves a breaker out of Half-Open. Calls admitted
//! while it was still Closed may finish later; their outcomes only update the
//! failure counters.
//!
//! Breakers are keyed by dependency name and live in a `DashMap`, so each
//! read-modify-write happens under that entry's lock.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Calls rejected until the cooldown deadline
    Open,
    /// A single probe call is in flight
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Outcome of asking a breaker for permission to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal call
    Allowed,
    /// This call is the half-open probe
    Probe,
    /// Call must not be made
    Rejected { retry_in: Duration },
}

/// Breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive recorded failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl BreakerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Circuit breaker for one dependency
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    open_until: Option<Instant>,
    probe_in_flight: bool,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            open_until: None,
            probe_in_flight: false,
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Ask to make a call at `now`
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let deadline = self.open_until.unwrap_or(now);
                if now >= deadline {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_in: deadline - now,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Admission::Rejected {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    self.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Whether a call admitted earlier must stop retrying
    ///
    /// Anything but Closed: recovery is decided by the probe alone.
    pub fn is_rejecting(&self) -> bool {
        self.state != CircuitState::Closed
    }

    /// Record a success; `probe` marks the outcome of the half-open probe
    pub fn record_success(&mut self, probe: bool) {
        match self.state {
            CircuitState::Closed => self.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => self.reset(),
            // Late outcome of a call admitted before the breaker opened
            _ => {}
        }
    }

    /// Record a failure; returns true if this failure opened the breaker
    pub fn record_failure(&mut self, now: Instant, probe: bool) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::HalfOpen if probe => {
                self.trip(now);
                true
            }
            CircuitState::Closed if self.consecutive_failures >= self.threshold => {
                self.trip(now);
                true
            }
            _ => false,
        }
    }

    /// Force the breaker closed
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.open_until = None;
        self.probe_in_flight = false;
    }

    /// Give up a probe slot without an outcome (the probe call was dropped)
    pub fn abandon_probe(&mut self, now: Instant) {
        if self.state == CircuitState::HalfOpen && self.probe_in_flight {
            self.state = CircuitState::Open;
            self.open_until = Some(now);
            self.probe_in_flight = false;
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.open_until = Some(now + self.cooldown);
        self.probe_in_flight = false;
    }

    fn snapshot(&self, dependency: &str, now: Instant) -> BreakerSnapshot {
        BreakerSnapshot {
            dependency: dependency.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure_ms_ago: self
                .last_failure_at
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            cooldown_remaining_ms: match self.state {
                CircuitState::Open => self
                    .open_until
                    .map(|d| d.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            },
        }
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_ms_ago: Option<u64>,
    pub cooldown_remaining_ms: Option<u64>,
}

/// Registry of circuit breakers for all dependencies.
pub struct BreakerRegistry {
    breakers: DashMap<String, CircuitBreaker>,
    settings: BreakerSettings,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breakers: DashMap::new(),
            settings,
        }
    }

    fn fresh(&self) -> CircuitBreaker {
        CircuitBreaker::new(self.settings.failure_threshold, self.settings.cooldown())
    }

    pub fn try_acquire(&self, dependency: &str) -> Admission {
        let now = Instant::now();
        let mut entry = self
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| self.fresh());
        let admission = entry.try_acquire(now);
        if admission == Admission::Probe {
            info!("Circuit for '{}' half-open, sending probe", dependency);
        }
        admission
    }

    pub fn is_rejecting(&self, dependency: &str) -> bool {
        self.breakers
            .get(dependency)
            .map(|b| b.is_rejecting())
            .unwrap_or(false)
    }

    pub fn record_success(&self, dependency: &str, probe: bool) {
        if let Some(mut breaker) = self.breakers.get_mut(dependency) {
            if probe && breaker.state() == CircuitState::HalfOpen {
                info!("Circuit for '{}' closed after successful probe", dependency);
            }
            breaker.record_success(probe);
        }
    }

    pub fn record_failure(&self, dependency: &str, probe: bool) {
        let now = Instant::now();
        let mut entry = self
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| self.fresh());
        if entry.record_failure(now, probe) {
            warn!(
                "Circuit for '{}' opened after {} consecutive failures, cooling down {:?}",
                dependency,
                entry.consecutive_failures(),
                self.settings.cooldown()
            );
        }
    }

    pub fn abandon_probe(&self, dependency: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(dependency) {
            breaker.abandon_probe(Instant::now());
        }
    }

    pub fn state(&self, dependency: &str) -> CircuitState {
        self.breakers
            .get(dependency)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot(entry.key(), now))
            .collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }

    /// Force every breaker closed
    pub fn reset_all(&self) {
        for mut entry in self.breakers.iter_mut() {
            entry.value_mut().reset();
        }
    }
}
