//! Retry + circuit breaker wrapper for remote calls

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::breaker::{Admission, BreakerRegistry, BreakerSettings, BreakerSnapshot, CircuitState};
use super::policy::RetryPolicy;

/// Result of a wrapped call plus how many times the operation ran
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    /// Zero when the breaker rejected the call
    pub attempts: u32,
}

/// Call counters and breaker states
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceStats {
    pub total_calls: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected_by_breaker: u64,
    pub retries: u64,
    pub breakers: Vec<BreakerSnapshot>,
}

#[derive(Default)]
struct Counters {
    total_calls: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    retries: AtomicU64,
}

/// Releases a half-open probe slot if the call is dropped before finishing
struct ProbeGuard<'a> {
    breakers: &'a BreakerRegistry,
    dependency: &'a str,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breakers.abandon_probe(self.dependency);
        }
    }
}

/// Executes remote calls under a retry policy and per-dependency breakers
///
/// Shared across all jobs of an engine; breakers live as long as the
/// executor.
pub struct ResilientExecutor {
    policy: RetryPolicy,
    breakers: BreakerRegistry,
    counters: Counters,
}

impl ResilientExecutor {
    pub fn new(policy: RetryPolicy, breaker: BreakerSettings) -> Self {
        Self {
            policy,
            breakers: BreakerRegistry::new(breaker),
            counters: Counters::default(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` with retries, guarded by the breaker for `dependency`
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        dependency: &str,
        operation: &str,
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_tracked(dependency, operation, op).await.result
    }

    /// Same as `execute_with_retry`, also reporting the attempt count
    pub async fn execute_tracked<T, F, Fut>(
        &self,
        dependency: &str,
        operation: &str,
        op: F,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(dependency, operation, None, op).await
    }

    /// Same as `execute_tracked`, but no new attempt starts once `cancel` fires
    ///
    /// An attempt already running is allowed to finish. A cancelled call
    /// returns the last error it saw.
    pub async fn execute_tracked_until<T, F, Fut>(
        &self,
        dependency: &str,
        operation: &str,
        cancel: &CancellationToken,
        op: F,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(dependency, operation, Some(cancel), op).await
    }

    async fn run<T, F, Fut>(
        &self,
        dependency: &str,
        operation: &str,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);

        let admission = self.breakers.try_acquire(dependency);
        if let Admission::Rejected { retry_in } = admission {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(
                "{} rejected: circuit for '{}' open (retry in {:?})",
                operation, dependency, retry_in
            );
            return Attempted {
                result: Err(circuit_open(dependency)),
                attempts: 0,
            };
        }

        // A half-open probe gets exactly one attempt
        let is_probe = admission == Admission::Probe;
        let max_attempts = if is_probe { 1 } else { self.policy.max_attempts };
        let mut guard = ProbeGuard {
            breakers: &self.breakers,
            dependency,
            armed: is_probe,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    self.breakers.record_success(dependency, is_probe);
                    guard.disarm();
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) if !self.policy.is_retryable(&e) => {
                    warn!("{} failed with terminal error [{}]: {}", operation, e.code(), e);
                    return self.fail(dependency, is_probe, &mut guard, e, attempt);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        "{} failed after {} attempts [{}]: {}",
                        operation,
                        attempt,
                        e.code(),
                        e
                    );
                    return self.fail(dependency, is_probe, &mut guard, e, attempt);
                }
                Err(e) => {
                    if cancel.is_some_and(|c| c.is_cancelled()) {
                        info!(
                            "{} cancelled after attempt {} [{}]: {}",
                            operation,
                            attempt,
                            e.code(),
                            e
                        );
                        return self.fail(dependency, is_probe, &mut guard, e, attempt);
                    }

                    let delay = self.policy.jittered_delay(attempt);
                    warn!(
                        "{} attempt {}/{} failed [{}]: {}; retrying in {:?}",
                        operation,
                        attempt,
                        max_attempts,
                        e.code(),
                        e,
                        delay
                    );

                    let cancelled = match cancel {
                        Some(token) => tokio::select! {
                            _ = token.cancelled() => true,
                            _ = tokio::time::sleep(delay) => false,
                        },
                        None => {
                            tokio::time::sleep(delay).await;
                            false
                        }
                    };
                    if cancelled {
                        info!("{} cancelled during backoff after attempt {}", operation, attempt);
                        return self.fail(dependency, is_probe, &mut guard, e, attempt);
                    }
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);

                    // Other callers may have opened the breaker meanwhile
                    if self.breakers.is_rejecting(dependency) {
                        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        debug!("{} abandoned: circuit for '{}' opened", operation, dependency);
                        return Attempted {
                            result: Err(circuit_open(dependency)),
                            attempts: attempt,
                        };
                    }
                }
            }
        }
    }

    fn fail<T>(
        &self,
        dependency: &str,
        probe: bool,
        guard: &mut ProbeGuard<'_>,
        error: Error,
        attempts: u32,
    ) -> Attempted<T> {
        self.breakers.record_failure(dependency, probe);
        guard.disarm();
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        Attempted {
            result: Err(error),
            attempts,
        }
    }

    pub fn breaker_state(&self, dependency: &str) -> CircuitState {
        self.breakers.state(dependency)
    }

    pub fn stats(&self) -> ResilienceStats {
        ResilienceStats {
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected_by_breaker: self.counters.rejected.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            breakers: self.breakers.snapshots(),
        }
    }

    pub fn reset_all_circuit_breakers(&self) {
        self.breakers.reset_all();
    }
}

fn circuit_open(dependency: &str) -> Error {
    Error::CircuitOpen {
        dependency: dependency.to_string(),
    }
}
