//! Three-state guard (CLOSED/OPEN/HALF_OPEN) wrapping any async call,
//! backed by a [`SlidingWindow`] of recent outcomes. While OPEN, the
//! guarded function is never invoked.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};

use crate::error::{CoreError, ErrorKind};
use crate::events::{Event, EventBus, Listener};
use crate::mono::Mono;
use crate::outcome::Outcome;
use crate::window::{SampleOutcome, SlidingWindow, WindowSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_rate_threshold: f64,
    pub minimum_requests: u32,
    pub reset_timeout: Duration,
    pub half_open_max_requests: u32,
    pub call_timeout: Duration,
    pub excluded_error_kinds: HashSet<ErrorKind>,
    pub window_capacity: usize,
    pub window_horizon: Duration,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }
}

/// Builder mirroring the `with_x` chains the rest of this corpus uses for
/// configuration: every method returns `Self`, and validation is deferred
/// to [`Self::build`].
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    failure_rate_threshold: f64,
    minimum_requests: u32,
    reset_timeout: Duration,
    half_open_max_requests: u32,
    call_timeout: Duration,
    excluded_error_kinds: HashSet<ErrorKind>,
    window_capacity: usize,
    window_horizon: Duration,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            minimum_requests: 10,
            reset_timeout: Duration::from_secs(30),
            half_open_max_requests: 3,
            call_timeout: Duration::from_secs(5),
            excluded_error_kinds: HashSet::new(),
            window_capacity: 100,
            window_horizon: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn with_failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn with_failure_rate_threshold(mut self, rate: f64) -> Self {
        self.failure_rate_threshold = rate;
        self
    }

    pub fn with_minimum_requests(mut self, n: u32) -> Self {
        self.minimum_requests = n;
        self
    }

    pub fn with_reset_timeout(mut self, d: Duration) -> Self {
        self.reset_timeout = d;
        self
    }

    pub fn with_half_open_max_requests(mut self, n: u32) -> Self {
        self.half_open_max_requests = n;
        self
    }

    pub fn with_call_timeout(mut self, d: Duration) -> Self {
        self.call_timeout = d;
        self
    }

    pub fn with_excluded_error_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.excluded_error_kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_window(mut self, capacity: usize, horizon: Duration) -> Self {
        self.window_capacity = capacity;
        self.window_horizon = horizon;
        self
    }

    pub fn build(self) -> crate::error::Result<CircuitBreakerConfig> {
        if self.failure_threshold == 0 {
            return Err(crate::error::ConfigError::MustBePositive {
                field: "failure_threshold",
                value: 0,
            });
        }
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return Err(crate::error::ConfigError::NotAUnitInterval {
                field: "failure_rate_threshold",
                value: self.failure_rate_threshold,
            });
        }
        if self.half_open_max_requests == 0 {
            return Err(crate::error::ConfigError::MustBePositive {
                field: "half_open_max_requests",
                value: 0,
            });
        }
        Ok(CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_rate_threshold: self.failure_rate_threshold,
            minimum_requests: self.minimum_requests,
            reset_timeout: self.reset_timeout,
            half_open_max_requests: self.half_open_max_requests,
            call_timeout: self.call_timeout,
            excluded_error_kinds: self.excluded_error_kinds,
            window_capacity: self.window_capacity,
            window_horizon: self.window_horizon,
        })
    }
}

struct Inner {
    state: CircuitState,
    last_transition: Instant,
    half_open_outcomes: Vec<bool>,
    window: SlidingWindow,
}

/// A named three-state guard. Shared via `Arc<CircuitBreaker>` across every
/// call site that should trip the same breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    half_open_permits: Arc<Semaphore>,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<Self> {
        let half_open_permits = Arc::new(Semaphore::new(config.half_open_max_requests as usize));
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                last_transition: Instant::now(),
                half_open_outcomes: Vec::new(),
                window: SlidingWindow::new(config.window_capacity, config.window_horizon),
            }),
            half_open_permits,
            config,
            events: EventBus::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register_listener(&mut self, listener: Arc<dyn Listener>) {
        self.events.register(listener);
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> WindowSnapshot {
        self.inner.lock().await.window.snapshot()
    }

    /// Guards an async call with this breaker. The returned `Mono` is lazy:
    /// state is only checked, and `f` only invoked, once subscribed.
    pub fn call<T, E, F, Fut>(self: &Arc<Self>, f: F) -> Mono<T, CoreError<E>>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let breaker = self.clone();
        Mono::from_async_result(move || {
            let breaker = breaker.clone();
            let fut = f();
            async move { breaker.guarded_call(fut).await }
        })
    }

    async fn guarded_call<T, E, Fut>(self: Arc<Self>, fut: Fut) -> Outcome<T, CoreError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let admission = self.admit().await;
        let permit = match admission {
            Admission::Rejected => {
                self.inner.lock().await.window.record(SampleOutcome::Rejected, Duration::ZERO);
                return Outcome::Failure(CoreError::circuit_open(self.name.clone()));
            }
            Admission::Closed => None,
            Admission::HalfOpen(permit) => Some(permit),
        };

        let started = Instant::now();
        let outcome: Outcome<T, CoreError<E>> = match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(inner) => inner.map_error(CoreError::Domain),
            Err(_) => Outcome::Failure(CoreError::timeout(self.config.call_timeout)),
        };
        let latency = started.elapsed();

        self.record_and_transition(&outcome, latency).await;
        drop(permit);

        outcome
    }

    async fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Admission::Closed,
            CircuitState::Open => {
                if inner.last_transition.elapsed() >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.last_transition = Instant::now();
                    inner.half_open_outcomes.clear();
                    drop(inner);
                    self.try_acquire_half_open().await
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                drop(inner);
                self.try_acquire_half_open().await
            }
        }
    }

    async fn try_acquire_half_open(&self) -> Admission {
        match self.half_open_permits.clone().try_acquire_owned() {
            Ok(permit) => Admission::HalfOpen(permit),
            Err(_) => Admission::Rejected,
        }
    }

    /// Records `outcome` in the window and drives the state machine, unless
    /// the failure's kind is in `excluded_error_kinds` — those calls are not
    /// counted as failures (or successes): the window simply ignores them.
    async fn record_and_transition<T, E>(&self, outcome: &Outcome<T, CoreError<E>>, latency: Duration) {
        let failed = match outcome {
            Outcome::Success(_) => false,
            Outcome::Failure(error) => {
                if self.config.excluded_error_kinds.contains(&error.kind_tag()) {
                    return;
                }
                true
            }
        };

        let mut inner = self.inner.lock().await;
        let sample = if failed {
            SampleOutcome::Failure
        } else {
            SampleOutcome::Success
        };
        inner.window.record(sample, latency);

        match inner.state {
            CircuitState::Closed => {
                let snapshot = inner.window.snapshot();
                let should_open = snapshot.failure >= self.config.failure_threshold as usize
                    || (snapshot.total >= self.config.minimum_requests as usize
                        && snapshot.failure_rate >= self.config.failure_rate_threshold);
                if should_open {
                    let from = inner.state;
                    inner.state = CircuitState::Open;
                    inner.last_transition = Instant::now();
                    let snapshot = inner.window.snapshot();
                    self.events.emit(Event::CircuitStateChanged {
                        name: self.name.clone(),
                        from,
                        to: CircuitState::Open,
                        at: inner.last_transition,
                        snapshot,
                    });
                    tracing::warn!(breaker = %self.name, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_outcomes.push(!failed);
                if failed {
                    let from = inner.state;
                    inner.state = CircuitState::Open;
                    inner.last_transition = Instant::now();
                    let snapshot = inner.window.snapshot();
                    self.events.emit(Event::CircuitStateChanged {
                        name: self.name.clone(),
                        from,
                        to: CircuitState::Open,
                        at: inner.last_transition,
                        snapshot,
                    });
                    tracing::warn!(breaker = %self.name, "half-open probe failed, reopening");
                } else if inner.half_open_outcomes.len() >= self.config.half_open_max_requests as usize
                    && inner.half_open_outcomes.iter().all(|ok| *ok)
                {
                    let from = inner.state;
                    inner.state = CircuitState::Closed;
                    inner.last_transition = Instant::now();
                    inner.window = SlidingWindow::new(self.config.window_capacity, self.config.window_horizon);
                    let snapshot = inner.window.snapshot();
                    self.events.emit(Event::CircuitStateChanged {
                        name: self.name.clone(),
                        from,
                        to: CircuitState::Closed,
                        at: inner.last_transition,
                        snapshot,
                    });
                    tracing::info!(breaker = %self.name, "circuit breaker closed after successful probes");
                }
            }
            CircuitState::Open => {}
        }
    }
}

enum Admission {
    Closed,
    HalfOpen(tokio::sync::OwnedSemaphorePermit),
    Rejected,
}

/// Process-wide keyed store of named circuit breakers, for introspection
/// only. Never auto-initialized: a caller must construct one explicitly and
/// hand it to whatever wiring needs cross-call-site lookup, per the
/// redesign note against global auto-initializing registries.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with(
        &self,
        name: impl Into<String>,
        make_config: impl FnOnce() -> CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let name = name.into();
        self.breakers
            .entry(name.clone())
            .or_insert_with(|| CircuitBreaker::new(name, make_config()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(failure_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .with_failure_threshold(failure_threshold)
            .with_minimum_requests(1)
            .with_reset_timeout(Duration::from_millis(50))
            .with_half_open_max_requests(1)
            .with_call_timeout(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_rejects_without_invoking() {
        let breaker = CircuitBreaker::new("svc", test_config(3));
        let invocations = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let invocations = invocations.clone();
            let result = breaker
                .call(move || {
                    let invocations = invocations.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Outcome::<i32, String>::Failure("boom".to_string())
                    }
                })
                .resolve()
                .await;
            assert!(result.is_failure());
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_recovers_to_closed_on_success() {
        let breaker = CircuitBreaker::new("svc", test_config(1));

        let _ = breaker
            .call(|| async { Outcome::<i32, String>::Failure("boom".to_string()) })
            .resolve()
            .await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let result = breaker
            .call(|| async { Outcome::<i32, String>::Success(1) })
            .resolve()
            .await;
        assert!(result.is_success());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
