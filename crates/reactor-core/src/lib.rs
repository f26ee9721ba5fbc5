#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
//! Reactive execution core: `Mono`/`Flux` streams over an `Outcome`
//! algebra, with a circuit breaker, client-side load balancer, and saga
//! coordinator as the resilience layer.
//!
//! Everything in this crate composes through [`outcome::Outcome`] and
//! [`error::CoreError`] — a stage never panics on the unhappy path, it
//! returns one.

pub mod balancer;
pub mod circuit;
pub mod error;
pub mod events;
pub mod flux;
pub mod mono;
pub mod outcome;
pub mod prelude;
pub mod saga;
pub mod scheduler;
pub mod window;

pub use balancer::{
    CallContext, HealthChecker, HealthStatus, InstanceSnapshot, LoadBalancer, LoadBalancerConfig,
    ServiceInstance, Strategy,
};
pub use circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerRegistry,
    CircuitState,
};
pub use error::{ConfigError, CoreError, ErrorKind, Result};
pub use events::{Event, EventBus, Listener};
pub use flux::{Flux, OverflowStrategy, ParallelFlux};
pub use mono::{Mono, MonoSubscription};
pub use outcome::Outcome;
pub use saga::{SagaContext, SagaCoordinator, SagaFailure, SagaStep, SagaValue};
pub use scheduler::{CancellationHandle, Cooperative, Immediate, ParallelPool, Scheduler};
pub use window::{SampleOutcome, SlidingWindow, WindowSnapshot};
