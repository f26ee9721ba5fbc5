//! Common imports for downstream crates: `use reactor_core::prelude::*;`.

pub use crate::balancer::{
    CallContext, HealthChecker, HealthStatus, LoadBalancer, LoadBalancerConfig, ServiceInstance,
    Strategy,
};
pub use crate::circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use crate::error::{ConfigError, CoreError, ErrorKind};
pub use crate::events::{Event, EventBus, Listener};
pub use crate::flux::{Flux, OverflowStrategy};
pub use crate::mono::{Mono, MonoSubscription};
pub use crate::outcome::Outcome;
pub use crate::saga::{SagaContext, SagaCoordinator, SagaStep};
pub use crate::scheduler::{CancellationHandle, Scheduler};
pub use crate::window::SlidingWindow;
