//! Error taxonomy for the reactive core.
//!
//! [`CoreError<E>`] is the single failure envelope every operator composes
//! through: the structural kinds a pipeline stage can fail with (timeout,
//! cancellation, circuit open, ...) plus one variant, `Domain`, carrying the
//! caller's own error payload. Keeping these in one enum means `retry`,
//! `timeout`, breaker and load-balancer calls all fail into the same type
//! instead of nesting `Either<LbError, Either<CircuitError, E>>` at every
//! call site.

use std::fmt;
use std::time::Duration;

/// Failure envelope for a single pipeline stage.
///
/// `E` is the caller's own domain error type; every other variant is raised
/// internally by the core (timeouts, cancellation, breaker/balancer
/// rejection, backpressure overflow, empty-Mono completion, or a panic
/// caught at an operator boundary).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError<E> {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("subscription was cancelled")]
    Cancelled,

    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    #[error("no healthy instance available for service '{service}'")]
    NoHealthyInstance { service: String },

    #[error("backpressure buffer of capacity {capacity} overflowed")]
    BackpressureOverflow { capacity: usize },

    #[error("terminal operation required a value but the Mono completed empty")]
    EmptyMono,

    #[error("user function panicked: {message}")]
    WrappedPanic {
        message: String,
        source_tag: &'static str,
    },

    #[error(transparent)]
    Domain(#[from] E),
}

impl<E> CoreError<E> {
    pub fn timeout(d: Duration) -> Self {
        Self::Timeout(d)
    }

    pub fn circuit_open(name: impl Into<String>) -> Self {
        Self::CircuitOpen { name: name.into() }
    }

    pub fn no_healthy_instance(service: impl Into<String>) -> Self {
        Self::NoHealthyInstance {
            service: service.into(),
        }
    }

    pub fn backpressure_overflow(capacity: usize) -> Self {
        Self::BackpressureOverflow { capacity }
    }

    pub fn wrapped_panic(message: impl Into<String>, source_tag: &'static str) -> Self {
        Self::WrappedPanic {
            message: message.into(),
            source_tag,
        }
    }

    /// Returns `true` for kinds that `excluded_error_kinds` can reasonably
    /// name (the structural kinds, not the caller's own `Domain` payload).
    pub fn kind_tag(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::NoHealthyInstance { .. } => ErrorKind::NoHealthyInstance,
            Self::BackpressureOverflow { .. } => ErrorKind::BackpressureOverflow,
            Self::EmptyMono => ErrorKind::EmptyMono,
            Self::WrappedPanic { .. } => ErrorKind::WrappedPanic,
            Self::Domain(_) => ErrorKind::Domain,
        }
    }
}

/// Stable tag for an error kind, independent of the payload it carries.
///
/// Used by `excluded_error_kinds` in [`crate::circuit::CircuitBreakerConfig`]
/// so a breaker can exempt e.g. `Cancelled` from counting as a failure
/// without matching on the full error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    Timeout,
    Cancelled,
    CircuitOpen,
    NoHealthyInstance,
    BackpressureOverflow,
    EmptyMono,
    WrappedPanic,
    Domain,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::CircuitOpen => "circuit_open",
            Self::NoHealthyInstance => "no_healthy_instance",
            Self::BackpressureOverflow => "backpressure_overflow",
            Self::EmptyMono => "empty_mono",
            Self::WrappedPanic => "wrapped_panic",
            Self::Domain => "domain",
        };
        f.write_str(s)
    }
}

/// Construction-time failures: invalid configuration, not a stream failure.
///
/// Kept separate from [`CoreError`] because building a `CircuitBreakerConfig`
/// or `LoadBalancerConfig` is not part of the `Outcome` stream algebra — it
/// happens once, synchronously, before any subscription exists.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero, got {value}")]
    MustBePositive { field: &'static str, value: i64 },

    #[error("{field} must be in range 0.0..=1.0, got {value}")]
    NotAUnitInterval { field: &'static str, value: f64 },

    #[error("{what} must not be empty")]
    EmptyCollection { what: &'static str },

    #[error("{field} ({a:?}) must not exceed {other_field} ({b:?})")]
    OutOfOrder {
        field: &'static str,
        a: Duration,
        other_field: &'static str,
        b: Duration,
    },
}

/// Framework-wide alias mirroring the split between the `Outcome` stream
/// algebra and ordinary fallible construction.
pub type Result<T, E = ConfigError> = core::result::Result<T, E>;
