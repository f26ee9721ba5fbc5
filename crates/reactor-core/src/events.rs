//! The one structural hook external collaborators (logging, metrics) attach
//! to. The core never persists these; it only emits them and, in parallel,
//! logs the same transitions through `tracing` so a `tracing_subscriber`
//! layer gets them for free even with no [`Listener`] registered.

use std::sync::Arc;
use std::time::Instant;

use crate::circuit::CircuitState;
use crate::window::WindowSnapshot;

#[derive(Clone, Debug)]
pub enum Event {
    CircuitStateChanged {
        name: String,
        from: CircuitState,
        to: CircuitState,
        at: Instant,
        snapshot: WindowSnapshot,
    },
    InstanceHealthChanged {
        service: String,
        instance_id: String,
        healthy: bool,
    },
    BackpressureOverflow {
        capacity: usize,
    },
    RetryAttempted {
        attempt: u32,
        max_attempts: u32,
    },
}

/// `(event) -> ()`. Implemented for any matching closure so callers can pass
/// a plain `Fn(&Event)` without writing out the trait.
pub trait Listener: Send + Sync + 'static {
    fn on_event(&self, event: &Event);
}

impl<F> Listener for F
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// A fan-out list of listeners, shared cheaply via `Arc` across the
/// subsystems (circuit breaker, load balancer, flux backpressure) that
/// raise events.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn emit(&self, event: Event) {
        tracing::debug!(?event, "reactor-core event");
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_count", &self.listeners.len())
            .finish()
    }
}
