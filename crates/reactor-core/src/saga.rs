//! Saga orchestration: a sequence of forward steps each paired with an
//! optional compensation, run in order and rolled back in reverse on the
//! first failure.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::CoreError;
use crate::mono::Mono;
use crate::outcome::Outcome;

/// Append-only bag of the successful results of every step run so far,
/// keyed by step name. Later steps read earlier steps' output through
/// this, never through a shared mutable closure capture.
#[derive(Clone, Debug, Default)]
pub struct SagaContext {
    values: HashMap<String, SagaValue>,
}

/// Type-erased step output, downcast by the caller via [`SagaContext::get`].
#[derive(Clone, Debug)]
pub struct SagaValue(Arc<dyn std::any::Any + Send + Sync>);

impl SagaValue {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl SagaContext {
    pub fn insert<T: Send + Sync + 'static>(&mut self, step: impl Into<String>, value: T) {
        self.values.insert(step.into(), SagaValue::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self, step: &str) -> Option<&T> {
        self.values.get(step).and_then(|v| v.0.downcast_ref::<T>())
    }
}

type ForwardFn<E> =
    Arc<dyn Fn(SagaContext) -> Pin<Box<dyn Future<Output = Outcome<SagaContext, E>> + Send>> + Send + Sync>;
type CompensateFn<E> =
    Arc<dyn Fn(SagaContext) -> Pin<Box<dyn Future<Output = Outcome<(), E>> + Send>> + Send + Sync>;

/// One unit of saga work: a forward action that folds its result into the
/// context, and an optional compensation run during rollback.
pub struct SagaStep<E> {
    pub name: String,
    forward: ForwardFn<E>,
    compensation: Option<CompensateFn<E>>,
}

impl<E> SagaStep<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<SagaContext, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            forward: Arc::new(move |ctx| Box::pin(forward(ctx))),
            compensation: None,
        }
    }

    pub fn with_compensation<F, Fut>(mut self, compensation: F) -> Self
    where
        F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<(), E>> + Send + 'static,
    {
        self.compensation = Some(Arc::new(move |ctx| Box::pin(compensation(ctx))));
        self
    }
}

/// Outcome of a rolled-back saga: which step's forward action failed, its
/// error, and whether every compensation that ran for the prior steps
/// succeeded. A compensation failure is recorded, not silently dropped —
/// but it never masks the original forward failure.
#[derive(Clone, Debug)]
pub struct SagaFailure<E> {
    pub failed_step: String,
    pub error: E,
    pub compensation_errors: Vec<(String, E)>,
}

/// Runs a fixed, ordered list of [`SagaStep`]s. On the first forward
/// failure, compensations for every step that already completed are run in
/// reverse (LIFO) order.
pub struct SagaCoordinator<E> {
    steps: Vec<SagaStep<E>>,
}

impl<E> SagaCoordinator<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(steps: Vec<SagaStep<E>>) -> Self {
        Self { steps }
    }

    /// Runs the saga to completion. Lazy: nothing executes until the
    /// returned `Mono` is awaited or subscribed to.
    pub fn run(self, initial: SagaContext) -> Mono<SagaContext, SagaFailure<E>> {
        let steps: Vec<Arc<SagaStep<E>>> = self.steps.into_iter().map(Arc::new).collect();
        Mono::from_async_result(move || {
            let steps = steps.clone();
            let initial = initial.clone();
            async move {
                let mut ctx = initial;
                let mut completed: Vec<Arc<SagaStep<E>>> = Vec::new();

                for step in &steps {
                    match (step.forward)(ctx.clone()).await {
                        Outcome::Success(next_ctx) => {
                            ctx = next_ctx;
                            completed.push(step.clone());
                        }
                        Outcome::Failure(error) => {
                            let mut compensation_errors = Vec::new();
                            for done in completed.iter().rev() {
                                if let Some(compensate) = &done.compensation {
                                    if let Outcome::Failure(comp_err) = compensate(ctx.clone()).await {
                                        compensation_errors.push((done.name.clone(), comp_err));
                                    }
                                }
                            }
                            return Outcome::Failure(SagaFailure {
                                failed_step: step.name.clone(),
                                error,
                                compensation_errors,
                            });
                        }
                    }
                }

                Outcome::Success(ctx)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct BookingError(&'static str);

    #[tokio::test]
    async fn successful_saga_threads_context_through_every_step() {
        let steps = vec![
            SagaStep::new("reserve_flight", |mut ctx: SagaContext| async move {
                ctx.insert("flight", "confirmed".to_string());
                Outcome::Success(ctx)
            }),
            SagaStep::new("reserve_hotel", |mut ctx: SagaContext| async move {
                assert_eq!(ctx.get::<String>("flight"), Some(&"confirmed".to_string()));
                ctx.insert("hotel", "confirmed".to_string());
                Outcome::Success(ctx)
            }),
        ];

        let result = SagaCoordinator::new(steps).run(SagaContext::default()).to_result().await;
        let ctx = result.unwrap();
        assert_eq!(ctx.get::<String>("hotel"), Some(&"confirmed".to_string()));
    }

    #[tokio::test]
    async fn failure_rolls_back_completed_steps_in_reverse() {
        let rollback_order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        let order_a = rollback_order.clone();
        let order_b = rollback_order.clone();

        let steps = vec![
            SagaStep::new("reserve_flight", |ctx: SagaContext| async move {
                Outcome::Success(ctx)
            })
            .with_compensation(move |_ctx| {
                let order_a = order_a.clone();
                async move {
                    order_a.lock().unwrap().push("cancel_flight");
                    Outcome::Success(())
                }
            }),
            SagaStep::new("reserve_hotel", |ctx: SagaContext| async move {
                Outcome::Success(ctx)
            })
            .with_compensation(move |_ctx| {
                let order_b = order_b.clone();
                async move {
                    order_b.lock().unwrap().push("cancel_hotel");
                    Outcome::Success(())
                }
            }),
            SagaStep::new("charge_card", |_ctx: SagaContext| async move {
                Outcome::Failure(BookingError("card_declined"))
            }),
        ];

        let result = SagaCoordinator::new(steps).run(SagaContext::default()).to_result().await;
        let failure = match result {
            Outcome::Failure(CoreError::Domain(failure)) => failure,
            other => panic!("expected a domain saga failure, got {other:?}"),
        };
        assert_eq!(failure.failed_step, "charge_card");
        assert_eq!(failure.error, BookingError("card_declined"));
        assert_eq!(
            *rollback_order.lock().unwrap(),
            vec!["cancel_hotel", "cancel_flight"]
        );
    }

    #[tokio::test]
    async fn compensation_failure_is_reported_but_does_not_mask_original_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let steps = vec![
            SagaStep::new("step_a", |ctx: SagaContext| async move { Outcome::Success(ctx) })
                .with_compensation(move |_ctx| {
                    let calls_clone = calls_clone.clone();
                    async move {
                        calls_clone.fetch_add(1, Ordering::Relaxed);
                        Outcome::Failure(BookingError("compensation_unreachable"))
                    }
                }),
            SagaStep::new("step_b", |_ctx: SagaContext| async move {
                Outcome::Failure(BookingError("step_b_failed"))
            }),
        ];

        let result = SagaCoordinator::new(steps).run(SagaContext::default()).to_result().await;
        let failure = match result {
            Outcome::Failure(CoreError::Domain(failure)) => failure,
            other => panic!("expected a domain saga failure, got {other:?}"),
        };
        assert_eq!(failure.error, BookingError("step_b_failed"));
        assert_eq!(failure.compensation_errors.len(), 1);
        assert_eq!(failure.compensation_errors[0].0, "step_a");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
