//! Integration tests exercising module combinations that no single
//! module's unit tests cover: a breaker guarding balancer-routed calls, a
//! saga whose steps themselves go through a breaker, and Flux's bounded
//! backpressure surfacing as an explicit error rather than a silent drop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reactor_core::balancer::{CallContext, LoadBalancer, LoadBalancerConfig, ServiceInstance, Strategy};
use reactor_core::saga::{SagaContext, SagaCoordinator, SagaStep};
use reactor_core::{CircuitBreaker, CircuitBreakerConfig, Flux, Outcome, OverflowStrategy};

#[tokio::test]
async fn breaker_guards_calls_routed_through_balancer() {
    let lb = LoadBalancer::new(
        "payments",
        LoadBalancerConfig {
            strategy: Strategy::RoundRobin,
            ..Default::default()
        },
    );
    let primary = ServiceInstance::new("primary", "10.0.0.1", 8080, 1);
    primary.mark_healthy();
    lb.add_instance(primary);

    let breaker = CircuitBreaker::new(
        "payments",
        CircuitBreakerConfig::builder()
            .with_failure_threshold(2)
            .with_minimum_requests(1)
            .build()
            .unwrap(),
    );

    let failures = Arc::new(AtomicU32::new(0));
    for _ in 0..2 {
        let lb = lb.clone();
        let failures = failures.clone();
        let result = breaker
            .call(move || {
                let lb = lb.clone();
                let failures = failures.clone();
                async move {
                    lb.call(CallContext::default(), move |_instance| {
                        let failures = failures.clone();
                        async move {
                            failures.fetch_add(1, Ordering::SeqCst);
                            Outcome::<i32, String>::Failure("downstream_unavailable".to_string())
                        }
                    })
                    .resolve()
                    .await
                    .map_error(|e| e.to_string())
                }
            })
            .resolve()
            .await;
        assert!(result.is_failure());
    }

    assert_eq!(breaker.state().await, reactor_core::CircuitState::Open);

    // The breaker is open: a third call must not reach the balancer at all.
    let lb_for_third = lb.clone();
    let result = breaker
        .call(move || {
            let lb = lb_for_third.clone();
            async move {
                lb.call(CallContext::default(), |_instance| async {
                    Outcome::<i32, String>::Success(1)
                })
                .resolve()
                .await
                .map_error(|e| e.to_string())
            }
        })
        .resolve()
        .await;
    assert!(result.is_failure());
    assert_eq!(failures.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn saga_step_failure_triggers_compensation_after_balancer_backed_step() {
    let lb = LoadBalancer::new("inventory", LoadBalancerConfig::default());
    let instance = ServiceInstance::new("warehouse-1", "10.0.0.2", 9090, 1);
    instance.mark_healthy();
    lb.add_instance(instance);

    let reserved = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let reserved_undo = reserved.clone();

    let lb_forward = lb.clone();
    let steps = vec![
        SagaStep::new("reserve_inventory", move |mut ctx: SagaContext| {
            let lb = lb_forward.clone();
            let reserved = reserved.clone();
            async move {
                let outcome = lb
                    .call(CallContext::default(), move |_instance| {
                        let reserved = reserved.clone();
                        async move {
                            reserved.store(true, Ordering::SeqCst);
                            Outcome::<&'static str, String>::Success("reserved")
                        }
                    })
                    .resolve()
                    .await;
                match outcome {
                    Outcome::Success(marker) => {
                        ctx.insert("reservation", marker.to_string());
                        Outcome::Success(ctx)
                    }
                    Outcome::Failure(e) => Outcome::Failure(e.to_string()),
                }
            }
        })
        .with_compensation(move |_ctx| {
            let reserved_undo = reserved_undo.clone();
            async move {
                reserved_undo.store(false, Ordering::SeqCst);
                Outcome::Success(())
            }
        }),
        SagaStep::new("charge_payment", |_ctx: SagaContext| async move {
            Outcome::<SagaContext, String>::Failure("card_declined".to_string())
        }),
    ];

    let result = SagaCoordinator::new(steps)
        .run(SagaContext::default())
        .to_result()
        .await;

    let failure = match result {
        Outcome::Failure(reactor_core::CoreError::Domain(failure)) => failure,
        other => panic!("expected a domain saga failure, got {other:?}"),
    };
    assert_eq!(failure.failed_step, "charge_payment");
    assert!(!reserved.load(Ordering::SeqCst), "compensation should have released the reservation");
}

#[tokio::test]
async fn bounded_flux_surfaces_overflow_instead_of_dropping_silently() {
    let produced = Flux::<i32, String>::from_iterable(0..1000).bounded(1, OverflowStrategy::Error);

    let items = produced.collect_list().resolve().await;
    match items {
        Outcome::Success(_) => panic!("expected a backpressure overflow before completion"),
        Outcome::Failure(reactor_core::CoreError::BackpressureOverflow { capacity }) => {
            assert_eq!(capacity, 1);
        }
        Outcome::Failure(other) => panic!("unexpected failure: {other}"),
    }
}

#[tokio::test]
async fn concat_preserves_order_across_finite_lists() {
    let a = Flux::<i32, String>::from_iterable([10, 20, 30]);
    let b = Flux::<i32, String>::from_iterable([40, 50]);
    let result = Flux::concat(vec![a, b]).collect_list().to_result().await;
    assert_eq!(result, Outcome::Success(vec![10, 20, 30, 40, 50]));
}
