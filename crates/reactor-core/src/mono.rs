//! A lazy producer of at most one outcome. Nothing in a `Mono` chain runs
//! until it is subscribed; each subscription is independent (the stream is
//! cold). See [`MonoSubscription`] for the async-result caching contract
//! that distinguishes "await this subscription again" from "build a new
//! subscription from the same description".

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::CoreError;
use crate::outcome::Outcome;

/// Internal terminal signal a `Mono` source can settle on: a value, a
/// domain error, or an empty completion (distinct from `Outcome`, which has
/// no empty variant — `filter` and `empty()` need somewhere to go).
#[derive(Clone, Debug)]
enum Signal<T, E> {
    Value(T),
    Error(E),
    Empty,
}

type Source<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Signal<T, E>> + Send + Sync>;

/// A deferred computation yielding 0 or 1 result. Cloning a `Mono` clones
/// the *description*, not a running computation — each `.subscribe()` (or
/// terminal call) starts a fresh evaluation unless you hold onto one
/// [`MonoSubscription`] and call its accessors repeatedly.
pub struct Mono<T, E> {
    source: Source<T, E>,
}

impl<T, E> Clone for Mono<T, E> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T, E> Mono<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn from_source(source: Source<T, E>) -> Self {
        Self { source }
    }

    pub fn just(value: T) -> Self {
        Self::from_source(Arc::new(move || {
            let value = value.clone();
            async move { Signal::Value(value) }.boxed()
        }))
    }

    pub fn empty() -> Self {
        Self::from_source(Arc::new(|| async { Signal::Empty }.boxed()))
    }

    pub fn error(error: E) -> Self {
        Self::from_source(Arc::new(move || {
            let error = error.clone();
            async move { Signal::Error(error) }.boxed()
        }))
    }

    /// Wraps a synchronous callable; a panic inside `f` is caught here and
    /// surfaced as a `WrappedPanic` failure rather than unwinding into the
    /// subscriber, the same policy `outcome::catch_unwind_as_outcome` applies
    /// to plain closures.
    pub fn from_callable<F>(f: F) -> Mono<T, CoreError<E>>
    where
        F: Fn() -> Outcome<T, E> + Send + Sync + std::panic::RefUnwindSafe + 'static,
    {
        let f = Arc::new(f);
        Mono::from_source(Arc::new(move || {
            let f = f.clone();
            async move {
                match std::panic::catch_unwind(move || f()) {
                    Ok(Outcome::Success(v)) => Signal::Value(v),
                    Ok(Outcome::Failure(e)) => Signal::Error(CoreError::Domain(e)),
                    Err(payload) => {
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "non-string panic payload".to_string());
                        Signal::Error(CoreError::wrapped_panic(message, "Mono::from_callable"))
                    }
                }
            }
            .boxed()
        }))
    }

    /// Builds a fresh inner Mono from `supplier` on every subscription,
    /// rather than sharing one fixed description.
    pub fn defer<F>(supplier: F) -> Self
    where
        F: Fn() -> Mono<T, E> + Send + Sync + 'static,
    {
        let supplier = Arc::new(supplier);
        Self::from_source(Arc::new(move || {
            let inner = supplier();
            async move { (inner.source)().await }.boxed()
        }))
    }

    /// Lifts an arbitrary async computation, running it to a `Signal`
    /// without the caching semantics of [`Self::subscribe`] — every
    /// `to_result()` call reruns `fut`, matching `defer`'s per-subscription
    /// freshness.
    pub fn from_async_result<F, Fut>(fut_factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let fut_factory = Arc::new(fut_factory);
        Self::from_source(Arc::new(move || {
            let fut = fut_factory();
            async move {
                match fut.await {
                    Outcome::Success(v) => Signal::Value(v),
                    Outcome::Failure(e) => Signal::Error(e),
                }
            }
            .boxed()
        }))
    }

    pub fn map<U>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Mono<U, E>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.source;
        let f = Arc::new(f);
        Mono::from_source(Arc::new(move || {
            let source = source.clone();
            let f = f.clone();
            async move {
                match source().await {
                    Signal::Value(v) => Signal::Value(f(v)),
                    Signal::Error(e) => Signal::Error(e),
                    Signal::Empty => Signal::Empty,
                }
            }
            .boxed()
        }))
    }

    pub fn bind<U>(self, f: impl Fn(T) -> Mono<U, E> + Send + Sync + 'static) -> Mono<U, E>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.source;
        let f = Arc::new(f);
        Mono::from_source(Arc::new(move || {
            let source = source.clone();
            let f = f.clone();
            async move {
                match source().await {
                    Signal::Value(v) => (f(v).source)().await,
                    Signal::Error(e) => Signal::Error(e),
                    Signal::Empty => Signal::Empty,
                }
            }
            .boxed()
        }))
    }

    /// If `pred` is false, the Mono completes empty instead of erroring.
    pub fn filter(self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> Mono<T, E> {
        let source = self.source;
        let pred = Arc::new(pred);
        Mono::from_source(Arc::new(move || {
            let source = source.clone();
            let pred = pred.clone();
            async move {
                match source().await {
                    Signal::Value(v) => {
                        if pred(&v) {
                            Signal::Value(v)
                        } else {
                            Signal::Empty
                        }
                    }
                    Signal::Error(e) => Signal::Error(e),
                    Signal::Empty => Signal::Empty,
                }
            }
            .boxed()
        }))
    }

    pub fn map_error<F>(self, f: impl Fn(E) -> F + Send + Sync + 'static) -> Mono<T, F>
    where
        F: Clone + Send + Sync + 'static,
    {
        let source = self.source;
        let f = Arc::new(f);
        Mono::from_source(Arc::new(move || {
            let source = source.clone();
            let f = f.clone();
            async move {
                match source().await {
                    Signal::Value(v) => Signal::Value(v),
                    Signal::Error(e) => Signal::Error(f(e)),
                    Signal::Empty => Signal::Empty,
                }
            }
            .boxed()
        }))
    }

    pub fn recover(self, f: impl Fn(E) -> Mono<T, E> + Send + Sync + 'static) -> Mono<T, E> {
        let source = self.source;
        let f = Arc::new(f);
        Mono::from_source(Arc::new(move || {
            let source = source.clone();
            let f = f.clone();
            async move {
                match source().await {
                    Signal::Value(v) => Signal::Value(v),
                    Signal::Error(e) => (f(e).source)().await,
                    Signal::Empty => Signal::Empty,
                }
            }
            .boxed()
        }))
    }

    pub fn recover_with(self, default_value: T) -> Mono<T, E> {
        self.recover(move |_| Mono::just(default_value.clone()))
    }

    /// Runs `side_effect` against the success value without changing the
    /// stream; errors and empty completion pass through untouched.
    pub fn inspect(self, side_effect: impl Fn(&T) + Send + Sync + 'static) -> Mono<T, E> {
        let source = self.source;
        let side_effect = Arc::new(side_effect);
        Mono::from_source(Arc::new(move || {
            let source = source.clone();
            let side_effect = side_effect.clone();
            async move {
                let signal = source().await;
                if let Signal::Value(ref v) = signal {
                    side_effect(v);
                }
                signal
            }
            .boxed()
        }))
    }

    /// Fails with `CoreError::Timeout` if no terminal signal arrives within
    /// `duration`. Converts this Mono's error channel to `CoreError<E>` so
    /// it composes with other fallible operators (breaker/LB calls, retry).
    pub fn timeout(self, duration: Duration) -> Mono<T, CoreError<E>> {
        let source = self.source;
        Mono::from_source(Arc::new(move || {
            let source = source.clone();
            async move {
                match tokio::time::timeout(duration, source()).await {
                    Ok(Signal::Value(v)) => Signal::Value(v),
                    Ok(Signal::Error(e)) => Signal::Error(CoreError::Domain(e)),
                    Ok(Signal::Empty) => Signal::Empty,
                    Err(_) => Signal::Error(CoreError::timeout(duration)),
                }
            }
            .boxed()
        }))
    }

    /// Resubscribes up to `max_attempts` times on `Failure`, multiplying the
    /// delay between attempts by `backoff` each time. Empty completions are
    /// not retried (they are not failures).
    pub fn retry(self, max_attempts: u32, delay: Duration, backoff: f64) -> Mono<T, E> {
        let source = self.source;
        Mono::from_source(Arc::new(move || {
            let source = source.clone();
            async move {
                let mut attempt = 0u32;
                let mut current_delay = delay;
                loop {
                    attempt += 1;
                    match source().await {
                        Signal::Error(e) if attempt < max_attempts.max(1) => {
                            if !current_delay.is_zero() {
                                tokio::time::sleep(current_delay).await;
                            }
                            current_delay = current_delay.mul_f64(backoff.max(0.0));
                            continue;
                        }
                        signal => return signal,
                    }
                }
            }
            .boxed()
        }))
    }

    /// Combines two Monos into a pair, completing when both complete or
    /// short-circuiting on the first `Failure`. Not in the original
    /// operator list but an obvious companion to Flux's `zip`.
    pub fn zip<U>(self, other: Mono<U, E>) -> Mono<(T, U), E>
    where
        U: Clone + Send + Sync + 'static,
    {
        self.zip_with(other, |a, b| (a, b))
    }

    pub fn zip_with<U, V>(
        self,
        other: Mono<U, E>,
        combiner: impl Fn(T, U) -> V + Send + Sync + 'static,
    ) -> Mono<V, E>
    where
        U: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let a = self.source;
        let b = other.source;
        let combiner = Arc::new(combiner);
        Mono::from_source(Arc::new(move || {
            let a = a.clone();
            let b = b.clone();
            let combiner = combiner.clone();
            async move {
                let (sa, sb) = tokio::join!(a(), b());
                match (sa, sb) {
                    (Signal::Value(va), Signal::Value(vb)) => Signal::Value(combiner(va, vb)),
                    (Signal::Error(e), _) => Signal::Error(e),
                    (_, Signal::Error(e)) => Signal::Error(e),
                    _ => Signal::Empty,
                }
            }
            .boxed()
        }))
    }

    /// Terminal: awaits the Mono and returns an `Outcome`. Empty completion
    /// becomes `CoreError::EmptyMono` since a terminal call always needs a
    /// definite answer.
    ///
    /// If this Mono's error channel is already `CoreError<E>` (the case
    /// after `.timeout()`, or after a `CircuitBreaker`/`LoadBalancer` call),
    /// use [`Mono::resolve`] instead so the error isn't wrapped twice.
    pub async fn to_result(self) -> Outcome<T, CoreError<E>> {
        match (self.source)().await {
            Signal::Value(v) => Outcome::Success(v),
            Signal::Error(e) => Outcome::Failure(CoreError::Domain(e)),
            Signal::Empty => Outcome::Failure(CoreError::EmptyMono),
        }
    }

    /// Synchronous terminal for bridging non-async call sites. Blocks the
    /// current thread for at most `deadline`.
    pub fn block(self, deadline: Duration) -> Outcome<T, CoreError<E>> {
        futures::executor::block_on(self.timeout(deadline).resolve())
    }

    /// Subscribes, returning a handle whose terminal `Outcome` is memoized:
    /// the coroutine-already-awaited fix. Calling `.to_result()` on the
    /// returned [`MonoSubscription`] twice runs the underlying computation
    /// once; calling `.subscribe()` again on `self` (a fresh description)
    /// reruns it.
    pub fn subscribe(self) -> MonoSubscription<T, E> {
        let source = self.source;
        let shared: Shared<BoxFuture<'static, Signal<T, E>>> =
            (async move { source().await }).boxed().shared();
        MonoSubscription { shared }
    }
}

impl<T, E> Mono<T, CoreError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Terminal for a Mono whose error channel is already `CoreError<E>`
    /// (post-`timeout`, post-breaker-call, post-balancer-call): unlike
    /// [`Mono::to_result`], this does not add another `Domain` layer around
    /// an error that is already a `CoreError`.
    pub async fn resolve(self) -> Outcome<T, CoreError<E>> {
        match (self.source)().await {
            Signal::Value(v) => Outcome::Success(v),
            Signal::Error(e) => Outcome::Failure(e),
            Signal::Empty => Outcome::Failure(CoreError::EmptyMono),
        }
    }
}

/// A running subscription's cached terminal state. Awaiting the same
/// subscription from multiple call sites (or multiple times sequentially)
/// resolves to the same `Outcome` and drives the underlying computation at
/// most once — the v4.6.1 "coroutine already awaited" contract.
#[derive(Clone)]
pub struct MonoSubscription<T, E> {
    shared: Shared<BoxFuture<'static, Signal<T, E>>>,
}

impl<T, E> MonoSubscription<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub async fn to_result(&self) -> Outcome<T, CoreError<E>> {
        match self.shared.clone().await {
            Signal::Value(v) => Outcome::Success(v),
            Signal::Error(e) => Outcome::Failure(CoreError::Domain(e)),
            Signal::Empty => Outcome::Failure(CoreError::EmptyMono),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn map_then_bind_example() {
        let result = Mono::<i32, String>::just(5)
            .map(|x| x * 2)
            .bind(|x| Mono::just(x + 1))
            .to_result()
            .await;
        assert_eq!(result, Outcome::Success(11));
    }

    #[tokio::test]
    async fn laziness_no_side_effect_before_subscription() {
        let witness = Arc::new(AtomicU32::new(0));
        let w = witness.clone();
        let _mono: Mono<i32, CoreError<String>> = Mono::from_callable(move || {
            w.fetch_add(1, Ordering::SeqCst);
            Outcome::Success(1)
        });
        assert_eq!(witness.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_exhausts_after_exact_attempts() {
        let witness = Arc::new(AtomicU32::new(0));
        let w = witness.clone();
        let mono: Mono<i32, CoreError<String>> = Mono::from_callable(move || {
            w.fetch_add(1, Ordering::SeqCst);
            Outcome::Failure("boom".to_string())
        })
        .retry(3, Duration::ZERO, 1.0);

        let result = mono.resolve().await;
        assert!(result.is_failure());
        assert_eq!(witness.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn subscription_caches_terminal_result() {
        let witness = Arc::new(AtomicU32::new(0));
        let w = witness.clone();
        let mono: Mono<i32, CoreError<String>> = Mono::from_callable(move || {
            w.fetch_add(1, Ordering::SeqCst);
            Outcome::Success(42)
        });

        let subscription = mono.subscribe();
        let first = subscription.to_result().await;
        let second = subscription.to_result().await;
        assert_eq!(first, Outcome::Success(42));
        assert_eq!(second, Outcome::Success(42));
        assert_eq!(witness.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_to_result_is_empty_mono_error() {
        let result = Mono::<i32, String>::empty().to_result().await;
        assert!(matches!(result, Outcome::Failure(CoreError::EmptyMono)));
    }

    #[tokio::test]
    async fn filter_false_completes_empty() {
        let result = Mono::<i32, String>::just(4)
            .filter(|v| *v % 2 == 1)
            .to_result()
            .await;
        assert!(matches!(result, Outcome::Failure(CoreError::EmptyMono)));
    }

    #[tokio::test]
    async fn from_callable_panic_surfaces_as_wrapped_panic() {
        let mono: Mono<i32, CoreError<String>> =
            Mono::from_callable(|| -> Outcome<i32, String> { panic!("boom") });
        let result = mono.resolve().await;
        match result {
            Outcome::Failure(CoreError::WrappedPanic { message, source_tag }) => {
                assert!(message.contains("boom"));
                assert_eq!(source_tag, "Mono::from_callable");
            }
            other => panic!("expected a wrapped panic, got {other:?}"),
        }
    }
}
