//! A lazy producer of a finite or infinite ordered sequence of outcomes.
//! Built on [`futures::Stream`], which gives pull-based backpressure for
//! free on synchronous operator chains; sources that cannot honor pulled
//! demand (`interval`, `merge` of hot sources) buffer through a bounded
//! channel governed by [`OverflowStrategy`] (see [`Flux::bounded`]).

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::mono::Mono;
use crate::outcome::Outcome;

/// Overflow behavior for a bounded buffer fed by a source that cannot
/// honor backpressure (a timer, or a merge of independently-hot sources).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Fail the stream with `BackpressureOverflow` (the conservative default).
    Error,
    /// Silently drop the newest item when the buffer is full; every other
    /// buffered item is retained.
    DropLatest,
    /// Evict only the single oldest buffered item to make room for the
    /// newest; every other buffered item is retained.
    DropOldest,
    /// Collapse the entire pending backlog down to just the newest item.
    Latest,
}

impl Default for OverflowStrategy {
    fn default() -> Self {
        Self::Error
    }
}

type Source<T, E> = Arc<dyn Fn() -> BoxStream<'static, Outcome<T, E>> + Send + Sync>;

/// A deferred, ordered sequence of outcomes. Cold by default (each
/// subscription runs its own instance of the source); `interval` is the one
/// constructor that behaves as a hot, buffered source per subscription.
pub struct Flux<T, E> {
    source: Source<T, E>,
}

impl<T, E> Clone for Flux<T, E> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T, E> Flux<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn from_source(source: Source<T, E>) -> Self {
        Self { source }
    }

    pub fn from_iterable(items: impl IntoIterator<Item = T>) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        Self::from_source(Arc::new(move || {
            stream::iter(items.clone().into_iter().map(Outcome::Success)).boxed()
        }))
    }

    pub fn empty() -> Self {
        Self::from_source(Arc::new(|| stream::empty().boxed()))
    }

    pub fn error(error: E) -> Self {
        Self::from_source(Arc::new(move || {
            stream::once(futures::future::ready(Outcome::Failure(error.clone()))).boxed()
        }))
    }

    pub fn defer<F>(supplier: F) -> Self
    where
        F: Fn() -> Flux<T, E> + Send + Sync + 'static,
    {
        Self::from_source(Arc::new(move || (supplier().source)()))
    }

    /// Lifts a stream that already produces `Outcome<T, E>`.
    pub fn from_async_iterable<S>(factory: impl Fn() -> S + Send + Sync + 'static) -> Self
    where
        S: Stream<Item = Outcome<T, E>> + Send + 'static,
    {
        Self::from_source(Arc::new(move || factory().boxed()))
    }

    /// Interleaves emissions from several Fluxes; order across sources is
    /// not preserved.
    pub fn merge(fluxes: Vec<Flux<T, E>>) -> Self {
        Self::from_source(Arc::new(move || {
            let streams: Vec<_> = fluxes.iter().map(|f| (f.source)()).collect();
            stream::select_all(streams).boxed()
        }))
    }

    /// Strict left-to-right concatenation.
    pub fn concat(fluxes: Vec<Flux<T, E>>) -> Self {
        Self::from_source(Arc::new(move || {
            let streams: Vec<_> = fluxes.iter().map(|f| (f.source)()).collect();
            stream::iter(streams).flatten().boxed()
        }))
    }

    pub fn zip<U>(self, other: Flux<U, E>) -> Flux<(T, U), E>
    where
        U: Clone + Send + Sync + 'static,
    {
        self.zip_with(other, |a, b| (a, b))
    }

    /// Emits in lockstep: one combined item per pair of upstream emissions,
    /// stopping when either source is exhausted.
    pub fn zip_with<U, V>(
        self,
        other: Flux<U, E>,
        combiner: impl Fn(T, U) -> V + Send + Sync + 'static,
    ) -> Flux<V, E>
    where
        U: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let a = self.source;
        let b = other.source;
        let combiner = Arc::new(combiner);
        Flux::from_source(Arc::new(move || {
            let combiner = combiner.clone();
            a().zip(b())
                .map(move |(oa, ob)| match (oa, ob) {
                    (Outcome::Success(va), Outcome::Success(vb)) => {
                        Outcome::Success(combiner(va, vb))
                    }
                    (Outcome::Failure(e), _) => Outcome::Failure(e),
                    (_, Outcome::Failure(e)) => Outcome::Failure(e),
                })
                .boxed()
        }))
    }

    pub fn map<U>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Flux<U, E>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.source;
        let f = Arc::new(f);
        Flux::from_source(Arc::new(move || {
            let f = f.clone();
            source().map(move |o| o.map(|v| f(v))).boxed()
        }))
    }

    pub fn filter(self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> Flux<T, E> {
        let source = self.source;
        let pred = Arc::new(pred);
        Flux::from_source(Arc::new(move || {
            let pred = pred.clone();
            source()
                .filter(move |o| {
                    let keep = match o {
                        Outcome::Success(v) => pred(v),
                        Outcome::Failure(_) => true,
                    };
                    futures::future::ready(keep)
                })
                .boxed()
        }))
    }

    /// Suppresses successes equal to one already seen earlier in this
    /// subscription; each subscription starts with an empty seen-set.
    pub fn distinct(self) -> Flux<T, E>
    where
        T: Eq + std::hash::Hash,
    {
        let source = self.source;
        Flux::from_source(Arc::new(move || {
            let mut seen: std::collections::HashSet<T> = std::collections::HashSet::new();
            source()
                .filter(move |o| {
                    let keep = match o {
                        Outcome::Success(v) => seen.insert(v.clone()),
                        Outcome::Failure(_) => true,
                    };
                    futures::future::ready(keep)
                })
                .boxed()
        }))
    }

    pub fn take(self, n: usize) -> Flux<T, E> {
        let source = self.source;
        Flux::from_source(Arc::new(move || source().take(n).boxed()))
    }

    pub fn skip(self, n: usize) -> Flux<T, E> {
        let source = self.source;
        Flux::from_source(Arc::new(move || source().skip(n).boxed()))
    }

    pub fn take_while(self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> Flux<T, E> {
        let source = self.source;
        let pred = Arc::new(pred);
        Flux::from_source(Arc::new(move || {
            let pred = pred.clone();
            source()
                .take_while(move |o| {
                    let keep = match o {
                        Outcome::Success(v) => pred(v),
                        Outcome::Failure(_) => false,
                    };
                    futures::future::ready(keep)
                })
                .boxed()
        }))
    }

    pub fn skip_while(self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> Flux<T, E> {
        let source = self.source;
        let pred = Arc::new(pred);
        Flux::from_source(Arc::new(move || {
            let pred = pred.clone();
            source()
                .skip_while(move |o| {
                    let keep = match o {
                        Outcome::Success(v) => pred(v),
                        Outcome::Failure(_) => false,
                    };
                    futures::future::ready(keep)
                })
                .boxed()
        }))
    }

    /// Flattens inner streams produced by `f`; when `concurrency > 1`,
    /// outer ordering is not preserved. `concurrency == 0` means unbounded.
    pub fn flat_map<U>(
        self,
        f: impl Fn(T) -> Flux<U, E> + Send + Sync + 'static,
        concurrency: usize,
    ) -> Flux<U, E>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.source;
        let f = Arc::new(f);
        let limit = if concurrency == 0 { usize::MAX } else { concurrency };
        Flux::from_source(Arc::new(move || {
            let f = f.clone();
            source()
                .map(move |o| -> BoxStream<'static, Outcome<U, E>> {
                    match o {
                        Outcome::Success(v) => (f(v).source)(),
                        Outcome::Failure(e) => {
                            stream::once(futures::future::ready(Outcome::Failure(e))).boxed()
                        }
                    }
                })
                .flatten_unordered(Some(limit))
                .boxed()
        }))
    }

    /// `flat_map` with `concurrency = 1`: strict ordering preserved.
    pub fn concat_map<U>(self, f: impl Fn(T) -> Flux<U, E> + Send + Sync + 'static) -> Flux<U, E>
    where
        U: Clone + Send + Sync + 'static,
    {
        let source = self.source;
        let f = Arc::new(f);
        Flux::from_source(Arc::new(move || {
            let f = f.clone();
            source()
                .map(move |o| -> BoxStream<'static, Outcome<U, E>> {
                    match o {
                        Outcome::Success(v) => (f(v).source)(),
                        Outcome::Failure(e) => {
                            stream::once(futures::future::ready(Outcome::Failure(e))).boxed()
                        }
                    }
                })
                .flatten()
                .boxed()
        }))
    }

    /// Batches successes into `Vec<T>` chunks of `size`. A failure flushes
    /// the in-progress (possibly short) chunk immediately, then emits the
    /// failure and ends the stream.
    pub fn buffer(self, size: usize) -> Flux<Vec<T>, E> {
        let source = self.source;
        let size = size.max(1);
        Flux::from_source(Arc::new(move || chunk_stream(source(), size)))
    }

    /// Splits into non-overlapping sub-Fluxes of `size` items each.
    pub fn window(self, size: usize) -> Flux<Flux<T, E>, E> {
        let source = self.source;
        let size = size.max(1);
        Flux::from_source(Arc::new(move || {
            chunk_stream(source(), size)
                .map(|o| o.map(Flux::from_iterable))
                .boxed()
        }))
    }

    /// Token-bucket throttling: at most `n` emissions per `per` window;
    /// excess emissions within a window are dropped. Delaying instead of
    /// dropping excess emissions is a variant left for a future
    /// `throttle_delay`.
    pub fn throttle(self, n: usize, per: Duration) -> Flux<T, E> {
        let source = self.source;
        let n = n.max(1);
        Flux::from_source(Arc::new(move || {
            let mut window_start = tokio::time::Instant::now();
            let mut emitted_in_window = 0usize;
            source()
                .filter(move |_| {
                    let now = tokio::time::Instant::now();
                    if now.duration_since(window_start) >= per {
                        window_start = now;
                        emitted_in_window = 0;
                    }
                    let allow = emitted_in_window < n;
                    if allow {
                        emitted_in_window += 1;
                    }
                    futures::future::ready(allow)
                })
                .boxed()
        }))
    }

    pub fn delay(self, duration: Duration) -> Flux<T, E> {
        let source = self.source;
        Flux::from_source(Arc::new(move || {
            source()
                .then(move |o| async move {
                    tokio::time::sleep(duration).await;
                    o
                })
                .boxed()
        }))
    }

    /// Splits downstream work across `n` sub-subscriptions. See
    /// [`ParallelFlux`] for the rejoin operators.
    pub fn parallel(self, n: usize) -> ParallelFlux<T, E> {
        ParallelFlux {
            source: self.source,
            workers: n.max(1),
        }
    }

    /// Converts a `Failure` into a side effect and continues the stream;
    /// without this, the default behavior is to terminate on the first
    /// failure (the stream ends immediately after emitting it).
    pub fn on_error_continue(self, handler: impl Fn(&E) + Send + Sync + 'static) -> Flux<T, E> {
        let source = self.source;
        let handler = Arc::new(handler);
        Flux::from_source(Arc::new(move || {
            let handler = handler.clone();
            source()
                .filter_map(move |o| {
                    let item = match &o {
                        Outcome::Success(_) => Some(o),
                        Outcome::Failure(e) => {
                            handler(e);
                            None
                        }
                    };
                    futures::future::ready(item)
                })
                .boxed()
        }))
    }

    /// Switches to `fallback` on the first `Failure` (the failure itself is
    /// not re-emitted; the fallback takes over in its place).
    pub fn on_error_resume(self, fallback: Flux<T, E>) -> Flux<T, E> {
        let source = self.source;
        let fallback_source = fallback.source;
        Flux::from_source(Arc::new(move || {
            let fallback_source = fallback_source.clone();
            stream::unfold(ResumeState::Upstream(source()), move |state| {
                let fallback_source = fallback_source.clone();
                async move {
                    match state {
                        ResumeState::Upstream(mut s) => match s.next().await {
                            Some(Outcome::Failure(_)) => {
                                let mut fb = fallback_source();
                                fb.next().await.map(|item| (item, ResumeState::Fallback(fb)))
                            }
                            Some(item) => Some((item, ResumeState::Upstream(s))),
                            None => None,
                        },
                        ResumeState::Fallback(mut fb) => {
                            fb.next().await.map(|item| (item, ResumeState::Fallback(fb)))
                        }
                    }
                }
            })
            .boxed()
        }))
    }

    /// Resubscribes the entire upstream up to `max_attempts` times if it
    /// produces a `Failure`; multiplies `delay` by `backoff` each attempt.
    pub fn retry(self, max_attempts: u32, delay: Duration, backoff: f64) -> Flux<T, E> {
        let source = self.source;
        let max_attempts = max_attempts.max(1);
        Flux::from_source(Arc::new(move || {
            retry_stream(source.clone(), max_attempts, delay, backoff)
        }))
    }

    /// Terminal: collects into a `Mono<Vec<T>, E>`; the first `Failure`
    /// terminates the collection with that failure.
    pub fn collect_list(self) -> Mono<Vec<T>, E> {
        let source = self.source;
        Mono::from_async_result(move || {
            let source = source.clone();
            async move {
                let mut items = Vec::new();
                let mut stream = source();
                while let Some(o) = stream.next().await {
                    match o {
                        Outcome::Success(v) => items.push(v),
                        Outcome::Failure(e) => return Outcome::Failure(e),
                    }
                }
                Outcome::Success(items)
            }
        })
    }

    pub fn reduce(
        self,
        initial: T,
        combiner: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Mono<T, E> {
        let source = self.source;
        let combiner = Arc::new(combiner);
        Mono::from_async_result(move || {
            let source = source.clone();
            let combiner = combiner.clone();
            let initial = initial.clone();
            async move {
                let mut acc = initial;
                let mut stream = source();
                while let Some(o) = stream.next().await {
                    match o {
                        Outcome::Success(v) => acc = combiner(acc, v),
                        Outcome::Failure(e) => return Outcome::Failure(e),
                    }
                }
                Outcome::Success(acc)
            }
        })
    }

    pub fn count(self) -> Mono<usize, E> {
        let source = self.source;
        Mono::from_async_result(move || {
            let source = source.clone();
            async move {
                let mut n = 0usize;
                let mut stream = source();
                while let Some(o) = stream.next().await {
                    match o {
                        Outcome::Success(_) => n += 1,
                        Outcome::Failure(e) => return Outcome::Failure(e),
                    }
                }
                Outcome::Success(n)
            }
        })
    }

    /// Fire-and-forget subscription: spawns a task driving the stream to
    /// completion, invoking the given callbacks.
    pub fn subscribe(
        self,
        on_next: impl Fn(T) + Send + Sync + 'static,
        on_error: impl Fn(E) + Send + Sync + 'static,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let source = self.source;
        tokio::spawn(async move {
            let mut stream = source();
            while let Some(o) = stream.next().await {
                match o {
                    Outcome::Success(v) => on_next(v),
                    Outcome::Failure(e) => {
                        on_error(e);
                        return;
                    }
                }
            }
            on_complete();
        })
    }

    /// Feeds a hot/unbackpressured source through a bounded channel,
    /// applying `strategy` when the channel saturates. Intended for
    /// wrapping `interval`/`merge`-style sources before they reach an
    /// operator chain that assumes pulled demand.
    pub fn bounded(self, capacity: usize, strategy: OverflowStrategy) -> Flux<T, CoreError<E>> {
        let source = self.source;
        let capacity = capacity.max(1);
        Flux::from_source(Arc::new(move || {
            let (tx, rx) = mpsc::channel::<Outcome<T, CoreError<E>>>(capacity);
            let mut upstream = source();
            tokio::spawn(async move {
                use tokio::sync::mpsc::error::TrySendError;

                let mut buffered: std::collections::VecDeque<Outcome<T, CoreError<E>>> =
                    std::collections::VecDeque::with_capacity(capacity);

                while let Some(item) = upstream.next().await {
                    let item = item.map_error(CoreError::Domain);

                    while let Some(front) = buffered.pop_front() {
                        match tx.try_send(front) {
                            Ok(()) => {}
                            Err(TrySendError::Full(rejected)) => {
                                buffered.push_front(rejected);
                                break;
                            }
                            Err(TrySendError::Closed(_)) => return,
                        }
                    }

                    if buffered.len() < capacity {
                        buffered.push_back(item);
                        continue;
                    }

                    match strategy {
                        OverflowStrategy::Error => {
                            let _ = tx
                                .send(Outcome::Failure(CoreError::backpressure_overflow(
                                    capacity,
                                )))
                                .await;
                            return;
                        }
                        OverflowStrategy::DropLatest => {}
                        OverflowStrategy::DropOldest => {
                            buffered.pop_front();
                            buffered.push_back(item);
                        }
                        OverflowStrategy::Latest => {
                            buffered.clear();
                            buffered.push_back(item);
                        }
                    }
                }

                while let Some(front) = buffered.pop_front() {
                    if tx.send(front).await.is_err() {
                        break;
                    }
                }
            });
            tokio_stream::wrappers::ReceiverStream::new(rx).boxed()
        }))
    }
}

impl<E> Flux<i64, E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn range(start: i64, count: usize) -> Self {
        Self::from_source(Arc::new(move || {
            stream::iter((start..start + count as i64).map(Outcome::Success)).boxed()
        }))
    }
}

impl<E> Flux<u64, E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Hot, infinite: ticks every `period`, emitting the 0-based tick
    /// index. Each subscription starts its own timer — a cold-source
    /// simplification of the "hot" contract, documented in the design
    /// ledger.
    pub fn interval(period: Duration) -> Self {
        Self::from_source(Arc::new(move || {
            let mut tick: u64 = 0;
            tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(period))
                .map(move |_| {
                    let v = tick;
                    tick += 1;
                    Outcome::Success(v)
                })
                .boxed()
        }))
    }
}

enum ResumeState<T, E> {
    Upstream(BoxStream<'static, Outcome<T, E>>),
    Fallback(BoxStream<'static, Outcome<T, E>>),
}

fn chunk_stream<T, E>(upstream: BoxStream<'static, Outcome<T, E>>, size: usize) -> BoxStream<'static, Outcome<Vec<T>, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    stream::unfold((upstream, false), move |(mut upstream, done)| async move {
        if done {
            return None;
        }
        let mut chunk = Vec::with_capacity(size);
        loop {
            match upstream.next().await {
                Some(Outcome::Success(v)) => {
                    chunk.push(v);
                    if chunk.len() == size {
                        return Some((Outcome::Success(chunk), (upstream, false)));
                    }
                }
                Some(Outcome::Failure(e)) => {
                    if chunk.is_empty() {
                        return Some((Outcome::Failure(e), (upstream, true)));
                    }
                    return Some((Outcome::Success(chunk), (upstream, true)));
                }
                None => {
                    if chunk.is_empty() {
                        return None;
                    }
                    return Some((Outcome::Success(chunk), (upstream, true)));
                }
            }
        }
    })
    .boxed()
}

fn retry_stream<T, E>(
    source: Source<T, E>,
    max_attempts: u32,
    delay: Duration,
    backoff: f64,
) -> BoxStream<'static, Outcome<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    struct State<T, E> {
        source: Source<T, E>,
        max_attempts: u32,
        delay: Duration,
        backoff: f64,
        buffered: Option<std::collections::VecDeque<Outcome<T, E>>>,
    }

    stream::unfold(
        State {
            source,
            max_attempts,
            delay,
            backoff,
            buffered: None,
        },
        move |mut state| async move {
            if state.buffered.is_none() {
                let mut attempt = 0u32;
                let mut current_delay = state.delay;
                let collected = loop {
                    attempt += 1;
                    let mut collected = Vec::new();
                    let mut failed = false;
                    let mut upstream = (state.source)();
                    while let Some(o) = upstream.next().await {
                        let is_failure = o.is_failure();
                        collected.push(o);
                        if is_failure {
                            failed = true;
                            break;
                        }
                    }
                    if failed && attempt < state.max_attempts {
                        if !current_delay.is_zero() {
                            tokio::time::sleep(current_delay).await;
                        }
                        current_delay = current_delay.mul_f64(state.backoff.max(0.0));
                        continue;
                    }
                    break collected;
                };
                state.buffered = Some(collected.into());
            }
            let item = state.buffered.as_mut().and_then(|b| b.pop_front());
            item.map(|i| (i, state))
        },
    )
    .boxed()
}

/// Sub-subscriptions spawned by [`Flux::parallel`]. Call [`Self::sequential`]
/// to keep the original emission order, or [`Self::merge_unordered`] to
/// accept completion-order interleaving across `workers` concurrent
/// consumers.
pub struct ParallelFlux<T, E> {
    source: Source<T, E>,
    workers: usize,
}

impl<T, E> ParallelFlux<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Rejoins the sub-subscriptions, preserving the original emission
    /// order — the identity on the upstream ordering.
    pub fn sequential(self) -> Flux<T, E> {
        Flux::from_source(self.source)
    }

    /// Rejoins without preserving order: `workers` concurrent consumers
    /// drain the upstream and funnel into a shared channel. The fan-out
    /// pays off when the operator chain upstream of `parallel` does real
    /// awaited work (e.g. a `flat_map` calling a circuit-breaker-guarded
    /// remote call); pure-CPU pipelines see no speedup from this operator.
    pub fn merge_unordered(self) -> Flux<T, E> {
        let source = self.source;
        let workers = self.workers;
        Flux::from_source(Arc::new(move || {
            let (tx, rx) = mpsc::channel::<Outcome<T, E>>(workers * 4);
            let mut upstream = source();
            tokio::spawn(async move {
                upstream
                    .for_each_concurrent(Some(workers), |item| {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(item).await;
                        }
                    })
                    .await;
            });
            tokio_stream::wrappers::ReceiverStream::new(rx).boxed()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filter_then_collect_example() {
        let result = Flux::<i32, String>::from_iterable([1, 2, 3, 4, 5])
            .filter(|x| x % 2 == 0)
            .collect_list()
            .to_result()
            .await;
        assert_eq!(result, Outcome::Success(vec![2, 4]));
    }

    #[tokio::test]
    async fn concat_preserves_order() {
        let a = Flux::<i32, String>::from_iterable([1, 2]);
        let b = Flux::<i32, String>::from_iterable([3, 4]);
        let result = Flux::concat(vec![a, b]).collect_list().to_result().await;
        assert_eq!(result, Outcome::Success(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn first_failure_terminates_collect_list() {
        let flux: Flux<i32, String> = Flux::from_source(Arc::new(|| {
            stream::iter(vec![
                Outcome::Success(1),
                Outcome::Failure("boom".to_string()),
                Outcome::Success(2),
            ])
            .boxed()
        }));
        let result = flux.collect_list().to_result().await;
        assert!(result.is_failure());
    }

    #[tokio::test]
    async fn buffer_batches_into_chunks() {
        let result = Flux::<i32, String>::from_iterable([1, 2, 3, 4, 5])
            .buffer(2)
            .collect_list()
            .to_result()
            .await;
        assert_eq!(
            result,
            Outcome::Success(vec![vec![1, 2], vec![3, 4], vec![5]])
        );
    }

    #[tokio::test]
    async fn on_error_continue_skips_failures() {
        let flux: Flux<i32, String> = Flux::from_source(Arc::new(|| {
            stream::iter(vec![
                Outcome::Success(1),
                Outcome::Failure("skip-me".to_string()),
                Outcome::Success(2),
            ])
            .boxed()
        }));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let result = flux
            .on_error_continue(move |e| seen2.lock().unwrap().push(e.clone()))
            .collect_list()
            .to_result()
            .await;
        assert_eq!(result, Outcome::Success(vec![1, 2]));
        assert_eq!(seen.lock().unwrap().as_slice(), ["skip-me".to_string()]);
    }

    #[tokio::test]
    async fn retry_exhausts_after_exact_attempts() {
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let a = attempts.clone();
        let flux: Flux<i32, String> = Flux::from_source(Arc::new(move || {
            a.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            stream::iter(vec![Outcome::Failure("boom".to_string())]).boxed()
        }));
        let result = flux.retry(3, Duration::ZERO, 1.0).collect_list().to_result().await;
        assert!(result.is_failure());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn take_while_stops_at_first_mismatch() {
        let result = Flux::<i32, String>::from_iterable([1, 2, 3, 10, 4])
            .take_while(|v| *v < 5)
            .collect_list()
            .to_result()
            .await;
        assert_eq!(result, Outcome::Success(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn distinct_suppresses_repeated_successes() {
        let result = Flux::<i32, String>::from_iterable([1, 2, 2, 3, 1, 4])
            .distinct()
            .collect_list()
            .to_result()
            .await;
        assert_eq!(result, Outcome::Success(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn drop_oldest_evicts_only_the_single_oldest_item() {
        let result = Flux::<i32, String>::from_iterable([1, 2, 3, 4, 5])
            .bounded(2, OverflowStrategy::DropOldest)
            .collect_list()
            .resolve()
            .await;
        assert_eq!(result, Outcome::Success(vec![1, 2, 4, 5]));
    }

    #[tokio::test]
    async fn latest_collapses_the_whole_pending_backlog() {
        let result = Flux::<i32, String>::from_iterable([1, 2, 3, 4, 5])
            .bounded(2, OverflowStrategy::Latest)
            .collect_list()
            .resolve()
            .await;
        assert_eq!(result, Outcome::Success(vec![1, 2, 5]));
    }
}
