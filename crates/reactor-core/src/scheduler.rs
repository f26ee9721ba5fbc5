//! Abstraction over where and when a continuation runs. Operators that
//! suspend (timers, retries, circuit-breaker/load-balancer calls) schedule
//! their work through a [`Scheduler`] rather than calling `tokio::spawn`
//! directly, so a pipeline can move between running inline, on the current
//! task, or on a worker pool without the operator chain noticing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A handle to a scheduled task. Dropping it does not cancel the task;
/// call [`CancellationHandle::cancel`] explicitly. Cancellation is
/// idempotent, per the concurrency model's requirement.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// `schedule(task, delay)` over one of three canonical runtimes. Schedulers
/// are interchangeable at operator boundaries: nothing in `Mono`/`Flux`
/// depends on which implementation is attached to a subscription.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule_boxed(&self, task: BoxedTask, delay: Duration) -> CancellationHandle;

    fn schedule<F>(&self, task: F, delay: Duration) -> CancellationHandle
    where
        F: Future<Output = ()> + Send + 'static,
        Self: Sized,
    {
        self.schedule_boxed(Box::pin(task), delay)
    }
}

/// Runs the task synchronously on the caller via `futures::executor::block_on`.
/// Intended for tests and trivial synchronous pipelines; `delay` is honored
/// with a blocking `std::thread::sleep`, so it should not be used with
/// non-trivial delays on a shared thread pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn schedule_boxed(&self, task: BoxedTask, delay: Duration) -> CancellationHandle {
        let handle = CancellationHandle::new();
        if delay.is_zero() {
            futures::executor::block_on(task);
        } else {
            std::thread::sleep(delay);
            futures::executor::block_on(task);
        }
        handle
    }
}

/// A single current-thread event loop (`tokio::task::spawn_local` semantics
/// via a dedicated `LocalSet`-less current-thread handle): tasks run with
/// strict FIFO fairness among ready work, never distributed across workers.
#[derive(Clone)]
pub struct Cooperative {
    handle: tokio::runtime::Handle,
}

impl Cooperative {
    /// Attaches to the ambient tokio runtime's current-thread handle. Panics
    /// if called outside a tokio runtime, matching `Handle::current()`.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl Scheduler for Cooperative {
    fn schedule_boxed(&self, task: BoxedTask, delay: Duration) -> CancellationHandle {
        let handle = CancellationHandle::new();
        let token = handle.token();
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => return,
                }
            }
            tokio::select! {
                _ = task => {}
                _ = token.cancelled() => {}
            }
        });
        handle
    }
}

/// A bounded worker pool. Per-subscription ordering on an ordered operator
/// chain is the caller's responsibility (operators that fan out across
/// workers, like `parallel(n)`, re-serialize at the merge point); the
/// scheduler itself makes no ordering promise across distinct `schedule`
/// calls.
#[derive(Clone)]
pub struct ParallelPool {
    runtime: Arc<tokio::runtime::Runtime>,
}

impl ParallelPool {
    pub fn new(worker_threads: usize) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }
}

impl Scheduler for ParallelPool {
    fn schedule_boxed(&self, task: BoxedTask, delay: Duration) -> CancellationHandle {
        let handle = CancellationHandle::new();
        let token = handle.token();
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => return,
                }
            }
            tokio::select! {
                _ = task => {}
                _ = token.cancelled() => {}
            }
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn cooperative_runs_task() {
        let scheduler = Cooperative::current();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let handle = scheduler.schedule(async move { ran2.store(true, Ordering::SeqCst) }, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ran.load(Ordering::SeqCst));
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_is_idempotent() {
        let scheduler = Cooperative::current();
        let handle = scheduler.schedule(async {}, Duration::from_secs(10));
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
