// src/engine/pool.rs

//! Fixed-size worker pool fed by a priority queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::types::Priority;

struct Queued<T> {
    priority: Priority,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Queued<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Queued<T> {}

impl<T> PartialOrd for Queued<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Queued<T> {
    // `BinaryHeap` pops the greatest element: lowest priority value first,
    // then lowest sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Queue<T> {
    heap: BinaryHeap<Queued<T>>,
    next_seq: u64,
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
    /// One permit per queued item.
    ready: Semaphore,
    /// Queued plus in-flight items.
    outstanding: watch::Sender<usize>,
    delay: Option<Duration>,
    last_start: tokio::sync::Mutex<Option<Instant>>,
}

impl<T> Shared<T> {
    fn queue(&self) -> MutexGuard<'_, Queue<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep at least `delay` between two consecutive starts.
    async fn pace(&self) {
        let Some(delay) = self.delay else {
            return;
        };
        let mut last = self.last_start.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + delay).await;
        }
        *last = Some(Instant::now());
    }

    fn settle(&self, n: usize) {
        self.outstanding.send_modify(|count| *count = count.saturating_sub(n));
    }
}

/// Worker pool executing submitted items in priority order.
///
/// Items with a lower priority value are started first; items with equal
/// priority are started in submission order. The pool counts an item as
/// outstanding from [`submit`](Self::submit) until its handler returns, so
/// a handler that submits follow-up work before returning never lets the
/// pool look drained in between.
pub struct WorkerPool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkerPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create an empty pool. With `delay`, consecutive item starts are at
    /// least `delay` apart.
    pub fn new(delay: Option<Duration>) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    heap: BinaryHeap::new(),
                    next_seq: 0,
                }),
                ready: Semaphore::new(0),
                outstanding,
                delay,
                last_start: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Spawn `workers` Tokio tasks that run `handler` for each item.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_workers<F, Fut>(&self, workers: usize, handler: F) -> Vec<JoinHandle<()>>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        (0..workers)
            .map(|worker| {
                let shared = Arc::clone(&self.shared);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    debug!(worker, "worker started");
                    worker_loop(worker, shared, handler).await;
                    debug!(worker, "worker finished (pool closed)");
                })
            })
            .collect()
    }

    /// Queue an item.
    pub fn submit(&self, priority: Priority, item: T) {
        {
            // Count under the queue lock so `drop_queued` never sees an item
            // that is not counted yet.
            let mut queue = self.shared.queue();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.heap.push(Queued { priority, seq, item });
            self.shared.outstanding.send_modify(|count| *count += 1);
        }
        self.shared.ready.add_permits(1);
    }

    /// Number of queued items not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue().heap.len()
    }

    /// Queued plus in-flight items.
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Drop every queued item that has not started yet. Returns how many
    /// were dropped.
    pub fn drop_queued(&self) -> usize {
        let mut queue = self.shared.queue();
        let dropped = queue.heap.len();
        queue.heap.clear();
        self.shared.settle(dropped);
        dropped
    }

    /// Wait until nothing is queued or in flight.
    pub async fn wait_drained(&self) {
        let mut rx = self.shared.outstanding.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Stop the workers once they finish their current item.
    pub fn close(&self) {
        self.shared.ready.close();
    }
}

async fn worker_loop<T, F, Fut>(worker: usize, shared: Arc<Shared<T>>, handler: Arc<F>)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match shared.ready.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => break,
        }

        let next = shared.queue().heap.pop();
        let Some(Queued { priority, seq, item }) = next else {
            // Item was dropped after its permit was issued.
            continue;
        };

        shared.pace().await;
        debug!(worker, priority, seq, "worker picked item");

        // Run the handler in its own task so that a panic cannot take the
        // worker (and the outstanding count) down with it.
        if let Err(err) = tokio::spawn(handler(item)).await {
            error!(worker, error = %err, "work item panicked");
        }
        shared.settle(1);
    }
}
