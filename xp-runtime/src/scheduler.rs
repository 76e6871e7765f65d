//! A delay queue for requeueing reconcile requests at a specific instant,
//! adapted from `kube_runtime::scheduler`. Used by the controller engine to
//! turn an [`crate::controller::Action`]'s `requeue_after` into an actual
//! wakeup, coalescing multiple requeue requests for the same key into the
//! earliest one requested.

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use hashbrown::HashMap;
use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A request to run `message` no earlier than `run_at`.
#[derive(Debug, Clone)]
pub struct ScheduleRequest<T> {
    /// The scheduled payload, typically an object key to reconcile.
    pub message: T,
    /// The earliest instant at which this request should fire.
    pub run_at: Instant,
}

struct Entry<T> {
    run_at: Instant,
    message: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: `BinaryHeap` is a max-heap, we want the earliest `run_at` on top.
        other.run_at.cmp(&self.run_at)
    }
}

/// A single-consumer scheduler keyed by `T`. Scheduling the same key twice
/// keeps only the earlier of the two requested instants, mirroring
/// `kube_runtime`'s debounced scheduler used by its reflector/controller
/// plumbing.
pub struct Scheduler<T: Eq + Hash + Clone> {
    heap: BinaryHeap<Entry<T>>,
    earliest_for_key: HashMap<T, Instant>,
    sleep: Pin<Box<tokio::time::Sleep>>,
}

impl<T: Eq + Hash + Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            earliest_for_key: HashMap::new(),
            sleep: Box::pin(tokio::time::sleep(Duration::ZERO)),
        }
    }
}

impl<T: Eq + Hash + Clone> Scheduler<T> {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `message` to fire at `run_at`, or earlier if already
    /// pending with an earlier `run_at`.
    pub fn schedule(&mut self, message: T, run_at: Instant) {
        let keep = match self.earliest_for_key.get(&message) {
            Some(existing) if *existing <= run_at => false,
            _ => true,
        };
        if keep {
            self.earliest_for_key.insert(message.clone(), run_at);
            self.heap.push(Entry { run_at, message });
        }
    }

    /// Number of distinct keys with a pending schedule.
    pub fn len(&self) -> usize {
        self.earliest_for_key.len()
    }

    /// Whether no keys are pending.
    pub fn is_empty(&self) -> bool {
        self.earliest_for_key.is_empty()
    }
}

impl<T: Eq + Hash + Clone + Unpin> Stream for Scheduler<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(top) = this.heap.peek() else {
                return Poll::Pending;
            };
            // A stale entry: a newer schedule for this key superseded it.
            if this.earliest_for_key.get(&top.message) != Some(&top.run_at) {
                this.heap.pop();
                continue;
            }
            let now = Instant::now();
            if top.run_at <= now {
                let entry = this.heap.pop().expect("just peeked");
                this.earliest_for_key.remove(&entry.message);
                return Poll::Ready(Some(entry.message));
            }
            this.sleep.as_mut().reset(tokio::time::Instant::from_std(top.run_at));
            match this.sleep.as_mut().poll(cx) {
                Poll::Ready(()) => continue,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Merge an external stream of immediate schedule requests with the
/// scheduler's own delayed firings, the way `kube_runtime::scheduler::
/// scheduler` merges a reflector's change stream with its own debounce
/// queue.
pub fn debounced_scheduler<T>(
    mut requests: mpsc::Receiver<ScheduleRequest<T>>,
) -> impl Stream<Item = T>
where
    T: Eq + Hash + Clone + Unpin + Send + 'static,
{
    async_stream::stream! {
        let mut scheduler = Scheduler::new();
        loop {
            tokio::select! {
                biased;
                maybe_req = requests.recv() => {
                    match maybe_req {
                        Some(req) => scheduler.schedule(req.message, req.run_at),
                        None if scheduler.is_empty() => break,
                        None => {}
                    }
                }
                Some(msg) = scheduler.next(), if !scheduler.is_empty() => {
                    yield msg;
                }
            }
        }
    }
}

/// Drive a set of one-shot futures to completion without caring about
/// ordering, used by the controller engine to run a bounded number of
/// reconciles concurrently.
pub fn unordered<F: std::future::Future>(futures: impl IntoIterator<Item = F>) -> FuturesUnordered<F> {
    futures.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn fires_in_run_at_order() {
        let mut s: Scheduler<&'static str> = Scheduler::new();
        let now = Instant::now();
        s.schedule("b", now + Duration::from_secs(2));
        s.schedule("a", now + Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(s.next().await, Some("a"));
        assert_eq!(s.next().await, Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_keeps_the_earlier_instant() {
        let mut s: Scheduler<&'static str> = Scheduler::new();
        let now = Instant::now();
        s.schedule("a", now + Duration::from_secs(10));
        s.schedule("a", now + Duration::from_secs(1));
        assert_eq!(s.len(), 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(s.next().await, Some("a"));
    }
}
