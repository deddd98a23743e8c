//! Deduplicating work queue.
//!
//! A key is either queued, being processed, or idle. Adding a key that is
//! already queued is a no-op; adding one that is being processed marks it
//! dirty, and it is queued again exactly once when the worker calls
//! [`WorkQueue::done`]. No key is ever handed to two workers at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

struct State<K> {
    queue: VecDeque<K>,
    /// Keys that must run (again). Superset of `queue`.
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Earliest pending deadline per key.
    delayed: HashMap<K, Instant>,
    shutting_down: bool,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    delayed: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue `key` now. Supersedes any delayed add for it.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        state.delayed.remove(&key);
        if !Self::enqueue(&mut state, key) {
            return;
        }
        drop(state);
        self.shared.notify.notify_one();
    }

    // Returns true if the key landed in the ready queue.
    fn enqueue(state: &mut State<K>, key: K) -> bool {
        if state.shutting_down || state.dirty.contains(&key) {
            return false;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return false;
        }
        state.queue.push_back(key);
        true
    }

    /// Queue `key` once `delay` has passed. If the key already has an
    /// earlier deadline pending, this is a no-op.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            match state.delayed.get(&key) {
                Some(existing) if *existing <= deadline => return,
                _ => {
                    state.delayed.insert(key.clone(), deadline);
                }
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut state = queue.lock();
            // A sooner add may have replaced this deadline.
            if state.delayed.get(&key) != Some(&deadline) {
                return;
            }
            state.delayed.remove(&key);
            if Self::enqueue(&mut state, key) {
                drop(state);
                queue.shared.notify.notify_one();
            }
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            // Register before checking so an add between check and await
            // is not lost.
            let notified = self.shared.notify.notified();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.shared.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` finished. If it was added while processing it goes back
    /// on the queue.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Wake all waiters and refuse further work.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        state.delayed.clear();
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys waiting on a deadline.
    pub fn delayed_len(&self) -> usize {
        self.lock().delayed.len()
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_duplicates_coalesce() {
        let q = WorkQueue::new();
        q.add("a");
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);

        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_key_never_handed_out_twice() {
        let q = WorkQueue::new();
        q.add("a");
        assert_eq!(q.get().await, Some("a"));

        // Triggered twice while processing: parked, not queued.
        q.add("a");
        q.add("a");
        assert!(q.is_empty());

        let mut second = task::spawn(q.get());
        assert_pending!(second.poll());

        q.done(&"a");
        assert!(second.is_woken());
        assert_eq!(assert_ready!(second.poll()), Some("a"));

        // Exactly one follow-up.
        q.done(&"a");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_trigger_does_not_requeue() {
        let q = WorkQueue::new();
        q.add("a");
        q.get().await;
        q.done(&"a");
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_keeps_earliest_deadline() {
        let q = WorkQueue::new();
        q.add_after("a", Duration::from_secs(10));
        q.add_after("a", Duration::from_secs(2));
        q.add_after("a", Duration::from_secs(30));
        assert_eq!(q.delayed_len(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("a"));
        q.done(&"a");

        // The superseded deadlines do not fire.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_preempts_delayed() {
        let q = WorkQueue::new();
        q.add_after("a", Duration::from_secs(60));
        q.add("a");
        assert_eq!(q.delayed_len(), 0);
        assert_eq!(q.get().await, Some("a"));
        q.done(&"a");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let q: WorkQueue<&str> = WorkQueue::new();
        let mut waiter = task::spawn(q.get());
        assert_pending!(waiter.poll());

        q.shutdown();
        assert!(waiter.is_woken());
        assert_eq!(assert_ready!(waiter.poll()), None);

        q.add("a");
        assert!(q.is_empty());
    }
}
