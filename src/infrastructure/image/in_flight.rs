//! Single-flight coordination of downloads.
//!
//! For each key at most one download runs at a time. Callers arriving while
//! it runs are queued behind it and all receive the same outcome once it
//! resolves.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace};

use crate::domain::entities::CacheKey;

/// Callback waiting on a download.
pub type Waiter<T> = Box<dyn FnOnce(Option<T>) + Send + 'static>;

/// What [`InFlightRegistry::join_or_start`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new download was spawned.
    Started,
    /// The request was queued behind a running download.
    Joined,
}

/// The running download for a key.
struct Pending {
    generation: u64,
    handle: AbortHandle,
}

struct State<T> {
    waiters: HashMap<CacheKey, Vec<Waiter<T>>>,
    pending: HashMap<CacheKey, Pending>,
    next_generation: u64,
}

/// Tracks running downloads per key and fans their outcome out to waiters.
///
/// Both maps live under one lock and are always mutated together. Waiters
/// are invoked outside the lock, so a waiter may start a new request for the
/// same key without deadlocking.
///
/// Every download carries a generation number. A download only resolves the
/// waiters registered under its own generation, so one that finishes after
/// being cancelled never touches a successor started for the same key.
pub struct InFlightRegistry<T> {
    state: Mutex<State<T>>,
    runtime: Handle,
}

impl<T> std::fmt::Debug for InFlightRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("pending", &self.state.lock().pending.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> InFlightRegistry<T> {
    /// Creates an empty registry spawning downloads on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            state: Mutex::new(State {
                waiters: HashMap::new(),
                pending: HashMap::new(),
                next_generation: 0,
            }),
            runtime,
        }
    }

    /// Queues `on_result` behind the running download for `key`, or starts
    /// one with `start` if there is none.
    ///
    /// `start` runs under the registry lock and must only build the future;
    /// it must not call back into the registry.
    pub fn join_or_start<F, Fut>(
        self: &Arc<Self>,
        key: CacheKey,
        on_result: Waiter<T>,
        start: F,
    ) -> JoinOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        let mut state = self.state.lock();

        if let Some(waiters) = state.waiters.get_mut(&key) {
            waiters.push(on_result);
            trace!(key = %key, waiters = waiters.len(), "Joined in-flight download");
            return JoinOutcome::Joined;
        }

        let generation = state.next_generation;
        state.next_generation = state.next_generation.wrapping_add(1);

        let registry = Arc::clone(self);
        let task_key = key.clone();
        let download = start();
        let task = self.runtime.spawn(async move {
            let outcome = match AssertUnwindSafe(download).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(key = %task_key, "Download task panicked");
                    None
                }
            };
            registry.resolve(&task_key, generation, outcome);
        });

        state.waiters.insert(key.clone(), vec![on_result]);
        state.pending.insert(
            key.clone(),
            Pending {
                generation,
                handle: task.abort_handle(),
            },
        );
        debug!(key = %key, generation, "Started download");
        JoinOutcome::Started
    }

    /// Removes `key` and hands `outcome` to every waiter queued behind the
    /// download `generation`.
    ///
    /// Does nothing if that download was already cancelled, even when a newer
    /// one now runs for the same key.
    fn resolve(&self, key: &CacheKey, generation: u64, outcome: Option<T>) {
        let waiters = {
            let mut state = self.state.lock();
            if state.pending.get(key).is_none_or(|p| p.generation != generation) {
                trace!(key = %key, generation, "Stale download result dropped");
                return;
            }
            state.pending.remove(key);
            state.waiters.remove(key).unwrap_or_default()
        };
        trace!(key = %key, waiters = waiters.len(), found = outcome.is_some(), "Download resolved");
        fan_out(key, waiters, &outcome);
    }

    /// Aborts the download for `key`; its waiters receive `None`.
    ///
    /// Returns false if nothing was in flight for `key`.
    pub fn cancel(&self, key: &CacheKey) -> bool {
        let (waiters, pending) = {
            let mut state = self.state.lock();
            (state.waiters.remove(key), state.pending.remove(key))
        };
        if let Some(pending) = pending {
            pending.handle.abort();
        }
        let Some(waiters) = waiters else {
            return false;
        };
        debug!(key = %key, waiters = waiters.len(), "Cancelled download");
        fan_out(key, waiters, &None);
        true
    }

    /// Aborts every download; all waiters receive `None`.
    pub fn cancel_all(&self) {
        let (waiters, pending) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.pending),
            )
        };
        for p in pending.values() {
            p.handle.abort();
        }
        if !waiters.is_empty() {
            debug!(count = waiters.len(), "Cancelled all downloads");
        }
        for (key, list) in waiters {
            fan_out(&key, list, &None);
        }
    }

    /// Returns true if a download for `key` is running.
    #[must_use]
    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.state.lock().pending.contains_key(key)
    }

    /// Number of callers queued on `key`.
    #[must_use]
    pub fn waiter_count(&self, key: &CacheKey) -> usize {
        self.state.lock().waiters.get(key).map_or(0, Vec::len)
    }

    /// Number of downloads in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

fn fan_out<T: Clone>(key: &CacheKey, waiters: Vec<Waiter<T>>, outcome: &Option<T>) {
    for waiter in waiters {
        let outcome = outcome.clone();
        if std::panic::catch_unwind(AssertUnwindSafe(move || waiter(outcome))).is_err() {
            error!(key = %key, "Image callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    fn registry() -> Arc<InFlightRegistry<u32>> {
        Arc::new(InFlightRegistry::new(Handle::current()))
    }

    fn sender(tx: &mpsc::UnboundedSender<Option<u32>>) -> Waiter<u32> {
        let tx = tx.clone();
        Box::new(move |v| {
            let _ = tx.send(v);
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_download_for_many_waiters() {
        let registry = registry();
        let key = CacheKey::from_url("https://x/a.jpg");
        let starts = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let mut gate_rx = Some(gate_rx);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..10 {
            let starts = starts.clone();
            let gate = gate_rx.take();
            registry.join_or_start(key.clone(), sender(&tx), move || {
                starts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    Some(7)
                }
            });
        }

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(registry.waiter_count(&key), 10);
        assert!(registry.is_loading(&key));

        gate_tx.send(()).unwrap();
        for _ in 0..10 {
            assert_eq!(rx.recv().await.unwrap(), Some(7));
        }
        assert!(!registry.is_loading(&key));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_join_outcomes() {
        let registry = registry();
        let key = CacheKey::from_url("k");
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = registry.join_or_start(key.clone(), sender(&tx), || std::future::pending());
        let second = registry.join_or_start(key.clone(), sender(&tx), || std::future::pending());

        assert_eq!(first, JoinOutcome::Started);
        assert_eq!(second, JoinOutcome::Joined);
        registry.cancel_all();
    }

    #[tokio::test]
    async fn test_failure_resolves_all_and_clears_key() {
        let registry = registry();
        let key = CacheKey::from_url("offline");
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.join_or_start(key.clone(), sender(&tx), || async { None });
        registry.join_or_start(key.clone(), sender(&tx), || async { Some(1) });

        assert_eq!(rx.recv().await.unwrap(), None);
        assert_eq!(rx.recv().await.unwrap(), None);
        assert_eq!(registry.pending_count(), 0);

        let outcome = registry.join_or_start(key, sender(&tx), || async { Some(2) });
        assert_eq!(outcome, JoinOutcome::Started);
        assert_eq!(rx.recv().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_cancel_resolves_waiters_once() {
        let registry = registry();
        let key = CacheKey::from_url("slow");
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.join_or_start(key.clone(), sender(&tx), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Some(1)
        });
        registry.join_or_start(key.clone(), sender(&tx), || async { Some(1) });

        assert!(registry.cancel(&key));
        assert!(!registry.cancel(&key));
        assert_eq!(rx.recv().await.unwrap(), None);
        assert_eq!(rx.recv().await.unwrap(), None);

        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_panicking_download_resolves_none() {
        let registry = registry();
        let key = CacheKey::from_url("boom");
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.join_or_start(key.clone(), sender(&tx), || async {
            let outcome: Option<u32> = panic!("decoder exploded");
            #[allow(unreachable_code)]
            outcome
        });

        assert_eq!(rx.recv().await.unwrap(), None);
        assert!(!registry.is_loading(&key));
    }

    #[tokio::test]
    async fn test_panicking_waiter_does_not_starve_others() {
        let registry = registry();
        let key = CacheKey::from_url("k");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        registry.join_or_start(
            key.clone(),
            Box::new(|_| panic!("bad callback")),
            move || async move {
                let _ = gate_rx.await;
                Some(3)
            },
        );
        registry.join_or_start(key, sender(&tx), || async { None });
        gate_tx.send(()).unwrap();

        assert_eq!(rx.recv().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_waiter_can_restart_same_key() {
        let registry = registry();
        let key = CacheKey::from_url("again");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let inner_registry = registry.clone();
        let inner_key = key.clone();
        let inner_tx = tx.clone();
        registry.join_or_start(
            key,
            Box::new(move |first| {
                assert_eq!(first, Some(1));
                inner_registry.join_or_start(inner_key, sender(&inner_tx), || async { Some(2) });
            }),
            || async { Some(1) },
        );

        assert_eq!(rx.recv().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_cancelled_download_does_not_resolve_successor() {
        let registry = registry();
        let key = CacheKey::from_url("reused");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let inner_registry = registry.clone();
        let inner_key = key.clone();
        let inner_tx = tx.clone();
        registry.join_or_start(key.clone(), sender(&tx), move || async move {
            // cancelled and replaced after the fetch, before the result lands
            assert!(inner_registry.cancel(&inner_key));
            inner_registry.join_or_start(inner_key, sender(&inner_tx), move || async move {
                let _ = gate_rx.await;
                Some(2)
            });
            Some(1)
        });

        assert_eq!(rx.recv().await.unwrap(), None);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(registry.is_loading(&key));
        assert_eq!(registry.waiter_count(&key), 1);

        gate_tx.send(()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some(2));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for url in ["a", "b", "c"] {
            registry.join_or_start(CacheKey::from_url(url), sender(&tx), || std::future::pending());
        }
        assert_eq!(registry.pending_count(), 3);

        registry.cancel_all();

        assert_eq!(registry.pending_count(), 0);
        for _ in 0..3 {
            assert_eq!(rx.recv().await.unwrap(), None);
        }
    }
}
