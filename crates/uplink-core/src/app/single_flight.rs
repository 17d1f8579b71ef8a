//! SingleFlight - 同一キーの同時実行を 1 つにまとめる
//!
//! # 学習ポイント
//! - 実処理は `tokio::spawn` したタスクで走らせ、`Shared` で結果を複数の待ち手に配る
//! - 待ち手が全員キャンセルされてもタスクは最後まで進み、キーを外す
//! - キーの登録解除はタスク側の Drop ガードが行う（panic 時も残らない）
//! - ロックを跨いで await しない

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::domain::ClientError;

type Flight<V> = Shared<BoxFuture<'static, Option<V>>>;
type Registry<K, V> = Arc<Mutex<HashMap<K, Flight<V>>>>;

/// Coalesces concurrent calls that share a key into one execution.
///
/// The first caller for a key spawns the work; every caller arriving before
/// it settles awaits the same output. The work is detached from its callers:
/// it runs to completion even if all of them are cancelled, and the key is
/// free again as soon as it settles.
pub struct SingleFlight<K, V>
where
    V: Clone,
{
    inflight: Registry<K, V>,
}

impl<K, V> Clone for SingleFlight<K, V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    V: Clone,
{
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Removes the flight's key when the spawned task ends, however it ends.
struct Release<K: Eq + Hash, V: Clone> {
    registry: Registry<K, V>,
    key: K,
}

impl<K: Eq + Hash, V: Clone> Drop for Release<K, V> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` under `key`, or join the run already in flight.
    ///
    /// `f` is only invoked by the caller that starts the flight. Returns
    /// `None` when the spawned work panicked or the runtime shut it down.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(&key) {
                Some(existing) => {
                    debug!(?key, "joining in-flight call");
                    existing.clone()
                }
                None => {
                    let release = Release {
                        registry: Arc::clone(&self.inflight),
                        key: key.clone(),
                    };
                    let work = f();
                    let task = tokio::spawn(async move {
                        let _release = release;
                        work.await
                    });
                    let flight = async move {
                        match task.await {
                            Ok(output) => Some(output),
                            Err(err) => {
                                warn!(error = %err, "in-flight task did not complete");
                                None
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Request de-duplication by caller-supplied key.
///
/// Failures are shared too: every coalesced caller receives the same error.
pub struct Throttle<T: Clone> {
    flights: SingleFlight<String, Result<T, ClientError>>,
}

impl<T: Clone> Clone for Throttle<T> {
    fn clone(&self) -> Self {
        Self {
            flights: self.flights.clone(),
        }
    }
}

impl<T: Clone> Default for Throttle<T> {
    fn default() -> Self {
        Self {
            flights: SingleFlight::default(),
        }
    }
}

impl<T> Throttle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn throttle_request<F, Fut>(
        &self,
        key: impl Into<String>,
        f: F,
    ) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        self.flights
            .run(key.into(), f)
            .await
            .unwrap_or_else(|| {
                Err(ClientError::Network(
                    "in-flight request did not complete".into(),
                ))
            })
    }

    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn slow_call(
        calls: Arc<AtomicU32>,
        value: u32,
    ) -> impl Future<Output = Result<u32, ClientError>> + Send + 'static {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn same_key_is_coalesced() {
        let throttle = Throttle::new();
        let calls = Arc::new(AtomicU32::new(0));

        let (a, b) = tokio::join!(
            throttle.throttle_request("GET /courses", || slow_call(calls.clone(), 1)),
            throttle.throttle_request("GET /courses", || slow_call(calls.clone(), 2)),
        );

        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let throttle = Throttle::new();
        let calls = Arc::new(AtomicU32::new(0));

        let (a, b) = tokio::join!(
            throttle.throttle_request("a", || slow_call(calls.clone(), 1)),
            throttle.throttle_request("b", || slow_call(calls.clone(), 2)),
        );

        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn key_is_released_after_settling() {
        let throttle = Throttle::new();
        let calls = Arc::new(AtomicU32::new(0));

        let first = throttle
            .throttle_request("k", || slow_call(calls.clone(), 1))
            .await;
        assert_eq!(throttle.in_flight(), 0);
        let second = throttle
            .throttle_request("k", || slow_call(calls.clone(), 2))
            .await;

        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_shared_and_released() {
        let throttle: Throttle<u32> = Throttle::new();
        let calls = Arc::new(AtomicU32::new(0));
        let failing = |calls: Arc<AtomicU32>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<u32, _>(ClientError::Network("down".into()))
        };

        let (a, b) = tokio::join!(
            throttle.throttle_request("k", || failing(calls.clone())),
            throttle.throttle_request("k", || failing(calls.clone())),
        );
        assert_eq!(a, Err(ClientError::Network("down".into())));
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(throttle.in_flight(), 0);
    }

    #[tokio::test]
    async fn single_flight_runs_once_for_many_waiters() {
        let flights: SingleFlight<(), bool> = SingleFlight::new();
        let calls = Arc::new(AtomicU32::new(0));

        let waiters = (0..8).map(|_| {
            let flights = flights.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                flights
                    .run((), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        true
                    })
                    .await
            })
        });
        let results = futures::future::join_all(waiters).await;

        assert!(results.into_iter().all(|r| r.unwrap() == Some(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_leave_a_stale_flight() {
        let throttle = Throttle::new();
        let calls = Arc::new(AtomicU32::new(0));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            throttle.throttle_request("GET /courses", || slow_call(calls.clone(), 1)),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(throttle.in_flight(), 0);

        let fresh = throttle
            .throttle_request("GET /courses", || slow_call(calls.clone(), 2))
            .await;
        assert_eq!(fresh, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_work_releases_its_key() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();

        let first = flights
            .run("k", || async {
                if true {
                    panic!("boom");
                }
                1
            })
            .await;
        assert_eq!(first, None);
        assert_eq!(flights.in_flight(), 0);

        assert_eq!(flights.run("k", || async { 2 }).await, Some(2));
    }
}
