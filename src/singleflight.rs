//! Keyed single-flight coordination
//!
//! At most one call per key runs at a time; callers arriving while it runs
//! await the same result. The work runs in its own task, so a caller that
//! stops waiting (timeout, dropped request) does not cancel it.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

use crate::errors::GatewayError;

type SharedCall<V> = Shared<BoxFuture<'static, Result<V, GatewayError>>>;
type Registry<K, V> = Arc<Mutex<HashMap<K, SharedCall<V>>>>;

/// In-flight call registry keyed by `K`
pub struct SingleFlight<K, V> {
    calls: Registry<K, V>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Removes the key from the registry when the task ends, even on panic or abort
struct Release<K: Eq + Hash, V> {
    calls: Registry<K, V>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for Release<K, V> {
    fn drop(&mut self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` for `key` unless a call for `key` is already in flight,
    /// in which case wait for that call's result instead.
    ///
    /// `start` is only invoked by the caller that begins a new flight.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<V, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, GatewayError>> + Send + 'static,
    {
        let call = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(call) = calls.get(&key) {
                trace!("Joining in-flight call");
                call.clone()
            } else {
                let release = Release {
                    calls: Arc::clone(&self.calls),
                    key: key.clone(),
                };
                let work = start();
                let handle = tokio::spawn(async move {
                    let _release = release;
                    work.await
                });

                let call: SharedCall<V> = async move { handle.await? }.boxed().shared();
                calls.insert(key, call.clone());
                call
            }
        };

        call.await
    }

    /// Number of calls currently in flight
    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
