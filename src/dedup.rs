//! Request deduplication.
//!
//! Concurrent calls that share a canonical key ride on one in-flight future
//! and observe the same outcome; the registry entry is removed the moment the
//! underlying call settles, success or failure.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;

use crate::error::ApiError;

type SharedResult = Result<Arc<dyn Any + Send + Sync>, ApiError>;
type InFlight = Shared<BoxFuture<'static, SharedResult>>;

/// Process-wide registry of in-flight requests, constructed once and injected
/// into the stores that need it.
pub struct RequestDeduper {
    inflight: Mutex<HashMap<String, InFlight>>,
}

/// Canonical key for a deduplicated operation: operation name plus the
/// serialized arguments. Calls that differ in any argument never coalesce.
pub fn request_key<A: Serialize>(operation: &str, args: &A) -> String {
    let args = serde_json::to_string(args).unwrap_or_else(|_| "null".to_string());
    format!("{}:{}", operation, args)
}

impl RequestDeduper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Run `factory` under `key`, or join the request already in flight for
    /// that key. Exactly one underlying call is made for any set of
    /// logically-identical concurrent callers.
    pub async fn run<T, F, Fut>(self: &Arc<Self>, key: String, factory: F) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            if let Some(existing) = inflight.get(&key) {
                log::debug!("Joining in-flight request for {}", key);
                existing.clone()
            } else {
                let registry = Arc::clone(self);
                let entry_key = key.clone();
                let fut = factory();
                let wrapped: InFlight = async move {
                    let result = fut
                        .await
                        .map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>);
                    // Settled: drop the entry regardless of outcome so the
                    // registry never accumulates stale keys.
                    registry
                        .inflight
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .remove(&entry_key);
                    result
                }
                .boxed()
                .shared();
                inflight.insert(key, wrapped.clone());
                wrapped
            }
        };

        let value = shared.await?;
        let value = value
            .downcast::<T>()
            .map_err(|_| ApiError::Internal("deduplication key reused across response types".into()))?;
        Ok((*value).clone())
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
