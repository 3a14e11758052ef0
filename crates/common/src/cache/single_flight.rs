//! Single-flight coordination for cache misses
//!
//! Concurrent misses for the same key collapse into one backend call; late
//! arrivers wait on the in-flight result. The wait is hard-bounded so a
//! stuck leader can never wedge its followers.

use crate::errors::{AppError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// Keyed promise map; values travel as serialized JSON
pub struct SingleFlight {
    inflight: Mutex<HashMap<String, broadcast::Sender<std::result::Result<String, String>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `loader` for `key`, collapsing concurrent calls.
    ///
    /// The first caller becomes the leader and executes the loader; everyone
    /// else subscribes and waits up to `timeout` for the leader's result.
    pub async fn run<F, Fut>(&self, key: &str, timeout: Duration, loader: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let receiver = {
            let mut map = self.inflight.lock().expect("single-flight lock poisoned");
            match map.get(key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    map.insert(key.to_string(), tx);
                    None
                }
            }
        };

        if let Some(mut rx) = receiver {
            return match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Ok(Ok(json))) => Ok(json),
                Ok(Ok(Err(message))) => Err(AppError::Internal { message }),
                // Leader dropped without sending
                Ok(Err(_)) => Err(AppError::Internal {
                    message: "single-flight leader vanished".to_string(),
                }),
                Err(_) => Err(AppError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
        }

        let result = loader().await;

        let sender = {
            let mut map = self.inflight.lock().expect("single-flight lock poisoned");
            map.remove(key)
        };
        if let Some(tx) = sender {
            let broadcast_value = match &result {
                Ok(json) => Ok(json.clone()),
                Err(e) => Err(e.to_string()),
            };
            // No receivers is fine; nobody was waiting
            let _ = tx.send(broadcast_value);
        }

        result
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_misses_collapse() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("shared", Duration::from_secs(2), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("value".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_each_load() {
        let flight = SingleFlight::new();
        for _ in 0..2 {
            let out = flight
                .run("k", Duration::from_secs(1), || async { Ok("v".to_string()) })
                .await
                .unwrap();
            assert_eq!(out, "v");
        }
    }

    #[tokio::test]
    async fn test_leader_error_propagates() {
        let flight = SingleFlight::new();
        let err = flight
            .run("bad", Duration::from_secs(1), || async {
                Err(AppError::Internal {
                    message: "boom".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
