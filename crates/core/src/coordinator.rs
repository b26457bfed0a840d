//! # Request Coordinator
//!
//! Wraps the agent transport with in-flight request coalescing and a
//! short-lived TTL cache, keyed by `(user, action, week)`. Guarantees
//! at-most-one outstanding network call per key: concurrent callers join
//! the pending call and observe the identical resolved value.
//!
//! Lookup order is mandatory: fresh cache hit, then in-flight join, then a
//! new call. Only successes populate the cache, so a transient failure is
//! retryable with the same key immediately.

use crate::gateway::AgentTransport;
use crate::models::{AgentFailure, AgentOutcome, AgentRequest, RequestKey};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

type SharedCall = Shared<BoxFuture<'static, AgentOutcome>>;

/// A completed result held until its expiry instant (lazy eviction)
struct CacheEntry {
    outcome: AgentOutcome,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    in_flight: HashMap<RequestKey, SharedCall>,
    cache: HashMap<RequestKey, CacheEntry>,
}

/// Deduplicating, caching front for the agent gateway
///
/// Explicitly constructed and passed by handle - never a global - so tests
/// can instantiate isolated coordinators per case.
pub struct RequestCoordinator {
    transport: Arc<dyn AgentTransport>,
    ttl: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl RequestCoordinator {
    /// Create a coordinator over a transport with the given cache TTL
    pub fn new(transport: Arc<dyn AgentTransport>, ttl: Duration) -> Self {
        Self {
            transport,
            ttl,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Dispatch one request, coalescing with any identical pending call
    pub async fn dispatch(&self, request: AgentRequest) -> AgentOutcome {
        let key = request.key();

        let call = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    return Err(AgentFailure {
                        agent: request.agent,
                        message: format!("coordinator lock poisoned: {}", e),
                    })
                }
            };

            // 1. Fresh cached result wins outright
            if let Some(entry) = inner.cache.get(&key) {
                if entry.expires_at > Instant::now() {
                    tracing::debug!(action = %key.action, week = key.week, "Cache hit");
                    return entry.outcome.clone();
                }
                inner.cache.remove(&key);
            }

            // 2. Join an in-flight call for the same key
            if let Some(pending) = inner.in_flight.get(&key) {
                tracing::debug!(action = %key.action, week = key.week, "Joining in-flight call");
                pending.clone()
            } else {
                // 3. Register a new call. The future itself removes its
                // in-flight entry and populates the cache on success, so a
                // failure can never leave a permanently stuck key.
                let call = self.make_call(request, key.clone());
                inner.in_flight.insert(key, call.clone());

                // Drive the call to completion even if every caller drops,
                // so the cleanup above always runs.
                tokio::spawn(call.clone());
                call
            }
        };

        call.await
    }

    fn make_call(&self, request: AgentRequest, key: RequestKey) -> SharedCall {
        let transport = Arc::clone(&self.transport);
        let inner = Arc::clone(&self.inner);
        let ttl = self.ttl;

        async move {
            let outcome = transport.call(&request).await;

            if let Ok(mut guard) = inner.lock() {
                guard.in_flight.remove(&key);
                if outcome.is_ok() {
                    guard.cache.insert(
                        key,
                        CacheEntry {
                            outcome: outcome.clone(),
                            expires_at: Instant::now() + ttl,
                        },
                    );
                }
            }

            outcome
        }
        .boxed()
        .shared()
    }

    /// Drop cached results for one user and week (rollover, hard reset)
    pub fn invalidate_user_week(&self, user_id: &str, week: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .cache
                .retain(|k, _| !(k.user_id == user_id && k.week == week));
        }
    }

    /// Drop every cached result
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.cache.clear();
        }
    }

    /// Number of live cached entries (expired but unevicted entries count)
    pub fn cached_len(&self) -> usize {
        self.inner.lock().map(|i| i.cache.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Transport that counts calls and can be held open to force overlap
    struct ScriptedTransport {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    impl ScriptedTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: None,
                fail: false,
            })
        }

        fn gated(gate: Arc<Notify>, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Some(gate),
                fail,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: None,
                fail: true,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentTransport for ScriptedTransport {
        async fn call(&self, request: &AgentRequest) -> AgentOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                Err(AgentFailure {
                    agent: request.agent,
                    message: "remote unavailable".to_string(),
                })
            } else {
                Ok(serde_json::json!({"call": n, "action": request.action}))
            }
        }
    }

    fn request(action: &str, week: u32) -> AgentRequest {
        AgentRequest {
            agent: AgentId::CurriculumPlanner,
            action: action.to_string(),
            user_id: "user-1".to_string(),
            week,
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let gate = Arc::new(Notify::new());
        let transport = ScriptedTransport::gated(Arc::clone(&gate), false);
        let coordinator = Arc::new(RequestCoordinator::new(
            transport.clone(),
            Duration::from_secs(30),
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let c = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                c.dispatch(request("generate_plan", 3)).await
            }));
        }

        // Let every caller reach the coordinator, then release the transport
        tokio::task::yield_now().await;
        gate.notify_waiters();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(transport.call_count(), 1, "exactly one underlying call");
        let first = outcomes[0].clone().unwrap();
        for outcome in outcomes {
            assert_eq!(outcome.unwrap(), first, "all callers see identical value");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_within_ttl_and_miss_after() {
        let transport = ScriptedTransport::new();
        let coordinator = RequestCoordinator::new(transport.clone(), Duration::from_secs(30));

        coordinator
            .dispatch(request("generate_plan", 3))
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 1);

        // Within the TTL window: served from cache
        tokio::time::advance(Duration::from_secs(10)).await;
        coordinator
            .dispatch(request("generate_plan", 3))
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 1);

        // Past expiry: a fresh call is issued
        tokio::time::advance(Duration::from_secs(21)).await;
        coordinator
            .dispatch(request("generate_plan", 3))
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let transport = ScriptedTransport::new();
        let coordinator = RequestCoordinator::new(transport.clone(), Duration::from_secs(30));

        coordinator
            .dispatch(request("generate_plan", 3))
            .await
            .unwrap();
        coordinator
            .dispatch(request("generate_plan", 4))
            .await
            .unwrap();
        coordinator
            .dispatch(request("deliver_lesson", 3))
            .await
            .unwrap();

        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached_and_key_not_stuck() {
        let transport = ScriptedTransport::failing();
        let coordinator = RequestCoordinator::new(transport.clone(), Duration::from_secs(30));

        let first = coordinator.dispatch(request("generate_plan", 3)).await;
        assert!(first.is_err());
        assert_eq!(coordinator.cached_len(), 0, "failures never populate cache");

        // The failed key must be retryable immediately
        let second = coordinator.dispatch(request("generate_plan", 3)).await;
        assert!(second.is_err());
        assert_eq!(transport.call_count(), 2, "retry issues a new call");
    }

    #[tokio::test]
    async fn test_failure_fans_out_to_all_joined_callers() {
        let gate = Arc::new(Notify::new());
        let transport = ScriptedTransport::gated(Arc::clone(&gate), true);
        let coordinator = Arc::new(RequestCoordinator::new(
            transport.clone(),
            Duration::from_secs(30),
        ));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let c = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                c.dispatch(request("generate_plan", 3)).await
            }));
        }
        tokio::task::yield_now().await;
        gate.notify_waiters();

        for handle in handles {
            let failure = handle.await.unwrap().unwrap_err();
            assert_eq!(failure.message, "remote unavailable");
        }
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_user_week_forces_fresh_call() {
        let transport = ScriptedTransport::new();
        let coordinator = RequestCoordinator::new(transport.clone(), Duration::from_secs(30));

        coordinator
            .dispatch(request("generate_plan", 3))
            .await
            .unwrap();
        coordinator.invalidate_user_week("user-1", 3);
        coordinator
            .dispatch(request("generate_plan", 3))
            .await
            .unwrap();

        assert_eq!(transport.call_count(), 2);
    }
}
