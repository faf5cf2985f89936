//! Barrier coordination over the metric store
//!
//! Clients never talk to each other. A rendezvous is built from two store
//! operations only: every client atomically increments a counter when it
//! arrives, then polls that counter until it reaches the expected population.
//!
//! ```text
//! client 0        store "ready"        client 1        client 2
//!    |--- +1 ------->  1                   |               |
//!    |--- get -----> 1 (poll)              |--- +1 ------> 2
//!    |                                     |--- get -----> 2 (poll)
//!    |                 3  <----------------------------------- +1
//!    |--- get -----> 3  done               |--- get -----> 3  done
//! ```
//!
//! Store failures during polling are retried on the same cadence until the
//! wait's timeout. In a standalone run there is no store: reads return NaN and
//! every wait resolves immediately.

use crate::distributed::store::{Metric, MetricQuery, MetricStore, StoreError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Default interval between condition polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from barrier waits
#[derive(Debug, Error)]
pub enum BarrierError {
    #[error("Value {last_value} for {metric} never matched condition {condition}")]
    Timeout {
        metric: String,
        condition: String,
        last_value: f64,
    },

    #[error("Failed to get value for {metric} that matches condition {condition}. Error: {source}")]
    TimeoutAfterError {
        metric: String,
        condition: String,
        #[source]
        source: StoreError,
    },
}

/// A predicate over a metric value, polled until it holds
pub struct Condition {
    pub query: MetricQuery,
    pub timeout: Option<Duration>,
    description: String,
    predicate: Box<dyn Fn(f64) -> bool + Send + Sync>,
}

impl Condition {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(f64) -> bool + Send + Sync + 'static,
    {
        Self {
            query: MetricQuery::new(name, None),
            timeout: None,
            description: "<custom>".to_string(),
            predicate: Box::new(predicate),
        }
    }

    /// Condition satisfied once the metric is at least `target`
    pub fn at_least(name: impl Into<String>, target: f64) -> Self {
        Self::new(name, move |v| v >= target).described_as(format!(">= {}", target))
    }

    pub fn key(mut self, key: Option<String>) -> Self {
        self.query.key = key;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.query.namespace = namespace.into();
        self
    }

    /// Give up after `timeout`; `None` or zero polls forever
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Human-readable form used in timeout errors
    pub fn described_as(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// NaN never satisfies a condition
    pub fn is_satisfied(&self, value: f64) -> bool {
        !value.is_nan() && (self.predicate)(value)
    }

    fn metric_name(&self) -> String {
        match self.query.key {
            Some(ref key) => format!("{}[{}]", self.query.name, key),
            None => self.query.name.clone(),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("query", &self.query)
            .field("timeout", &self.timeout)
            .field("description", &self.description)
            .finish()
    }
}

/// Rendezvous between clients through the shared metric store
#[derive(Clone)]
pub struct BarrierCoordinator {
    store: Option<Arc<dyn MetricStore>>,
    concurrency: u64,
    poll_interval: Duration,
}

impl BarrierCoordinator {
    /// Coordinator backed by a store, expecting `concurrency` participants
    pub fn new(store: Arc<dyn MetricStore>, concurrency: u64) -> Self {
        Self {
            store: Some(store),
            concurrency,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Coordinator for a run without a store
    pub fn standalone() -> Self {
        Self {
            store: None,
            concurrency: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Number of clients expected at a barrier by default
    pub fn concurrency(&self) -> u64 {
        self.concurrency
    }

    /// Current value of a metric, NaN without a store
    pub async fn get(&self, query: &MetricQuery) -> Result<f64, StoreError> {
        match self.store {
            Some(ref store) => Ok(store.get(query).await?.resolve(query.key.as_deref())),
            None => Ok(f64::NAN),
        }
    }

    /// Poll until `condition` holds and return the satisfying value
    pub async fn wait_for_condition(&self, condition: Condition) -> Result<f64, BarrierError> {
        match self.store {
            Some(ref store) => self.poll_until(store.as_ref(), &condition, Instant::now()).await,
            None => Ok(f64::NAN),
        }
    }

    /// Poll loop shared by every wait; the deadline counts from `start`
    async fn poll_until(
        &self,
        store: &dyn MetricStore,
        condition: &Condition,
        start: Instant,
    ) -> Result<f64, BarrierError> {
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            match store.get(&condition.query).await {
                Ok(value) => {
                    let value = value.resolve(condition.query.key.as_deref());
                    debug!(metric = %condition.metric_name(), value, attempt, "polled metric");
                    if condition.is_satisfied(value) {
                        return Ok(value);
                    }
                    if !self.should_continue(condition, start) {
                        return Err(BarrierError::Timeout {
                            metric: condition.metric_name(),
                            condition: condition.description.clone(),
                            last_value: value,
                        });
                    }
                }
                Err(e) => {
                    warn!(metric = %condition.metric_name(), error = %e, attempt, "metric read failed, retrying");
                    if !self.should_continue(condition, start) {
                        return Err(BarrierError::TimeoutAfterError {
                            metric: condition.metric_name(),
                            condition: condition.description.clone(),
                            source: e,
                        });
                    }
                }
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Wait until a metric is at least `value` (default: concurrency)
    pub async fn wait_for_value(
        &self,
        name: &str,
        key: Option<String>,
        value: Option<f64>,
        timeout: Option<Duration>,
    ) -> Result<f64, BarrierError> {
        let target = value.unwrap_or(self.concurrency as f64);
        let condition = Condition::at_least(name, target).key(key).timeout(timeout);
        self.wait_for_condition(condition).await
    }

    /// Increment a counter by one, then wait for it to reach `value`
    pub async fn increment_and_wait_for_value(
        &self,
        name: &str,
        value: Option<f64>,
        timeout: Option<Duration>,
    ) -> Result<f64, BarrierError> {
        let Some(ref store) = self.store else {
            return Ok(f64::NAN);
        };

        let metric = Metric::counter(name, None);
        let target = value.unwrap_or(self.concurrency as f64);
        let condition = Condition::at_least(name, target).timeout(timeout);

        let start = Instant::now();
        loop {
            match store.increment(&metric).await {
                Ok(arrived) => {
                    debug!(barrier = name, arrived, target, "arrived at barrier");
                    break;
                }
                Err(e) => {
                    warn!(barrier = name, error = %e, "barrier increment failed, retrying");
                    if !self.should_continue(&condition, start) {
                        return Err(BarrierError::TimeoutAfterError {
                            metric: name.to_string(),
                            condition: condition.description.clone(),
                            source: e,
                        });
                    }
                    sleep(self.poll_interval).await;
                }
            }
        }

        self.poll_until(store.as_ref(), &condition, start).await
    }

    /// Block until `value` clients (default: concurrency) reach the barrier `name`
    pub async fn barrier(
        &self,
        name: &str,
        value: Option<f64>,
        timeout: Option<Duration>,
    ) -> Result<f64, BarrierError> {
        self.increment_and_wait_for_value(name, value, timeout).await
    }

    /// Whether another poll fits before the deadline
    fn should_continue(&self, condition: &Condition, start: Instant) -> bool {
        match condition.timeout {
            Some(timeout) => start.elapsed() + self.poll_interval < timeout,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::memory::InMemoryMetricStore;
    use crate::distributed::store::MetricValue;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Store that answers reads from a fixed script, repeating the last value
    struct ScriptedStore {
        values: Mutex<VecDeque<f64>>,
    }

    impl ScriptedStore {
        fn new(values: &[f64]) -> Self {
            Self {
                values: Mutex::new(values.iter().copied().collect()),
            }
        }
    }

    #[async_trait]
    impl MetricStore for ScriptedStore {
        async fn get(&self, _query: &MetricQuery) -> Result<MetricValue, StoreError> {
            let mut values = self.values.lock().unwrap();
            let value = if values.len() > 1 {
                values.pop_front().unwrap()
            } else {
                *values.front().unwrap()
            };
            Ok(MetricValue::scalar(value))
        }

        async fn increment(&self, _metric: &Metric) -> Result<f64, StoreError> {
            Ok(1.0)
        }
    }

    #[tokio::test]
    async fn test_standalone_get_is_nan() {
        let coordinator = BarrierCoordinator::standalone();
        let value = coordinator.get(&MetricQuery::new("anything", None)).await.unwrap();
        assert!(value.is_nan());
    }

    #[tokio::test]
    async fn test_standalone_waits_resolve_immediately() {
        let coordinator = BarrierCoordinator::standalone();
        let start = Instant::now();

        let condition = Condition::new("never", |_| false).timeout(Some(Duration::from_secs(60)));
        assert!(coordinator.wait_for_condition(condition).await.is_ok());
        assert!(coordinator.barrier("ready", Some(100.0), None).await.is_ok());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_on_poll_reaching_target() {
        let store = Arc::new(ScriptedStore::new(&[0.0, 1.0, 2.0, 3.0]));
        let coordinator = BarrierCoordinator::new(store, 3);
        let start = Instant::now();

        let value = coordinator.wait_for_value("ready", None, None, None).await.unwrap();

        assert_eq!(value, 3.0);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_value_tolerates_overshoot() {
        let store = Arc::new(ScriptedStore::new(&[1.0, 5.0]));
        let coordinator = BarrierCoordinator::new(store, 3);

        let value = coordinator.wait_for_value("ready", None, None, None).await.unwrap();
        assert_eq!(value, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_target_overrides_concurrency() {
        let store = Arc::new(ScriptedStore::new(&[1.0, 2.0]));
        let coordinator = BarrierCoordinator::new(store, 10);

        let value = coordinator.wait_for_value("ready", None, Some(2.0), None).await.unwrap();
        assert_eq!(value, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_names_condition() {
        let store = Arc::new(ScriptedStore::new(&[1.0]));
        let coordinator = BarrierCoordinator::new(store, 3);

        let err = coordinator
            .wait_for_value("ready", None, None, Some(Duration::from_secs(5)))
            .await
            .unwrap_err();

        match err {
            BarrierError::Timeout { ref metric, ref condition, last_value } => {
                assert_eq!(metric, "ready");
                assert_eq!(condition, ">= 3");
                assert_eq!(last_value, 1.0);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("ready"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nan_never_satisfies() {
        let store = Arc::new(InMemoryMetricStore::new());
        let coordinator = BarrierCoordinator::new(store, 1);

        let condition = Condition::new("missing", |_| true).timeout(Some(Duration::from_secs(3)));
        let err = coordinator.wait_for_condition(condition).await.unwrap_err();
        assert!(matches!(err, BarrierError::Timeout { last_value, .. } if last_value.is_nan()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_errors_are_retried() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.set(&MetricQuery::new("ready", None), 2.0);
        store.fail_next_reads(3);
        let coordinator = BarrierCoordinator::new(store.clone(), 2);

        let value = coordinator
            .wait_for_value("ready", None, None, Some(Duration::from_secs(30)))
            .await
            .unwrap();

        assert_eq!(value, 2.0);
        assert_eq!(store.reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_store_errors_time_out() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.fail_next_reads(usize::MAX);
        let coordinator = BarrierCoordinator::new(store, 2);

        let err = coordinator
            .wait_for_value("ready", None, None, Some(Duration::from_secs(4)))
            .await
            .unwrap_err();
        assert!(matches!(err, BarrierError::TimeoutAfterError { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keyed_condition() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.set(&MetricQuery::new("logins", Some("eu".into())), 4.0);
        store.set(&MetricQuery::new("logins", Some("us".into())), 1.0);
        let coordinator = BarrierCoordinator::new(store, 1);

        let value = coordinator
            .wait_for_value("logins", Some("eu".into()), Some(4.0), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(value, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keyed_wait_ignores_other_keys() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.set(&MetricQuery::new("logins", Some("us".into())), 3.0);
        let coordinator = BarrierCoordinator::new(store, 1);

        let err = coordinator
            .wait_for_value("logins", Some("eu".into()), Some(3.0), Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        match err {
            BarrierError::Timeout { metric, last_value, .. } => {
                assert_eq!(metric, "logins[eu]");
                assert!(last_value.is_nan());
            }
            other => panic!("unexpected error {:?}", other),
        }

        let query = MetricQuery::new("logins", Some("eu".into()));
        assert!(coordinator.get(&query).await.unwrap().is_nan());
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_clients_rendezvous() {
        let store: Arc<dyn MetricStore> = Arc::new(InMemoryMetricStore::new());
        let mut handles = Vec::new();

        for client in 0..3u64 {
            let coordinator = BarrierCoordinator::new(store.clone(), 3);
            handles.push(tokio::spawn(async move {
                sleep(Duration::from_secs(client * 2)).await;
                coordinator.barrier("ready", None, Some(Duration::from_secs(30))).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 3.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_times_out_when_clients_missing() {
        let store: Arc<dyn MetricStore> = Arc::new(InMemoryMetricStore::new());
        let coordinator = BarrierCoordinator::new(store.clone(), 3);

        let err = coordinator
            .barrier("ready", None, Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, BarrierError::Timeout { last_value, .. } if last_value == 1.0));
    }
}
