//! In-process metric store
//!
//! Backs local runs that still want barrier semantics between tasks, and the
//! multi-client scenarios in tests. Keyed metrics are tracked per key; the
//! unkeyed value of a metric is the sum over its keys.

use crate::distributed::store::{Metric, MetricQuery, MetricStore, MetricValue, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type MetricId = (String, String);

#[derive(Default)]
pub struct InMemoryMetricStore {
    metrics: Mutex<HashMap<MetricId, HashMap<Option<String>, f64>>>,
    failing_reads: AtomicUsize,
    reads: AtomicUsize,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` reads fail with a transport error
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Number of read calls served (including failed ones)
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Overwrite a metric value
    pub fn set(&self, query: &MetricQuery, value: f64) {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics
            .entry((query.namespace.clone(), query.name.clone()))
            .or_default()
            .insert(query.key.clone(), value);
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn get(&self, query: &MetricQuery) -> Result<MetricValue, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Transport("injected failure".to_string()));
        }

        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let Some(values) = metrics.get(&(query.namespace.clone(), query.name.clone())) else {
            return Ok(MetricValue::default());
        };

        let total: f64 = values.values().sum();
        let map: HashMap<String, f64> = values
            .iter()
            .filter_map(|(k, v)| k.as_ref().map(|k| (k.clone(), *v)))
            .collect();

        Ok(MetricValue {
            metric_value: Some(total),
            metric_value_map: (query.key.is_some() || !map.is_empty()).then_some(map),
        })
    }

    async fn increment(&self, metric: &Metric) -> Result<f64, StoreError> {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let value = metrics
            .entry((metric.namespace.clone(), metric.name.clone()))
            .or_default()
            .entry(metric.key.clone())
            .or_insert(0.0);
        *value += metric.value;
        Ok(*value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_returns_new_value() {
        let store = InMemoryMetricStore::new();
        let metric = Metric::counter("ready", None);

        assert_eq!(store.increment(&metric).await.unwrap(), 1.0);
        assert_eq!(store.increment(&metric).await.unwrap(), 2.0);

        let value = store.get(&MetricQuery::from(&metric)).await.unwrap();
        assert_eq!(value.resolve(None), 2.0);
    }

    #[tokio::test]
    async fn test_keyed_values() {
        let store = InMemoryMetricStore::new();
        store.increment(&Metric::counter("logins", Some("a".into()))).await.unwrap();
        store.increment(&Metric::counter("logins", Some("b".into()))).await.unwrap();
        store.increment(&Metric::counter("logins", Some("b".into()))).await.unwrap();

        let value = store.get(&MetricQuery::new("logins", None)).await.unwrap();
        assert_eq!(value.resolve(None), 3.0);
        assert_eq!(value.resolve(Some("b")), 2.0);
        assert!(value.resolve(Some("c")).is_nan());
    }

    #[tokio::test]
    async fn test_unknown_metric_is_nan() {
        let store = InMemoryMetricStore::new();
        let value = store.get(&MetricQuery::new("nothing", None)).await.unwrap();
        assert!(value.resolve(None).is_nan());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryMetricStore::new();
        store.fail_next_reads(2);
        let query = MetricQuery::new("x", None);

        assert!(store.get(&query).await.is_err());
        assert!(store.get(&query).await.is_err());
        assert!(store.get(&query).await.is_ok());
        assert_eq!(store.reads(), 3);
    }
}
