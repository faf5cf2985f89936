//! Remote metric store
//!
//! The only state shared between client processes lives in a remote store of
//! named, optionally keyed, numeric metrics. Clients read values and perform
//! atomic increments over request/response calls; nothing else is shared.
//!
//! # Wire format
//!
//! ```text
//! GET  {url}/executions/{id}/metrics?namespace=..&name=..[&key=..]
//!      -> {"metricValue": 3, "metricValueMap": {"a": 1, "b": 2}}
//! POST {url}/executions/{id}/metrics/increment   body: Metric
//!      -> {"metricValue": 4}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Namespace used for script-defined metrics
pub const USER_NAMESPACE: &str = "User";

/// A metric write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Metric {
    /// A unit increment of a user counter
    pub fn counter(name: impl Into<String>, key: Option<String>) -> Self {
        Self {
            namespace: USER_NAMESPACE.to_string(),
            name: name.into(),
            key,
            value: 1.0,
            units: None,
        }
    }
}

/// A metric read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricQuery {
    pub namespace: String,
    pub name: String,
    pub key: Option<String>,
}

impl MetricQuery {
    pub fn new(name: impl Into<String>, key: Option<String>) -> Self {
        Self {
            namespace: USER_NAMESPACE.to_string(),
            name: name.into(),
            key,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

impl From<&Metric> for MetricQuery {
    fn from(metric: &Metric) -> Self {
        Self {
            namespace: metric.namespace.clone(),
            name: metric.name.clone(),
            key: metric.key.clone(),
        }
    }
}

/// Store response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    #[serde(default)]
    pub metric_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_value_map: Option<HashMap<String, f64>>,
}

impl MetricValue {
    pub fn scalar(value: f64) -> Self {
        Self {
            metric_value: Some(value),
            metric_value_map: None,
        }
    }

    /// The numeric value for an optional key
    ///
    /// A keyed read only looks at `metricValueMap`; the unkeyed total never
    /// stands in for a key. A missing value resolves to NaN.
    pub fn resolve(&self, key: Option<&str>) -> f64 {
        let value = match key {
            Some(key) => self
                .metric_value_map
                .as_ref()
                .and_then(|map| map.get(key))
                .copied(),
            None => self.metric_value,
        };
        value.unwrap_or(f64::NAN)
    }
}

/// Errors talking to the metric store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metric store unreachable: {0}")]
    Transport(String),

    #[error("metric store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid metric store response: {0}")]
    Decode(String),
}

/// Counter store shared by all clients of an execution
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Read the current value of a metric
    async fn get(&self, query: &MetricQuery) -> Result<MetricValue, StoreError>;

    /// Atomically add `metric.value` to a metric and return the new value
    async fn increment(&self, metric: &Metric) -> Result<f64, StoreError>;
}

/// Metric store reached over HTTP
#[derive(Clone)]
pub struct HttpMetricStore {
    base_url: String,
    execution_id: i64,
    client: reqwest::Client,
}

impl HttpMetricStore {
    pub fn new(base_url: impl Into<String>, execution_id: i64, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("fleetsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            execution_id,
            client,
        })
    }

    fn metrics_url(&self) -> String {
        format!("{}/executions/{}/metrics", self.base_url, self.execution_id)
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, StoreError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MetricStore for HttpMetricStore {
    async fn get(&self, query: &MetricQuery) -> Result<MetricValue, StoreError> {
        let mut params = vec![
            ("namespace", query.namespace.as_str()),
            ("name", query.name.as_str()),
        ];
        if let Some(ref key) = query.key {
            params.push(("key", key.as_str()));
        }

        let resp = self
            .client
            .get(self.metrics_url())
            .query(&params)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Self::decode(resp).await
    }

    async fn increment(&self, metric: &Metric) -> Result<f64, StoreError> {
        let resp = self
            .client
            .post(format!("{}/increment", self.metrics_url()))
            .json(metric)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let value: MetricValue = Self::decode(resp).await?;
        Ok(value.resolve(metric.key.as_deref()))
    }
}
