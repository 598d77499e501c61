//! Datasource contracts consumed by the dispatcher.
//!
//! The engine never speaks a backend wire protocol itself. It resolves a
//! datasource id through a [`DatasourceRegistry`], checks it with a
//! [`HealthChecker`], and obtains a [`DatasourceClient`] from a
//! [`DatasourcePool`]. The client is a closed set of variants, one per
//! backend family, each wrapping that family's query contract.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Concrete backend product a datasource points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceType {
    /// Prometheus-compatible metrics.
    Prometheus,
    /// `VictoriaMetrics`.
    VictoriaMetrics,
    /// Grafana Loki.
    Loki,
    /// Elasticsearch.
    ElasticSearch,
    /// `VictoriaLogs`.
    VictoriaLogs,
    /// `ClickHouse` log tables.
    ClickHouse,
    /// Alibaba Cloud SLS.
    AliCloudSls,
    /// Jaeger traces.
    Jaeger,
    /// AWS `CloudWatch`.
    CloudWatch,
    /// Kubernetes events.
    KubernetesEvent,
    /// Any type this engine has no handler for.
    #[serde(other)]
    Unsupported,
}

impl DatasourceType {
    /// Returns the backend family handling this type, or `None` if the type
    /// is unsupported.
    #[must_use]
    pub const fn family(&self) -> Option<BackendFamily> {
        match self {
            Self::Prometheus | Self::VictoriaMetrics => Some(BackendFamily::Metrics),
            Self::Loki
            | Self::ElasticSearch
            | Self::VictoriaLogs
            | Self::ClickHouse
            | Self::AliCloudSls => Some(BackendFamily::Logs),
            Self::Jaeger => Some(BackendFamily::Traces),
            Self::CloudWatch => Some(BackendFamily::CloudMetrics),
            Self::KubernetesEvent => Some(BackendFamily::KubernetesEvents),
            Self::Unsupported => None,
        }
    }

    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prometheus => "prometheus",
            Self::VictoriaMetrics => "victoria_metrics",
            Self::Loki => "loki",
            Self::ElasticSearch => "elastic_search",
            Self::VictoriaLogs => "victoria_logs",
            Self::ClickHouse => "click_house",
            Self::AliCloudSls => "ali_cloud_sls",
            Self::Jaeger => "jaeger",
            Self::CloudWatch => "cloud_watch",
            Self::KubernetesEvent => "kubernetes_event",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for DatasourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query protocol family shared by several datasource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    /// Vector-returning metric queries.
    Metrics,
    /// Count-over-window log queries.
    Logs,
    /// Anomalous trace search.
    Traces,
    /// Per-endpoint cloud statistics.
    CloudMetrics,
    /// Orchestrator events.
    KubernetesEvents,
}

impl BackendFamily {
    /// Returns the family as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Logs => "logs",
            Self::Traces => "traces",
            Self::CloudMetrics => "cloud_metrics",
            Self::KubernetesEvents => "kubernetes_events",
        }
    }
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceInstance {
    /// Datasource identifier.
    pub id: String,
    /// Backend product.
    #[serde(rename = "type")]
    pub kind: DatasourceType,
    /// Whether the datasource may be queried.
    pub enabled: bool,
    /// Backend-specific connection settings.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// One series returned by a metrics query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    /// The series' label set.
    pub labels: HashMap<String, String>,
    /// The sample value.
    pub value: f64,
    /// Sample timestamp.
    pub timestamp: DateTime<Utc>,
}

/// An anomalous trace returned by a trace search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Trace identifier.
    pub trace_id: String,
    /// Service of the root span.
    pub service: String,
    /// Operation of the root span.
    pub operation: String,
    /// Trace duration in milliseconds.
    pub duration_ms: u64,
    /// Trace start time.
    pub start_time: DateTime<Utc>,
    /// Error or anomaly description.
    #[serde(default)]
    pub message: String,
}

/// A cloud monitoring statistic for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudDatapoint {
    /// The monitored endpoint.
    pub endpoint: String,
    /// The statistic's value over the period.
    pub value: f64,
}

/// An orchestrator warning event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeEvent {
    /// Namespace of the involved object.
    pub namespace: String,
    /// Kind of the involved object.
    pub kind: String,
    /// Name of the involved object.
    pub object_name: String,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// When the event was last seen.
    pub last_timestamp: DateTime<Utc>,
}

/// Vector query contract for metrics backends.
pub trait MetricsClient: Send + Sync {
    /// Runs an instant vector query.
    fn query_vector<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<MetricSeries>>>;
}

/// Count query contract for log backends.
pub trait LogsClient: Send + Sync {
    /// Counts log lines matching `query` in the window ending `end`.
    fn count<'a>(
        &'a self,
        query: &'a str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64>>;
}

/// Anomalous trace search contract.
pub trait TracesClient: Send + Sync {
    /// Returns anomalous traces of `service` matching `query` in the window.
    fn anomalous_traces<'a>(
        &'a self,
        service: &'a str,
        query: &'a str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<TraceRecord>>>;
}

/// Statistic query contract for cloud monitoring backends.
pub trait CloudMetricsClient: Send + Sync {
    /// Returns the latest `statistic` of `metric` for each endpoint.
    fn statistics<'a>(
        &'a self,
        namespace: &'a str,
        metric: &'a str,
        statistic: &'a str,
        period_secs: u64,
        endpoints: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<CloudDatapoint>>>;
}

/// Warning event listing contract for orchestrators.
pub trait KubeEventsClient: Send + Sync {
    /// Returns warning events in `namespace` (all if empty) since `since`.
    fn warning_events<'a>(
        &'a self,
        namespace: &'a str,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<KubeEvent>>>;
}

/// A live query client, one variant per backend family.
#[derive(Clone)]
pub enum DatasourceClient {
    /// Metrics backend.
    Metrics(Arc<dyn MetricsClient>),
    /// Logs backend.
    Logs(Arc<dyn LogsClient>),
    /// Traces backend.
    Traces(Arc<dyn TracesClient>),
    /// Cloud monitoring backend.
    CloudMetrics(Arc<dyn CloudMetricsClient>),
    /// Orchestrator events backend.
    KubernetesEvents(Arc<dyn KubeEventsClient>),
}

impl DatasourceClient {
    /// Returns the family this client speaks.
    #[must_use]
    pub const fn family(&self) -> BackendFamily {
        match self {
            Self::Metrics(_) => BackendFamily::Metrics,
            Self::Logs(_) => BackendFamily::Logs,
            Self::Traces(_) => BackendFamily::Traces,
            Self::CloudMetrics(_) => BackendFamily::CloudMetrics,
            Self::KubernetesEvents(_) => BackendFamily::KubernetesEvents,
        }
    }
}

impl fmt::Debug for DatasourceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DatasourceClient").field(&self.family()).finish()
    }
}

/// Resolves datasource ids to their registered configuration.
pub trait DatasourceRegistry: Send + Sync {
    /// Returns the datasource registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DatasourceNotFound` if no such datasource exists.
    fn get_instance<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<DatasourceInstance>>;
}

/// Hands out live clients for datasource ids.
pub trait DatasourcePool: Send + Sync {
    /// Returns a client for `id`.
    fn get_client<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<DatasourceClient>>;
}

/// Reports whether a datasource is reachable.
pub trait HealthChecker: Send + Sync {
    /// Returns true if the datasource answered its health probe.
    fn check_health<'a>(&'a self, instance: &'a DatasourceInstance) -> BoxFuture<'a, bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datasource_type_families() {
        assert_eq!(DatasourceType::Prometheus.family(), Some(BackendFamily::Metrics));
        assert_eq!(DatasourceType::VictoriaLogs.family(), Some(BackendFamily::Logs));
        assert_eq!(DatasourceType::Jaeger.family(), Some(BackendFamily::Traces));
        assert_eq!(DatasourceType::CloudWatch.family(), Some(BackendFamily::CloudMetrics));
        assert_eq!(
            DatasourceType::KubernetesEvent.family(),
            Some(BackendFamily::KubernetesEvents)
        );
        assert_eq!(DatasourceType::Unsupported.family(), None);
    }

    #[test]
    fn unknown_datasource_type_deserializes_as_unsupported() {
        let kind: DatasourceType = serde_json::from_str("\"graphite\"").unwrap();
        assert_eq!(kind, DatasourceType::Unsupported);
        let kind: DatasourceType = serde_json::from_str("\"loki\"").unwrap();
        assert_eq!(kind, DatasourceType::Loki);
    }

    #[test]
    fn instance_uses_type_key() {
        let json = r#"{"id": "prom-1", "type": "prometheus", "enabled": true}"#;
        let instance: DatasourceInstance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.kind, DatasourceType::Prometheus);
        assert!(instance.config.is_empty());
    }
}
