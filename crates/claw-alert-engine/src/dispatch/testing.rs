//! Fake datasources for tests.

#![allow(clippy::panic)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::datasource::{
    CloudDatapoint, CloudMetricsClient, DatasourceClient, DatasourceInstance, DatasourcePool,
    DatasourceRegistry, DatasourceType, HealthChecker, KubeEvent, KubeEventsClient, LogsClient,
    MetricSeries, MetricsClient, TraceRecord, TracesClient,
};
use crate::error::{EngineError, Result};

/// Scripted metrics backend that tracks call concurrency.
#[derive(Clone, Default)]
pub(crate) struct FakeMetrics {
    series: Arc<RwLock<Vec<MetricSeries>>>,
    delay_ms: Arc<AtomicU64>,
    fail: bool,
    panic: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeMetrics {
    pub(crate) fn new(series: Vec<MetricSeries>) -> Self {
        Self {
            series: Arc::new(RwLock::new(series)),
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn set_panic(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl MetricsClient for FakeMetrics {
    fn query_vector<'a>(&'a self, _query: &'a str) -> BoxFuture<'a, Result<Vec<MetricSeries>>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic.load(Ordering::SeqCst) {
                panic!("scripted metrics panic");
            }
            if self.fail {
                return Err(EngineError::QueryFailed {
                    id: "fake".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(self.series.read().clone())
        }
        .boxed()
    }
}

/// Log backend returning a fixed count.
#[derive(Clone, Copy, Default)]
pub(crate) struct FakeLogs(pub(crate) u64);

impl LogsClient for FakeLogs {
    fn count<'a>(
        &'a self,
        _query: &'a str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64>> {
        futures::future::ready(Ok(self.0)).boxed()
    }
}

/// Trace backend returning fixed traces.
#[derive(Clone, Default)]
pub(crate) struct FakeTraces(pub(crate) Vec<TraceRecord>);

impl TracesClient for FakeTraces {
    fn anomalous_traces<'a>(
        &'a self,
        _service: &'a str,
        _query: &'a str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<TraceRecord>>> {
        futures::future::ready(Ok(self.0.clone())).boxed()
    }
}

/// Cloud backend returning fixed datapoints.
#[derive(Clone, Default)]
pub(crate) struct FakeCloud(pub(crate) Vec<CloudDatapoint>);

impl CloudMetricsClient for FakeCloud {
    fn statistics<'a>(
        &'a self,
        _namespace: &'a str,
        _metric: &'a str,
        _statistic: &'a str,
        _period_secs: u64,
        _endpoints: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<CloudDatapoint>>> {
        futures::future::ready(Ok(self.0.clone())).boxed()
    }
}

/// Orchestrator backend returning fixed events.
#[derive(Clone, Default)]
pub(crate) struct FakeKube(pub(crate) Vec<KubeEvent>);

impl KubeEventsClient for FakeKube {
    fn warning_events<'a>(
        &'a self,
        _namespace: &'a str,
        _since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<KubeEvent>>> {
        futures::future::ready(Ok(self.0.clone())).boxed()
    }
}

/// Registry, pool and health checker over scripted clients.
#[derive(Clone, Default)]
pub(crate) struct FakeBackends {
    instances: Arc<RwLock<HashMap<String, DatasourceInstance>>>,
    clients: Arc<RwLock<HashMap<String, DatasourceClient>>>,
    metrics: Arc<RwLock<HashMap<String, FakeMetrics>>>,
    unhealthy: Arc<RwLock<HashSet<String>>>,
}

impl FakeBackends {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn register(self, id: &str, kind: DatasourceType, client: DatasourceClient) -> Self {
        self.instances.write().entry(id.to_string()).or_insert(DatasourceInstance {
            id: id.to_string(),
            kind,
            enabled: true,
            config: HashMap::new(),
        });
        self.clients.write().insert(id.to_string(), client);
        self
    }

    pub(crate) fn with_metrics(self, id: &str, client: FakeMetrics) -> Self {
        self.metrics.write().insert(id.to_string(), client.clone());
        self.register(id, DatasourceType::Prometheus, DatasourceClient::Metrics(Arc::new(client)))
    }

    pub(crate) fn with_logs(self, id: &str, client: FakeLogs) -> Self {
        self.register(id, DatasourceType::Loki, DatasourceClient::Logs(Arc::new(client)))
    }

    pub(crate) fn with_traces(self, id: &str, client: FakeTraces) -> Self {
        self.register(id, DatasourceType::Jaeger, DatasourceClient::Traces(Arc::new(client)))
    }

    pub(crate) fn with_cloud(self, id: &str, client: FakeCloud) -> Self {
        self.register(
            id,
            DatasourceType::CloudWatch,
            DatasourceClient::CloudMetrics(Arc::new(client)),
        )
    }

    pub(crate) fn with_kube(self, id: &str, client: FakeKube) -> Self {
        self.register(
            id,
            DatasourceType::KubernetesEvent,
            DatasourceClient::KubernetesEvents(Arc::new(client)),
        )
    }

    pub(crate) fn with_instance(self, instance: DatasourceInstance) -> Self {
        self.instances.write().insert(instance.id.clone(), instance);
        self
    }

    pub(crate) fn unhealthy(self, id: &str) -> Self {
        self.unhealthy.write().insert(id.to_string());
        self
    }

    pub(crate) fn metrics_calls(&self, id: &str) -> usize {
        self.metrics.read().get(id).map_or(0, FakeMetrics::calls)
    }
}

impl DatasourceRegistry for FakeBackends {
    fn get_instance<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<DatasourceInstance>> {
        let instance = self
            .instances
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::DatasourceNotFound { id: id.to_string() });
        futures::future::ready(instance).boxed()
    }
}

impl DatasourcePool for FakeBackends {
    fn get_client<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<DatasourceClient>> {
        let client = self
            .clients
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::DatasourceNotFound { id: id.to_string() });
        futures::future::ready(client).boxed()
    }
}

impl HealthChecker for FakeBackends {
    fn check_health<'a>(&'a self, instance: &'a DatasourceInstance) -> BoxFuture<'a, bool> {
        let healthy = !self.unhealthy.read().contains(&instance.id);
        futures::future::ready(healthy).boxed()
    }
}

/// Builds an evaluation context over an in-memory event cache.
pub(crate) fn context<'a>(
    rule: &'a crate::types::AlertRule,
    datasource_id: &'a str,
    events: &'a crate::cache::InMemoryEventCache,
) -> super::EvalContext<'a> {
    super::EvalContext {
        rule,
        datasource_id,
        events,
        now: Utc::now(),
    }
}
