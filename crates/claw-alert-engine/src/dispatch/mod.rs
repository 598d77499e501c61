//! Datasource dispatch.
//!
//! The [`Dispatcher`] queries every datasource of a rule concurrently, hands
//! each result to the handler of the rule's backend family, pushes the
//! resulting event drafts to the event cache as soon as that datasource is
//! done, and merges the fingerprints of all datasources into one set.
//!
//! A failing datasource is logged and contributes nothing; it never aborts
//! the other datasources of the rule.

mod cloud;
mod kube;
mod logs;
mod metrics;
mod traces;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::EventCache;
use crate::datasource::{
    DatasourceClient, DatasourcePool, DatasourceRegistry, HealthChecker,
};
use crate::error::{EngineError, Result};
use crate::template;
use crate::types::{AlertCurEvent, AlertRule, QueryConfig};

/// What one datasource contributed to a tick.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    /// Fingerprints currently satisfying the rule's condition.
    pub fingerprints: Vec<String>,
    /// Fingerprints that matched but were outranked by a more urgent
    /// severity of the same instance.
    pub suppressed: Vec<String>,
    /// Events to write to the cache.
    pub events: Vec<AlertCurEvent>,
}

/// Summary of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Merged, de-duplicated current fingerprints.
    pub fingerprints: Vec<String>,
    /// Suppressed fingerprints that are not also current.
    pub suppressed: Vec<String>,
    /// Datasources that answered.
    pub datasources_queried: usize,
    /// Datasources that were skipped or failed.
    pub datasources_failed: usize,
    /// Events written to the cache.
    pub events_pushed: usize,
}

/// Per-datasource evaluation context handed to the backend handlers.
pub(crate) struct EvalContext<'a> {
    pub(crate) rule: &'a AlertRule,
    pub(crate) datasource_id: &'a str,
    pub(crate) events: &'a dyn EventCache,
    pub(crate) now: DateTime<Utc>,
}

impl EvalContext<'_> {
    /// Returns the cached state of `fingerprint`.
    pub(crate) async fn cached(&self, fingerprint: &str) -> Result<Option<AlertCurEvent>> {
        self.events
            .get_event(&self.rule.tenant_id, &self.rule.fault_center_id, fingerprint)
            .await
    }

    /// Merges `draft` over `cached` and renders its annotation.
    pub(crate) fn finalize_with(
        &self,
        draft: AlertCurEvent,
        cached: Option<&AlertCurEvent>,
    ) -> AlertCurEvent {
        let for_duration = Duration::from_secs(self.rule.for_duration_secs);
        let mut event = draft.merge_over(cached, for_duration, self.now);
        event.annotations = template::render(&self.rule.annotations, &event.labels);
        event
    }

    /// Returns the start of a trailing window of length `window` ending now.
    pub(crate) fn window_start(&self, window: Duration) -> Result<DateTime<Utc>> {
        let window = chrono::TimeDelta::from_std(window).map_err(|_| EngineError::InvalidRule {
            reason: format!("query window {window:?} is out of range"),
        })?;
        Ok(self.now - window)
    }

    /// Looks up the cached state of the draft's fingerprint, then merges and
    /// renders it.
    pub(crate) async fn finalize(&self, draft: AlertCurEvent) -> Result<AlertCurEvent> {
        let cached = self.cached(&draft.fingerprint).await?;
        Ok(self.finalize_with(draft, cached.as_ref()))
    }
}

/// Queries a rule's datasources and reduces their results to fingerprints.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<dyn DatasourceRegistry>,
    pool: Arc<dyn DatasourcePool>,
    health: Arc<dyn HealthChecker>,
    events: Arc<dyn EventCache>,
    query_timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        registry: Arc<dyn DatasourceRegistry>,
        pool: Arc<dyn DatasourcePool>,
        health: Arc<dyn HealthChecker>,
        events: Arc<dyn EventCache>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            health,
            events,
            query_timeout,
        }
    }

    /// Queries every datasource of `rule` concurrently and returns the merged
    /// set of current fingerprints.
    ///
    /// All datasource tasks are joined before returning. A panic inside a
    /// datasource task is resumed on the caller so the rule loop's
    /// supervisor sees it.
    pub async fn dispatch(&self, rule: &AlertRule) -> DispatchReport {
        let rule = Arc::new(rule.clone());
        let mut tasks = JoinSet::new();

        for datasource_id in &rule.datasource_ids {
            let this = self.clone();
            let rule = Arc::clone(&rule);
            let datasource_id = datasource_id.clone();
            tasks.spawn(async move {
                let result = this.query_datasource(&rule, &datasource_id).await;
                (datasource_id, result)
            });
        }

        let mut report = DispatchReport::default();
        let mut fingerprints = BTreeSet::new();
        let mut suppressed = BTreeSet::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok((outcome, pushed)))) => {
                    report.datasources_queried += 1;
                    report.events_pushed += pushed;
                    fingerprints.extend(outcome.fingerprints.into_iter().filter(|fp| !fp.is_empty()));
                    suppressed.extend(outcome.suppressed.into_iter().filter(|fp| !fp.is_empty()));
                }
                Ok((datasource_id, Err(e))) => {
                    report.datasources_failed += 1;
                    warn!(
                        rule_id = %rule.id,
                        datasource_id = %datasource_id,
                        transient = e.is_transient(),
                        error = %e,
                        "datasource evaluation failed"
                    );
                }
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic());
                }
                Err(join_err) => {
                    report.datasources_failed += 1;
                    warn!(rule_id = %rule.id, error = %join_err, "datasource task cancelled");
                }
            }
        }

        report.suppressed = suppressed.difference(&fingerprints).cloned().collect();
        report.fingerprints = fingerprints.into_iter().collect();
        debug!(
            rule_id = %rule.id,
            fingerprints = report.fingerprints.len(),
            suppressed = report.suppressed.len(),
            queried = report.datasources_queried,
            failed = report.datasources_failed,
            pushed = report.events_pushed,
            "dispatch complete"
        );
        report
    }

    /// Resolves, checks and queries one datasource, then pushes its events.
    async fn query_datasource(
        &self,
        rule: &AlertRule,
        datasource_id: &str,
    ) -> Result<(QueryOutcome, usize)> {
        let instance = self.registry.get_instance(datasource_id).await?;
        if !instance.enabled {
            return Err(EngineError::DatasourceDisabled {
                id: datasource_id.to_string(),
            });
        }
        if !self.health.check_health(&instance).await {
            return Err(EngineError::DatasourceUnhealthy {
                id: datasource_id.to_string(),
            });
        }

        let client = self.pool.get_client(datasource_id).await?;
        let ctx = EvalContext {
            rule,
            datasource_id,
            events: self.events.as_ref(),
            now: Utc::now(),
        };

        let outcome = tokio::time::timeout(self.query_timeout, evaluate(&ctx, &client))
            .await
            .map_err(|_| EngineError::QueryTimeout {
                id: datasource_id.to_string(),
                timeout_secs: self.query_timeout.as_secs(),
            })??;

        let mut pushed = 0;
        for event in &outcome.events {
            match self.events.push_event(event.clone()).await {
                Ok(()) => pushed += 1,
                Err(e) => warn!(
                    rule_id = %rule.id,
                    fingerprint = %event.fingerprint,
                    error = %e,
                    "failed to push event"
                ),
            }
        }

        Ok((outcome, pushed))
    }
}

/// Selects the handler for the rule's declared datasource type.
async fn evaluate(ctx: &EvalContext<'_>, client: &DatasourceClient) -> Result<QueryOutcome> {
    let rule = ctx.rule;
    let unsupported = || EngineError::UnsupportedDatasource {
        kind: rule.datasource_type.to_string(),
    };

    let family = rule.datasource_type.family().ok_or_else(unsupported)?;
    if client.family() != family || rule.query.family() != family {
        return Err(unsupported());
    }

    match (client, &rule.query) {
        (DatasourceClient::Metrics(client), QueryConfig::Metrics { query }) => {
            metrics::evaluate(ctx, client.as_ref(), query).await
        }
        (DatasourceClient::Logs(client), QueryConfig::Logs { .. }) => {
            logs::evaluate(ctx, client.as_ref(), &rule.query).await
        }
        (DatasourceClient::Traces(client), QueryConfig::Traces { .. }) => {
            traces::evaluate(ctx, client.as_ref(), &rule.query).await
        }
        (DatasourceClient::CloudMetrics(client), QueryConfig::CloudMetrics { .. }) => {
            cloud::evaluate(ctx, client.as_ref(), &rule.query).await
        }
        (DatasourceClient::KubernetesEvents(client), QueryConfig::KubernetesEvents { .. }) => {
            kube::evaluate(ctx, client.as_ref(), &rule.query).await
        }
        _ => Err(unsupported()),
    }
}

#[cfg(test)]
pub(crate) mod testing;
