//! Cloud monitoring statistics.
//!
//! Every configured endpoint contributes its fingerprint whether or not it
//! matched, marking it as evaluated. Only matching endpoints produce events.

use std::collections::HashMap;

use tracing::debug;

use super::{EvalContext, QueryOutcome};
use crate::datasource::CloudMetricsClient;
use crate::error::{EngineError, Result};
use crate::fingerprint;
use crate::types::{AlertCurEvent, QueryConfig, VALUE_LABEL};

/// Evaluates every configured endpoint of a cloud metrics rule.
///
/// An endpoint's fingerprint is current on every tick for as long as the
/// endpoint stays configured. An alert raised on it therefore never enters
/// `PendingRecovery` or `Recovered` when its statistic drops back below the
/// threshold, and an unconfirmed `PreAlert` is kept rather than discarded.
/// Removing the endpoint from the rule is what lets its alert recover.
pub(super) async fn evaluate(
    ctx: &EvalContext<'_>,
    client: &dyn CloudMetricsClient,
    config: &QueryConfig,
) -> Result<QueryOutcome> {
    let QueryConfig::CloudMetrics {
        namespace,
        metric,
        statistic,
        period_secs,
        endpoints,
        operator,
        threshold,
        severity,
    } = config
    else {
        return Err(EngineError::UnsupportedDatasource {
            kind: ctx.rule.datasource_type.to_string(),
        });
    };

    let datapoints = client
        .statistics(namespace, metric, statistic, *period_secs, endpoints)
        .await?;
    let latest: HashMap<&str, f64> = datapoints
        .iter()
        .map(|d| (d.endpoint.as_str(), d.value))
        .collect();

    let mut outcome = QueryOutcome::default();
    for endpoint in endpoints {
        let fp = fingerprint::for_cloud_endpoint(&ctx.rule.id, metric, endpoint);
        outcome.fingerprints.push(fp.clone());

        let Some(&value) = latest.get(endpoint.as_str()) else {
            debug!(rule_id = %ctx.rule.id, endpoint = %endpoint, "no datapoint for endpoint");
            continue;
        };
        if !operator.evaluate(value, *threshold) {
            continue;
        }

        let labels = HashMap::from([
            ("namespace".to_string(), namespace.clone()),
            ("metric".to_string(), metric.clone()),
            ("endpoint".to_string(), endpoint.clone()),
            (VALUE_LABEL.to_string(), value.to_string()),
        ]);
        let draft = AlertCurEvent::draft(ctx.rule, ctx.datasource_id, fp, severity.clone(), labels)
            .with_search_query(format!(
                "{namespace}/{metric} {statistic} over {period_secs}s {operator} {threshold}"
            ));
        outcome.events.push(ctx.finalize(draft).await?);
    }

    Ok(outcome)
}
