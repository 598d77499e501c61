//! Vector-returning metrics backends.
//!
//! Every series is checked against the rule's severity rules, most urgent
//! first. Only the highest matching severity contributes a fingerprint; lower
//! matches are still pushed but stamped as sent, so they stay visible without
//! notifying, and are reported as suppressed so recovery leaves them alone.
//! Non-matching pairs refresh the `value` label of a cached event.

use tracing::warn;

use super::{EvalContext, QueryOutcome};
use crate::datasource::{MetricSeries, MetricsClient};
use crate::error::Result;
use crate::fingerprint;
use crate::template;
use crate::threshold::ThresholdExpr;
use crate::types::AlertCurEvent;

pub(super) async fn evaluate(
    ctx: &EvalContext<'_>,
    client: &dyn MetricsClient,
    query: &str,
) -> Result<QueryOutcome> {
    let series = client.query_vector(query).await?;
    let mut outcome = QueryOutcome::default();

    for s in &series {
        evaluate_series(ctx, query, s, &mut outcome).await?;
    }

    Ok(outcome)
}

async fn evaluate_series(
    ctx: &EvalContext<'_>,
    query: &str,
    series: &MetricSeries,
    outcome: &mut QueryOutcome,
) -> Result<()> {
    let rule = ctx.rule;
    let value = series.value.to_string();
    let mut matched_higher = false;

    for severity_rule in rule.ordered_severity_rules() {
        let expr = match ThresholdExpr::parse(&severity_rule.expr) {
            Ok(expr) => expr,
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    severity = %severity_rule.severity,
                    error = %e,
                    "skipping malformed threshold expression"
                );
                continue;
            }
        };

        let fp = fingerprint::for_metric_series(
            &rule.id,
            severity_rule.severity.as_str(),
            &series.labels,
        );
        let cached = ctx.cached(&fp).await?;

        if !expr.evaluate(series.value) {
            if let Some(mut event) = cached.filter(|c| !c.status.is_terminal()) {
                event.set_value(value.clone());
                event.last_eval_time = ctx.now;
                event.annotations = template::render(&rule.annotations, &event.labels);
                outcome.events.push(event);
            }
            continue;
        }

        let mut draft = AlertCurEvent::draft(
            rule,
            ctx.datasource_id,
            fp.clone(),
            severity_rule.severity.clone(),
            series.labels.clone(),
        )
        .with_search_query(format!("{query} {expr}"));
        draft.set_value(value.clone());

        if matched_higher {
            draft.last_send_time = Some(ctx.now);
            outcome.suppressed.push(fp);
        } else {
            matched_higher = true;
            outcome.fingerprints.push(fp);
        }
        outcome.events.push(ctx.finalize_with(draft, cached.as_ref()));
    }

    Ok(())
}
