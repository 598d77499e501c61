//! Anomalous trace search. Every returned trace is an alert instance.

use std::collections::HashMap;
use std::time::Duration;

use super::{EvalContext, QueryOutcome};
use crate::datasource::{TraceRecord, TracesClient};
use crate::error::{EngineError, Result};
use crate::fingerprint;
use crate::types::{AlertCurEvent, QueryConfig, VALUE_LABEL};

pub(super) async fn evaluate(
    ctx: &EvalContext<'_>,
    client: &dyn TracesClient,
    config: &QueryConfig,
) -> Result<QueryOutcome> {
    let QueryConfig::Traces {
        service,
        query,
        window_secs,
        severity,
    } = config
    else {
        return Err(EngineError::UnsupportedDatasource {
            kind: ctx.rule.datasource_type.to_string(),
        });
    };

    let start = ctx.window_start(Duration::from_secs(*window_secs))?;
    let traces = client.anomalous_traces(service, query, start, ctx.now).await?;

    let mut outcome = QueryOutcome::default();
    for trace in &traces {
        let fp = fingerprint::for_trace(&ctx.rule.id, &trace.service, &trace.trace_id);
        let draft = AlertCurEvent::draft(
            ctx.rule,
            ctx.datasource_id,
            fp.clone(),
            severity.clone(),
            trace_labels(trace),
        )
        .with_search_query(format!("service={service} {query} last {window_secs}s"));

        outcome.events.push(ctx.finalize(draft).await?);
        outcome.fingerprints.push(fp);
    }

    Ok(outcome)
}

fn trace_labels(trace: &TraceRecord) -> HashMap<String, String> {
    let mut labels = HashMap::from([
        ("trace_id".to_string(), trace.trace_id.clone()),
        ("service".to_string(), trace.service.clone()),
        ("operation".to_string(), trace.operation.clone()),
        ("duration_ms".to_string(), trace.duration_ms.to_string()),
        (VALUE_LABEL.to_string(), trace.duration_ms.to_string()),
    ]);
    if !trace.message.is_empty() {
        labels.insert("message".to_string(), trace.message.clone());
    }
    labels
}
