//! Orchestrator warning events.
//!
//! Events are grouped by object and reason. A group with at least
//! `threshold` members becomes an alert instance whose annotation lists
//! every grouped message.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::{EvalContext, QueryOutcome};
use crate::datasource::{KubeEvent, KubeEventsClient};
use crate::error::{EngineError, Result};
use crate::fingerprint;
use crate::types::{AlertCurEvent, QueryConfig, VALUE_LABEL};

pub(super) async fn evaluate(
    ctx: &EvalContext<'_>,
    client: &dyn KubeEventsClient,
    config: &QueryConfig,
) -> Result<QueryOutcome> {
    let QueryConfig::KubernetesEvents {
        namespace,
        reasons,
        threshold,
        window_secs,
        severity,
    } = config
    else {
        return Err(EngineError::UnsupportedDatasource {
            kind: ctx.rule.datasource_type.to_string(),
        });
    };

    let since = ctx.window_start(Duration::from_secs(*window_secs))?;
    let events = client.warning_events(namespace, since).await?;

    let mut groups: BTreeMap<(&str, &str), Vec<&KubeEvent>> = BTreeMap::new();
    for event in &events {
        if !reasons.is_empty() && !reasons.iter().any(|r| r == &event.reason) {
            continue;
        }
        groups
            .entry((event.object_name.as_str(), event.reason.as_str()))
            .or_default()
            .push(event);
    }

    let mut outcome = QueryOutcome::default();
    for ((object_name, reason), members) in groups {
        if members.len() < *threshold {
            continue;
        }
        let Some(first) = members.first() else {
            continue;
        };

        let fp = fingerprint::for_kube_events(&ctx.rule.id, &first.namespace, reason, object_name);
        let labels = HashMap::from([
            ("namespace".to_string(), first.namespace.clone()),
            ("kind".to_string(), first.kind.clone()),
            ("object_name".to_string(), object_name.to_string()),
            ("reason".to_string(), reason.to_string()),
            (VALUE_LABEL.to_string(), members.len().to_string()),
        ]);
        let draft = AlertCurEvent::draft(ctx.rule, ctx.datasource_id, fp.clone(), severity.clone(), labels)
            .with_search_query(format!(
                "namespace={} reason={reason} object={object_name} count >= {threshold} last {window_secs}s",
                if namespace.is_empty() { "*" } else { namespace.as_str() },
            ));

        let mut event = ctx.finalize(draft).await?;
        let messages: Vec<&str> = members.iter().map(|e| e.message.as_str()).collect();
        event.annotations = if event.annotations.is_empty() {
            messages.join("\n")
        } else {
            format!("{}\n{}", event.annotations, messages.join("\n"))
        };

        outcome.fingerprints.push(fp);
        outcome.events.push(event);
    }

    Ok(outcome)
}
