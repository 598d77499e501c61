//! Count-over-window log backends.
//!
//! The fingerprint is derived from the rule id alone, so a log rule has at
//! most one live alert instance.

use std::collections::HashMap;

use super::{EvalContext, QueryOutcome};
use crate::datasource::LogsClient;
use crate::error::{EngineError, Result};
use crate::fingerprint;
use crate::types::{AlertCurEvent, QueryConfig};

pub(super) async fn evaluate(
    ctx: &EvalContext<'_>,
    client: &dyn LogsClient,
    config: &QueryConfig,
) -> Result<QueryOutcome> {
    let QueryConfig::Logs {
        query,
        window,
        window_unit,
        operator,
        expected,
        severity,
    } = config
    else {
        return Err(EngineError::UnsupportedDatasource {
            kind: ctx.rule.datasource_type.to_string(),
        });
    };

    let start = ctx.window_start(window_unit.to_duration(*window))?;
    let count = client.count(query, start, ctx.now).await?;

    #[allow(clippy::cast_precision_loss)]
    let matched = operator.evaluate(count as f64, *expected);
    if !matched {
        return Ok(QueryOutcome::default());
    }

    let fp = fingerprint::for_rule(&ctx.rule.id);
    let mut draft = AlertCurEvent::draft(
        ctx.rule,
        ctx.datasource_id,
        fp.clone(),
        severity.clone(),
        HashMap::new(),
    )
    .with_search_query(format!(
        "{query} | count over last {window} {window_unit:?} {operator} {expected}"
    ));
    draft.set_value(count.to_string());

    Ok(QueryOutcome {
        fingerprints: vec![fp],
        events: vec![ctx.finalize(draft).await?],
        ..QueryOutcome::default()
    })
}
