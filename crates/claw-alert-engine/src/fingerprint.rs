//! Deterministic fingerprints for alert instances.
//!
//! A fingerprint is the join key between evaluation cycles, so every input
//! is hashed in a fixed order with explicit separators. Fingerprints must
//! not depend on process state: `blake3` is used instead of the std hasher.

use std::collections::HashMap;

const FINGERPRINT_LEN: usize = 16;

fn finish(hasher: &blake3::Hasher) -> String {
    let hex = hasher.finalize().to_hex();
    hex[..FINGERPRINT_LEN].to_string()
}

fn update_field(hasher: &mut blake3::Hasher, field: &str) {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

/// Fingerprint of one metric series under one severity of a rule.
///
/// The severity keeps a lower severity outranked on the same series a
/// separate instance from the one that fires.
#[must_use]
pub fn for_metric_series(
    rule_id: &str,
    severity: &str,
    labels: &HashMap<String, String>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, "metrics");
    update_field(&mut hasher, rule_id);
    update_field(&mut hasher, severity);

    let mut sorted: Vec<_> = labels.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    for (k, v) in sorted {
        update_field(&mut hasher, k);
        update_field(&mut hasher, v);
    }

    finish(&hasher)
}

/// Fingerprint of a count-based rule: the rule id alone, so such a rule has
/// at most one live instance.
#[must_use]
pub fn for_rule(rule_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, "rule");
    update_field(&mut hasher, rule_id);
    finish(&hasher)
}

/// Fingerprint of an anomalous trace.
#[must_use]
pub fn for_trace(rule_id: &str, service: &str, trace_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, "trace");
    update_field(&mut hasher, rule_id);
    update_field(&mut hasher, service);
    update_field(&mut hasher, trace_id);
    finish(&hasher)
}

/// Fingerprint of a monitored cloud endpoint.
#[must_use]
pub fn for_cloud_endpoint(rule_id: &str, metric: &str, endpoint: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, "cloud");
    update_field(&mut hasher, rule_id);
    update_field(&mut hasher, metric);
    update_field(&mut hasher, endpoint);
    finish(&hasher)
}

/// Fingerprint of a group of orchestrator events, scoped to the rule.
#[must_use]
pub fn for_kube_events(rule_id: &str, namespace: &str, reason: &str, object_name: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, "kube");
    update_field(&mut hasher, rule_id);
    update_field(&mut hasher, namespace);
    update_field(&mut hasher, reason);
    update_field(&mut hasher, object_name);
    finish(&hasher)
}
