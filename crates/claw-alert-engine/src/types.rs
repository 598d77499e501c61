//! Core types for the alert engine.
//!
//! - [`AlertRule`]: a rule's evaluation configuration
//! - [`AlertStatus`]: the four states of the event state machine
//! - [`AlertCurEvent`]: the mutable record of one alert instance
//! - [`Severity`]: a `P<n>` style severity with a total priority order
//! - [`QueryConfig`]: one variant per backend family

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datasource::{BackendFamily, DatasourceType};
use crate::error::{EngineError, Result};
use crate::threshold::ComparisonOperator;

/// Label holding the latest observed value of an alert instance.
pub const VALUE_LABEL: &str = "value";
/// Label holding the value observed when the alert instance first matched.
pub const FIRST_VALUE_LABEL: &str = "first_value";
/// Label holding the event's severity.
pub const SEVERITY_LABEL: &str = "severity";
/// Label holding the rule name.
pub const RULE_NAME_LABEL: &str = "rule_name";

/// Severity of an alert, ordered `P0 > P1 > P2 > ...`; anything that is not
/// of the form `P<n>` sorts after every numbered severity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Severity(String);

impl Severity {
    /// Creates a severity from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the severity name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the priority rank (lower = more urgent). Unknown severities
    /// rank last.
    #[must_use]
    pub fn rank(&self) -> u32 {
        self.0
            .strip_prefix('P')
            .or_else(|| self.0.strip_prefix('p'))
            .and_then(|n| n.parse::<u32>().ok())
            .unwrap_or(u32::MAX)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::new("P2")
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    /// Orders by urgency first: `P0 < P1 < unknown` so that sorting puts the
    /// most urgent severity first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The status of an alert event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// The condition matched, not yet confirmed.
    PreAlert,
    /// Confirmed and actively notifying.
    Alerting,
    /// The condition no longer matches but the grace window has not elapsed.
    PendingRecovery,
    /// The condition has been absent for longer than the grace window.
    Recovered,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreAlert => "pre_alert",
            Self::Alerting => "alerting",
            Self::PendingRecovery => "pending_recovery",
            Self::Recovered => "recovered",
        }
    }

    /// Returns true if the event state machine allows moving from `self` to
    /// `next`. Staying in the same state is always allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::PreAlert, Self::PreAlert)
                | (Self::Alerting, Self::Alerting)
                | (Self::PendingRecovery, Self::PendingRecovery)
                | (Self::Recovered, Self::Recovered)
                | (Self::PreAlert, Self::Alerting)
                | (Self::Alerting, Self::PendingRecovery)
                | (Self::PendingRecovery, Self::Alerting)
                | (Self::PendingRecovery, Self::Recovered)
        )
    }

    /// Returns true for `Recovered`, the end of an event generation.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Recovered)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit of a rule's evaluation interval or a query window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    #[default]
    Seconds,
    /// Minutes.
    Minutes,
}

impl TimeUnit {
    /// Converts `value` in this unit to a [`Duration`].
    #[must_use]
    pub const fn to_duration(self, value: u64) -> Duration {
        match self {
            Self::Milliseconds => Duration::from_millis(value),
            Self::Seconds => Duration::from_secs(value),
            Self::Minutes => Duration::from_secs(value.saturating_mul(60)),
        }
    }
}

/// How often a rule is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalInterval {
    /// Interval length.
    pub value: u64,
    /// Interval unit.
    #[serde(default)]
    pub unit: TimeUnit,
}

impl EvalInterval {
    /// An interval of `secs` seconds.
    #[must_use]
    pub const fn secs(secs: u64) -> Self {
        Self {
            value: secs,
            unit: TimeUnit::Seconds,
        }
    }

    /// An interval of `millis` milliseconds.
    #[must_use]
    pub const fn millis(millis: u64) -> Self {
        Self {
            value: millis,
            unit: TimeUnit::Milliseconds,
        }
    }

    /// Returns the interval as a [`Duration`].
    #[must_use]
    pub const fn as_duration(&self) -> Duration {
        self.unit.to_duration(self.value)
    }
}

/// Days and hours of the day (UTC) during which a rule is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveTime {
    /// Days on which the rule is active. Empty means every day.
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    /// Start of the daily window, in minutes since midnight (inclusive).
    pub start_minute: u32,
    /// End of the daily window, in minutes since midnight (exclusive).
    pub end_minute: u32,
}

impl EffectiveTime {
    /// Returns true if `at` falls inside this window. A window whose end is
    /// before its start wraps past midnight.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if !self.weekdays.is_empty() && !self.weekdays.contains(&at.weekday()) {
            return false;
        }

        let minute = at.hour() * 60 + at.minute();
        if self.start_minute <= self.end_minute {
            minute >= self.start_minute && minute < self.end_minute
        } else {
            minute >= self.start_minute || minute < self.end_minute
        }
    }
}

/// A severity paired with the threshold expression that triggers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityRule {
    /// Severity assigned when the expression matches.
    pub severity: Severity,
    /// Threshold expression, e.g. `"> 90"`.
    pub expr: String,
}

impl SeverityRule {
    /// Creates a severity rule.
    pub fn new(severity: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            severity: Severity::new(severity),
            expr: expr.into(),
        }
    }
}

/// Per-backend query configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum QueryConfig {
    /// A vector-returning metrics query, compared against the rule's
    /// severity rules.
    Metrics {
        /// The query expression (e.g. `PromQL`).
        query: String,
    },
    /// A count-over-window log query.
    Logs {
        /// The backend query string.
        query: String,
        /// Length of the trailing window.
        window: u64,
        /// Unit of `window`.
        #[serde(default)]
        window_unit: TimeUnit,
        /// Operator applied as `count <operator> expected`.
        operator: ComparisonOperator,
        /// Expected value the count is compared against.
        expected: f64,
        /// Severity of produced events.
        #[serde(default)]
        severity: Severity,
    },
    /// Anomalous trace search.
    Traces {
        /// Service to search.
        service: String,
        /// Backend-specific filter (tags, operation, duration bounds).
        query: String,
        /// Trailing window in seconds.
        window_secs: u64,
        /// Severity of produced events.
        #[serde(default)]
        severity: Severity,
    },
    /// Cloud monitoring statistic per endpoint.
    CloudMetrics {
        /// Metric namespace (e.g. `AWS/EC2`).
        namespace: String,
        /// Metric name.
        metric: String,
        /// Statistic (e.g. `Average`, `Maximum`).
        statistic: String,
        /// Aggregation period in seconds.
        period_secs: u64,
        /// Monitored endpoints (instance ids, load balancers, ...).
        endpoints: Vec<String>,
        /// Operator applied as `statistic <operator> threshold`.
        operator: ComparisonOperator,
        /// Threshold value.
        threshold: f64,
        /// Severity of produced events.
        #[serde(default)]
        severity: Severity,
    },
    /// Orchestrator warning events.
    KubernetesEvents {
        /// Namespace to watch; empty means all namespaces.
        #[serde(default)]
        namespace: String,
        /// Event reasons to match; empty means every reason.
        #[serde(default)]
        reasons: Vec<String>,
        /// Minimum number of events in a group for it to alert.
        threshold: usize,
        /// Trailing window in seconds.
        window_secs: u64,
        /// Severity of produced events.
        #[serde(default)]
        severity: Severity,
    },
}

impl QueryConfig {
    /// Returns the backend family this configuration targets.
    #[must_use]
    pub const fn family(&self) -> BackendFamily {
        match self {
            Self::Metrics { .. } => BackendFamily::Metrics,
            Self::Logs { .. } => BackendFamily::Logs,
            Self::Traces { .. } => BackendFamily::Traces,
            Self::CloudMetrics { .. } => BackendFamily::CloudMetrics,
            Self::KubernetesEvents { .. } => BackendFamily::KubernetesEvents,
        }
    }
}

/// A rule that defines what to query and when to alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier for the rule.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Fault center the rule's events belong to.
    pub fault_center_id: String,
    /// Human-readable name for the rule.
    pub name: String,
    /// Declared datasource type; selects the query handler.
    pub datasource_type: DatasourceType,
    /// Datasources queried on every tick.
    pub datasource_ids: Vec<String>,
    /// Evaluation interval.
    pub interval: EvalInterval,
    /// How long a `PreAlert` must keep matching before it is promoted.
    #[serde(default)]
    pub for_duration_secs: u64,
    /// Severity-specific threshold expressions (metrics rules).
    #[serde(default)]
    pub severity_rules: Vec<SeverityRule>,
    /// Backend query configuration.
    pub query: QueryConfig,
    /// Labels injected into every event of this rule.
    #[serde(default)]
    pub external_labels: HashMap<String, String>,
    /// Annotation template rendered against each event's labels.
    #[serde(default)]
    pub annotations: String,
    /// Optional evaluation window.
    #[serde(default)]
    pub effective_time: Option<EffectiveTime>,
    /// Whether this rule is enabled.
    pub enabled: bool,
}

impl AlertRule {
    /// Validates the parts of the rule the scheduler depends on.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidRule` if an identifier is empty or the
    /// interval is zero.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| EngineError::InvalidRule {
            reason: format!("{}: {reason}", self.id),
        };

        if self.id.is_empty() {
            return Err(EngineError::InvalidRule {
                reason: "rule id cannot be empty".to_string(),
            });
        }
        if self.tenant_id.is_empty() {
            return Err(invalid("tenant id cannot be empty"));
        }
        if self.fault_center_id.is_empty() {
            return Err(invalid("fault center id cannot be empty"));
        }
        if self.interval.value == 0 {
            return Err(invalid("evaluation interval must be positive"));
        }
        Ok(())
    }

    /// Returns the evaluation interval as a [`Duration`].
    #[must_use]
    pub const fn eval_interval(&self) -> Duration {
        self.interval.as_duration()
    }

    /// Returns true if the rule should be evaluated at `at`.
    #[must_use]
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_time
            .as_ref()
            .is_none_or(|window| window.contains(at))
    }

    /// Returns the severity rules ordered most urgent first.
    #[must_use]
    pub fn ordered_severity_rules(&self) -> Vec<&SeverityRule> {
        let mut rules: Vec<_> = self.severity_rules.iter().collect();
        rules.sort_by(|a, b| a.severity.cmp(&b.severity));
        rules
    }
}

/// Escalation bookkeeping carried on an event for the notification pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeState {
    /// Whether someone acknowledged the alert.
    pub confirmed: bool,
    /// Whether the alert has been escalated.
    pub escalated: bool,
    /// When the alert was last escalated.
    pub last_escalated_at: Option<DateTime<Utc>>,
}

/// The mutable record of one alert instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCurEvent {
    /// Identifies this generation of the alert instance.
    pub event_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Fault center the event belongs to.
    pub fault_center_id: String,
    /// Rule that produced the event.
    pub rule_id: String,
    /// Name of that rule.
    pub rule_name: String,
    /// Stable identity of the alert instance.
    pub fingerprint: String,
    /// Datasource the event was observed on.
    pub datasource_id: String,
    /// Declared type of that datasource.
    pub datasource_type: DatasourceType,
    /// Severity.
    pub severity: Severity,
    /// Current status.
    pub status: AlertStatus,
    /// Labels; always contains `value`.
    pub labels: HashMap<String, String>,
    /// Human-readable description of exactly what was queried.
    pub search_query: String,
    /// Rendered annotation text.
    pub annotations: String,
    /// When this generation first matched.
    pub first_trigger_time: DateTime<Utc>,
    /// When the event was last evaluated.
    pub last_eval_time: DateTime<Utc>,
    /// When a notification was last sent (or suppressed).
    pub last_send_time: Option<DateTime<Utc>>,
    /// When the event recovered.
    pub recover_time: Option<DateTime<Utc>>,
    /// Escalation state.
    #[serde(default)]
    pub upgrade_state: UpgradeState,
    /// Overrides the fault center's recovery wait time for this event.
    #[serde(default)]
    pub recover_wait_secs: Option<u64>,
}

impl AlertCurEvent {
    /// Creates a `PreAlert` draft for `rule` observed on `datasource_id`.
    ///
    /// The rule's external labels are injected into the label map, followed
    /// by `severity` and `rule_name`.
    #[must_use]
    pub fn draft(
        rule: &AlertRule,
        datasource_id: &str,
        fingerprint: impl Into<String>,
        severity: Severity,
        mut labels: HashMap<String, String>,
    ) -> Self {
        for (k, v) in &rule.external_labels {
            labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
        labels.insert(SEVERITY_LABEL.to_string(), severity.to_string());
        labels.insert(RULE_NAME_LABEL.to_string(), rule.name.clone());

        let now = Utc::now();
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant_id: rule.tenant_id.clone(),
            fault_center_id: rule.fault_center_id.clone(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            fingerprint: fingerprint.into(),
            datasource_id: datasource_id.to_string(),
            datasource_type: rule.datasource_type.clone(),
            severity,
            status: AlertStatus::PreAlert,
            labels,
            search_query: String::new(),
            annotations: String::new(),
            first_trigger_time: now,
            last_eval_time: now,
            last_send_time: None,
            recover_time: None,
            upgrade_state: UpgradeState::default(),
            recover_wait_secs: None,
        }
    }

    /// Sets the search query description.
    #[must_use]
    pub fn with_search_query(mut self, query: impl Into<String>) -> Self {
        self.search_query = query.into();
        self
    }

    /// Returns the `value` label, if any.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.labels.get(VALUE_LABEL).map(String::as_str)
    }

    /// Sets the `value` label.
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.labels.insert(VALUE_LABEL.to_string(), value.into());
    }

    /// Moves the event to `next`, recording `at` as the recovery time when
    /// the event recovers.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::IllegalTransition` if the state machine does not
    /// allow the move.
    pub fn transition_to(&mut self, next: AlertStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::IllegalTransition {
                fingerprint: self.fingerprint.clone(),
                from: self.status,
                to: next,
            });
        }

        if next == AlertStatus::Recovered && self.status != AlertStatus::Recovered {
            self.recover_time = Some(at);
        }
        self.status = next;
        self.last_eval_time = at;
        Ok(())
    }

    /// Merges a freshly evaluated draft over the cached state of the same
    /// fingerprint and returns the record to store.
    ///
    /// A live cached event keeps its status, first-trigger time, first value
    /// and last-send time; a `PreAlert` that has matched for at least
    /// `for_duration` is promoted to `Alerting`. A recovered (or missing)
    /// cached event starts a new generation.
    #[must_use]
    pub fn merge_over(
        mut self,
        cached: Option<&Self>,
        for_duration: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        self.last_eval_time = now;

        let Some(cached) = cached.filter(|c| !c.status.is_terminal()) else {
            self.first_trigger_time = now;
            if let Some(value) = self.value().map(str::to_string) {
                self.labels
                    .entry(FIRST_VALUE_LABEL.to_string())
                    .or_insert(value);
            }
            return self;
        };

        self.event_id.clone_from(&cached.event_id);
        self.status = cached.status;
        self.first_trigger_time = cached.first_trigger_time;
        self.upgrade_state = cached.upgrade_state.clone();
        self.recover_wait_secs = self.recover_wait_secs.or(cached.recover_wait_secs);
        if self.last_send_time.is_none() {
            self.last_send_time = cached.last_send_time;
        }
        if let Some(first) = cached
            .labels
            .get(FIRST_VALUE_LABEL)
            .or_else(|| cached.labels.get(VALUE_LABEL))
        {
            self.labels
                .insert(FIRST_VALUE_LABEL.to_string(), first.clone());
        }

        let matched_for = now
            .signed_duration_since(cached.first_trigger_time)
            .to_std()
            .unwrap_or_default();
        if self.status == AlertStatus::PreAlert && matched_for >= for_duration {
            self.status = AlertStatus::Alerting;
        }

        self
    }
}

/// Per-fault-center settings shared by all of its rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCenterInfo {
    /// Fault center identifier.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Grace period in seconds before a missing alert recovers; `0` means
    /// unset.
    #[serde(default)]
    pub recover_wait_secs: u64,
}
