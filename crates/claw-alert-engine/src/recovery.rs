//! Recovery engine.
//!
//! After every tick the [`RecoveryEngine`] reconciles a rule's cached events
//! with the fingerprints that matched during that tick:
//!
//! - an unconfirmed `PreAlert` that no longer matches is discarded
//! - a fingerprint that is pending recovery and matches again goes back to
//!   `Alerting`
//! - an active fingerprint that stopped matching enters `PendingRecovery`,
//!   and recovers once it has stayed missing for the fault center's
//!   recovery wait time
//! - a fingerprint suppressed by a more urgent severity still matches, so it
//!   is neither discarded nor considered missing
//!
//! Every transition is written back to the event cache immediately. A
//! transition the state machine rejects is logged and only that fingerprint
//! is skipped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cache::{EventCache, FaultCenterInfoCache, PendingRecoverCache};
use crate::config::EngineConfig;
use crate::dispatch::DispatchReport;
use crate::error::Result;
use crate::types::{AlertCurEvent, AlertStatus, FaultCenterInfo};

/// What a recovery pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Unconfirmed pre-alerts removed from the cache.
    pub deleted_pre_alerts: Vec<String>,
    /// Fingerprints moved back to `Alerting`.
    pub reactivated: Vec<String>,
    /// Fingerprints that entered `PendingRecovery`.
    pub pending: Vec<String>,
    /// Fingerprints that recovered.
    pub recovered: Vec<String>,
    /// Fingerprints skipped because of an illegal transition or a failed
    /// write.
    pub skipped: Vec<String>,
}

impl RecoveryReport {
    /// Returns true if the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted_pre_alerts.is_empty()
            && self.reactivated.is_empty()
            && self.pending.is_empty()
            && self.recovered.is_empty()
    }
}

/// Reconciles cached events with the fingerprints of the latest tick.
#[derive(Clone)]
pub struct RecoveryEngine {
    events: Arc<dyn EventCache>,
    pending: Arc<dyn PendingRecoverCache>,
    infos: Arc<dyn FaultCenterInfoCache>,
    config: EngineConfig,
}

impl std::fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RecoveryEngine {
    /// Creates a recovery engine over the given caches.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventCache>,
        pending: Arc<dyn PendingRecoverCache>,
        infos: Arc<dyn FaultCenterInfoCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            events,
            pending,
            infos,
            config,
        }
    }

    /// Reconciles the events of `rule_id` stored under `event_key` with the
    /// fingerprints that matched in the current tick.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Cache` if the events, the pending-recovery
    /// table or the fault center info cannot be read. Nothing is written in
    /// that case.
    pub async fn recover(
        &self,
        tenant_id: &str,
        rule_id: &str,
        event_key: &str,
        info_key: &str,
        current: &[String],
    ) -> Result<RecoveryReport> {
        self.recover_at(tenant_id, rule_id, event_key, info_key, current, Utc::now())
            .await
    }

    /// Same as [`recover`](Self::recover) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`recover`](Self::recover).
    pub async fn recover_at(
        &self,
        tenant_id: &str,
        rule_id: &str,
        event_key: &str,
        info_key: &str,
        current: &[String],
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport> {
        self.reconcile(tenant_id, rule_id, event_key, info_key, current, &[], now)
            .await
    }

    /// Reconciles the events of `rule_id` with the outcome of a dispatch.
    /// Fingerprints the dispatch reported as suppressed are left untouched.
    ///
    /// # Errors
    ///
    /// See [`recover`](Self::recover).
    pub async fn recover_tick(
        &self,
        tenant_id: &str,
        rule_id: &str,
        event_key: &str,
        info_key: &str,
        tick: &DispatchReport,
    ) -> Result<RecoveryReport> {
        self.recover_tick_at(tenant_id, rule_id, event_key, info_key, tick, Utc::now())
            .await
    }

    /// Same as [`recover_tick`](Self::recover_tick) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`recover`](Self::recover).
    pub async fn recover_tick_at(
        &self,
        tenant_id: &str,
        rule_id: &str,
        event_key: &str,
        info_key: &str,
        tick: &DispatchReport,
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport> {
        self.reconcile(
            tenant_id,
            rule_id,
            event_key,
            info_key,
            &tick.fingerprints,
            &tick.suppressed,
            now,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile(
        &self,
        tenant_id: &str,
        rule_id: &str,
        event_key: &str,
        info_key: &str,
        current: &[String],
        suppressed: &[String],
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        if event_key.is_empty() || info_key.is_empty() {
            error!(
                tenant_id = %tenant_id,
                rule_id = %rule_id,
                "recovery skipped: empty cache key"
            );
            return Ok(report);
        }

        let current: HashSet<&str> = current
            .iter()
            .map(String::as_str)
            .filter(|fp| !fp.is_empty())
            .collect();

        let all = self.events.get_all_events(event_key).await?;
        let pending = self.pending.list(tenant_id, rule_id).await?;
        let info = self.infos.get_info(info_key).await?;

        // Rule-owned events, ordered for deterministic processing.
        let mut owned: BTreeMap<String, AlertCurEvent> = all
            .into_iter()
            .filter(|(_, e)| e.rule_id == rule_id && e.tenant_id == tenant_id)
            .filter(|(fp, _)| current.contains(fp.as_str()) || !suppressed.contains(fp))
            .collect();

        self.discard_pre_alerts(&mut owned, &current, &mut report)
            .await;
        self.reactivate(tenant_id, rule_id, &mut owned, &current, &pending, now, &mut report)
            .await;

        for (fingerprint, event) in owned {
            if event.status.is_terminal() || current.contains(fingerprint.as_str()) {
                continue;
            }
            match pending.get(&fingerprint) {
                None => {
                    self.begin_pending(tenant_id, rule_id, event, now, &mut report)
                        .await;
                }
                Some(&since) => {
                    let wait = self.recover_wait(&event, info.as_ref());
                    if event.status == AlertStatus::PendingRecovery && grace_elapsed(since, wait, now) {
                        self.complete_recovery(tenant_id, rule_id, event, now, &mut report)
                            .await;
                    }
                }
            }
        }

        debug!(
            tenant_id = %tenant_id,
            rule_id = %rule_id,
            deleted = report.deleted_pre_alerts.len(),
            reactivated = report.reactivated.len(),
            pending = report.pending.len(),
            recovered = report.recovered.len(),
            skipped = report.skipped.len(),
            "recovery pass complete"
        );
        Ok(report)
    }

    /// Removes unconfirmed pre-alerts that no longer match.
    async fn discard_pre_alerts(
        &self,
        owned: &mut BTreeMap<String, AlertCurEvent>,
        current: &HashSet<&str>,
        report: &mut RecoveryReport,
    ) {
        let stale: Vec<String> = owned
            .iter()
            .filter(|(fp, e)| e.status == AlertStatus::PreAlert && !current.contains(fp.as_str()))
            .map(|(fp, _)| fp.clone())
            .collect();

        for fingerprint in stale {
            let Some(event) = owned.remove(&fingerprint) else {
                continue;
            };
            match self
                .events
                .remove_event(&event.tenant_id, &event.fault_center_id, &fingerprint)
                .await
            {
                Ok(()) => {
                    debug!(rule_id = %event.rule_id, fingerprint = %fingerprint, "discarded pre-alert");
                    report.deleted_pre_alerts.push(fingerprint);
                }
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "failed to discard pre-alert");
                    report.skipped.push(fingerprint);
                }
            }
        }
    }

    /// Moves fingerprints that match again while pending back to `Alerting`.
    #[allow(clippy::too_many_arguments)]
    async fn reactivate(
        &self,
        tenant_id: &str,
        rule_id: &str,
        owned: &mut BTreeMap<String, AlertCurEvent>,
        current: &HashSet<&str>,
        pending: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
        report: &mut RecoveryReport,
    ) {
        let mut back: Vec<&String> = pending
            .keys()
            .filter(|fp| current.contains(fp.as_str()))
            .collect();
        back.sort();

        for fingerprint in back {
            if let Some(event) = owned.get_mut(fingerprint) {
                let mut next = event.clone();
                if let Err(e) = next.transition_to(AlertStatus::Alerting, now) {
                    warn!(rule_id = %rule_id, error = %e, "skipping fingerprint");
                    report.skipped.push(fingerprint.clone());
                    continue;
                }
                if let Err(e) = self.events.push_event(next.clone()).await {
                    warn!(fingerprint = %fingerprint, error = %e, "failed to persist reactivation");
                    report.skipped.push(fingerprint.clone());
                    continue;
                }
                info!(rule_id = %rule_id, fingerprint = %fingerprint, "alert reactivated");
                *event = next;
                report.reactivated.push(fingerprint.clone());
            }

            if let Err(e) = self.pending.delete(tenant_id, rule_id, fingerprint).await {
                warn!(fingerprint = %fingerprint, error = %e, "failed to clear pending recovery");
            }
        }
    }

    /// Records when an active fingerprint was first seen missing.
    async fn begin_pending(
        &self,
        tenant_id: &str,
        rule_id: &str,
        mut event: AlertCurEvent,
        now: DateTime<Utc>,
        report: &mut RecoveryReport,
    ) {
        let fingerprint = event.fingerprint.clone();
        if let Err(e) = event.transition_to(AlertStatus::PendingRecovery, now) {
            warn!(rule_id = %rule_id, error = %e, "skipping fingerprint");
            report.skipped.push(fingerprint);
            return;
        }

        let persisted = match self.pending.set(tenant_id, rule_id, &fingerprint, now).await {
            Ok(()) => self.events.push_event(event).await,
            Err(e) => Err(e),
        };
        match persisted {
            Ok(()) => {
                info!(rule_id = %rule_id, fingerprint = %fingerprint, "alert pending recovery");
                report.pending.push(fingerprint);
            }
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "failed to persist pending recovery");
                report.skipped.push(fingerprint);
            }
        }
    }

    /// Recovers a fingerprint whose grace period has elapsed.
    async fn complete_recovery(
        &self,
        tenant_id: &str,
        rule_id: &str,
        mut event: AlertCurEvent,
        now: DateTime<Utc>,
        report: &mut RecoveryReport,
    ) {
        let fingerprint = event.fingerprint.clone();
        if let Err(e) = event.transition_to(AlertStatus::Recovered, now) {
            warn!(rule_id = %rule_id, error = %e, "skipping fingerprint");
            report.skipped.push(fingerprint);
            return;
        }
        if let Err(e) = self.events.push_event(event).await {
            warn!(fingerprint = %fingerprint, error = %e, "failed to persist recovery");
            report.skipped.push(fingerprint);
            return;
        }
        if let Err(e) = self.pending.delete(tenant_id, rule_id, &fingerprint).await {
            warn!(fingerprint = %fingerprint, error = %e, "failed to clear pending recovery");
        }

        info!(rule_id = %rule_id, fingerprint = %fingerprint, "alert recovered");
        report.recovered.push(fingerprint);
    }

    /// Grace period of `event`: its own override, then the fault center's,
    /// then the configured default.
    fn recover_wait(&self, event: &AlertCurEvent, info: Option<&FaultCenterInfo>) -> Duration {
        match event.recover_wait_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self
                .config
                .recover_wait_or_default(info.map_or(0, |i| i.recover_wait_secs)),
        }
    }
}

fn grace_elapsed(since: DateTime<Utc>, wait: Duration, now: DateTime<Utc>) -> bool {
    let waited = now.signed_duration_since(since).to_std().unwrap_or_default();
    waited >= wait
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        InMemoryEventCache, InMemoryFaultCenterInfoCache, InMemoryPendingRecoverCache,
        event_cache_key, fault_center_info_key,
    };
    use crate::error::EngineError;
    use crate::types::Severity;
    use crate::types::test_rules::metrics_rule;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use proptest::prelude::*;
    use std::collections::HashMap as Map;

    const TENANT: &str = "tenant-a";
    const RULE: &str = "r1";

    struct Harness {
        events: InMemoryEventCache,
        pending: InMemoryPendingRecoverCache,
        engine: RecoveryEngine,
        event_key: String,
        info_key: String,
    }

    impl Harness {
        fn new(recover_wait_secs: u64) -> Self {
            let events = InMemoryEventCache::new();
            let pending = InMemoryPendingRecoverCache::new();
            let infos = InMemoryFaultCenterInfoCache::new();
            infos.insert(
                TENANT,
                FaultCenterInfo {
                    id: "fc-1".to_string(),
                    name: "core".to_string(),
                    recover_wait_secs,
                },
            );
            let engine = RecoveryEngine::new(
                Arc::new(events.clone()),
                Arc::new(pending.clone()),
                Arc::new(infos),
                EngineConfig::default(),
            );
            Self {
                events,
                pending,
                engine,
                event_key: event_cache_key(TENANT, "fc-1"),
                info_key: fault_center_info_key(TENANT, "fc-1"),
            }
        }

        async fn seed(&self, rule_id: &str, fingerprint: &str, status: AlertStatus) {
            let mut event = AlertCurEvent::draft(
                &metrics_rule(rule_id),
                "prom-1",
                fingerprint,
                Severity::new("P1"),
                Map::new(),
            );
            event.status = status;
            self.events.push_event(event).await.unwrap();
        }

        async fn status(&self, fingerprint: &str) -> Option<AlertStatus> {
            self.events
                .get_event(TENANT, "fc-1", fingerprint)
                .await
                .unwrap()
                .map(|e| e.status)
        }

        async fn pending_since(&self, fingerprint: &str) -> Option<DateTime<Utc>> {
            self.pending.get(TENANT, RULE, fingerprint).await.unwrap()
        }

        async fn run(&self, current: &[&str], now: DateTime<Utc>) -> RecoveryReport {
            let current: Vec<String> = current.iter().map(ToString::to_string).collect();
            self.engine
                .recover_at(TENANT, RULE, &self.event_key, &self.info_key, &current, now)
                .await
                .unwrap()
        }
    }

    fn secs(n: i64) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(n)
    }

    mod grace_period_tests {
        use super::*;

        #[tokio::test]
        async fn recovers_only_after_wait_time() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-1", AlertStatus::Alerting).await;
            let t = Utc::now();

            let report = h.run(&[], t).await;
            assert_eq!(report.pending, vec!["fp-1".to_string()]);
            assert_eq!(h.status("fp-1").await, Some(AlertStatus::PendingRecovery));
            assert_eq!(h.pending_since("fp-1").await, Some(t));

            let report = h.run(&[], t + secs(30)).await;
            assert!(report.is_empty());
            assert_eq!(h.status("fp-1").await, Some(AlertStatus::PendingRecovery));

            let report = h.run(&[], t + secs(61)).await;
            assert_eq!(report.recovered, vec!["fp-1".to_string()]);
            assert_eq!(h.status("fp-1").await, Some(AlertStatus::Recovered));
            assert_eq!(h.pending_since("fp-1").await, None);
        }

        #[tokio::test]
        async fn default_wait_applies_without_fault_center_setting() {
            let h = Harness::new(0);
            h.seed(RULE, "fp-1", AlertStatus::Alerting).await;
            let t = Utc::now();

            h.run(&[], t).await;
            let report = h.run(&[], t + secs(1)).await;

            assert_eq!(report.recovered, vec!["fp-1".to_string()]);
        }

        #[tokio::test]
        async fn event_override_beats_fault_center() {
            let h = Harness::new(60);
            let mut event = AlertCurEvent::draft(
                &metrics_rule(RULE),
                "prom-1",
                "fp-1",
                Severity::new("P1"),
                Map::new(),
            );
            event.status = AlertStatus::Alerting;
            event.recover_wait_secs = Some(5);
            h.events.push_event(event).await.unwrap();
            let t = Utc::now();

            h.run(&[], t).await;
            let report = h.run(&[], t + secs(5)).await;

            assert_eq!(report.recovered, vec!["fp-1".to_string()]);
        }

        #[tokio::test]
        async fn recovered_events_are_left_alone() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-1", AlertStatus::Recovered).await;

            let report = h.run(&[], Utc::now()).await;

            assert!(report.is_empty());
            assert_eq!(h.pending_since("fp-1").await, None);
        }
    }

    mod reactivation_tests {
        use super::*;

        #[tokio::test]
        async fn reappearing_fingerprint_is_reactivated() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-1", AlertStatus::Alerting).await;
            let t = Utc::now();
            h.run(&[], t).await;

            let report = h.run(&["fp-1"], t + secs(10)).await;

            assert_eq!(report.reactivated, vec!["fp-1".to_string()]);
            assert_eq!(h.status("fp-1").await, Some(AlertStatus::Alerting));
            assert_eq!(h.pending_since("fp-1").await, None);
        }

        #[tokio::test]
        async fn reactivation_ignores_elapsed_time() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-1", AlertStatus::Alerting).await;
            let t = Utc::now();
            h.run(&[], t).await;

            let report = h.run(&["fp-1"], t + secs(3600)).await;

            assert_eq!(report.reactivated, vec!["fp-1".to_string()]);
            assert!(report.recovered.is_empty());
        }

        #[tokio::test]
        async fn illegal_transition_is_skipped() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-bad", AlertStatus::Recovered).await;
            h.seed(RULE, "fp-ok", AlertStatus::Alerting).await;
            let t = Utc::now();
            h.pending.set(TENANT, RULE, "fp-bad", t).await.unwrap();

            let report = h.run(&["fp-bad"], t).await;

            assert_eq!(report.skipped, vec!["fp-bad".to_string()]);
            assert_eq!(report.pending, vec!["fp-ok".to_string()]);
            assert_eq!(h.status("fp-bad").await, Some(AlertStatus::Recovered));
        }
    }

    mod ownership_tests {
        use super::*;

        #[tokio::test]
        async fn absent_pre_alert_is_deleted() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-pre", AlertStatus::PreAlert).await;
            h.seed(RULE, "fp-live", AlertStatus::PreAlert).await;

            let report = h.run(&["fp-live"], Utc::now()).await;

            assert_eq!(report.deleted_pre_alerts, vec!["fp-pre".to_string()]);
            assert_eq!(h.status("fp-pre").await, None);
            assert_eq!(h.status("fp-live").await, Some(AlertStatus::PreAlert));
        }

        #[tokio::test]
        async fn other_rules_are_untouched() {
            let h = Harness::new(60);
            h.seed("r10", "fp-other", AlertStatus::Alerting).await;
            h.seed("r10", "fp-other-pre", AlertStatus::PreAlert).await;

            let report = h.run(&[], Utc::now()).await;

            assert!(report.is_empty());
            assert_eq!(h.status("fp-other").await, Some(AlertStatus::Alerting));
            assert_eq!(h.status("fp-other-pre").await, Some(AlertStatus::PreAlert));
        }

        #[tokio::test]
        async fn empty_fingerprints_are_ignored() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-1", AlertStatus::Alerting).await;

            let report = h.run(&[""], Utc::now()).await;

            assert_eq!(report.pending, vec!["fp-1".to_string()]);
        }

        #[tokio::test]
        async fn empty_keys_are_a_no_op() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-1", AlertStatus::Alerting).await;

            let report = h
                .engine
                .recover(TENANT, RULE, "", &h.info_key, &[])
                .await
                .unwrap();

            assert_eq!(report, RecoveryReport::default());
            assert_eq!(h.status("fp-1").await, Some(AlertStatus::Alerting));
        }
    }

    mod suppression_tests {
        use super::*;

        fn tick(current: &[&str], suppressed: &[&str]) -> DispatchReport {
            DispatchReport {
                fingerprints: current.iter().map(ToString::to_string).collect(),
                suppressed: suppressed.iter().map(ToString::to_string).collect(),
                ..DispatchReport::default()
            }
        }

        #[tokio::test]
        async fn suppressed_fingerprints_are_neither_discarded_nor_missing() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-p0", AlertStatus::PreAlert).await;
            h.seed(RULE, "fp-p1", AlertStatus::PreAlert).await;
            h.seed(RULE, "fp-p1-live", AlertStatus::Alerting).await;

            let report = h
                .engine
                .recover_tick_at(
                    TENANT,
                    RULE,
                    &h.event_key,
                    &h.info_key,
                    &tick(&["fp-p0"], &["fp-p1", "fp-p1-live"]),
                    Utc::now(),
                )
                .await
                .unwrap();

            assert!(report.is_empty());
            assert_eq!(h.status("fp-p1").await, Some(AlertStatus::PreAlert));
            assert_eq!(h.status("fp-p1-live").await, Some(AlertStatus::Alerting));
            assert_eq!(h.pending_since("fp-p1-live").await, None);
        }

        #[tokio::test]
        async fn no_longer_suppressed_pre_alert_is_discarded() {
            let h = Harness::new(60);
            h.seed(RULE, "fp-p1", AlertStatus::PreAlert).await;
            let t = Utc::now();

            h.engine
                .recover_tick_at(TENANT, RULE, &h.event_key, &h.info_key, &tick(&[], &["fp-p1"]), t)
                .await
                .unwrap();
            let report = h
                .engine
                .recover_tick_at(TENANT, RULE, &h.event_key, &h.info_key, &tick(&[], &[]), t + secs(10))
                .await
                .unwrap();

            assert_eq!(report.deleted_pre_alerts, vec!["fp-p1".to_string()]);
            assert_eq!(h.status("fp-p1").await, None);
        }
    }

    mod failure_tests {
        use super::*;

        struct DownCache;

        impl EventCache for DownCache {
            fn push_event<'a>(&'a self, _event: AlertCurEvent) -> BoxFuture<'a, Result<()>> {
                futures::future::ready(Err(EngineError::cache("down"))).boxed()
            }

            fn remove_event<'a>(
                &'a self,
                _tenant_id: &'a str,
                _fault_center_id: &'a str,
                _fingerprint: &'a str,
            ) -> BoxFuture<'a, Result<()>> {
                futures::future::ready(Err(EngineError::cache("down"))).boxed()
            }

            fn get_all_events<'a>(
                &'a self,
                _key: &'a str,
            ) -> BoxFuture<'a, Result<Map<String, AlertCurEvent>>> {
                futures::future::ready(Err(EngineError::cache("down"))).boxed()
            }

            fn get_event<'a>(
                &'a self,
                _tenant_id: &'a str,
                _fault_center_id: &'a str,
                _fingerprint: &'a str,
            ) -> BoxFuture<'a, Result<Option<AlertCurEvent>>> {
                futures::future::ready(Err(EngineError::cache("down"))).boxed()
            }
        }

        #[tokio::test]
        async fn unreadable_cache_aborts_without_writes() {
            let pending = InMemoryPendingRecoverCache::new();
            let engine = RecoveryEngine::new(
                Arc::new(DownCache),
                Arc::new(pending.clone()),
                Arc::new(InMemoryFaultCenterInfoCache::new()),
                EngineConfig::default(),
            );

            let result = engine
                .recover(TENANT, RULE, "k.events", "k.info", &[])
                .await;

            assert!(matches!(result, Err(EngineError::Cache { .. })));
            assert!(pending.list(TENANT, RULE).await.unwrap().is_empty());
        }
    }

    mod property_tests {
        use super::*;

        fn status_strategy() -> impl Strategy<Value = AlertStatus> {
            prop_oneof![
                Just(AlertStatus::PreAlert),
                Just(AlertStatus::Alerting),
                Just(AlertStatus::PendingRecovery),
                Just(AlertStatus::Recovered),
            ]
        }

        proptest! {
            #[test]
            fn second_pass_is_idempotent(
                statuses in proptest::collection::vec(status_strategy(), 1..8),
                current_mask in proptest::collection::vec(any::<bool>(), 8),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let h = Harness::new(60);
                    let mut current = Vec::new();
                    for (i, status) in statuses.iter().enumerate() {
                        let fp = format!("fp-{i}");
                        h.seed(RULE, &fp, *status).await;
                        if current_mask[i] {
                            current.push(fp);
                        }
                    }
                    let current: Vec<&str> = current.iter().map(String::as_str).collect();
                    let now = Utc::now();

                    h.run(&current, now).await;
                    let second = h.run(&current, now).await;

                    prop_assert!(second.is_empty());
                    Ok(())
                })?;
            }

            #[test]
            fn alerting_never_skips_pending(wait in 1u64..120, elapsed in 0i64..240) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let h = Harness::new(wait);
                    h.seed(RULE, "fp-1", AlertStatus::Alerting).await;
                    let t = Utc::now();

                    let first = h.run(&[], t + secs(elapsed)).await;
                    prop_assert!(first.recovered.is_empty());
                    prop_assert_eq!(h.status("fp-1").await, Some(AlertStatus::PendingRecovery));
                    Ok(())
                })?;
            }
        }
    }
}
