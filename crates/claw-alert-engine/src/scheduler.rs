//! Rule scheduler.
//!
//! Every submitted rule gets one evaluation loop driven by its interval.
//! Ticks run behind a single-permit semaphore owned by the rule id, so ticks
//! of one rule never overlap, not even across a restart. While a tick runs, at
//! most one further tick waits for the permit; later timer fires fold into the
//! waiting one. A tick re-reads the rule, skips itself if the rule is
//! disabled or outside its effective time, dispatches the rule and hands the
//! dispatch report to the recovery engine.
//!
//! A loop only ends through [`RuleScheduler::stop`] or
//! [`RuleScheduler::stop_all_evals`]. A loop that panics is restarted by its
//! supervisor after an exponential backoff.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{event_cache_key, fault_center_info_key};
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::recovery::RecoveryEngine;
use crate::store::RuleStore;
use crate::types::AlertRule;

/// Registry entry of a running loop.
#[derive(Debug)]
struct LoopHandle {
    token: CancellationToken,
    generation: u64,
}

struct SchedulerInner {
    store: Arc<dyn RuleStore>,
    dispatcher: Dispatcher,
    recovery: RecoveryEngine,
    config: EngineConfig,
    loops: Mutex<HashMap<String, LoopHandle>>,
    /// Tick guards by rule id. Outlive the loops that use them.
    tick_guards: Mutex<HashMap<String, Arc<Semaphore>>>,
    next_generation: AtomicU64,
}

/// Runs one evaluation loop per submitted rule.
#[derive(Clone)]
pub struct RuleScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for RuleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleScheduler")
            .field("running", &self.running_count())
            .finish_non_exhaustive()
    }
}

/// Consecutive panic counter of one loop.
#[derive(Debug, Default)]
struct RestartBackoff {
    failures: u32,
    last_failure: Option<Instant>,
}

impl RestartBackoff {
    /// Records a panic at `now` and returns the number of consecutive
    /// failures, forgetting failures older than the reset window.
    fn record(&mut self, now: Instant, config: &EngineConfig) -> u32 {
        if self
            .last_failure
            .is_some_and(|last| now.duration_since(last) >= config.restart_backoff_reset())
        {
            self.failures = 0;
        }
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);
        self.failures
    }
}

impl RuleScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        store: Arc<dyn RuleStore>,
        dispatcher: Dispatcher,
        recovery: RecoveryEngine,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                dispatcher,
                recovery,
                config,
                loops: Mutex::new(HashMap::new()),
                tick_guards: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Starts the evaluation loop of `rule`. Returns `false` if a loop for
    /// the rule is already running.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidRule` if the rule fails validation.
    pub fn submit(&self, rule: AlertRule) -> Result<bool> {
        rule.validate()?;

        let token = CancellationToken::new();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let guard = {
            let mut loops = self.inner.loops.lock();
            if loops.contains_key(&rule.id) {
                debug!(rule_id = %rule.id, "rule loop already running");
                return Ok(false);
            }
            loops.insert(
                rule.id.clone(),
                LoopHandle {
                    token: token.clone(),
                    generation,
                },
            );
            Arc::clone(
                self.inner
                    .tick_guards
                    .lock()
                    .entry(rule.id.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(1))),
            )
        };

        info!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            interval = ?rule.eval_interval(),
            "started rule loop"
        );
        tokio::spawn(self.clone().supervise(rule, guard, token, generation));
        Ok(true)
    }

    /// Cancels the loop of `rule_id`. Returns `false` if none was running.
    ///
    /// An evaluation already in flight finishes, but its results are not
    /// reconciled.
    pub fn stop(&self, rule_id: &str) -> bool {
        let Some(handle) = self.inner.loops.lock().remove(rule_id) else {
            return false;
        };
        handle.token.cancel();
        info!(rule_id = %rule_id, "stopped rule loop");
        true
    }

    /// Stops the loop of `rule` (if any) and submits it again.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidRule` if the rule fails validation.
    pub fn restart(&self, rule: AlertRule) -> Result<bool> {
        self.stop(&rule.id);
        self.submit(rule)
    }

    /// Loads every enabled rule from the store and restarts its loop, with
    /// at most `max_concurrent_submits` submissions in flight. Returns the
    /// number of loops started.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules cannot be listed.
    pub async fn restart_all_evals(&self) -> Result<usize> {
        let rules = self.inner.store.list_enabled_rules().await?;
        let total = rules.len();
        let permits = Arc::new(Semaphore::new(self.inner.config.max_concurrent_submits));
        let mut submissions = JoinSet::new();

        for rule in rules {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let this = self.clone();
            submissions.spawn(async move {
                let _permit = permit;
                let rule_id = rule.id.clone();
                match this.restart(rule) {
                    Ok(started) => started,
                    Err(e) => {
                        warn!(rule_id = %rule_id, error = %e, "failed to submit rule");
                        false
                    }
                }
            });
        }

        let mut started = 0;
        while let Some(joined) = submissions.join_next().await {
            match joined {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "rule submission task failed"),
            }
        }

        info!(started, total, "restarted rule loops");
        Ok(started)
    }

    /// Cancels every running loop. Returns the number of loops stopped.
    pub fn stop_all_evals(&self) -> usize {
        let drained: Vec<(String, LoopHandle)> = self.inner.loops.lock().drain().collect();
        for (_, handle) in &drained {
            handle.token.cancel();
        }
        info!(stopped = drained.len(), "stopped all rule loops");
        drained.len()
    }

    /// Returns true if a loop for `rule_id` is registered.
    #[must_use]
    pub fn is_running(&self, rule_id: &str) -> bool {
        self.inner.loops.lock().contains_key(rule_id)
    }

    /// Returns the number of registered loops.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.inner.loops.lock().len()
    }

    /// Runs the loop of `rule` and restarts it whenever it panics, until it
    /// is cancelled or replaced.
    async fn supervise(
        self,
        rule: AlertRule,
        guard: Arc<Semaphore>,
        token: CancellationToken,
        generation: u64,
    ) {
        self.supervise_until_stopped(&rule, &guard, token, generation).await;
        drop(guard);
        self.release_tick_guard(&rule.id);
    }

    async fn supervise_until_stopped(
        &self,
        rule: &AlertRule,
        guard: &Arc<Semaphore>,
        mut token: CancellationToken,
        mut generation: u64,
    ) {
        let mut backoff = RestartBackoff::default();

        loop {
            let outcome = AssertUnwindSafe(self.run_loop(rule, guard, &token))
                .catch_unwind()
                .await;
            let Err(payload) = outcome else {
                debug!(rule_id = %rule.id, "rule loop exited");
                return;
            };

            let failures = backoff.record(Instant::now(), &self.inner.config);
            let delay = self.inner.config.restart_backoff(failures);
            error!(
                rule_id = %rule.id,
                panic = %panic_message(payload.as_ref()),
                failures,
                restart_in = ?delay,
                "rule loop panicked"
            );

            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match self.replace_loop(&rule.id, generation) {
                Some((next_token, next_generation)) => {
                    token = next_token;
                    generation = next_generation;
                    info!(rule_id = %rule.id, failures, "restarted rule loop after panic");
                }
                None => return,
            }
        }
    }

    /// Forgets the tick guard of a rule once no loop is registered for it
    /// and no tick still holds it.
    fn release_tick_guard(&self, rule_id: &str) {
        let loops = self.inner.loops.lock();
        if loops.contains_key(rule_id) {
            return;
        }
        let mut guards = self.inner.tick_guards.lock();
        if guards
            .get(rule_id)
            .is_some_and(|guard| Arc::strong_count(guard) == 1)
        {
            guards.remove(rule_id);
        }
    }

    /// Swaps the handle of a panicked loop for a fresh one, provided the loop
    /// was not stopped or resubmitted in the meantime.
    fn replace_loop(&self, rule_id: &str, generation: u64) -> Option<(CancellationToken, u64)> {
        let mut loops = self.inner.loops.lock();
        let handle = loops.get_mut(rule_id)?;
        if handle.generation != generation {
            return None;
        }

        handle.token.cancel();
        handle.token = CancellationToken::new();
        handle.generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        Some((handle.token.clone(), handle.generation))
    }

    /// Fires a tick per interval until cancelled. A panicking tick unwinds
    /// through here so the supervisor sees it.
    async fn run_loop(
        &self,
        rule: &AlertRule,
        guard: &Arc<Semaphore>,
        token: &CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(rule.eval_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Set while a tick waits for the guard.
        let queued = Arc::new(AtomicBool::new(false));
        let mut ticks = JoinSet::new();

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if queued.swap(true, Ordering::AcqRel) {
                        debug!(rule_id = %rule.id, "previous tick still queued; folding");
                        continue;
                    }
                    let this = self.clone();
                    let guard = Arc::clone(guard);
                    let queued = Arc::clone(&queued);
                    let token = token.clone();
                    let tenant_id = rule.tenant_id.clone();
                    let rule_id = rule.id.clone();
                    ticks.spawn(async move {
                        let permit = guard.acquire_owned().await;
                        queued.store(false, Ordering::Release);
                        let Ok(_permit) = permit else {
                            return;
                        };
                        if token.is_cancelled() {
                            return;
                        }
                        this.run_tick(&tenant_id, &rule_id, &token).await;
                    });
                }
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            std::panic::resume_unwind(e.into_panic());
                        }
                    }
                }
            }
        }

        // In-flight ticks finish on their own and see the cancelled token.
        ticks.detach_all();
    }

    /// Evaluates the current configuration of a rule once.
    async fn run_tick(&self, tenant_id: &str, rule_id: &str, token: &CancellationToken) {
        let rule = match self.inner.store.get_rule(tenant_id, rule_id).await {
            Ok(Some(rule)) => rule,
            Ok(None) => {
                debug!(rule_id = %rule_id, "rule not found; skipping tick");
                return;
            }
            Err(e) => {
                warn!(rule_id = %rule_id, error = %e, "failed to load rule; skipping tick");
                return;
            }
        };
        if !rule.enabled {
            debug!(rule_id = %rule_id, "rule disabled; skipping tick");
            return;
        }
        if !rule.is_effective_at(Utc::now()) {
            debug!(rule_id = %rule_id, "outside effective time; skipping tick");
            return;
        }

        let report = self.inner.dispatcher.dispatch(&rule).await;
        if token.is_cancelled() {
            debug!(rule_id = %rule_id, "loop stopped during dispatch; discarding results");
            return;
        }

        let event_key = event_cache_key(&rule.tenant_id, &rule.fault_center_id);
        let info_key = fault_center_info_key(&rule.tenant_id, &rule.fault_center_id);
        match self
            .inner
            .recovery
            .recover_tick(&rule.tenant_id, &rule.id, &event_key, &info_key, &report)
            .await
        {
            Ok(recovery) => debug!(
                rule_id = %rule_id,
                fingerprints = report.fingerprints.len(),
                pending = recovery.pending.len(),
                recovered = recovery.recovered.len(),
                "tick complete"
            ),
            Err(e) => error!(rule_id = %rule_id, error = %e, "recovery pass aborted"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
