//! Cache contracts for event state.
//!
//! Event state lives in three key-scoped caches:
//! - [`EventCache`]: latest state of every event, per tenant + fault center
//! - [`PendingRecoverCache`]: when a fingerprint was first seen missing,
//!   per tenant + rule
//! - [`FaultCenterInfoCache`]: fault center settings such as the recovery
//!   wait time
//!
//! Entries are read-modify-write without concurrency control; the last
//! writer wins. In-memory implementations backed by `parking_lot` locks are
//! provided for embedding and tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::error::Result;
use crate::types::{AlertCurEvent, FaultCenterInfo};

/// Builds the event cache key of a fault center.
#[must_use]
pub fn event_cache_key(tenant_id: &str, fault_center_id: &str) -> String {
    format!("{tenant_id}:faultCenter:{fault_center_id}.events")
}

/// Builds the info cache key of a fault center.
#[must_use]
pub fn fault_center_info_key(tenant_id: &str, fault_center_id: &str) -> String {
    format!("{tenant_id}:faultCenter:{fault_center_id}.info")
}

/// Latest known state of every alert event, keyed by fingerprint.
pub trait EventCache: Send + Sync {
    /// Stores `event`, replacing any previous state for its fingerprint.
    fn push_event<'a>(&'a self, event: AlertCurEvent) -> BoxFuture<'a, Result<()>>;

    /// Removes the event with `fingerprint`.
    fn remove_event<'a>(
        &'a self,
        tenant_id: &'a str,
        fault_center_id: &'a str,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Returns every event stored under `key` (see [`event_cache_key`]).
    fn get_all_events<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, AlertCurEvent>>>;

    /// Returns the event with `fingerprint`, if any.
    fn get_event<'a>(
        &'a self,
        tenant_id: &'a str,
        fault_center_id: &'a str,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<Option<AlertCurEvent>>>;
}

/// First-observed-missing timestamps of fingerprints awaiting recovery.
pub trait PendingRecoverCache: Send + Sync {
    /// Records when `fingerprint` was first seen missing.
    fn set<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
        fingerprint: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Returns the timestamp recorded for `fingerprint`.
    fn get<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>>>;

    /// Forgets `fingerprint`.
    fn delete<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Returns every pending fingerprint of a rule.
    fn list<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, DateTime<Utc>>>>;
}

/// Fault center settings.
pub trait FaultCenterInfoCache: Send + Sync {
    /// Returns the settings stored under `key` (see [`fault_center_info_key`]).
    fn get_info<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<FaultCenterInfo>>>;
}

/// In-memory [`EventCache`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventCache {
    centers: Arc<RwLock<HashMap<String, HashMap<String, AlertCurEvent>>>>,
}

impl InMemoryEventCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of events across all fault centers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.centers.read().values().map(HashMap::len).sum()
    }

    /// Returns true if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventCache for InMemoryEventCache {
    fn push_event<'a>(&'a self, event: AlertCurEvent) -> BoxFuture<'a, Result<()>> {
        let key = event_cache_key(&event.tenant_id, &event.fault_center_id);
        self.centers
            .write()
            .entry(key)
            .or_default()
            .insert(event.fingerprint.clone(), event);
        futures::future::ready(Ok(())).boxed()
    }

    fn remove_event<'a>(
        &'a self,
        tenant_id: &'a str,
        fault_center_id: &'a str,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        let key = event_cache_key(tenant_id, fault_center_id);
        if let Some(events) = self.centers.write().get_mut(&key) {
            events.remove(fingerprint);
        }
        futures::future::ready(Ok(())).boxed()
    }

    fn get_all_events<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, AlertCurEvent>>> {
        let events = self.centers.read().get(key).cloned().unwrap_or_default();
        futures::future::ready(Ok(events)).boxed()
    }

    fn get_event<'a>(
        &'a self,
        tenant_id: &'a str,
        fault_center_id: &'a str,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<Option<AlertCurEvent>>> {
        let key = event_cache_key(tenant_id, fault_center_id);
        let event = self
            .centers
            .read()
            .get(&key)
            .and_then(|events| events.get(fingerprint))
            .cloned();
        futures::future::ready(Ok(event)).boxed()
    }
}

/// In-memory [`PendingRecoverCache`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryPendingRecoverCache {
    entries: Arc<RwLock<HashMap<(String, String), HashMap<String, DateTime<Utc>>>>>,
}

impl InMemoryPendingRecoverCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rule_key(tenant_id: &str, rule_id: &str) -> (String, String) {
        (tenant_id.to_string(), rule_id.to_string())
    }
}

impl PendingRecoverCache for InMemoryPendingRecoverCache {
    fn set<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
        fingerprint: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<()>> {
        self.entries
            .write()
            .entry(Self::rule_key(tenant_id, rule_id))
            .or_default()
            .insert(fingerprint.to_string(), at);
        futures::future::ready(Ok(())).boxed()
    }

    fn get<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>>> {
        let at = self
            .entries
            .read()
            .get(&Self::rule_key(tenant_id, rule_id))
            .and_then(|pending| pending.get(fingerprint))
            .copied();
        futures::future::ready(Ok(at)).boxed()
    }

    fn delete<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        let mut entries = self.entries.write();
        let key = Self::rule_key(tenant_id, rule_id);
        if let Some(pending) = entries.get_mut(&key) {
            pending.remove(fingerprint);
            if pending.is_empty() {
                entries.remove(&key);
            }
        }
        futures::future::ready(Ok(())).boxed()
    }

    fn list<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, DateTime<Utc>>>> {
        let pending = self
            .entries
            .read()
            .get(&Self::rule_key(tenant_id, rule_id))
            .cloned()
            .unwrap_or_default();
        futures::future::ready(Ok(pending)).boxed()
    }
}

/// In-memory [`FaultCenterInfoCache`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryFaultCenterInfoCache {
    infos: Arc<RwLock<HashMap<String, FaultCenterInfo>>>,
}

impl InMemoryFaultCenterInfoCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the settings of a fault center.
    pub fn insert(&self, tenant_id: &str, info: FaultCenterInfo) {
        let key = fault_center_info_key(tenant_id, &info.id);
        self.infos.write().insert(key, info);
    }
}

impl FaultCenterInfoCache for InMemoryFaultCenterInfoCache {
    fn get_info<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<FaultCenterInfo>>> {
        let info = self.infos.read().get(key).cloned();
        futures::future::ready(Ok(info)).boxed()
    }
}
