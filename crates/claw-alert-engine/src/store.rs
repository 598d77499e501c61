//! Persistent rule storage contract.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::types::AlertRule;

/// Source of truth for rule configuration.
pub trait RuleStore: Send + Sync {
    /// Returns every enabled rule across all tenants.
    fn list_enabled_rules(&self) -> BoxFuture<'_, Result<Vec<AlertRule>>>;

    /// Returns the current configuration of a rule.
    fn get_rule<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<AlertRule>>>;
}

/// In-memory [`RuleStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleStore {
    rules: Arc<RwLock<HashMap<String, AlertRule>>>,
}

impl InMemoryRuleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a rule.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidRule` if the rule fails validation.
    pub fn upsert(&self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        info!(rule_id = %rule.id, rule_name = %rule.name, "stored alert rule");
        self.rules.write().insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Removes a rule. Returns `true` if it existed.
    pub fn remove(&self, rule_id: &str) -> bool {
        self.rules.write().remove(rule_id).is_some()
    }

    /// Flips a rule's enabled flag.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RuleNotFound` if the rule doesn't exist.
    pub fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<()> {
        let mut rules = self.rules.write();
        let rule = rules.get_mut(rule_id).ok_or_else(|| EngineError::RuleNotFound {
            id: rule_id.to_string(),
        })?;
        rule.enabled = enabled;
        Ok(())
    }

    /// Returns the number of stored rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if no rules are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleStore for InMemoryRuleStore {
    fn list_enabled_rules(&self) -> BoxFuture<'_, Result<Vec<AlertRule>>> {
        let rules: Vec<AlertRule> = self
            .rules
            .read()
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect();
        futures::future::ready(Ok(rules)).boxed()
    }

    fn get_rule<'a>(
        &'a self,
        tenant_id: &'a str,
        rule_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<AlertRule>>> {
        let rule = self
            .rules
            .read()
            .get(rule_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned();
        futures::future::ready(Ok(rule)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EvalInterval;
    use crate::types::test_rules::metrics_rule;

    #[tokio::test]
    async fn lists_only_enabled_rules() {
        let store = InMemoryRuleStore::new();
        store.upsert(metrics_rule("r1")).unwrap();
        store.upsert(metrics_rule("r2")).unwrap();
        store.set_enabled("r2", false).unwrap();

        let enabled = store.list_enabled_rules().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "r1");
    }

    #[tokio::test]
    async fn get_rule_is_tenant_scoped() {
        let store = InMemoryRuleStore::new();
        store.upsert(metrics_rule("r1")).unwrap();
        assert!(store.get_rule("tenant-a", "r1").await.unwrap().is_some());
        assert!(store.get_rule("tenant-b", "r1").await.unwrap().is_none());
    }

    #[test]
    fn upsert_rejects_invalid_rule() {
        let store = InMemoryRuleStore::new();
        let mut rule = metrics_rule("r1");
        rule.interval = EvalInterval::secs(0);
        assert!(store.upsert(rule).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn set_enabled_missing_rule() {
        let store = InMemoryRuleStore::new();
        assert!(matches!(
            store.set_enabled("nope", true),
            Err(EngineError::RuleNotFound { .. })
        ));
    }
}
