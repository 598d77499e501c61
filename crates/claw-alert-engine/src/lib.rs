//! Rule evaluation and recovery engine for Clawbernetes alerting.
//!
//! `claw-alert-engine` periodically evaluates alert rules against their
//! monitoring backends and keeps the alert event cache in sync with what the
//! backends report.
//!
//! # Components
//!
//! - **Rule Scheduler** ([`RuleScheduler`]): one supervised evaluation loop
//!   per rule, with non-overlapping ticks and panic restart
//! - **Datasource Dispatcher** ([`Dispatcher`]): queries every datasource of a
//!   rule concurrently and normalizes the results into fingerprints and
//!   event drafts
//! - **Recovery Engine** ([`RecoveryEngine`]): moves events through
//!   `PreAlert -> Alerting -> PendingRecovery -> Recovered`
//!
//! Storage, caches and backend clients are consumed through traits; in-memory
//! implementations of the caches and of the rule store are included.
//!
//! # Example
//!
//! ```rust
//! use claw_alert_engine::{ComparisonOperator, Severity, ThresholdExpr};
//!
//! let expr = ThresholdExpr::parse("> 90").unwrap();
//! assert_eq!(expr.operator, ComparisonOperator::GreaterThan);
//! assert!(expr.evaluate(95.0));
//!
//! // Lower rank is more urgent.
//! assert!(Severity::new("P0") < Severity::new("P1"));
//! ```
//!
//! # Wiring
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use claw_alert_engine::*;
//!
//! let config = EngineConfig::from_file("engine.json")?;
//! let events = Arc::new(InMemoryEventCache::new());
//! let dispatcher = Dispatcher::new(registry, pool, health, events.clone(), config.query_timeout());
//! let recovery = RecoveryEngine::new(
//!     events,
//!     Arc::new(InMemoryPendingRecoverCache::new()),
//!     Arc::new(InMemoryFaultCenterInfoCache::new()),
//!     config.clone(),
//! );
//! let scheduler = RuleScheduler::new(store, dispatcher, recovery, config);
//! scheduler.restart_all_evals().await?;
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/claw-alert-engine/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod datasource;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod recovery;
pub mod scheduler;
pub mod store;
pub mod template;
pub mod threshold;
pub mod types;

// Re-export main types at crate root
pub use cache::{
    EventCache, FaultCenterInfoCache, InMemoryEventCache, InMemoryFaultCenterInfoCache,
    InMemoryPendingRecoverCache, PendingRecoverCache, event_cache_key, fault_center_info_key,
};
pub use config::EngineConfig;
pub use datasource::{
    BackendFamily, CloudDatapoint, CloudMetricsClient, DatasourceClient, DatasourceInstance,
    DatasourcePool, DatasourceRegistry, DatasourceType, HealthChecker, KubeEvent,
    KubeEventsClient, LogsClient, MetricSeries, MetricsClient, TraceRecord, TracesClient,
};
pub use dispatch::{DispatchReport, Dispatcher, QueryOutcome};
pub use error::{EngineError, Result};
pub use recovery::{RecoveryEngine, RecoveryReport};
pub use scheduler::RuleScheduler;
pub use store::{InMemoryRuleStore, RuleStore};
pub use threshold::{ComparisonOperator, ThresholdExpr};
pub use types::{
    AlertCurEvent, AlertRule, AlertStatus, EffectiveTime, EvalInterval, FaultCenterInfo,
    QueryConfig, Severity, SeverityRule, TimeUnit, UpgradeState,
};
