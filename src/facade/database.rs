use crate::config::{Config, StoreConfig};
use crate::core::{Clock, Codec, DbError, GuidProvider, Result, SystemClock, UuidGuidProvider};
use crate::metrics::{FacadeMetrics, MetricsSink};
use crate::models::RestartPolicy;
use crate::storage::InMemoryStorage;
use crate::transaction::{Transaction, TransactionManager, TransactionStats};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Handle to the state store.
///
/// Cloning is cheap; every clone talks to the same tables. Operation
/// families live in the [`ActualLrpDb`](super::ActualLrpDb),
/// [`EvacuationDb`](super::EvacuationDb), [`TaskDb`](super::TaskDb),
/// [`DesiredLrpDb`](super::DesiredLrpDb) and [`DomainDb`](super::DomainDb)
/// traits.
#[derive(Clone)]
pub struct StateDb {
    pub(crate) transactions: TransactionManager,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) guids: Arc<dyn GuidProvider>,
    pub(crate) codec: Codec,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) restart_policy: RestartPolicy,
    config: StoreConfig,
}

impl StateDb {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default(), RestartPolicy::default())
    }

    pub fn with_config(config: StoreConfig, restart_policy: RestartPolicy) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        Self {
            transactions: TransactionManager::new(storage, config.lock_timeout_duration()),
            clock: Arc::new(SystemClock),
            guids: Arc::new(UuidGuidProvider),
            codec: Codec::new(config.format),
            metrics: Arc::new(FacadeMetrics),
            restart_policy,
            config,
        }
    }

    /// Builds a store from a validated [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate().map_err(DbError::BadRequest)?;
        Ok(Self::with_config(
            config.store.clone(),
            config.restart.clone(),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_guid_provider(mut self, guids: Arc<dyn GuidProvider>) -> Self {
        self.guids = guids;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Opens a transaction over the raw tables.
    pub fn begin(&self) -> Transaction {
        self.transactions.begin()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn restart_policy(&self) -> &RestartPolicy {
        &self.restart_policy
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.transactions.stats()
    }

    pub(crate) fn next_guid(&self) -> Result<String> {
        self.guids.next_guid()
    }
}

impl Default for StateDb {
    fn default() -> Self {
        Self::new()
    }
}
