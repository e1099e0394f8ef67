//! Shared harness for the integration tests.
#![allow(dead_code)]

use convergedb::core::{FakeClock, SequentialGuidProvider};
use convergedb::models::{
    ActualLrpKey, CellPresence, CellSet, DesiredLrpSchedulingInfo, InstanceIdentity, NetInfo,
    PortMapping, RestartPolicy,
};
use convergedb::{DesiredLrpDb, DomainDb, RecordingMetrics, StateDb, StoreConfig};
use std::sync::Arc;
use std::time::Duration;

pub const DOMAIN: &str = "cf-apps";

pub struct Harness {
    pub db: StateDb,
    pub clock: Arc<FakeClock>,
    pub guids: Arc<SequentialGuidProvider>,
    pub metrics: Arc<RecordingMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(RestartPolicy::default())
    }

    pub fn with_policy(policy: RestartPolicy) -> Self {
        init_tracing();
        let clock = Arc::new(FakeClock::default());
        let guids = Arc::new(SequentialGuidProvider::new("epoch"));
        let metrics = Arc::new(RecordingMetrics::new());
        let config = StoreConfig::default().lock_timeout(Duration::from_millis(100));
        let db = StateDb::with_config(config, policy)
            .with_clock(clock.clone())
            .with_guid_provider(guids.clone())
            .with_metrics(metrics.clone());
        Self {
            db,
            clock,
            guids,
            metrics,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Desires `instances` of `process_guid` in a domain that never expires.
    pub async fn desire(&self, process_guid: &str, instances: i32) {
        self.db
            .upsert_domain(DOMAIN, Duration::ZERO)
            .await
            .unwrap();
        self.db
            .desire_lrp(&DesiredLrpSchedulingInfo::new(process_guid, DOMAIN, instances))
            .await
            .unwrap();
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn key(process_guid: &str, index: i32) -> ActualLrpKey {
    ActualLrpKey::new(process_guid, index, DOMAIN)
}

pub fn identity(instance_guid: &str, cell_id: &str) -> InstanceIdentity {
    InstanceIdentity::new(instance_guid, cell_id)
}

pub fn net_info(address: &str) -> NetInfo {
    NetInfo::new(address, vec![PortMapping::new(8080, 61001)])
}

pub fn cells(ids: &[&str]) -> CellSet {
    ids.iter()
        .map(|id| CellPresence::new(id, &format!("http://{}:1800", id), "z1"))
        .collect()
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}
