use super::{DomainDb, StateDb};
use crate::core::{DbError, Result};
use crate::core::clock::{as_millis_u64, to_time_delta};
use crate::models::Domain;
use crate::models::actual_lrp::validate_identifier;
use crate::storage::DomainRow;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{Level, event};

impl StateDb {
    /// Deletes domains whose expiry is at or before now; returns how many.
    pub(crate) async fn prune_domains(&self) -> Result<usize> {
        let now = self.now();
        let expired: Vec<String> = self
            .transactions
            .storage()
            .scan::<DomainRow, _>(|row| row.expire_time.is_some_and(|at| at <= now))
            .await
            .into_iter()
            .map(|row| row.name)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let mut txn = self.begin();
        txn.lock_rows::<DomainRow, _>(expired.iter().cloned()).await?;
        let mut pruned = 0;
        for name in &expired {
            // An upsert may have renewed the domain since the scan.
            let still_expired = txn
                .get::<DomainRow>(name)
                .await?
                .is_some_and(|row| row.expire_time.is_some_and(|at| at <= now));
            if still_expired && txn.delete::<DomainRow>(name).await? {
                pruned += 1;
            }
        }
        txn.commit().await?;
        event!(Level::DEBUG, pruned, "pruned-domains");
        Ok(pruned)
    }
}

#[async_trait]
impl DomainDb for StateDb {
    async fn upsert_domain(&self, name: &str, ttl: Duration) -> Result<()> {
        validate_identifier("domain", name)?;
        let expires_at = if ttl.is_zero() {
            None
        } else {
            let at = self
                .now()
                .checked_add_signed(to_time_delta(ttl))
                .ok_or_else(|| DbError::BadRequest("ttl out of range".to_string()))?;
            Some(at)
        };
        let domain = Domain {
            name: name.to_string(),
            expires_at,
        };

        let mut txn = self.begin();
        let row = self.encode(&domain)?;
        if txn.select_for_update::<DomainRow>(&domain.name).await?.is_some() {
            txn.update(row).await?;
        } else {
            txn.insert(row).await?;
        }
        txn.commit().await?;
        event!(Level::DEBUG, domain = %name, ttl_ms = as_millis_u64(ttl), "upserted-domain");
        Ok(())
    }

    async fn fresh_domains(&self) -> Result<Vec<String>> {
        let now = self.now();
        let scan = self.scan_records::<Domain, _>(|_: &DomainRow| true).await;
        Ok(scan
            .records
            .into_iter()
            .filter(|domain| domain.is_fresh(now))
            .map(|domain| domain.name)
            .collect())
    }
}
