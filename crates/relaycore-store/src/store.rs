//! `TunnelStore` (spec §6): the persistence interface consumed by the
//! Manager and the Metrics Collector. The actual SQL/Redis backing is out
//! of scope ("the backing store is irrelevant") — only the trait and an
//! in-memory reference implementation live here.

use crate::error::{StoreError, StoreResult};
use crate::filter::{Page, TunnelFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaycore_model::{MetricSample, OwnerId, TunnelId, TunnelRecord};
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait TunnelStore: Send + Sync {
    async fn insert_tunnel(&self, record: TunnelRecord) -> StoreResult<TunnelRecord>;
    async fn update_tunnel(&self, record: TunnelRecord) -> StoreResult<TunnelRecord>;
    /// Soft delete: marks `deleted_at`, does not drop the row.
    async fn delete_tunnel(&self, id: TunnelId, at: DateTime<Utc>) -> StoreResult<()>;
    async fn get_tunnel_by_id(&self, id: TunnelId) -> StoreResult<TunnelRecord>;
    async fn list_tunnels(&self, filter: TunnelFilter, page: Page) -> StoreResult<Vec<TunnelRecord>>;
    async fn count_tunnels_by_owner(&self, owner: OwnerId) -> StoreResult<usize>;

    async fn append_metric_sample(&self, sample: MetricSample) -> StoreResult<()>;
    async fn query_metric_range(
        &self,
        tunnel: TunnelId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricSample>>;
    /// Retention GC, invoked by the Collector once an hour (spec §4.6).
    async fn delete_metrics_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

#[derive(Default)]
struct Inner {
    tunnels: HashMap<TunnelId, TunnelRecord>,
    metrics: Vec<MetricSample>,
}

/// Reference implementation backing tests and standalone runs (spec §1:
/// "the backing store is irrelevant").
#[derive(Default)]
pub struct InMemoryTunnelStore {
    inner: Mutex<Inner>,
}

impl InMemoryTunnelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TunnelStore for InMemoryTunnelStore {
    async fn insert_tunnel(&self, record: TunnelRecord) -> StoreResult<TunnelRecord> {
        let mut inner = self.inner.lock().unwrap();
        let name_taken = inner.tunnels.values().any(|t| {
            t.deleted_at.is_none() && t.owner == record.owner && t.name == record.name && t.id != record.id
        });
        if name_taken {
            return Err(StoreError::NameConflict { name: record.name });
        }
        inner.tunnels.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_tunnel(&self, record: TunnelRecord) -> StoreResult<TunnelRecord> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.tunnels.contains_key(&record.id) {
            return Err(StoreError::NotFound(record.id));
        }
        let name_taken = inner.tunnels.values().any(|t| {
            t.deleted_at.is_none() && t.owner == record.owner && t.name == record.name && t.id != record.id
        });
        if name_taken {
            return Err(StoreError::NameConflict { name: record.name });
        }
        inner.tunnels.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_tunnel(&self, id: TunnelId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.tunnels.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.deleted_at = Some(at);
        record.updated_at = at;
        Ok(())
    }

    async fn get_tunnel_by_id(&self, id: TunnelId) -> StoreResult<TunnelRecord> {
        let inner = self.inner.lock().unwrap();
        inner.tunnels.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn list_tunnels(&self, filter: TunnelFilter, page: Page) -> StoreResult<Vec<TunnelRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut matched: Vec<TunnelRecord> = inner
            .tunnels
            .values()
            .filter(|t| filter.include_deleted || t.deleted_at.is_none())
            .filter(|t| filter.owner.map_or(true, |o| t.owner == o))
            .filter(|t| filter.state.map_or(true, |s| t.state == s))
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.created_at);
        Ok(matched.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn count_tunnels_by_owner(&self, owner: OwnerId) -> StoreResult<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tunnels
            .values()
            .filter(|t| t.owner == owner && t.deleted_at.is_none())
            .count())
    }

    async fn append_metric_sample(&self, sample: MetricSample) -> StoreResult<()> {
        self.inner.lock().unwrap().metrics.push(sample);
        Ok(())
    }

    async fn query_metric_range(
        &self,
        tunnel: TunnelId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricSample>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .metrics
            .iter()
            .filter(|s| s.tunnel_id == tunnel && s.taken_at >= from && s.taken_at <= to)
            .copied()
            .collect())
    }

    async fn delete_metrics_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.metrics.len();
        inner.metrics.retain(|s| s.taken_at >= cutoff);
        Ok(before - inner.metrics.len())
    }
}
