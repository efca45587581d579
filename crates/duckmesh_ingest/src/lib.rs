//! The ingest bus: a thin, validating wrapper around
//! `duckmesh_common::Catalog`'s write-path methods (§4.1). Grounded on the
//! teacher's habit of giving each subsystem its own narrow trait over a
//! shared `Persistence` handle (`common/src/persistence.rs`'s
//! `RetentionValidator`) rather than calling the catalog directly from
//! callers — this crate is where the queue-shaped contract (idempotent
//! publish, leased claim, ack/nack, requeue) lives, independent of which
//! catalog backend is behind it.
use std::sync::Arc;

use async_trait::async_trait;
use duckmesh_common::{
    catalog::Catalog,
    errors::ErrorMetadata,
    knobs::CLAIM_LEASE_SECONDS,
    types::{
        BatchId,
        ClaimedBatch,
        EventId,
        IngestEnvelope,
        PublishResult,
    },
};

#[async_trait]
pub trait IngestBus: Send + Sync {
    async fn publish(&self, events: Vec<IngestEnvelope>) -> anyhow::Result<Vec<PublishResult>>;

    async fn claim_batch(&self, consumer_id: &str, limit: u32, lease_seconds: Option<u64>) -> anyhow::Result<ClaimedBatch>;

    async fn ack(&self, batch_id: BatchId, event_ids: &[EventId]) -> anyhow::Result<()>;

    async fn nack(&self, batch_id: BatchId, event_ids: &[EventId], reason: &str) -> anyhow::Result<()>;

    async fn extend_lease(&self, batch_id: BatchId, lease_seconds: u64) -> anyhow::Result<()>;

    async fn requeue_expired(&self) -> anyhow::Result<u64>;
}

/// `IngestBus` over any `Catalog` implementation. Holds no state of its own;
/// every operation is a catalog round trip (or, for `Publish`, one round trip
/// per envelope, matching §4.1's per-event idempotency semantics).
pub struct CatalogIngestBus<C: Catalog> {
    catalog: Arc<C>,
}

impl<C: Catalog> CatalogIngestBus<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl<C: Catalog> IngestBus for CatalogIngestBus<C> {
    async fn publish(&self, events: Vec<IngestEnvelope>) -> anyhow::Result<Vec<PublishResult>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let n = events.len();
        let results = self.catalog.publish(events).await?;
        let inserted = results.iter().filter(|r| r.inserted).count();
        tracing::debug!(n, inserted, "published ingest events");
        Ok(results)
    }

    async fn claim_batch(&self, consumer_id: &str, limit: u32, lease_seconds: Option<u64>) -> anyhow::Result<ClaimedBatch> {
        if limit == 0 {
            anyhow::bail!(ErrorMetadata::bad_request("INVALID_LIMIT", "claim limit must be > 0"));
        }
        let lease_seconds = lease_seconds.unwrap_or(*CLAIM_LEASE_SECONDS);
        let batch = self.catalog.claim_batch(consumer_id, limit, lease_seconds).await?;
        tracing::debug!(consumer_id, claimed = batch.envelopes.len(), "claimed batch");
        Ok(batch)
    }

    async fn ack(&self, batch_id: BatchId, event_ids: &[EventId]) -> anyhow::Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        self.catalog.ack(batch_id, event_ids).await
    }

    async fn nack(&self, batch_id: BatchId, event_ids: &[EventId], reason: &str) -> anyhow::Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        tracing::warn!(?batch_id, n = event_ids.len(), reason, "nacking ingest events");
        self.catalog.nack(batch_id, event_ids, reason).await
    }

    async fn extend_lease(&self, batch_id: BatchId, lease_seconds: u64) -> anyhow::Result<()> {
        self.catalog.extend_lease(batch_id, lease_seconds).await
    }

    async fn requeue_expired(&self) -> anyhow::Result<u64> {
        let n = self.catalog.requeue_expired().await?;
        if n > 0 {
            tracing::info!(n, "requeued expired claims");
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use duckmesh_common::{
        testing::InMemoryCatalog,
        types::{
            IngestOp,
            TableId,
            TenantId,
        },
    };

    use super::*;

    fn envelope(tenant: &str, table_id: i64, key: &str) -> IngestEnvelope {
        IngestEnvelope {
            tenant_id: TenantId(tenant.to_string()),
            table_id: TableId(table_id),
            idempotency_key: key.to_string(),
            op: IngestOp::Insert,
            payload_json: serde_json::json!({"k": key}),
            event_time: None,
        }
    }

    fn setup() -> (CatalogIngestBus<InMemoryCatalog>, Arc<InMemoryCatalog>, TableId) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let table = catalog.create_table(&TenantId("t1".to_string()), "events", vec![]);
        (CatalogIngestBus::new(catalog.clone()), catalog, table.table_id)
    }

    #[tokio::test]
    async fn publish_is_idempotent_on_key() {
        let (bus, _, table_id) = setup();
        let first = bus.publish(vec![envelope("t1", table_id.0, "k1")]).await.unwrap();
        assert!(first[0].inserted);
        let second = bus.publish(vec![envelope("t1", table_id.0, "k1")]).await.unwrap();
        assert!(!second[0].inserted);
        assert_eq!(first[0].event_id, second[0].event_id);
    }

    #[tokio::test]
    async fn claim_batch_then_ack_round_trip() {
        let (bus, _, table_id) = setup();
        bus.publish(vec![envelope("t1", table_id.0, "k1"), envelope("t1", table_id.0, "k2")])
            .await
            .unwrap();
        let batch = bus.claim_batch("worker-a", 10, None).await.unwrap();
        assert_eq!(batch.envelopes.len(), 2);

        let empty = bus.claim_batch("worker-b", 10, None).await.unwrap();
        assert!(empty.is_empty(), "already-claimed events must not be claimable again");

        let ids: Vec<EventId> = batch.envelopes.iter().map(|e| e.event_id).collect();
        bus.ack(batch.batch_id, &ids).await.unwrap();
    }

    #[tokio::test]
    async fn claim_batch_rejects_zero_limit() {
        let (bus, _, _) = setup();
        let err = bus.claim_batch("worker-a", 0, None).await.unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[tokio::test]
    async fn requeue_expired_returns_leases_after_ttl() {
        let (bus, catalog, table_id) = setup();
        bus.publish(vec![envelope("t1", table_id.0, "k1")]).await.unwrap();
        let batch = bus.claim_batch("worker-a", 10, None).await.unwrap();
        assert_eq!(batch.envelopes.len(), 1);

        catalog.force_lease_expired(batch.batch_id);
        let n = bus.requeue_expired().await.unwrap();
        assert_eq!(n, 1);

        let reclaimed = bus.claim_batch("worker-b", 10, None).await.unwrap();
        assert_eq!(reclaimed.envelopes.len(), 1);
    }
}
