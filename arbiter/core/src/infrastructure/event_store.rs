// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory event store for development and testing.
//!
//! Keeps the same observable contract as the PostgreSQL store: positions are
//! assigned in append order and strictly increase, events are grouped into
//! monthly partitions by `recorded_at`, and an idempotency index makes
//! redelivered appends return the original position without writing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::event::{
    AggregateType, CorrelationId, EventEnvelope, StoredEvent, UserId,
};
use crate::domain::repository::{AppendOutcome, EventStore, RepositoryError};

#[derive(Default)]
struct StoreInner {
    /// Position `n` lives at index `n - 1`.
    events: Vec<StoredEvent>,
    partitions: BTreeMap<String, Vec<u64>>,
    by_aggregate: HashMap<(AggregateType, Uuid), Vec<u64>>,
    by_correlation: HashMap<CorrelationId, Vec<u64>>,
    idempotency: HashMap<(UserId, String), u64>,
}

pub struct InMemoryEventStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Events of one monthly partition, in recorded order.
    pub async fn read_partition(&self, partition_key: &str) -> Vec<StoredEvent> {
        let inner = self.inner.read().await;
        inner
            .partitions
            .get(partition_key)
            .map(|positions| {
                positions
                    .iter()
                    .map(|p| inner.events[(*p - 1) as usize].clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, envelope: EventEnvelope) -> Result<AppendOutcome, RepositoryError> {
        let mut inner = self.inner.write().await;

        if let Some(key) = envelope.idempotency_key.clone() {
            if let Some(position) = inner.idempotency.get(&(envelope.user_id, key.clone())) {
                return Ok(AppendOutcome {
                    position: *position,
                    deduplicated: true,
                });
            }
            let position = inner.events.len() as u64 + 1;
            inner.idempotency.insert((envelope.user_id, key), position);
        }

        let position = inner.events.len() as u64 + 1;
        let partition = envelope.partition_key();
        let aggregate = (envelope.aggregate_type, envelope.aggregate_id);
        let correlation = envelope.correlation_id;

        inner.events.push(StoredEvent { position, envelope });
        inner.partitions.entry(partition).or_default().push(position);
        inner.by_aggregate.entry(aggregate).or_default().push(position);
        inner
            .by_correlation
            .entry(correlation)
            .or_default()
            .push(position);

        Ok(AppendOutcome {
            position,
            deduplicated: false,
        })
    }

    async fn read_range(
        &self,
        from_exclusive: u64,
        to_inclusive: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        let inner = self.inner.read().await;
        let to = to_inclusive.unwrap_or(inner.events.len() as u64);
        Ok(inner
            .events
            .iter()
            .filter(|e| e.position > from_exclusive && e.position <= to)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn read_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: Uuid,
        from_exclusive: u64,
        to_inclusive: Option<u64>,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        let inner = self.inner.read().await;
        let to = to_inclusive.unwrap_or(u64::MAX);
        Ok(inner
            .by_aggregate
            .get(&(aggregate_type, aggregate_id))
            .map(|positions| {
                positions
                    .iter()
                    .filter(|p| **p > from_exclusive && **p <= to)
                    .map(|p| inner.events[(*p - 1) as usize].clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_correlation
            .get(&correlation_id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|p| inner.events[(*p - 1) as usize].clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_position(&self) -> Result<u64, RepositoryError> {
        Ok(self.inner.read().await.events.len() as u64)
    }

    async fn partitions(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.inner.read().await.partitions.keys().cloned().collect())
    }
}
