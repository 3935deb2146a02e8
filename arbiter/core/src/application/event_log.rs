// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! EventLog — the append boundary of the engine.
//!
//! Validates drafts, assigns envelope identity and `recorded_at`, writes to
//! the durable store, and publishes to the in-memory bus. Once `append`
//! returns, the event is durable and visible to every projector. Append is
//! the only mutation the log ever performs; corrections are new events.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::application::upcaster::UpcasterRegistry;
use crate::domain::event::{
    CorrelationId, EventEnvelope, EventId, EventPayload, StoredEvent, UserId, ValidationError,
    CURRENT_SCHEMA_VERSION,
};
use crate::domain::repository::{EventStore, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("schema version {version} of {event_type} has no registered upcaster")]
    SchemaVersionUnsupported { event_type: String, version: u16 },

    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

/// What a producer hands to [`EventLog::append`]. Envelope identity,
/// `recorded_at`, and the aggregate are derived here, not chosen by callers.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub user_id: UserId,
    pub payload: EventPayload,
    pub occurred_at: DateTime<Utc>,
    /// `None` starts a new correlation chain.
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<EventId>,
    pub idempotency_key: Option<String>,
    /// `None` means the current schema version.
    pub schema_version: Option<u16>,
}

impl EventDraft {
    pub fn new(user_id: UserId, payload: EventPayload) -> Self {
        Self {
            user_id,
            payload,
            occurred_at: Utc::now(),
            correlation_id: None,
            causation_id: None,
            idempotency_key: None,
            schema_version: None,
        }
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    pub fn correlated(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn caused_by(mut self, causation_id: EventId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn schema_version(mut self, version: u16) -> Self {
        self.schema_version = Some(version);
        self
    }
}

pub struct EventLog {
    store: Arc<dyn EventStore>,
    upcasters: Arc<UpcasterRegistry>,
    bus: EventBus,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>, upcasters: Arc<UpcasterRegistry>, bus: EventBus) -> Self {
        Self {
            store,
            upcasters,
            bus,
        }
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.store)
    }

    pub fn upcasters(&self) -> Arc<UpcasterRegistry> {
        Arc::clone(&self.upcasters)
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Validate and append one event. Returns its durable position.
    pub async fn append(&self, draft: EventDraft) -> Result<u64, EventLogError> {
        let recorded_at = Utc::now();
        if draft.occurred_at > recorded_at {
            return Err(ValidationError::OutOfOrderTimestamp {
                occurred_at: draft.occurred_at,
                recorded_at,
            }
            .into());
        }

        draft.payload.validate()?;

        let event_type = draft.payload.event_type();
        let schema_version = draft.schema_version.unwrap_or(CURRENT_SCHEMA_VERSION);
        if !self.upcasters.supports(event_type, schema_version) {
            return Err(EventLogError::SchemaVersionUnsupported {
                event_type: event_type.to_string(),
                version: schema_version,
            });
        }

        let (aggregate_type, aggregate_id) = draft.payload.aggregate(draft.user_id);
        let envelope = EventEnvelope {
            event_id: EventId::new(),
            event_type: event_type.to_string(),
            schema_version,
            aggregate_type,
            aggregate_id,
            user_id: draft.user_id,
            occurred_at: draft.occurred_at,
            recorded_at,
            correlation_id: draft.correlation_id.unwrap_or_default(),
            causation_id: draft.causation_id,
            idempotency_key: draft.idempotency_key,
            payload: draft.payload,
        };

        let outcome = self.store.append(envelope.clone()).await?;
        if outcome.deduplicated {
            debug!(
                event_type,
                position = outcome.position,
                "Duplicate append ignored via idempotency key"
            );
            return Ok(outcome.position);
        }

        self.bus.publish(StoredEvent {
            position: outcome.position,
            envelope,
        });
        debug!(event_type, position = outcome.position, "Appended event");
        Ok(outcome.position)
    }

    /// Events of one aggregate in recorded order; restartable via
    /// `from_exclusive`.
    pub async fn iterate(
        &self,
        aggregate_type: crate::domain::event::AggregateType,
        aggregate_id: uuid::Uuid,
        from_exclusive: u64,
        to_inclusive: Option<u64>,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        Ok(self
            .store
            .read_aggregate(aggregate_type, aggregate_id, from_exclusive, to_inclusive)
            .await?)
    }

    /// Every event of one correlation chain, in recorded order.
    pub async fn iterate_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        Ok(self.store.read_correlation(correlation_id).await?)
    }

    pub async fn latest_position(&self) -> Result<u64, EventLogError> {
        Ok(self.store.latest_position().await?)
    }
}
