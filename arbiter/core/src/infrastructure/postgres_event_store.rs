// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of the event store.
//!
//! Schema (partitioned monthly by `recorded_at`):
//!
//! ```sql
//! CREATE TABLE arbiter_events (
//!     position        BIGSERIAL,
//!     event_id        UUID        NOT NULL UNIQUE,
//!     event_type      TEXT        NOT NULL,
//!     schema_version  SMALLINT    NOT NULL,
//!     aggregate_type  TEXT        NOT NULL,
//!     aggregate_id    UUID        NOT NULL,
//!     user_id         UUID        NOT NULL,
//!     occurred_at     TIMESTAMPTZ NOT NULL,
//!     recorded_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     correlation_id  UUID        NOT NULL,
//!     causation_id    UUID,
//!     idempotency_key TEXT,
//!     payload         JSONB       NOT NULL,
//!     PRIMARY KEY (position, recorded_at)
//! ) PARTITION BY RANGE (recorded_at);
//!
//! CREATE UNIQUE INDEX arbiter_events_idem
//!     ON arbiter_events (user_id, idempotency_key, recorded_at)
//!     WHERE idempotency_key IS NOT NULL;
//! CREATE INDEX arbiter_events_aggregate
//!     ON arbiter_events (aggregate_type, aggregate_id, position);
//! CREATE INDEX arbiter_events_correlation
//!     ON arbiter_events (correlation_id, position);
//! ```
//!
//! Rows are append-only; no UPDATE or DELETE statement exists in this module.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error};
use uuid::Uuid;

use crate::domain::event::{
    AggregateType, CorrelationId, EventEnvelope, EventId, EventPayload, StoredEvent, UserId,
};
use crate::domain::repository::{AppendOutcome, EventStore, RepositoryError};

pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn aggregate_type_str(aggregate_type: AggregateType) -> &'static str {
        match aggregate_type {
            AggregateType::Interaction => "interaction",
            AggregateType::Memory => "memory",
            AggregateType::Decision => "decision",
            AggregateType::CausalEdge => "causal_edge",
            AggregateType::CausalGraph => "causal_graph",
        }
    }

    fn parse_aggregate_type(s: &str) -> Result<AggregateType, RepositoryError> {
        match s {
            "interaction" => Ok(AggregateType::Interaction),
            "memory" => Ok(AggregateType::Memory),
            "decision" => Ok(AggregateType::Decision),
            "causal_edge" => Ok(AggregateType::CausalEdge),
            "causal_graph" => Ok(AggregateType::CausalGraph),
            other => Err(RepositoryError::Database(format!(
                "unknown aggregate type: {other}"
            ))),
        }
    }

    /// Helper to deserialize a database row into a StoredEvent
    fn deserialize_row(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, RepositoryError> {
        let position: i64 = row
            .try_get("position")
            .map_err(|e| RepositoryError::Database(format!("Missing position: {e}")))?;
        let aggregate_type: String = row
            .try_get("aggregate_type")
            .map_err(|e| RepositoryError::Database(format!("Missing aggregate_type: {e}")))?;
        let payload_json: serde_json::Value = row
            .try_get("payload")
            .map_err(|e| RepositoryError::Database(format!("Missing payload: {e}")))?;
        let payload: EventPayload = serde_json::from_value(payload_json)
            .map_err(|e| RepositoryError::Database(format!("Malformed payload: {e}")))?;

        let envelope = EventEnvelope {
            event_id: EventId(
                row.try_get::<Uuid, _>("event_id")
                    .map_err(|e| RepositoryError::Database(format!("Missing event_id: {e}")))?,
            ),
            event_type: row
                .try_get("event_type")
                .map_err(|e| RepositoryError::Database(format!("Missing event_type: {e}")))?,
            schema_version: row
                .try_get::<i16, _>("schema_version")
                .map_err(|e| RepositoryError::Database(format!("Missing schema_version: {e}")))?
                as u16,
            aggregate_type: Self::parse_aggregate_type(&aggregate_type)?,
            aggregate_id: row
                .try_get("aggregate_id")
                .map_err(|e| RepositoryError::Database(format!("Missing aggregate_id: {e}")))?,
            user_id: UserId(
                row.try_get::<Uuid, _>("user_id")
                    .map_err(|e| RepositoryError::Database(format!("Missing user_id: {e}")))?,
            ),
            occurred_at: row
                .try_get("occurred_at")
                .map_err(|e| RepositoryError::Database(format!("Missing occurred_at: {e}")))?,
            recorded_at: row
                .try_get("recorded_at")
                .map_err(|e| RepositoryError::Database(format!("Missing recorded_at: {e}")))?,
            correlation_id: CorrelationId(
                row.try_get::<Uuid, _>("correlation_id")
                    .map_err(|e| RepositoryError::Database(format!("Missing correlation_id: {e}")))?,
            ),
            causation_id: row
                .try_get::<Option<Uuid>, _>("causation_id")
                .map_err(|e| RepositoryError::Database(format!("Missing causation_id: {e}")))?
                .map(EventId),
            idempotency_key: row
                .try_get("idempotency_key")
                .map_err(|e| RepositoryError::Database(format!("Missing idempotency_key: {e}")))?,
            payload,
        };

        Ok(StoredEvent {
            position: position as u64,
            envelope,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, envelope: EventEnvelope) -> Result<AppendOutcome, RepositoryError> {
        // Deduplicate on the partial unique index rather than a pre-check so
        // concurrent producers with the same key race safely.
        if let Some(key) = &envelope.idempotency_key {
            let existing = sqlx::query(
                r#"
                SELECT position FROM arbiter_events
                WHERE user_id = $1 AND idempotency_key = $2
                LIMIT 1
                "#,
            )
            .bind(envelope.user_id.0)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

            if let Some(row) = existing {
                let position: i64 = row
                    .try_get("position")
                    .map_err(|e| RepositoryError::Database(e.to_string()))?;
                return Ok(AppendOutcome {
                    position: position as u64,
                    deduplicated: true,
                });
            }
        }

        let payload = serde_json::to_value(&envelope.payload)
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO arbiter_events
                (event_id, event_type, schema_version, aggregate_type, aggregate_id,
                 user_id, occurred_at, recorded_at, correlation_id, causation_id,
                 idempotency_key, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING position
            "#,
        )
        .bind(envelope.event_id.0)
        .bind(&envelope.event_type)
        .bind(envelope.schema_version as i16)
        .bind(Self::aggregate_type_str(envelope.aggregate_type))
        .bind(envelope.aggregate_id)
        .bind(envelope.user_id.0)
        .bind(envelope.occurred_at)
        .bind(envelope.recorded_at)
        .bind(envelope.correlation_id.0)
        .bind(envelope.causation_id.map(|c| c.0))
        .bind(&envelope.idempotency_key)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to append event: {}", e);
            RepositoryError::Database(e.to_string())
        })?;

        let position: i64 = row
            .try_get("position")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        debug!(
            event_type = %envelope.event_type,
            position,
            "Appended event"
        );

        Ok(AppendOutcome {
            position: position as u64,
            deduplicated: false,
        })
    }

    async fn read_range(
        &self,
        from_exclusive: u64,
        to_inclusive: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        let to = to_inclusive.map(|t| t as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT position, event_id, event_type, schema_version, aggregate_type,
                   aggregate_id, user_id, occurred_at, recorded_at, correlation_id,
                   causation_id, idempotency_key, payload
            FROM arbiter_events
            WHERE position > $1 AND position <= $2
            ORDER BY position ASC
            LIMIT $3
            "#,
        )
        .bind(from_exclusive as i64)
        .bind(to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::deserialize_row).collect()
    }

    async fn read_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: Uuid,
        from_exclusive: u64,
        to_inclusive: Option<u64>,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        let to = to_inclusive.map(|t| t as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT position, event_id, event_type, schema_version, aggregate_type,
                   aggregate_id, user_id, occurred_at, recorded_at, correlation_id,
                   causation_id, idempotency_key, payload
            FROM arbiter_events
            WHERE aggregate_type = $1 AND aggregate_id = $2
              AND position > $3 AND position <= $4
            ORDER BY position ASC
            "#,
        )
        .bind(Self::aggregate_type_str(aggregate_type))
        .bind(aggregate_id)
        .bind(from_exclusive as i64)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::deserialize_row).collect()
    }

    async fn read_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT position, event_id, event_type, schema_version, aggregate_type,
                   aggregate_id, user_id, occurred_at, recorded_at, correlation_id,
                   causation_id, idempotency_key, payload
            FROM arbiter_events
            WHERE correlation_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(correlation_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::deserialize_row).collect()
    }

    async fn latest_position(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COALESCE(MAX(position), 0) AS position FROM arbiter_events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let position: i64 = row
            .try_get("position")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(position as u64)
    }

    async fn partitions(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT to_char(recorded_at, 'YYYY-MM') AS partition_key
            FROM arbiter_events
            ORDER BY partition_key ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get("partition_key")
                    .map_err(|e| RepositoryError::Database(e.to_string()))
            })
            .collect()
    }
}
