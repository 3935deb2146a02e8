// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Projection coordinator — at-least-once dispatch of stored events to
//! projectors.
//!
//! One checkpoint per projector (the position of the last successfully
//! applied event). A failing handler is isolated per event: retried with
//! exponential backoff up to a bounded attempt count, then dead-lettered,
//! and the stream moves on. The coordinator never crashes because one
//! projector rejected one event.
//!
//! Projectors that read sibling read models (the memory projector reads
//! decision traces) must be registered after the projector that builds them;
//! registration order is dispatch order within a batch.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::upcaster::{UpcastError, UpcasterRegistry};
use crate::domain::event::{EventPayload, StoredEvent};
use crate::domain::repository::{
    CheckpointRepository, DeadLetter, DeadLetterRepository, EventStore, RepositoryError,
};

/// Handler failures, sorted by how the coordinator treats them.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Transient storage/network trouble; retried with backoff.
    #[error("retryable: {0}")]
    Retryable(String),

    /// A computed adjustment contradicts the audit trail. Never clamped
    /// away: logged, dead-lettered, and the owning trace stays unattributed
    /// for manual review.
    #[error("attribution inconsistency: {0}")]
    AttributionInconsistency(String),

    /// Anything that cannot succeed on retry (malformed payload, invariant
    /// violation). Dead-lettered immediately.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<RepositoryError> for ProjectionError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Database(msg) => ProjectionError::Retryable(msg),
            other => ProjectionError::Fatal(other.to_string()),
        }
    }
}

/// A read-model builder fed by the coordinator.
#[async_trait::async_trait]
pub trait Projector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply one event. Must be safe to re-invoke with the same event:
    /// delivery is at-least-once.
    async fn apply(&self, event: &StoredEvent) -> Result<(), ProjectionError>;

    /// Drop all projected state ahead of a rebuild.
    async fn reset(&self) -> Result<(), ProjectionError>;
}

#[derive(Debug, Clone)]
pub struct ProjectionCoordinatorConfig {
    /// Attempts per event before dead-lettering (first try included).
    pub max_attempts: u32,
    /// Backoff after the first failure; doubles per attempt.
    pub initial_backoff_ms: u64,
    /// Live-dispatch poll interval.
    pub poll_interval_ms: u64,
    /// Events pulled from the store per projector per batch.
    pub batch_size: usize,
}

impl Default for ProjectionCoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 25,
            poll_interval_ms: 250,
            batch_size: 256,
        }
    }
}

/// Result of a replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed { events_applied: usize, checkpoint: u64 },
    /// Cooperatively cancelled; safe to resume from `checkpoint`.
    Aborted { events_applied: usize, checkpoint: u64 },
}

pub struct ProjectionCoordinator {
    store: Arc<dyn EventStore>,
    upcasters: Arc<UpcasterRegistry>,
    checkpoints: Arc<dyn CheckpointRepository>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    projectors: Vec<Arc<dyn Projector>>,
    paused: DashMap<&'static str, ()>,
    config: ProjectionCoordinatorConfig,
    shutdown_token: CancellationToken,
}

impl ProjectionCoordinator {
    pub fn new(
        store: Arc<dyn EventStore>,
        upcasters: Arc<UpcasterRegistry>,
        checkpoints: Arc<dyn CheckpointRepository>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        config: ProjectionCoordinatorConfig,
    ) -> Self {
        Self {
            store,
            upcasters,
            checkpoints,
            dead_letters,
            projectors: Vec::new(),
            paused: DashMap::new(),
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Registration order is dispatch order.
    pub fn register(&mut self, projector: Arc<dyn Projector>) {
        self.projectors.push(projector);
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn checkpoint(&self, projector: &str) -> Result<u64, RepositoryError> {
        self.checkpoints.get(projector).await
    }

    /// Start the live-dispatch loop with graceful shutdown support.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            projectors = self.projectors.len(),
            "Starting projection coordinator"
        );
        let mut tick = interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.dispatch_pending().await {
                        warn!("Dispatch cycle failed: {}", e);
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping projection coordinator");
                    break;
                }
            }
        }
    }

    /// Drive every registered projector up to the head of the log. Returns
    /// the number of events applied across projectors.
    pub async fn dispatch_pending(&self) -> Result<usize, RepositoryError> {
        let mut applied = 0;
        for projector in &self.projectors {
            if self.paused.contains_key(projector.name()) {
                continue;
            }
            applied += self
                .drive_projector(projector.as_ref(), None, &CancellationToken::new())
                .await?;
        }
        Ok(applied)
    }

    /// Apply events from the projector's checkpoint up to `to_inclusive`
    /// (log head when `None`), advancing the checkpoint after every
    /// successful apply.
    async fn drive_projector(
        &self,
        projector: &dyn Projector,
        to_inclusive: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<usize, RepositoryError> {
        let mut applied = 0;
        loop {
            let checkpoint = self.checkpoints.get(projector.name()).await?;
            let batch = self
                .store
                .read_range(checkpoint, to_inclusive, self.config.batch_size)
                .await?;
            if batch.is_empty() {
                return Ok(applied);
            }
            for event in batch {
                if cancel.is_cancelled() {
                    return Ok(applied);
                }
                self.apply_one(projector, &event).await?;
                self.checkpoints
                    .set(projector.name(), event.position)
                    .await?;
                applied += 1;
            }
        }
    }

    /// Apply a single event with per-event isolation: retry transient
    /// failures with exponential backoff, dead-letter what cannot be
    /// applied, and keep the stream moving either way.
    async fn apply_one(
        &self,
        projector: &dyn Projector,
        event: &StoredEvent,
    ) -> Result<(), RepositoryError> {
        let event = match self.upcast(event) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    projector = projector.name(),
                    position = event.position,
                    "No upcaster path for stored event: {}", e
                );
                return self.dead_letter(projector, event, e.to_string(), 0).await;
            }
        };

        let mut attempts = 0;
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        loop {
            attempts += 1;
            match projector.apply(&event).await {
                Ok(()) => return Ok(()),
                Err(ProjectionError::Retryable(msg)) if attempts < self.config.max_attempts => {
                    debug!(
                        projector = projector.name(),
                        position = event.position,
                        attempts,
                        "Retrying event after transient failure: {}", msg
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    error!(
                        projector = projector.name(),
                        position = event.position,
                        attempts,
                        "Event dead-lettered: {}", e
                    );
                    return self.dead_letter(projector, &event, e.to_string(), attempts).await;
                }
            }
        }
    }

    fn upcast(&self, event: &StoredEvent) -> Result<StoredEvent, UpcastError> {
        let envelope = &event.envelope;
        let current = self
            .upcasters
            .current_version(&envelope.event_type)
            .ok_or_else(|| UpcastError::UnknownEventType(envelope.event_type.clone()))?;
        if envelope.schema_version == current {
            return Ok(event.clone());
        }

        let payload = serde_json::to_value(&envelope.payload).map_err(|e| {
            UpcastError::InvalidPayload {
                event_type: envelope.event_type.clone(),
                version: envelope.schema_version,
                message: e.to_string(),
            }
        })?;
        let (payload, version) = self.upcasters.upcast_to_current(
            &envelope.event_type,
            envelope.schema_version,
            payload,
        )?;
        let payload: EventPayload =
            serde_json::from_value(payload).map_err(|e| UpcastError::InvalidPayload {
                event_type: envelope.event_type.clone(),
                version,
                message: e.to_string(),
            })?;

        let mut envelope = envelope.clone();
        envelope.schema_version = version;
        envelope.payload = payload;
        Ok(StoredEvent {
            position: event.position,
            envelope,
        })
    }

    async fn dead_letter(
        &self,
        projector: &dyn Projector,
        event: &StoredEvent,
        error: String,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        self.dead_letters
            .push(DeadLetter {
                projector: projector.name().to_string(),
                event: event.clone(),
                error,
                attempts,
                dead_lettered_at: chrono::Utc::now(),
            })
            .await
    }

    /// Rebuild a projector from the log. Pauses live dispatch for the
    /// target, resets its state (full rebuilds only), then applies events in
    /// order — upcasting any non-current schema version — advancing the
    /// checkpoint after each apply.
    ///
    /// Cancellation is cooperative: an aborted replay leaves a valid
    /// checkpoint, and calling `replay` again with `from` equal to that
    /// checkpoint resumes without resetting.
    pub async fn replay(
        &self,
        projector_name: &str,
        from_exclusive: Option<u64>,
        to_inclusive: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<ReplayOutcome, ReplayError> {
        let projector = self
            .projectors
            .iter()
            .find(|p| p.name() == projector_name)
            .ok_or_else(|| ReplayError::UnknownProjector(projector_name.to_string()))?
            .clone();

        self.paused.insert(projector.name(), ());
        let result = self
            .replay_inner(projector.as_ref(), from_exclusive, to_inclusive, &cancel)
            .await;
        self.paused.remove(projector.name());
        result
    }

    async fn replay_inner(
        &self,
        projector: &dyn Projector,
        from_exclusive: Option<u64>,
        to_inclusive: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<ReplayOutcome, ReplayError> {
        match from_exclusive {
            None | Some(0) => {
                info!(projector = projector.name(), "Rebuilding projection from scratch");
                projector
                    .reset()
                    .await
                    .map_err(|e| ReplayError::Reset(e.to_string()))?;
                self.checkpoints.set(projector.name(), 0).await?;
            }
            Some(from) => {
                info!(
                    projector = projector.name(),
                    from, "Resuming replay from checkpoint"
                );
                self.checkpoints.set(projector.name(), from).await?;
            }
        }

        let applied = self
            .drive_projector(projector, to_inclusive, cancel)
            .await?;
        let checkpoint = self.checkpoints.get(projector.name()).await?;

        if cancel.is_cancelled() {
            info!(
                projector = projector.name(),
                checkpoint, "Replay aborted at checkpoint"
            );
            return Ok(ReplayOutcome::Aborted {
                events_applied: applied,
                checkpoint,
            });
        }
        info!(
            projector = projector.name(),
            events_applied = applied,
            checkpoint,
            "Replay completed"
        );
        Ok(ReplayOutcome::Completed {
            events_applied: applied,
            checkpoint,
        })
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown projector: {0}")]
    UnknownProjector(String),

    #[error("projection reset failed: {0}")]
    Reset(String),

    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{SessionId, TraceId};
    use crate::domain::event::{
        CorrelationId, EventEnvelope, EventId, UserId, CURRENT_SCHEMA_VERSION,
    };
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::infrastructure::repositories::{
        InMemoryCheckpointRepository, InMemoryDeadLetterRepository,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct RecordingProjector {
        applied: Mutex<Vec<u64>>,
        fail_first_attempts: AtomicU32,
    }

    impl RecordingProjector {
        fn new(fail_first_attempts: u32) -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail_first_attempts: AtomicU32::new(fail_first_attempts),
            }
        }
    }

    #[async_trait::async_trait]
    impl Projector for RecordingProjector {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn apply(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
            if self.fail_first_attempts.load(Ordering::SeqCst) > 0 {
                self.fail_first_attempts.fetch_sub(1, Ordering::SeqCst);
                return Err(ProjectionError::Retryable("transient".to_string()));
            }
            self.applied.lock().unwrap().push(event.position);
            Ok(())
        }

        async fn reset(&self) -> Result<(), ProjectionError> {
            self.applied.lock().unwrap().clear();
            Ok(())
        }
    }

    async fn seed(store: &InMemoryEventStore, n: usize) {
        let user_id = UserId::new();
        for _ in 0..n {
            let payload = EventPayload::DecisionRequested {
                trace_id: TraceId::new(),
                session_id: SessionId::new(),
            };
            let (aggregate_type, aggregate_id) = payload.aggregate(user_id);
            store
                .append(EventEnvelope {
                    event_id: EventId::new(),
                    event_type: payload.event_type().to_string(),
                    schema_version: CURRENT_SCHEMA_VERSION,
                    aggregate_type,
                    aggregate_id,
                    user_id,
                    occurred_at: chrono::Utc::now(),
                    recorded_at: chrono::Utc::now(),
                    correlation_id: CorrelationId::new(),
                    causation_id: None,
                    idempotency_key: None,
                    payload,
                })
                .await
                .unwrap();
        }
    }

    fn coordinator(
        store: Arc<InMemoryEventStore>,
        dead_letters: Arc<InMemoryDeadLetterRepository>,
        projector: Arc<dyn Projector>,
    ) -> ProjectionCoordinator {
        let mut coordinator = ProjectionCoordinator::new(
            store,
            Arc::new(UpcasterRegistry::with_current_schemas()),
            Arc::new(InMemoryCheckpointRepository::new()),
            dead_letters,
            ProjectionCoordinatorConfig {
                initial_backoff_ms: 1,
                ..Default::default()
            },
        );
        coordinator.register(projector);
        coordinator
    }

    #[tokio::test]
    async fn test_dispatch_advances_checkpoint() {
        let store = Arc::new(InMemoryEventStore::new());
        seed(&store, 3).await;
        let projector = Arc::new(RecordingProjector::new(0));
        let coordinator = coordinator(
            store,
            Arc::new(InMemoryDeadLetterRepository::new()),
            projector.clone(),
        );

        let applied = coordinator.dispatch_pending().await.unwrap();
        assert_eq!(applied, 3);
        assert_eq!(coordinator.checkpoint("recording").await.unwrap(), 3);
        assert_eq!(*projector.applied.lock().unwrap(), vec![1, 2, 3]);

        // Nothing new: dispatch is a no-op.
        assert_eq!(coordinator.dispatch_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let store = Arc::new(InMemoryEventStore::new());
        seed(&store, 1).await;
        let projector = Arc::new(RecordingProjector::new(2));
        let dead_letters = Arc::new(InMemoryDeadLetterRepository::new());
        let coordinator = coordinator(store, dead_letters.clone(), projector.clone());

        coordinator.dispatch_pending().await.unwrap();
        assert_eq!(*projector.applied.lock().unwrap(), vec![1]);
        assert!(dead_letters.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter_and_advance() {
        let store = Arc::new(InMemoryEventStore::new());
        seed(&store, 2).await;
        // First event burns through all 5 attempts; the second recovers
        // after two transient failures.
        let projector = Arc::new(RecordingProjector::new(7));
        let dead_letters = Arc::new(InMemoryDeadLetterRepository::new());
        let coordinator = coordinator(store, dead_letters.clone(), projector.clone());

        coordinator.dispatch_pending().await.unwrap();

        // The poisoned event was parked; the second one still applied.
        let letters = dead_letters.list().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].event.position, 1);
        assert_eq!(letters[0].attempts, 5);
        assert!(projector.applied.lock().unwrap().contains(&2));
        assert_eq!(coordinator.checkpoint("recording").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replay_resets_and_rebuilds() {
        let store = Arc::new(InMemoryEventStore::new());
        seed(&store, 4).await;
        let projector = Arc::new(RecordingProjector::new(0));
        let coordinator = coordinator(
            store,
            Arc::new(InMemoryDeadLetterRepository::new()),
            projector.clone(),
        );

        coordinator.dispatch_pending().await.unwrap();
        let outcome = coordinator
            .replay("recording", None, None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReplayOutcome::Completed {
                events_applied: 4,
                checkpoint: 4
            }
        );
        assert_eq!(*projector.applied.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_replay_abort_resumes_from_checkpoint() {
        let store = Arc::new(InMemoryEventStore::new());
        seed(&store, 5).await;
        let projector = Arc::new(RecordingProjector::new(0));
        let coordinator = coordinator(
            store,
            Arc::new(InMemoryDeadLetterRepository::new()),
            projector.clone(),
        );

        // Pre-cancelled token: the replay stops before applying anything
        // past the reset, which is still a valid checkpoint.
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = coordinator
            .replay("recording", None, None, cancel)
            .await
            .unwrap();
        let ReplayOutcome::Aborted { checkpoint, .. } = outcome else {
            panic!("expected aborted replay");
        };

        let outcome = coordinator
            .replay("recording", Some(checkpoint), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReplayOutcome::Completed {
                events_applied: 5,
                checkpoint: 5
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_projector_rejected() {
        let store = Arc::new(InMemoryEventStore::new());
        let coordinator = coordinator(
            store,
            Arc::new(InMemoryDeadLetterRepository::new()),
            Arc::new(RecordingProjector::new(0)),
        );
        assert!(matches!(
            coordinator
                .replay("nonexistent", None, None, CancellationToken::new())
                .await,
            Err(ReplayError::UnknownProjector(_))
        ));
    }
}
