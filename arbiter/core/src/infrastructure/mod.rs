// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer for the Arbiter bounded context

pub mod embedding;
pub mod event_bus;
pub mod event_store;
pub mod postgres_event_store;
pub mod repositories;

pub use embedding::{cosine_similarity, EmbeddingProvider, HashEmbeddingProvider};
pub use event_bus::{EventBus, EventBusError, EventReceiver, RoutedEventReceiver};
pub use event_store::InMemoryEventStore;
pub use postgres_event_store::PostgresEventStore;
pub use repositories::{
    InMemoryCausalEdgeRepository, InMemoryCheckpointRepository, InMemoryDeadLetterRepository,
    InMemoryDecisionRepository, InMemoryMemoryRepository,
};
