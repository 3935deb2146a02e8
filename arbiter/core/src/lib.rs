// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Arbiter core
//!
//! Event-sourced decision-intelligence engine: records every memory an agent
//! relies on, every decision made from those memories, and every observed
//! outcome — then feeds outcomes back into memory salience and a causal
//! knowledge graph.
//!
//! # Architecture
//!
//! - **Layer:** Decision Intelligence Layer
//! - **Domain:** event envelope and log contracts, Memory, DecisionTrace,
//!   Outcome, SalienceAdjustment, CausalEdge aggregates
//! - **Application:** EventLog, ProjectionCoordinator and projectors,
//!   DecisionTracker, OutcomeProcessor, CausalGraph, MaintenanceRunner,
//!   QueryService
//! - **Infrastructure:** in-memory and PostgreSQL event stores, read-model
//!   repositories, broadcast event bus, embedding provider

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
pub use infrastructure::*;
