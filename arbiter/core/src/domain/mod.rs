// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain layer for the Arbiter bounded context: aggregates, events, and
//! persistence contracts.

pub mod causal;
pub mod decision;
pub mod event;
pub mod memory;
pub mod repository;
pub mod salience;

pub use causal::*;
pub use decision::*;
pub use event::*;
pub use memory::*;
pub use repository::*;
pub use salience::*;
