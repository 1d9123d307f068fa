// Dotsim
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Concurrency-control engine
// Per-resource binary locks with FIFO wait queues, the wait-die conflict
// policy, a wait-for graph with cycle detection, and the per-transaction
// runner lifecycle.

pub mod delay;
pub mod events;
pub mod lib;
pub mod renderer;
pub mod resource_lock;
pub mod runner;
pub mod simulation;
pub mod transaction;
pub mod wait_die;
pub mod wait_for_graph;

// Public exports
pub use delay::{DelaySource, NoDelay, RandomDelay};
pub use events::{CollectingSink, EventKind, EventSink, NullSink, SimEvent, TracingSink};
pub use lib::{ResourceId, SimConfig, SimError, SimResult, Timestamp, TransactionId};
pub use renderer::{GraphRenderer, render_dot};
pub use resource_lock::{AcquireOutcome, BeginWait, LockTable, ResourceLock, WaitOutcome};
pub use runner::{
    EngineShared, TransactionOutcome, TransactionReport, TransactionRunner, resolve_deadlocks,
};
pub use simulation::{Simulation, SimulationReport};
pub use transaction::{TransactionContext, TransactionState, TransactionTable};
pub use wait_die::{WaitDieDecision, decide};
pub use wait_for_graph::{
    CycleResolution, DeadlockCycle, DeadlockDetector, DeadlockStatistics, GraphSnapshot,
    WaitForEdge, WaitForGraph,
};
