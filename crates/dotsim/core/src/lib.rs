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

//! Dotsim Core
//!
//! A concurrency-control simulator: transactions running on independent
//! threads contend for exclusively-lockable resources. Deadlocks are
//! prevented by the wait-die timestamp policy and detected (as a backstop)
//! by a wait-for graph cycle check.

pub mod engine;

pub use engine::{
    AcquireOutcome, BeginWait, CollectingSink, CycleResolution, DeadlockCycle, DeadlockDetector,
    DeadlockStatistics, DelaySource, EngineShared, EventKind, EventSink, GraphRenderer,
    GraphSnapshot, LockTable, NoDelay, NullSink, RandomDelay, ResourceId, ResourceLock, SimConfig,
    SimError, SimEvent, SimResult, Simulation, SimulationReport, Timestamp, TracingSink,
    TransactionContext, TransactionId, TransactionOutcome, TransactionReport, TransactionRunner,
    TransactionState, TransactionTable, WaitDieDecision, WaitForEdge, WaitForGraph, WaitOutcome,
    decide, render_dot, resolve_deadlocks,
};
