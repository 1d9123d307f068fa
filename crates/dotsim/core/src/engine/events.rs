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

//! Event Sink
//!
//! Structured notifications emitted on every lock-state transition. Sinks
//! are fire-and-forget: emitting must never block or fail the core
//! operation that produced the event.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::engine::lib::{ResourceId, Timestamp, TransactionId};

/// A structured simulation event. Fixed tagged variants so consumers
/// pattern-match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A transaction took (or was handed) a resource lock
    Acquired {
        tid: TransactionId,
        resource: ResourceId,
        timestamp: Timestamp,
    },
    /// A transaction blocked behind the current holder
    Blocked {
        tid: TransactionId,
        resource: ResourceId,
        holder: TransactionId,
        timestamp: Timestamp,
    },
    /// A transaction released a resource lock
    Released {
        tid: TransactionId,
        resource: ResourceId,
        timestamp: Timestamp,
    },
    /// A transaction died and rolled back; `held_snapshot` is what it held
    /// at the moment of the abort
    Aborted {
        tid: TransactionId,
        timestamp: Timestamp,
        held_snapshot: Vec<ResourceId>,
    },
    /// A transaction finished and released everything
    Committed {
        tid: TransactionId,
        timestamp: Timestamp,
    },
    /// The backstop found a wait cycle and chose a victim
    CycleDetected {
        transactions: Vec<TransactionId>,
        victim: TransactionId,
    },
}

/// Event discriminant for cheap filtering in tests and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Acquired,
    Blocked,
    Released,
    Aborted,
    Committed,
    CycleDetected,
}

impl SimEvent {
    /// Get the event discriminant
    pub fn kind(&self) -> EventKind {
        match self {
            SimEvent::Acquired { .. } => EventKind::Acquired,
            SimEvent::Blocked { .. } => EventKind::Blocked,
            SimEvent::Released { .. } => EventKind::Released,
            SimEvent::Aborted { .. } => EventKind::Aborted,
            SimEvent::Committed { .. } => EventKind::Committed,
            SimEvent::CycleDetected { .. } => EventKind::CycleDetected,
        }
    }

    /// The transaction the event is about, if it concerns a single one
    pub fn tid(&self) -> Option<TransactionId> {
        match self {
            SimEvent::Acquired { tid, .. }
            | SimEvent::Blocked { tid, .. }
            | SimEvent::Released { tid, .. }
            | SimEvent::Aborted { tid, .. }
            | SimEvent::Committed { tid, .. } => Some(*tid),
            SimEvent::CycleDetected { .. } => None,
        }
    }
}

/// Receiver for simulation events
pub trait EventSink: Send + Sync {
    /// Deliver one event. Implementations must not block and must not fail.
    fn emit(&self, event: SimEvent);
}

/// Sink that logs every event through `tracing`
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: SimEvent) {
        match event {
            SimEvent::Acquired {
                tid,
                resource,
                timestamp,
            } => info!("T{tid}(ts={timestamp}) acquired {resource}"),
            SimEvent::Blocked {
                tid,
                resource,
                holder,
                timestamp,
            } => info!("T{tid}(ts={timestamp}) blocked on {resource} held by T{holder}"),
            SimEvent::Released {
                tid,
                resource,
                timestamp,
            } => info!("T{tid}(ts={timestamp}) released {resource}"),
            SimEvent::Aborted {
                tid,
                timestamp,
                held_snapshot,
            } => warn!("T{tid}(ts={timestamp}) aborted, rolling back {held_snapshot:?}"),
            SimEvent::Committed { tid, timestamp } => {
                info!("T{tid}(ts={timestamp}) committed")
            }
            SimEvent::CycleDetected {
                transactions,
                victim,
            } => warn!("wait cycle {transactions:?} detected, aborting T{victim}"),
        }
    }
}

/// Sink that records events in memory, for tests and reports
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SimEvent>>,
}

impl CollectingSink {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Count events of one kind
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: SimEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Sink that discards everything
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SimEvent) {}
}
