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

//! Transaction Contexts and Registry
//!
//! Per-transaction identity, logical timestamp, state, and held-resource
//! tracking. The registry hands out strictly increasing timestamps from a
//! process-wide counter, so a restarted transaction is always younger than
//! its prior attempt and timestamp ties are unreachable in practice.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::lib::{ResourceId, SimError, SimResult, Timestamp, TransactionId};

/// Transaction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Attempting resource acquisition
    Active,
    /// Blocked on one resource, registered in its wait queue
    Waiting,
    /// Rolled back for this attempt; restarts with a fresh timestamp
    Aborted,
    /// All resources released, no edges remain. Terminal.
    Committed,
}

/// Per-transaction bookkeeping.
///
/// A restart is an explicit state reset (timestamp bump, cleared held set)
/// rather than object recreation: wait queues may still reference the tid
/// transiently during the abort-to-restart window.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    /// Unique identifier, immutable across restarts
    pub tid: TransactionId,
    /// Logical clock value assigned at (re)start
    pub timestamp: Timestamp,
    pub state: TransactionState,
    /// Resources currently locked by this transaction
    pub held_resources: HashSet<ResourceId>,
    /// The single resource this transaction is blocked on, if any.
    /// Requests are issued serially, so there is never more than one.
    pub awaited_resource: Option<ResourceId>,
    /// Number of abort/restart rounds so far
    pub restarts: u32,
}

impl TransactionContext {
    fn new(tid: TransactionId, timestamp: Timestamp) -> Self {
        Self {
            tid,
            timestamp,
            state: TransactionState::Active,
            held_resources: HashSet::new(),
            awaited_resource: None,
            restarts: 0,
        }
    }
}

/// Registry of all transactions in the simulation
pub struct TransactionTable {
    contexts: Mutex<HashMap<TransactionId, TransactionContext>>,
    next_timestamp: AtomicU64,
}

impl TransactionTable {
    /// Create an empty registry; the first timestamp handed out is 1
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            next_timestamp: AtomicU64::new(1),
        }
    }

    fn fresh_timestamp(&self) -> Timestamp {
        self.next_timestamp.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a transaction and assign its initial timestamp
    pub fn register(&self, tid: TransactionId) -> SimResult<Timestamp> {
        let mut contexts = self.contexts.lock().unwrap();
        if contexts.contains_key(&tid) {
            return Err(SimError::InvariantViolation(format!(
                "transaction {tid} registered twice"
            )));
        }
        let timestamp = self.fresh_timestamp();
        contexts.insert(tid, TransactionContext::new(tid, timestamp));
        Ok(timestamp)
    }

    fn with_context<T>(
        &self,
        tid: TransactionId,
        f: impl FnOnce(&mut TransactionContext) -> SimResult<T>,
    ) -> SimResult<T> {
        let mut contexts = self.contexts.lock().unwrap();
        let context = contexts
            .get_mut(&tid)
            .ok_or(SimError::UnknownTransaction(tid))?;
        f(context)
    }

    /// Current timestamp of a transaction
    pub fn timestamp_of(&self, tid: TransactionId) -> SimResult<Timestamp> {
        self.with_context(tid, |context| Ok(context.timestamp))
    }

    /// Timestamp lookup for the cycle detector. An unknown tid maps to 0
    /// (oldest possible), so it is never preferred as a victim.
    pub fn timestamp_hint(&self, tid: TransactionId) -> Timestamp {
        self.timestamp_of(tid).unwrap_or(0)
    }

    /// Current state of a transaction
    pub fn state_of(&self, tid: TransactionId) -> SimResult<TransactionState> {
        self.with_context(tid, |context| Ok(context.state))
    }

    /// Set the state of a transaction
    pub fn set_state(&self, tid: TransactionId, state: TransactionState) -> SimResult<()> {
        self.with_context(tid, |context| {
            context.state = state;
            Ok(())
        })
    }

    /// Record a granted lock. Enforces mutual exclusion: the resource must
    /// not appear in any other transaction's held set.
    pub fn record_acquired(&self, tid: TransactionId, resource: ResourceId) -> SimResult<()> {
        let mut contexts = self.contexts.lock().unwrap();
        if let Some(other) = contexts
            .values()
            .find(|c| c.tid != tid && c.held_resources.contains(&resource))
        {
            return Err(SimError::InvariantViolation(format!(
                "resource {resource} granted to {tid} while held by {}",
                other.tid
            )));
        }
        let context = contexts
            .get_mut(&tid)
            .ok_or(SimError::UnknownTransaction(tid))?;
        context.held_resources.insert(resource);
        Ok(())
    }

    /// Record a released lock
    pub fn record_released(&self, tid: TransactionId, resource: ResourceId) -> SimResult<()> {
        self.with_context(tid, |context| {
            context.held_resources.remove(&resource);
            Ok(())
        })
    }

    /// Record the single resource the transaction is blocked on.
    /// A second outstanding request is an invariant violation.
    pub fn set_awaited(&self, tid: TransactionId, resource: ResourceId) -> SimResult<()> {
        self.with_context(tid, |context| {
            if let Some(previous) = context.awaited_resource {
                return Err(SimError::InvariantViolation(format!(
                    "transaction {tid} awaits {resource} while already awaiting {previous}"
                )));
            }
            context.awaited_resource = Some(resource);
            Ok(())
        })
    }

    /// Clear the awaited-resource marker
    pub fn clear_awaited(&self, tid: TransactionId) -> SimResult<()> {
        self.with_context(tid, |context| {
            context.awaited_resource = None;
            Ok(())
        })
    }

    /// The resource a transaction is currently blocked on, if any
    pub fn awaited_of(&self, tid: TransactionId) -> SimResult<Option<ResourceId>> {
        self.with_context(tid, |context| Ok(context.awaited_resource))
    }

    /// Sorted snapshot of the held-resource set
    pub fn held_snapshot(&self, tid: TransactionId) -> SimResult<Vec<ResourceId>> {
        self.with_context(tid, |context| {
            let mut held: Vec<ResourceId> = context.held_resources.iter().copied().collect();
            held.sort();
            Ok(held)
        })
    }

    /// Number of abort/restart rounds so far (starvation observation)
    pub fn restarts_of(&self, tid: TransactionId) -> SimResult<u32> {
        self.with_context(tid, |context| Ok(context.restarts))
    }

    /// Reset an aborted transaction for its next attempt: strictly greater
    /// timestamp, empty held set, back to Active. Returns the new timestamp.
    pub fn reset_for_restart(&self, tid: TransactionId) -> SimResult<Timestamp> {
        let timestamp = self.fresh_timestamp();
        self.with_context(tid, |context| {
            if !context.held_resources.is_empty() {
                return Err(SimError::InvariantViolation(format!(
                    "transaction {tid} restarted while still holding {} resources",
                    context.held_resources.len()
                )));
            }
            context.timestamp = timestamp;
            context.state = TransactionState::Active;
            context.awaited_resource = None;
            context.restarts += 1;
            Ok(timestamp)
        })
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}
