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

//! Per-Resource Binary Locking
//!
//! Each resource carries an exclusive lock with a FIFO wait queue. Every
//! waiter gets its own condition variable, so a release wakes exactly the
//! transferred waiter instead of broadcasting to the whole queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use crate::engine::lib::{ResourceId, SimError, SimResult, TransactionId};

/// Outcome of a non-blocking acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock is now (or was already) held by the requester
    Acquired,
    /// The lock is held by another transaction
    HeldBy(TransactionId),
}

/// Outcome of registering in the wait queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginWait {
    /// The holder went away between the conflict check and the enqueue;
    /// the requester owns the lock without ever sleeping
    Granted,
    /// The requester is queued behind the current holder
    Enqueued { holder: TransactionId },
}

/// Outcome of blocking on a queued wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Ownership was transferred to the waiter
    Granted,
    /// The wait was cancelled (deadlock-victim path); the waiter must abort
    Cancelled,
}

/// A queued waiter with its private wake-up channel
struct WaitEntry {
    tid: TransactionId,
    cv: Arc<Condvar>,
}

/// Mutable lock state, guarded by the resource's own mutex
#[derive(Default)]
struct LockState {
    holder: Option<TransactionId>,
    queue: VecDeque<WaitEntry>,
}

/// Binary mutual-exclusion lock for a single shared resource.
///
/// Invariants maintained here:
/// - at most one holder at any instant;
/// - `holder == None` implies an empty queue (release always transfers to
///   the FIFO head, so a free resource never has sleepers);
/// - a transaction appears at most once in the queue.
pub struct ResourceLock {
    id: ResourceId,
    state: Mutex<LockState>,
}

impl ResourceLock {
    /// Create a new unlocked resource
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            state: Mutex::new(LockState::default()),
        }
    }

    /// Get the resource identifier
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Try to take the lock without blocking.
    ///
    /// Idempotent for the current holder: re-acquiring a lock the caller
    /// already owns succeeds, so a transaction can never self-deadlock.
    pub fn try_acquire(&self, tid: TransactionId) -> AcquireOutcome {
        let mut state = self.state.lock().unwrap();
        match state.holder {
            None => {
                state.holder = Some(tid);
                AcquireOutcome::Acquired
            }
            Some(holder) if holder == tid => AcquireOutcome::Acquired,
            Some(holder) => AcquireOutcome::HeldBy(holder),
        }
    }

    /// Register the caller in the wait queue.
    ///
    /// Re-checks the holder under the same guard: if the conflicting holder
    /// released in the meantime the lock is granted immediately. Returns the
    /// holder observed at enqueue time so the caller can record the matching
    /// wait-for edge.
    pub fn begin_wait(&self, tid: TransactionId) -> SimResult<BeginWait> {
        let mut state = self.state.lock().unwrap();
        match state.holder {
            None => {
                state.holder = Some(tid);
                Ok(BeginWait::Granted)
            }
            Some(holder) if holder == tid => Ok(BeginWait::Granted),
            Some(holder) => {
                if state.queue.iter().any(|entry| entry.tid == tid) {
                    return Err(SimError::InvariantViolation(format!(
                        "transaction {tid} enqueued twice on resource {}",
                        self.id
                    )));
                }
                state.queue.push_back(WaitEntry {
                    tid,
                    cv: Arc::new(Condvar::new()),
                });
                Ok(BeginWait::Enqueued { holder })
            }
        }
    }

    /// Block until the lock is handed to the caller or its wait is
    /// cancelled. Must be preceded by a successful `begin_wait`.
    pub fn await_grant(&self, tid: TransactionId) -> WaitOutcome {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.holder == Some(tid) {
                return WaitOutcome::Granted;
            }
            let cv = match state.queue.iter().find(|entry| entry.tid == tid) {
                Some(entry) => Arc::clone(&entry.cv),
                // Neither holder nor queued: the wait was cancelled
                None => return WaitOutcome::Cancelled,
            };
            state = cv.wait(state).unwrap();
        }
    }

    /// Remove a queued waiter and wake it with a cancelled wait.
    /// Returns false if the transaction was not queued here.
    pub fn cancel_wait(&self, tid: TransactionId) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.queue.iter().position(|entry| entry.tid == tid) {
            let entry = state.queue.remove(pos).unwrap();
            entry.cv.notify_one();
            true
        } else {
            false
        }
    }

    /// Release the lock held by `tid`.
    ///
    /// Fails with an invariant violation when called by a non-holder. On
    /// success the lock transfers to the FIFO head, if any, and exactly that
    /// waiter is woken; the new holder is returned so the caller can update
    /// the wait-for graph after the hand-off.
    pub fn release(&self, tid: TransactionId) -> SimResult<Option<TransactionId>> {
        let mut state = self.state.lock().unwrap();
        if state.holder != Some(tid) {
            return Err(SimError::InvariantViolation(format!(
                "transaction {tid} released resource {} it does not hold (holder: {:?})",
                self.id, state.holder
            )));
        }
        match state.queue.pop_front() {
            Some(next) => {
                state.holder = Some(next.tid);
                next.cv.notify_one();
                Ok(Some(next.tid))
            }
            None => {
                state.holder = None;
                Ok(None)
            }
        }
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<TransactionId> {
        self.state.lock().unwrap().holder
    }

    /// FIFO snapshot of the wait queue
    pub fn queue_snapshot(&self) -> Vec<TransactionId> {
        self.state
            .lock()
            .unwrap()
            .queue
            .iter()
            .map(|entry| entry.tid)
            .collect()
    }
}

/// The fixed resource set, created once at simulator start-up
pub struct LockTable {
    locks: HashMap<ResourceId, Arc<ResourceLock>>,
}

impl LockTable {
    /// Create `count` resources with ids `R0..R{count-1}`
    pub fn new(count: usize) -> Self {
        let locks = (0..count)
            .map(|i| {
                let id = ResourceId(i as u32);
                (id, Arc::new(ResourceLock::new(id)))
            })
            .collect();
        Self { locks }
    }

    /// Look up a resource lock
    pub fn lock(&self, id: ResourceId) -> SimResult<Arc<ResourceLock>> {
        self.locks
            .get(&id)
            .cloned()
            .ok_or(SimError::UnknownResource(id))
    }

    /// All resource ids in ascending order
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.locks.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
