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

//! Transaction Runner
//!
//! Drives one transaction's lifecycle on its own thread: acquire attempts,
//! wait-die conflict resolution, commit, and the abort/rollback/restart
//! loop. An abort is a forced unwind: every held resource is released and
//! every graph edge purged before the transaction backs off and retries
//! with a fresh timestamp.

use std::sync::Arc;
use std::thread;

use crate::engine::delay::DelaySource;
use crate::engine::events::{EventSink, SimEvent};
use crate::engine::lib::{ResourceId, SimError, SimResult, Timestamp, TransactionId};
use crate::engine::resource_lock::{AcquireOutcome, BeginWait, LockTable, WaitOutcome};
use crate::engine::transaction::{TransactionState, TransactionTable};
use crate::engine::wait_die::{self, WaitDieDecision};
use crate::engine::wait_for_graph::DeadlockDetector;

/// Shared engine state every runner operates on
pub struct EngineShared {
    pub locks: LockTable,
    pub table: TransactionTable,
    pub detector: Arc<DeadlockDetector>,
    pub sink: Arc<dyn EventSink>,
    pub delays: Arc<dyn DelaySource>,
}

/// How a finished transaction ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Reached Committed
    Committed,
    /// Hit the restart cap without committing (starvation observation)
    Starved,
}

/// Summary of one transaction's full run
#[derive(Debug, Clone)]
pub struct TransactionReport {
    pub tid: TransactionId,
    pub outcome: TransactionOutcome,
    /// Abort/restart rounds it took
    pub restarts: u32,
    /// Timestamp of the final attempt
    pub final_timestamp: Timestamp,
}

/// Result of one acquisition request
enum RequestOutcome {
    Acquired,
    /// The wait-die policy (or a cancelled wait) killed this attempt
    Died,
}

/// Result of one full attempt over the resource plan
enum AttemptOutcome {
    Committed,
    Died,
}

/// Drives a single transaction to commit
pub struct TransactionRunner {
    tid: TransactionId,
    plan: Vec<ResourceId>,
    shared: Arc<EngineShared>,
    max_restarts: Option<u32>,
}

impl TransactionRunner {
    /// Create a runner for a registered transaction. `plan` is the ordered
    /// list of resources the transaction will request, one at a time.
    pub fn new(
        tid: TransactionId,
        plan: Vec<ResourceId>,
        shared: Arc<EngineShared>,
        max_restarts: Option<u32>,
    ) -> Self {
        Self {
            tid,
            plan,
            shared,
            max_restarts,
        }
    }

    /// Run the transaction to completion.
    ///
    /// Expected aborts are handled internally via rollback-and-restart;
    /// the only errors that escape are invariant violations (fatal) and
    /// `RetriesExhausted` when the restart cap is hit.
    pub fn run(&self) -> SimResult<TransactionReport> {
        loop {
            let timestamp = self.shared.table.timestamp_of(self.tid)?;
            match self.attempt(timestamp)? {
                AttemptOutcome::Committed => {
                    return Ok(TransactionReport {
                        tid: self.tid,
                        outcome: TransactionOutcome::Committed,
                        restarts: self.shared.table.restarts_of(self.tid)?,
                        final_timestamp: timestamp,
                    });
                }
                AttemptOutcome::Died => {
                    self.rollback(timestamp)?;
                    let attempt = self.shared.table.restarts_of(self.tid)? + 1;
                    if let Some(cap) = self.max_restarts {
                        if attempt > cap {
                            return Err(SimError::RetriesExhausted(self.tid));
                        }
                    }
                    thread::sleep(self.shared.delays.backoff(attempt));
                    self.shared.table.reset_for_restart(self.tid)?;
                }
            }
        }
    }

    /// One pass over the resource plan: acquire everything, do the
    /// simulated work, commit.
    fn attempt(&self, timestamp: Timestamp) -> SimResult<AttemptOutcome> {
        for &resource in &self.plan {
            thread::sleep(self.shared.delays.think_time());
            match self.acquire(resource, timestamp)? {
                RequestOutcome::Acquired => {}
                RequestOutcome::Died => return Ok(AttemptOutcome::Died),
            }
        }

        // Simulated work while holding the full lock set
        thread::sleep(self.shared.delays.think_time());

        self.release_all()?;
        self.shared.detector.remove_transaction(self.tid);
        self.shared
            .table
            .set_state(self.tid, TransactionState::Committed)?;
        self.shared.sink.emit(SimEvent::Committed {
            tid: self.tid,
            timestamp,
        });
        Ok(AttemptOutcome::Committed)
    }

    /// Request one resource, resolving conflicts through wait-die
    fn acquire(&self, resource: ResourceId, timestamp: Timestamp) -> SimResult<RequestOutcome> {
        let lock = self.shared.locks.lock(resource)?;

        loop {
            let holder = match lock.try_acquire(self.tid) {
                AcquireOutcome::Acquired => {
                    self.record_acquired(resource, timestamp)?;
                    return Ok(RequestOutcome::Acquired);
                }
                AcquireOutcome::HeldBy(holder) => holder,
            };

            let holder_timestamp = self.shared.table.timestamp_of(holder)?;
            match wait_die::decide(timestamp, holder_timestamp) {
                WaitDieDecision::Abort => return Ok(RequestOutcome::Died),
                WaitDieDecision::Wait => match lock.begin_wait(self.tid)? {
                    BeginWait::Granted => {
                        self.record_acquired(resource, timestamp)?;
                        return Ok(RequestOutcome::Acquired);
                    }
                    BeginWait::Enqueued { holder: observed } if observed != holder => {
                        // The holder changed between the conflict check and
                        // the enqueue; withdraw and re-decide against the
                        // holder we would actually wait on
                        lock.cancel_wait(self.tid);
                        continue;
                    }
                    BeginWait::Enqueued { holder } => {
                        self.shared.table.set_awaited(self.tid, resource)?;
                        self.shared
                            .table
                            .set_state(self.tid, TransactionState::Waiting)?;
                        self.shared
                            .detector
                            .add_wait_edge(self.tid, holder, resource);
                        self.shared.sink.emit(SimEvent::Blocked {
                            tid: self.tid,
                            resource,
                            holder,
                            timestamp,
                        });

                        // Backstop: the policy keeps the graph acyclic, but
                        // a residual cycle must never outlive the next check
                        resolve_deadlocks(&self.shared)?;

                        match lock.await_grant(self.tid) {
                            WaitOutcome::Granted => {
                                // Hand-off side of the retarget; the
                                // releaser runs the same idempotent update
                                self.shared
                                    .detector
                                    .resource_transferred(resource, self.tid);
                                self.shared.table.clear_awaited(self.tid)?;
                                self.shared
                                    .table
                                    .set_state(self.tid, TransactionState::Active)?;
                                self.record_acquired(resource, timestamp)?;
                                return Ok(RequestOutcome::Acquired);
                            }
                            WaitOutcome::Cancelled => {
                                self.shared.table.clear_awaited(self.tid)?;
                                return Ok(RequestOutcome::Died);
                            }
                        }
                    }
                },
            }
        }
    }

    fn record_acquired(&self, resource: ResourceId, timestamp: Timestamp) -> SimResult<()> {
        self.shared.table.record_acquired(self.tid, resource)?;
        self.shared.sink.emit(SimEvent::Acquired {
            tid: self.tid,
            resource,
            timestamp,
        });
        Ok(())
    }

    /// Release every held resource, in ascending id order. Each release may
    /// hand the lock to a FIFO head; the graph is retargeted right after.
    fn release_all(&self) -> SimResult<()> {
        let timestamp = self.shared.table.timestamp_of(self.tid)?;
        for resource in self.shared.table.held_snapshot(self.tid)? {
            let lock = self.shared.locks.lock(resource)?;
            // Table and sink first, while this transaction is still the
            // holder: the woken waiter records its grant against the table
            // and emits Acquired, so both must already reflect the release
            self.shared.table.record_released(self.tid, resource)?;
            self.shared.sink.emit(SimEvent::Released {
                tid: self.tid,
                resource,
                timestamp,
            });
            if let Some(next) = lock.release(self.tid)? {
                self.shared.detector.resource_transferred(resource, next);
            }
        }
        Ok(())
    }

    /// Forced unwind: exact rollback of everything this attempt did
    fn rollback(&self, timestamp: Timestamp) -> SimResult<()> {
        self.shared
            .table
            .set_state(self.tid, TransactionState::Aborted)?;
        let held_snapshot = self.shared.table.held_snapshot(self.tid)?;
        self.release_all()?;
        self.shared.detector.remove_transaction(self.tid);
        self.shared.table.clear_awaited(self.tid)?;
        self.shared.sink.emit(SimEvent::Aborted {
            tid: self.tid,
            timestamp,
            held_snapshot,
        });
        Ok(())
    }
}

/// Run cycle detection and break every cycle by cancelling the youngest
/// transaction's wait. The victim wakes with a cancelled wait and performs
/// its own rollback. Shared by the per-block backstop and the periodic
/// sweep.
pub fn resolve_deadlocks(shared: &EngineShared) -> SimResult<()> {
    let resolutions = shared
        .detector
        .check(&|tid| shared.table.timestamp_hint(tid));

    for resolution in resolutions {
        shared.sink.emit(SimEvent::CycleDetected {
            transactions: resolution.cycle.transactions.clone(),
            victim: resolution.victim,
        });
        if let Some(resource) = shared.table.awaited_of(resolution.victim)? {
            shared.locks.lock(resource)?.cancel_wait(resolution.victim);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::delay::NoDelay;
    use crate::engine::events::{CollectingSink, EventKind};
    use crate::engine::lib::ResourceId;

    fn shared_with(resources: usize, sink: Arc<CollectingSink>) -> Arc<EngineShared> {
        Arc::new(EngineShared {
            locks: LockTable::new(resources),
            table: TransactionTable::new(),
            detector: Arc::new(DeadlockDetector::new()),
            sink,
            delays: Arc::new(NoDelay),
        })
    }

    #[test]
    fn test_uncontended_transaction_commits() {
        let sink = Arc::new(CollectingSink::new());
        let shared = shared_with(2, Arc::clone(&sink));
        shared.table.register(1).unwrap();

        let runner = TransactionRunner::new(
            1,
            vec![ResourceId(0), ResourceId(1)],
            Arc::clone(&shared),
            Some(4),
        );
        let report = runner.run().unwrap();

        assert_eq!(report.outcome, TransactionOutcome::Committed);
        assert_eq!(report.restarts, 0);
        assert_eq!(sink.count(EventKind::Acquired), 2);
        assert_eq!(sink.count(EventKind::Released), 2);
        assert_eq!(sink.count(EventKind::Committed), 1);
        assert_eq!(
            shared.table.state_of(1).unwrap(),
            TransactionState::Committed
        );
        assert!(shared.locks.lock(ResourceId(0)).unwrap().holder().is_none());
    }

    #[test]
    fn test_younger_requester_dies_and_restarts() {
        let sink = Arc::new(CollectingSink::new());
        let shared = shared_with(1, Arc::clone(&sink));
        shared.table.register(1).unwrap(); // older
        shared.table.register(2).unwrap(); // younger

        // T1 holds R0 and never lets go during T2's first attempts
        let lock = shared.locks.lock(ResourceId(0)).unwrap();
        assert_eq!(lock.try_acquire(1), AcquireOutcome::Acquired);
        shared.table.record_acquired(1, ResourceId(0)).unwrap();

        let runner_thread = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let runner = TransactionRunner::new(2, vec![ResourceId(0)], shared, Some(64));
                runner.run()
            })
        };

        // Let T2 die at least once, then release
        while sink.count(EventKind::Aborted) == 0 {
            thread::yield_now();
        }
        shared.table.record_released(1, ResourceId(0)).unwrap();
        lock.release(1).unwrap();

        let report = runner_thread.join().unwrap().unwrap();
        assert_eq!(report.outcome, TransactionOutcome::Committed);
        assert!(report.restarts >= 1);
        // Restarted attempts carry strictly greater timestamps
        assert!(report.final_timestamp > 2);
    }

    #[test]
    fn test_rollback_is_exact() {
        let sink = Arc::new(CollectingSink::new());
        let shared = shared_with(2, Arc::clone(&sink));
        shared.table.register(1).unwrap();
        shared.table.register(2).unwrap();

        // T2 holds R1, T1 holds R0; T2's request for R0 dies (younger)
        let r0 = shared.locks.lock(ResourceId(0)).unwrap();
        let r1 = shared.locks.lock(ResourceId(1)).unwrap();
        assert_eq!(r0.try_acquire(1), AcquireOutcome::Acquired);
        shared.table.record_acquired(1, ResourceId(0)).unwrap();
        assert_eq!(r1.try_acquire(2), AcquireOutcome::Acquired);
        shared.table.record_acquired(2, ResourceId(1)).unwrap();

        let runner = TransactionRunner::new(2, vec![ResourceId(0)], Arc::clone(&shared), Some(0));
        let result = runner.run();
        assert!(matches!(result, Err(SimError::RetriesExhausted(2))));

        // After the abort the transaction holds nothing and no graph edge
        // references it; the resource it held was released for others
        assert!(shared.table.held_snapshot(2).unwrap().is_empty());
        assert!(!shared.detector.references(2));
        assert!(r1.holder().is_none());

        let aborted: Vec<SimEvent> = sink
            .events()
            .into_iter()
            .filter(|event| event.kind() == EventKind::Aborted)
            .collect();
        assert_eq!(aborted.len(), 1);
        assert_eq!(
            aborted[0],
            SimEvent::Aborted {
                tid: 2,
                timestamp: 2,
                held_snapshot: vec![ResourceId(1)],
            }
        );
    }

    #[test]
    fn test_older_requester_waits_for_hand_off() {
        let sink = Arc::new(CollectingSink::new());
        let shared = shared_with(1, Arc::clone(&sink));
        shared.table.register(1).unwrap(); // older
        shared.table.register(2).unwrap(); // younger, current holder

        let lock = shared.locks.lock(ResourceId(0)).unwrap();
        assert_eq!(lock.try_acquire(2), AcquireOutcome::Acquired);
        shared.table.record_acquired(2, ResourceId(0)).unwrap();

        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let runner = TransactionRunner::new(1, vec![ResourceId(0)], shared, Some(4));
                runner.run()
            })
        };

        // Wait until T1 is blocked and registered in the graph
        while sink.count(EventKind::Blocked) == 0 {
            thread::yield_now();
        }
        assert!(shared.detector.references(1));

        shared.table.record_released(2, ResourceId(0)).unwrap();
        lock.release(2).unwrap();
        shared.detector.resource_transferred(ResourceId(0), 1);

        let report = waiter.join().unwrap().unwrap();
        assert_eq!(report.outcome, TransactionOutcome::Committed);
        assert_eq!(report.restarts, 0);
        assert!(!shared.detector.references(1));
        assert!(sink.count(EventKind::CycleDetected) == 0);
    }

    #[test]
    fn test_cancelled_wait_resolves_as_death() {
        let sink = Arc::new(CollectingSink::new());
        let shared = shared_with(1, Arc::clone(&sink));
        shared.table.register(1).unwrap();
        shared.table.register(2).unwrap();

        let lock = shared.locks.lock(ResourceId(0)).unwrap();
        assert_eq!(lock.try_acquire(2), AcquireOutcome::Acquired);
        shared.table.record_acquired(2, ResourceId(0)).unwrap();

        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                // Cap 0: the first death ends the run
                let runner = TransactionRunner::new(1, vec![ResourceId(0)], shared, Some(0));
                runner.run()
            })
        };

        while sink.count(EventKind::Blocked) == 0 {
            thread::yield_now();
        }
        // Simulate a detector decision against the waiter
        assert!(lock.cancel_wait(1));

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(SimError::RetriesExhausted(1))));
        assert!(shared.table.held_snapshot(1).unwrap().is_empty());
        assert!(!shared.detector.references(1));
    }
}
