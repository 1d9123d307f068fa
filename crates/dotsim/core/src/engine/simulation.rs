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

//! Simulation Driver
//!
//! Builds the fixed resource set and the transaction registry, starts one
//! runner thread per transaction, and joins on completion. Expected aborts
//! stay inside the runners; the only error that fails the whole run is an
//! invariant violation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::error;

use crate::engine::delay::{DelaySource, RandomDelay};
use crate::engine::events::EventSink;
use crate::engine::lib::{ResourceId, SimConfig, SimError, SimResult, TransactionId};
use crate::engine::renderer::GraphRenderer;
use crate::engine::resource_lock::LockTable;
use crate::engine::runner::{
    EngineShared, TransactionOutcome, TransactionReport, TransactionRunner, resolve_deadlocks,
};
use crate::engine::transaction::TransactionTable;
use crate::engine::wait_for_graph::{DeadlockDetector, DeadlockStatistics};

/// Outcome of a whole simulation run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Per-transaction summaries, ascending tid
    pub transactions: Vec<TransactionReport>,
    /// Cycle-detection statistics
    pub statistics: DeadlockStatistics,
}

impl SimulationReport {
    /// Whether every transaction reached Committed
    pub fn all_committed(&self) -> bool {
        self.transactions
            .iter()
            .all(|report| report.outcome == TransactionOutcome::Committed)
    }

    /// Number of committed transactions
    pub fn committed_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|report| report.outcome == TransactionOutcome::Committed)
            .count()
    }

    /// Transactions that hit the restart cap
    pub fn starved(&self) -> Vec<TransactionId> {
        self.transactions
            .iter()
            .filter(|report| report.outcome == TransactionOutcome::Starved)
            .map(|report| report.tid)
            .collect()
    }

    /// Total abort/restart rounds across all transactions
    pub fn total_restarts(&self) -> u32 {
        self.transactions.iter().map(|report| report.restarts).sum()
    }
}

/// A configured simulation, ready to run once
pub struct Simulation {
    config: SimConfig,
    shared: Arc<EngineShared>,
    plans: HashMap<TransactionId, Vec<ResourceId>>,
}

impl Simulation {
    /// Build the resource set and register `config.transactions`
    /// transactions with ids `1..=n` and increasing initial timestamps.
    /// By default every transaction requests every resource in id order.
    pub fn new(config: SimConfig, sink: Arc<dyn EventSink>) -> SimResult<Self> {
        let delays: Arc<dyn DelaySource> = Arc::new(RandomDelay::new(
            config.think_min,
            config.think_max,
            config.seed,
        ));
        Self::with_delays(config, sink, delays)
    }

    /// Same as `new` but with an explicit delay source (tests use `NoDelay`)
    pub fn with_delays(
        config: SimConfig,
        sink: Arc<dyn EventSink>,
        delays: Arc<dyn DelaySource>,
    ) -> SimResult<Self> {
        let locks = LockTable::new(config.resources);
        let table = TransactionTable::new();
        let default_plan = locks.resource_ids();

        let mut plans = HashMap::new();
        for tid in 1..=config.transactions as TransactionId {
            table.register(tid)?;
            plans.insert(tid, default_plan.clone());
        }

        let shared = Arc::new(EngineShared {
            locks,
            table,
            detector: Arc::new(DeadlockDetector::new()),
            sink,
            delays,
        });

        Ok(Self {
            config,
            shared,
            plans,
        })
    }

    /// Override the resource plan of one transaction (scenario workloads)
    pub fn set_plan(&mut self, tid: TransactionId, plan: Vec<ResourceId>) -> SimResult<()> {
        if !self.plans.contains_key(&tid) {
            return Err(SimError::UnknownTransaction(tid));
        }
        self.plans.insert(tid, plan);
        Ok(())
    }

    /// Shared engine state, for scenario setup and assertions in tests
    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Run every transaction to completion and collect the report.
    ///
    /// Starts the optional periodic deadlock sweep and graph renderer for
    /// the duration of the run. Fails only on invariant violations (or a
    /// panicked runner thread, which indicates the same).
    pub fn run(self) -> SimResult<SimulationReport> {
        let mut renderer = self.config.render_interval.map(|interval| {
            let mut renderer = GraphRenderer::new(Arc::clone(&self.shared.detector), interval);
            renderer.start();
            renderer
        });
        let sweeper = self.config.sweep_interval.map(|interval| {
            let shared = Arc::clone(&self.shared);
            let running = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&running);
            let handle = thread::spawn(move || {
                while flag.load(Ordering::Acquire) {
                    if let Err(err) = resolve_deadlocks(&shared) {
                        error!("deadlock sweep failed: {err}");
                        return;
                    }
                    thread::sleep(interval);
                }
            });
            (running, handle)
        });

        let mut handles = Vec::new();
        for (&tid, plan) in &self.plans {
            let runner = TransactionRunner::new(
                tid,
                plan.clone(),
                Arc::clone(&self.shared),
                self.config.max_restarts,
            );
            let handle = thread::Builder::new()
                .name(format!("txn-{tid}"))
                .spawn(move || runner.run())
                .map_err(|err| SimError::Concurrency(format!("spawn failed: {err}")))?;
            handles.push((tid, handle));
        }

        let mut transactions = Vec::new();
        let mut fatal = None;
        for (tid, handle) in handles {
            match handle.join() {
                Ok(Ok(report)) => transactions.push(report),
                Ok(Err(SimError::RetriesExhausted(tid))) => {
                    transactions.push(TransactionReport {
                        tid,
                        outcome: TransactionOutcome::Starved,
                        restarts: self.shared.table.restarts_of(tid)?,
                        final_timestamp: self.shared.table.timestamp_of(tid)?,
                    });
                }
                Ok(Err(err)) => fatal = Some(err),
                Err(_) => {
                    fatal = Some(SimError::Concurrency(format!(
                        "transaction thread txn-{tid} panicked"
                    )));
                }
            }
        }

        if let Some((running, handle)) = sweeper {
            running.store(false, Ordering::Release);
            let _ = handle.join();
        }
        if let Some(renderer) = renderer.as_mut() {
            renderer.stop();
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        // Committed and starved transactions alike left nothing behind
        let leftover = self.shared.detector.snapshot();
        if !leftover.edges.is_empty() {
            return Err(SimError::InvariantViolation(format!(
                "wait-for graph not empty after run: {:?}",
                leftover.edges
            )));
        }

        transactions.sort_by_key(|report| report.tid);
        Ok(SimulationReport {
            transactions,
            statistics: self.shared.detector.statistics(),
        })
    }
}
