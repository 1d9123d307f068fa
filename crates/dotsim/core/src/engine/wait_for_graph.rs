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

//! Wait-For Graph and Cycle Detection
//!
//! Directed graph of "waits-for" edges derived from the resource wait
//! queues. Under a correctly applied wait-die policy the graph is acyclic by
//! construction; the cycle detector is a safety backstop (resolved by
//! aborting the youngest transaction on the cycle) and the feed for the
//! graph renderer.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use crate::engine::lib::{ResourceId, Timestamp, TransactionId};

/// A wait-for relationship between two transactions.
///
/// Edges carry the contested resource so the graph stays reconstructible
/// from resource holder/queue state and can be retargeted on lock hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitForEdge {
    /// Transaction that is waiting
    pub waiter: TransactionId,
    /// Transaction that is being waited for
    pub holder: TransactionId,
    /// Resource being waited for
    pub resource: ResourceId,
}

/// A cycle in the wait-for graph representing a deadlock
#[derive(Debug, Clone)]
pub struct DeadlockCycle {
    /// Transactions involved in the deadlock
    pub transactions: Vec<TransactionId>,
    /// Resources involved in the deadlock
    pub resources: Vec<ResourceId>,
}

impl DeadlockCycle {
    /// Pick the youngest transaction on the cycle (largest timestamp,
    /// ties broken by the larger id) as the abort victim.
    pub fn youngest_by(&self, timestamp_of: &dyn Fn(TransactionId) -> Timestamp) -> TransactionId {
        self.transactions
            .iter()
            .max_by_key(|&&tid| (timestamp_of(tid), tid))
            .copied()
            .unwrap_or(0)
    }

    /// Check if a transaction is part of this deadlock
    pub fn contains(&self, tid: TransactionId) -> bool {
        self.transactions.contains(&tid)
    }
}

/// A detected cycle together with the victim chosen to break it
#[derive(Debug, Clone)]
pub struct CycleResolution {
    pub cycle: DeadlockCycle,
    pub victim: TransactionId,
}

/// Statistics about deadlock detection
#[derive(Debug, Clone, Default)]
pub struct DeadlockStatistics {
    /// Total number of cycles detected
    pub cycles_detected: u64,
    /// Total number of victims chosen to break cycles
    pub victims_chosen: u64,
    /// Number of currently active wait-for edges
    pub active_edges: usize,
}

/// Read-only copy of the graph for the renderer
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<TransactionId>,
    pub edges: Vec<WaitForEdge>,
}

/// Adjacency mapping of wait-for edges keyed by the waiting transaction
#[derive(Default)]
pub struct WaitForGraph {
    /// Outgoing edges per waiter
    edges: HashMap<TransactionId, Vec<WaitForEdge>>,
    /// Reverse mapping: holder -> transactions waiting for it
    waited_by: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    /// Create an empty wait-for graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a wait-for edge to the graph
    pub fn add_edge(&mut self, edge: WaitForEdge) {
        self.edges.entry(edge.waiter).or_default().push(edge);
        self.waited_by
            .entry(edge.holder)
            .or_default()
            .insert(edge.waiter);
    }

    /// Remove the edge between a waiter and a holder
    pub fn remove_edge(&mut self, waiter: TransactionId, holder: TransactionId) {
        if let Some(edges) = self.edges.get_mut(&waiter) {
            edges.retain(|edge| edge.holder != holder);
            if edges.is_empty() {
                self.edges.remove(&waiter);
            }
        }
        if let Some(waiters) = self.waited_by.get_mut(&holder) {
            waiters.remove(&waiter);
            if waiters.is_empty() {
                self.waited_by.remove(&holder);
            }
        }
    }

    /// Remove all edges involving a transaction (abort/commit purge)
    pub fn remove_transaction(&mut self, tid: TransactionId) {
        if let Some(edges) = self.edges.remove(&tid) {
            for edge in edges {
                if let Some(waiters) = self.waited_by.get_mut(&edge.holder) {
                    waiters.remove(&tid);
                    if waiters.is_empty() {
                        self.waited_by.remove(&edge.holder);
                    }
                }
            }
        }
        if let Some(waiters) = self.waited_by.remove(&tid) {
            for waiter in waiters {
                if let Some(edges) = self.edges.get_mut(&waiter) {
                    edges.retain(|edge| edge.holder != tid);
                    if edges.is_empty() {
                        self.edges.remove(&waiter);
                    }
                }
            }
        }
    }

    /// Repoint edges after a lock hand-off: the new holder's own edge for
    /// the resource disappears and the remaining waiters now wait on the
    /// new holder. Idempotent, so both sides of a hand-off may run it.
    pub fn retarget_resource(&mut self, resource: ResourceId, new_holder: TransactionId) {
        let affected: Vec<WaitForEdge> = self
            .edges
            .values()
            .flatten()
            .filter(|edge| edge.resource == resource)
            .copied()
            .collect();

        for edge in affected {
            self.remove_edge(edge.waiter, edge.holder);
            if edge.waiter != new_holder {
                self.add_edge(WaitForEdge {
                    waiter: edge.waiter,
                    holder: new_holder,
                    resource,
                });
            }
        }
    }

    /// Detect all cycles using DFS with a recursion-stack marker per node
    pub fn find_cycles(&self) -> Vec<DeadlockCycle> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();
        let mut current_path = Vec::new();
        let mut cycles = Vec::new();

        let mut roots: Vec<TransactionId> = self.edges.keys().copied().collect();
        roots.sort_unstable();
        for tid in roots {
            if !visited.contains(&tid) {
                self.dfs_detect_cycle(
                    tid,
                    &mut visited,
                    &mut recursion_stack,
                    &mut current_path,
                    &mut cycles,
                );
            }
        }

        cycles
    }

    /// Whether any wait cycle exists
    pub fn has_cycle(&self) -> bool {
        !self.find_cycles().is_empty()
    }

    fn dfs_detect_cycle(
        &self,
        tid: TransactionId,
        visited: &mut HashSet<TransactionId>,
        recursion_stack: &mut HashSet<TransactionId>,
        current_path: &mut Vec<TransactionId>,
        cycles: &mut Vec<DeadlockCycle>,
    ) {
        visited.insert(tid);
        recursion_stack.insert(tid);
        current_path.push(tid);

        if let Some(edges) = self.edges.get(&tid) {
            for edge in edges {
                if !visited.contains(&edge.holder) {
                    self.dfs_detect_cycle(edge.holder, visited, recursion_stack, current_path, cycles);
                } else if recursion_stack.contains(&edge.holder) {
                    // A node revisited while still on the recursion stack
                    // closes a cycle
                    if let Some(start) = current_path.iter().position(|&t| t == edge.holder) {
                        let transactions = current_path[start..].to_vec();
                        let resources = self.resources_in_cycle(&transactions);
                        cycles.push(DeadlockCycle {
                            transactions,
                            resources,
                        });
                    }
                }
            }
        }

        current_path.pop();
        recursion_stack.remove(&tid);
    }

    fn resources_in_cycle(&self, transactions: &[TransactionId]) -> Vec<ResourceId> {
        let mut resources = HashSet::new();
        for &tid in transactions {
            if let Some(edges) = self.edges.get(&tid) {
                for edge in edges {
                    if transactions.contains(&edge.holder) {
                        resources.insert(edge.resource);
                    }
                }
            }
        }
        let mut resources: Vec<ResourceId> = resources.into_iter().collect();
        resources.sort();
        resources
    }

    /// Number of active edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|v| v.len()).sum()
    }

    /// Check if the graph has any edges
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Whether any edge references a transaction, in either direction
    pub fn references(&self, tid: TransactionId) -> bool {
        self.edges.contains_key(&tid) || self.waited_by.contains_key(&tid)
    }

    /// Read-only copy of nodes and edges
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: HashSet<TransactionId> = self.edges.keys().copied().collect();
        nodes.extend(self.waited_by.keys().copied());
        let mut nodes: Vec<TransactionId> = nodes.into_iter().collect();
        nodes.sort_unstable();

        let mut edges: Vec<WaitForEdge> = self.edges.values().flatten().copied().collect();
        edges.sort_by_key(|edge| (edge.waiter, edge.holder, edge.resource));

        GraphSnapshot { nodes, edges }
    }
}

/// Thread-safe wrapper monitoring the wait-for graph.
///
/// Mutations happen strictly after the corresponding resource-level change
/// commits, so the graph never claims a lock state that has not taken
/// effect.
pub struct DeadlockDetector {
    graph: RwLock<WaitForGraph>,
    statistics: Mutex<DeadlockStatistics>,
}

impl DeadlockDetector {
    /// Create a new detector over an empty graph
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(WaitForGraph::new()),
            statistics: Mutex::new(DeadlockStatistics::default()),
        }
    }

    /// Record that `waiter` blocked on `resource` held by `holder`
    pub fn add_wait_edge(
        &self,
        waiter: TransactionId,
        holder: TransactionId,
        resource: ResourceId,
    ) {
        let mut graph = self.graph.write().unwrap();
        graph.add_edge(WaitForEdge {
            waiter,
            holder,
            resource,
        });
        self.statistics.lock().unwrap().active_edges = graph.edge_count();
    }

    /// Remove one wait relationship
    pub fn remove_wait_edge(&self, waiter: TransactionId, holder: TransactionId) {
        let mut graph = self.graph.write().unwrap();
        graph.remove_edge(waiter, holder);
        self.statistics.lock().unwrap().active_edges = graph.edge_count();
    }

    /// Purge every edge referencing a transaction (commit or abort)
    pub fn remove_transaction(&self, tid: TransactionId) {
        let mut graph = self.graph.write().unwrap();
        graph.remove_transaction(tid);
        self.statistics.lock().unwrap().active_edges = graph.edge_count();
    }

    /// Repoint edges after a lock hand-off
    pub fn resource_transferred(&self, resource: ResourceId, new_holder: TransactionId) {
        let mut graph = self.graph.write().unwrap();
        graph.retarget_resource(resource, new_holder);
        self.statistics.lock().unwrap().active_edges = graph.edge_count();
    }

    /// Whether any edge references a transaction
    pub fn references(&self, tid: TransactionId) -> bool {
        self.graph.read().unwrap().references(tid)
    }

    /// Whether any wait cycle exists right now
    pub fn has_cycle(&self) -> bool {
        self.graph.read().unwrap().has_cycle()
    }

    /// Run cycle detection and choose one victim per cycle (the youngest
    /// transaction, by timestamp). Duplicate victims across overlapping
    /// cycles are reported once.
    pub fn check(
        &self,
        timestamp_of: &dyn Fn(TransactionId) -> Timestamp,
    ) -> Vec<CycleResolution> {
        let cycles = {
            let graph = self.graph.read().unwrap();
            graph.find_cycles()
        };
        if cycles.is_empty() {
            return Vec::new();
        }

        let mut stats = self.statistics.lock().unwrap();
        let mut seen = HashSet::new();
        let mut resolutions = Vec::new();
        for cycle in cycles {
            stats.cycles_detected += 1;
            let victim = cycle.youngest_by(timestamp_of);
            if seen.insert(victim) {
                stats.victims_chosen += 1;
                resolutions.push(CycleResolution { cycle, victim });
            }
        }
        resolutions
    }

    /// Read-only copy of the graph for the renderer
    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph.read().unwrap().snapshot()
    }

    /// Current detection statistics
    pub fn statistics(&self) -> DeadlockStatistics {
        self.statistics.lock().unwrap().clone()
    }
}

impl Default for DeadlockDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(waiter: TransactionId, holder: TransactionId, resource: u32) -> WaitForEdge {
        WaitForEdge {
            waiter,
            holder,
            resource: ResourceId(resource),
        }
    }

    #[test]
    fn test_graph_basic_operations() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge(1, 2, 0));
        graph.add_edge(edge(2, 3, 1));
        assert_eq!(graph.edge_count(), 2);
        assert!(!graph.is_empty());

        graph.remove_edge(1, 2);
        assert_eq!(graph.edge_count(), 1);

        graph.remove_transaction(2);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_remove_transaction_purges_both_directions() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge(1, 2, 0));
        graph.add_edge(edge(3, 1, 1));
        graph.remove_transaction(1);
        assert!(graph.is_empty());
        assert!(!graph.references(1));
    }

    #[test]
    fn test_no_cycle_in_wait_chain() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge(1, 2, 0));
        graph.add_edge(edge(2, 3, 1));
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_simple_cycle_detection() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge(1, 2, 0));
        graph.add_edge(edge(2, 3, 1));
        graph.add_edge(edge(3, 1, 2));

        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        let cycle = &cycles[0];
        assert_eq!(cycle.transactions.len(), 3);
        assert!(cycle.contains(1) && cycle.contains(2) && cycle.contains(3));
        assert_eq!(
            cycle.resources,
            vec![ResourceId(0), ResourceId(1), ResourceId(2)]
        );
    }

    #[test]
    fn test_two_disjoint_cycles() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge(1, 2, 0));
        graph.add_edge(edge(2, 1, 1));
        graph.add_edge(edge(3, 4, 2));
        graph.add_edge(edge(4, 5, 3));
        graph.add_edge(edge(5, 3, 4));

        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 2);
    }

    #[test]
    fn test_retarget_resource_on_hand_off() {
        // T2 and T3 wait on R0 held by T1; the lock transfers to T2.
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge(2, 1, 0));
        graph.add_edge(edge(3, 1, 0));

        graph.retarget_resource(ResourceId(0), 2);

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.edges, vec![edge(3, 2, 0)]);

        // Running the other side of the hand-off again changes nothing
        graph.retarget_resource(ResourceId(0), 2);
        assert_eq!(graph.snapshot().edges, vec![edge(3, 2, 0)]);
    }

    #[test]
    fn test_victim_is_youngest_by_timestamp() {
        let cycle = DeadlockCycle {
            transactions: vec![1, 2, 3],
            resources: vec![],
        };
        // T2 restarted and carries the largest timestamp
        let timestamp_of = |tid: TransactionId| match tid {
            1 => 10,
            2 => 99,
            _ => 20,
        };
        assert_eq!(cycle.youngest_by(&timestamp_of), 2);
    }

    #[test]
    fn test_detector_resolves_cycle_once() {
        let detector = DeadlockDetector::new();
        detector.add_wait_edge(1, 2, ResourceId(0));
        detector.add_wait_edge(2, 3, ResourceId(1));
        detector.add_wait_edge(3, 1, ResourceId(2));

        let resolutions = detector.check(&|tid| tid);
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].victim, 3);

        let stats = detector.statistics();
        assert_eq!(stats.cycles_detected, 1);
        assert_eq!(stats.victims_chosen, 1);
        assert_eq!(stats.active_edges, 3);
    }

    #[test]
    fn test_detector_check_without_cycle_is_empty() {
        let detector = DeadlockDetector::new();
        detector.add_wait_edge(1, 2, ResourceId(0));
        assert!(detector.check(&|tid| tid).is_empty());
        assert!(!detector.has_cycle());
    }

    #[test]
    fn test_snapshot_is_sorted_and_complete() {
        let detector = DeadlockDetector::new();
        detector.add_wait_edge(3, 1, ResourceId(0));
        detector.add_wait_edge(2, 1, ResourceId(1));

        let snapshot = detector.snapshot();
        assert_eq!(snapshot.nodes, vec![1, 2, 3]);
        assert_eq!(snapshot.edges, vec![edge(2, 1, 1), edge(3, 1, 0)]);
    }
}
