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

//! Wait-For Graph Renderer
//!
//! Background observer that periodically polls a read-only snapshot of the
//! wait-for graph and logs it, in DOT form, through `tracing`. Never
//! mutates the graph.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::wait_for_graph::{DeadlockDetector, GraphSnapshot};

/// Render a snapshot as a DOT digraph, edges labelled with the contested
/// resource
pub fn render_dot(snapshot: &GraphSnapshot) -> String {
    let mut out = String::from("digraph wait_for {\n");
    for node in &snapshot.nodes {
        let _ = writeln!(out, "    T{node};");
    }
    for edge in &snapshot.edges {
        let _ = writeln!(
            out,
            "    T{} -> T{} [label=\"{}\"];",
            edge.waiter, edge.holder, edge.resource
        );
    }
    out.push_str("}\n");
    out
}

/// Periodic renderer over the detector's snapshot
pub struct GraphRenderer {
    detector: Arc<DeadlockDetector>,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GraphRenderer {
    /// Create a renderer polling at the given interval
    pub fn new(detector: Arc<DeadlockDetector>, interval: Duration) -> Self {
        Self {
            detector,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Start the background rendering thread. Does nothing if already
    /// running.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let detector = Arc::clone(&self.detector);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        self.handle = Some(thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                let snapshot = detector.snapshot();
                if !snapshot.edges.is_empty() {
                    debug!("wait-for graph:\n{}", render_dot(&snapshot));
                    if detector.has_cycle() {
                        warn!("wait-for graph currently contains a cycle");
                    }
                }
                thread::sleep(interval);
            }
        }));
    }

    /// Stop the rendering thread and wait for it to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Check if the renderer is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for GraphRenderer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::lib::ResourceId;

    #[test]
    fn test_render_dot_lists_nodes_and_edges() {
        let detector = DeadlockDetector::new();
        detector.add_wait_edge(1, 2, ResourceId(0));

        let dot = render_dot(&detector.snapshot());
        assert!(dot.starts_with("digraph wait_for {"));
        assert!(dot.contains("    T1;"));
        assert!(dot.contains("    T2;"));
        assert!(dot.contains("T1 -> T2 [label=\"R0\"];"));
    }

    #[test]
    fn test_render_dot_empty_graph() {
        let dot = render_dot(&GraphSnapshot::default());
        assert_eq!(dot, "digraph wait_for {\n}\n");
    }

    #[test]
    fn test_renderer_start_stop() {
        let detector = Arc::new(DeadlockDetector::new());
        let mut renderer = GraphRenderer::new(detector, Duration::from_millis(5));
        assert!(!renderer.is_running());
        renderer.start();
        assert!(renderer.is_running());
        renderer.start(); // second start is a no-op
        renderer.stop();
        assert!(!renderer.is_running());
    }
}
