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

// Common types and utilities for the engine

use std::fmt;
use std::time::Duration;

/// Transaction identifier type
pub type TransactionId = u64;

/// Logical clock value ordering transactions. A restarted transaction is
/// always assigned a strictly greater timestamp than its prior attempt.
pub type Timestamp = u64;

/// Represents a unique identifier for a lockable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Error types specific to the engine
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A core invariant was broken. This is a bug in the engine, never a
    /// simulated outcome, and must abort the whole simulation.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("transaction {0} is not registered")]
    UnknownTransaction(TransactionId),

    #[error("resource {0} does not exist")]
    UnknownResource(ResourceId),

    /// A transaction hit the configured restart cap without committing.
    /// Surfaced by the driver as a starvation observation, not a crash.
    #[error("transaction {0} exhausted its restart budget")]
    RetriesExhausted(TransactionId),

    #[error("concurrency error: {0}")]
    Concurrency(String),
}

/// Result type for engine operations
pub type SimResult<T> = std::result::Result<T, SimError>;

/// Simulation configuration options
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of transactions to run
    pub transactions: usize,
    /// Number of shared resources
    pub resources: usize,
    /// Restart cap per transaction; `None` means retry forever
    pub max_restarts: Option<u32>,
    /// Lower bound for simulated think time between resource requests
    pub think_min: Duration,
    /// Upper bound for simulated think time
    pub think_max: Duration,
    /// RNG seed for delays, so runs are reproducible
    pub seed: u64,
    /// Interval for the periodic deadlock sweep; `None` disables it
    /// (the synchronous check on every block event still runs)
    pub sweep_interval: Option<Duration>,
    /// Interval for the wait-for graph renderer; `None` disables rendering
    pub render_interval: Option<Duration>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            transactions: 10,
            resources: 2,
            max_restarts: Some(64),
            think_min: Duration::from_millis(1),
            think_max: Duration::from_millis(10),
            seed: 0,
            sweep_interval: None,
            render_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_display() {
        assert_eq!(ResourceId(3).to_string(), "R3");
    }

    #[test]
    fn test_default_config_is_bounded() {
        let config = SimConfig::default();
        assert!(config.max_restarts.is_some());
        assert!(config.think_min <= config.think_max);
    }
}
