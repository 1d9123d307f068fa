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

//! Delay Source
//!
//! Bounded pseudo-random durations for simulated think time and abort
//! backoff. Pure input to the engine; backoff is pacing for the restart
//! loop, never a correctness mechanism.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Supplier of simulated delays
pub trait DelaySource: Send + Sync {
    /// Think time between resource requests
    fn think_time(&self) -> Duration;
    /// Backoff before restart attempt number `attempt` (1-based)
    fn backoff(&self, attempt: u32) -> Duration;
}

/// Seeded uniform delays, reproducible across runs with the same seed
pub struct RandomDelay {
    min: Duration,
    max: Duration,
    rng: Mutex<SmallRng>,
}

impl RandomDelay {
    /// Create a delay source drawing uniformly from `[min, max]`
    pub fn new(min: Duration, max: Duration, seed: u64) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    fn draw(&self) -> Duration {
        let (lo, hi) = (self.min.as_micros() as u64, self.max.as_micros() as u64);
        let micros = self.rng.lock().unwrap().gen_range(lo..=hi);
        Duration::from_micros(micros)
    }
}

impl DelaySource for RandomDelay {
    fn think_time(&self) -> Duration {
        self.draw()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // Jittered and bounded: scales with the attempt count but is capped
        // so a repeatedly dying transaction keeps getting turns
        self.draw() * attempt.min(5)
    }
}

/// Zero delays, for tests
pub struct NoDelay;

impl DelaySource for NoDelay {
    fn think_time(&self) -> Duration {
        Duration::ZERO
    }

    fn backoff(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}
