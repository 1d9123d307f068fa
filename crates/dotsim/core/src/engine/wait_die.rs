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

//! Wait-Die Conflict Policy
//!
//! Timestamp-ordered deadlock prevention: on a lock conflict an older
//! requester is allowed to wait, a younger requester dies. An older
//! transaction therefore never waits on a younger one, so no wait cycle can
//! form as long as the policy is applied on every conflict.

use crate::engine::lib::Timestamp;

/// Decision produced for a blocked lock requester
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDieDecision {
    /// The requester is older than the holder and may block
    Wait,
    /// The requester is younger (or of equal priority) and must abort
    Abort,
}

/// Decide whether a blocked requester waits or dies.
///
/// Equal timestamps resolve to `Abort`: ties cannot arise while timestamps
/// come from the monotonic registry counter, but if timestamp generation is
/// ever changed the conservative younger branch keeps the policy
/// deterministic.
pub fn decide(requester: Timestamp, holder: Timestamp) -> WaitDieDecision {
    if requester < holder {
        WaitDieDecision::Wait
    } else {
        WaitDieDecision::Abort
    }
}
