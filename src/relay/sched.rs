// SPDX-License-Identifier: GPL-3.0-or-later

//! Pure scheduling logic for a [`crate::relay::pair::Pair`] — which of the
//! four (endpoint × direction) reactor interests should be armed right now,
//! and whether the Pair should be destroyed right now.
//!
//! Deliberately free of sockets, rings, or any I/O: everything here operates
//! on plain counters and flags so the Endpoint-state table and termination
//! rules of spec §3/§4.3 can be exercised directly in unit tests, without a
//! real reactor or real connection (Design Note: "makes test harnesses
//! possible without a real reactor").

use bitflags::bitflags;

use crate::error::TerminationReason;

bitflags! {
    /// Which of the four reactor interests should be armed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interests: u8 {
        const CLIENT_READ  = 0b0001;
        const CLIENT_WRITE = 0b0010;
        const REMOTE_READ  = 0b0100;
        const REMOTE_WRITE = 0b1000;
    }
}

/// Per-endpoint half-open bits (spec's `client_up`/`remote_up` building
/// blocks): whether this endpoint's read half and write half are each still
/// open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfState {
    pub read_open: bool,
    pub write_open: bool,
}

impl HalfState {
    pub const fn open() -> Self {
        Self { read_open: true, write_open: true }
    }

    /// Both halves of this endpoint are closed.
    #[inline]
    pub fn is_fully_closed(&self) -> bool {
        !self.read_open && !self.write_open
    }
}

/// Ring occupancy as seen by the scheduler: how much is queued, and how much
/// free capacity remains, for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingView {
    pub amount: usize,
    pub free: usize,
}

/// Computes reactor interests for the current quiescent state.
///
/// `remote_established` is false only during the pre-connect phase (§4.3
/// "Pre-connect (remote only)" row), before the rings even exist; once true,
/// the general "Open, peer open" / half-close rows apply.
#[allow(clippy::too_many_arguments)]
pub fn compute_interests(
    remote_established: bool,
    client: HalfState,
    remote: HalfState,
    c2r: RingView,
    r2c: RingView,
) -> Interests {
    if !remote_established {
        // Only the connect-completion probe is armed; no rings exist yet.
        return Interests::REMOTE_WRITE;
    }

    let mut interests = Interests::empty();

    // Read interest on client fills c2r, drained by remote's write.
    if client.read_open && c2r.free > 0 && remote.write_open {
        interests |= Interests::CLIENT_READ;
    }
    // Write interest on client drains r2c.
    if client.write_open && r2c.amount > 0 {
        interests |= Interests::CLIENT_WRITE;
    }
    // Read interest on remote fills r2c, drained by client's write.
    if remote.read_open && r2c.free > 0 && client.write_open {
        interests |= Interests::REMOTE_READ;
    }
    // Write interest on remote drains c2r.
    if remote.write_open && c2r.amount > 0 {
        interests |= Interests::REMOTE_WRITE;
    }

    interests
}

/// Evaluates the termination rules of spec §4.3 against the current
/// quiescent state. Returns `None` if the Pair should keep running.
///
/// Rule 4 ("an unrecoverable error was observed") is not modeled here: it is
/// an event, not a function of quiescent state, and is applied directly by
/// the caller at the point the error occurs.
pub fn check_termination(
    client: HalfState,
    remote: HalfState,
    c2r_amount: usize,
    r2c_amount: usize,
) -> Option<TerminationReason> {
    let client_up = !client.is_fully_closed();
    let remote_up = !remote.is_fully_closed();

    if !client_up && !remote_up {
        Some(TerminationReason::BothClosed)
    } else if client.is_fully_closed() && c2r_amount == 0 {
        Some(TerminationReason::ClientClosedAndDrained)
    } else if remote.is_fully_closed() && r2c_amount == 0 {
        Some(TerminationReason::RemoteClosedAndDrained)
    } else {
        None
    }
}
