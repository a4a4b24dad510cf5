// SPDX-License-Identifier: GPL-3.0-or-later

//! Typed error and outcome kinds for the proxy core (spec §7).
//!
//! The core never lets an error escape a callback boundary: every I/O
//! outcome reduces to either "stay in the current state" or "destroy this
//! Pair" (`TerminationReason`). `LookupError` and `RegistryError` are the
//! two places an operation can fail and actually report that failure to a
//! caller, since lookup and registration happen before a `Pair` exists.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Failure modes of [`crate::lookup::OrigDestLookup::resolve`].
#[derive(Debug, Error)]
pub enum LookupError {
    /// The socket was not produced by a redirection rule, so no
    /// pre-redirection destination is recorded for it.
    #[error("socket has no recorded original destination")]
    NoOriginalDestination,

    /// The lookup mechanism itself is unsupported on this host.
    #[error("original-destination lookup is unsupported on this host")]
    Unsupported,

    /// Any other I/O-level failure while querying the lookup mechanism.
    #[error("original-destination lookup failed: {0}")]
    Io(#[from] io::Error),
}

/// Failure modes of the single-slot [`crate::lookup::LookupRegistry`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A backend is already registered; the registry accepts exactly one.
    #[error("a lookup backend is already registered")]
    AlreadyRegistered,

    /// `switchto(name)` was called with a name that does not match the
    /// single registered backend.
    #[error("no registered lookup backend named {0:?}")]
    NameMismatch(String),
}

/// Why a given [`crate::relay::pair::Pair`] was destroyed — one variant per
/// termination rule of spec §4.3, plus the error kinds of §7 that force an
/// immediate destroy. Carried for logging and for integration tests to
/// assert on; never propagated as a `Result` error since reaching this point
/// always means the Pair's lifecycle ended, successfully or not.
#[derive(Debug)]
pub enum TerminationReason {
    /// Termination rule 1: both endpoints are fully closed (both halves).
    BothClosed,
    /// Termination rule 2: client fully closed and `c2r` is empty.
    ClientClosedAndDrained,
    /// Termination rule 3: remote fully closed and `r2c` is empty.
    RemoteClosedAndDrained,
    /// The nonblocking `connect()` toward the original destination
    /// completed with a nonzero socket error (§7 `ConnectFailure`).
    ConnectFailed(io::Error),
    /// Ring allocation failed right after the remote connected (§7
    /// `AllocFailure`). Unreachable in practice on a host with any free
    /// memory at all, but modeled explicitly per spec.
    AllocFailure,
    /// Any I/O error other than a transient one or an orderly half-close
    /// (§7 `FatalIo`).
    FatalIo { direction: &'static str, source: io::Error },
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::BothClosed => write!(f, "both endpoints fully closed"),
            TerminationReason::ClientClosedAndDrained => {
                write!(f, "client closed and c2r drained")
            },
            TerminationReason::RemoteClosedAndDrained => {
                write!(f, "remote closed and r2c drained")
            },
            TerminationReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            TerminationReason::AllocFailure => write!(f, "ring allocation failed"),
            TerminationReason::FatalIo { direction, source } => {
                write!(f, "fatal I/O on {direction}: {source}")
            },
        }
    }
}

/// Reported to the listener when a connect attempt cannot even begin a
/// `Pair`: the remote socket's immediate `connect()` error was not
/// "in progress" (§6).
#[derive(Debug, Error)]
#[error("immediate connect failure toward {addr}: {source}")]
pub struct ImmediateConnectError {
    pub addr: SocketAddr,
    #[source]
    pub source: io::Error,
}
