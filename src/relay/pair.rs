// SPDX-License-Identifier: GPL-3.0-or-later

//! The core relay engine: one `Pair` per accepted connection, running a
//! single-threaded, readiness-driven event loop that copies bytes in both
//! directions through two bounded rings until one of spec §4.3's
//! termination rules fires.
//!
//! This is the idiomatic-Tokio reading of the original `proxy.c`'s
//! `libev`-based state machine: `ev_io_start`/`ev_io_stop` become
//! conditional `tokio::select!` branches (`TcpStream::readable`/`writable`
//! gated `, if <interest bit is set>`), and `state_transist()` becomes the
//! pure [`crate::relay::sched::compute_interests`] recomputed every
//! iteration.

use std::io;

use socket2::SockRef;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::error::TerminationReason;
use crate::ring::RingBuffer;

use super::endpoint::{Direction, Endpoint};
use super::sched::{check_termination, compute_interests, Interests, RingView};

/// One full-duplex relay between an already-accepted client socket and a
/// remote socket whose `connect()` may still be in progress.
pub struct Pair {
    client: Endpoint,
    remote: Endpoint,
    c2r: RingBuffer,
    r2c: RingBuffer,
    remote_established: bool,
    buffer_capacity: usize,
}

impl Pair {
    /// Builds a Pair around an accepted `client` socket and a `remote`
    /// socket whose nonblocking `connect()` returned `EINPROGRESS` (or one
    /// already connected, for tests). No ring storage is allocated yet: it
    /// is allocated lazily in [`Pair::run`] once the connect attempt is
    /// confirmed to have succeeded, per spec §7's `AllocFailure` rule.
    pub fn new(client: TcpStream, remote: TcpStream, buffer_capacity: usize) -> Self {
        Self {
            client: Endpoint::new(client),
            remote: Endpoint::new(remote),
            c2r: RingBuffer::new(0),
            r2c: RingBuffer::new(0),
            remote_established: false,
            buffer_capacity,
        }
    }

    /// Constructs a Pair that skips the connect-probe phase entirely,
    /// because `remote` is already a connected socket. Used by integration
    /// tests that set up both ends with a plain loopback `TcpStream::connect`
    /// rather than the listener's raw nonblocking-connect path.
    #[cfg(test)]
    pub fn new_established(client: TcpStream, remote: TcpStream, buffer_capacity: usize) -> Self {
        let mut pair = Self::new(client, remote, buffer_capacity);
        pair.c2r = RingBuffer::new(buffer_capacity);
        pair.r2c = RingBuffer::new(buffer_capacity);
        pair.remote_established = true;
        pair
    }

    /// Runs the event loop to completion, returning why the Pair ended.
    pub async fn run(mut self) -> TerminationReason {
        loop {
            if let Some(reason) = check_termination(
                self.client.half(),
                self.remote.half(),
                self.c2r.amount(),
                self.r2c.amount(),
            ) {
                debug!(reason = %reason, "pair terminating");
                return reason;
            }

            let interests = compute_interests(
                self.remote_established,
                self.client.half(),
                self.remote.half(),
                RingView { amount: self.c2r.amount(), free: self.c2r.capacity_free() },
                RingView { amount: self.r2c.amount(), free: self.r2c.capacity_free() },
            );

            // Every quiescent state with no live peer should already have
            // been caught by check_termination above.
            debug_assert!(!interests.is_empty());

            tokio::select! {
                biased;

                res = self.remote.writable(), if !self.remote_established => {
                    match res {
                        Ok(()) => {
                            if let Err(e) = self.probe_connect() {
                                return TerminationReason::ConnectFailed(e);
                            }
                            if let Err(()) = self.allocate_rings() {
                                return TerminationReason::AllocFailure;
                            }
                            self.remote_established = true;
                            trace!("remote connect established");
                        },
                        Err(e) => return TerminationReason::ConnectFailed(e),
                    }
                }

                res = self.client.readable(), if interests.contains(Interests::CLIENT_READ) => {
                    if let Err(e) = res {
                        return TerminationReason::FatalIo { direction: "client-read", source: e };
                    }
                    if let Err(reason) = self.do_read(Direction::ToRemote) {
                        return reason;
                    }
                }

                res = self.remote.readable(), if interests.contains(Interests::REMOTE_READ) => {
                    if let Err(e) = res {
                        return TerminationReason::FatalIo { direction: "remote-read", source: e };
                    }
                    if let Err(reason) = self.do_read(Direction::ToClient) {
                        return reason;
                    }
                }

                res = self.client.writable(), if interests.contains(Interests::CLIENT_WRITE) => {
                    if let Err(e) = res {
                        return TerminationReason::FatalIo { direction: "client-write", source: e };
                    }
                    if let Err(reason) = self.do_write(Direction::ToClient) {
                        return reason;
                    }
                }

                res = self.remote.writable(), if interests.contains(Interests::REMOTE_WRITE) && self.remote_established => {
                    if let Err(e) = res {
                        return TerminationReason::FatalIo { direction: "remote-write", source: e };
                    }
                    if let Err(reason) = self.do_write(Direction::ToRemote) {
                        return reason;
                    }
                }
            }
        }
    }

    /// Checks whether the nonblocking connect that is finally writable
    /// actually succeeded, via `SO_ERROR` — `writable()` alone fires for
    /// both success and failure.
    fn probe_connect(&self) -> io::Result<()> {
        let sock_ref = SockRef::from(self.remote.stream());
        match sock_ref.take_error()? {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn allocate_rings(&mut self) -> Result<(), ()> {
        let c2r = RingBuffer::try_new(self.buffer_capacity).map_err(|_| ())?;
        let r2c = RingBuffer::try_new(self.buffer_capacity).map_err(|_| ())?;
        self.c2r = c2r;
        self.r2c = r2c;
        Ok(())
    }

    /// One read: source endpoint -> its destination ring, direct into the
    /// ring's tail region to avoid an intermediate copy.
    fn do_read(&mut self, direction: Direction) -> Result<(), TerminationReason> {
        let (source, ring, label) = match direction {
            Direction::ToRemote => (&self.client, &mut self.c2r, "client-read"),
            Direction::ToClient => (&self.remote, &mut self.r2c, "remote-read"),
        };

        match source.try_read(ring.space_mut()) {
            Ok(0) => {
                let source = match direction {
                    Direction::ToRemote => &mut self.client,
                    Direction::ToClient => &mut self.remote,
                };
                source.mark_read_closed();
                trace!(%direction, "peer read EOF");
                Ok(())
            },
            Ok(n) => {
                ring.push_back(None, n);
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(TerminationReason::FatalIo { direction: label, source: e }),
        }
    }

    /// One write: ring -> its destination endpoint, direct from the ring's
    /// live region. Forwards EOF onward (the "enhanced" half-close) once the
    /// ring drains dry and its upstream source has already closed.
    fn do_write(&mut self, direction: Direction) -> Result<(), TerminationReason> {
        let label = match direction {
            Direction::ToRemote => "remote-write",
            Direction::ToClient => "client-write",
        };
        let ring = match direction {
            Direction::ToRemote => &mut self.c2r,
            Direction::ToClient => &mut self.r2c,
        };
        let dest = match direction {
            Direction::ToRemote => &self.remote,
            Direction::ToClient => &self.client,
        };

        let written = match dest.try_write(ring.data()) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                // §4.3: EPIPE on write is a half-close of the destination's
                // write side, not a fatal error — let the termination rules
                // decide whether the Pair is done.
                let dest_mut = match direction {
                    Direction::ToRemote => &mut self.remote,
                    Direction::ToClient => &mut self.client,
                };
                dest_mut.mark_write_closed();
                trace!(%direction, "peer write half closed (EPIPE)");
                return Ok(());
            },
            Err(e) => return Err(TerminationReason::FatalIo { direction: label, source: e }),
        };
        ring.pop_front(None, written);

        // Forward EOF: this direction's source has closed and there is
        // nothing left queued for it, so shut down the destination's write
        // half rather than waiting for full connection teardown.
        let source_read_open = match direction {
            Direction::ToRemote => self.client.read_open(),
            Direction::ToClient => self.remote.read_open(),
        };
        if !source_read_open && ring.amount() == 0 {
            let dest_mut = match direction {
                Direction::ToRemote => &mut self.remote,
                Direction::ToClient => &mut self.client,
            };
            if let Err(e) = dest_mut.shutdown_write() {
                warn!(direction = label, error = %e, "shutdown(Write) failed while forwarding EOF");
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ToRemote => write!(f, "client->remote"),
            Direction::ToClient => write!(f, "remote->client"),
        }
    }
}
