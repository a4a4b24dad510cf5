// SPDX-License-Identifier: GPL-3.0-or-later

//! One side of a [`crate::relay::pair::Pair`] — the client socket or the
//! remote socket, each tracked independently per spec §3's Endpoint state.

use std::io;

use tokio::net::TcpStream;

use crate::relay::sched::HalfState;

/// Tags which endpoint a given byte flow is headed towards, used instead of
/// back-pointers between the two `Endpoint`s so each can be borrowed
/// independently inside `Pair::run`'s `select!` arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client -> remote
    ToRemote,
    /// remote -> client
    ToClient,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Direction::ToRemote => Direction::ToClient,
            Direction::ToClient => Direction::ToRemote,
        }
    }
}

/// One half-duplex-capable TCP socket plus the open/closed bookkeeping the
/// scheduler needs. The `remote` endpoint additionally starts with
/// `half.write_open == true` but `half.read_open` meaningless until
/// `connected` flips true (see [`Endpoint::mark_connected`]).
#[derive(Debug)]
pub struct Endpoint {
    stream: TcpStream,
    half: HalfState,
    /// Whether `shutdown(Write)` has already been issued on this socket —
    /// guards against calling it twice, which is harmless but pointless.
    write_shutdown_sent: bool,
}

impl Endpoint {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            half: HalfState::open(),
            write_shutdown_sent: false,
        }
    }

    #[inline]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    #[inline]
    pub fn half(&self) -> HalfState {
        self.half
    }

    #[inline]
    pub fn read_open(&self) -> bool {
        self.half.read_open
    }

    #[inline]
    pub fn write_open(&self) -> bool {
        self.half.write_open
    }

    /// Records that a `read(2)` returned EOF: no more bytes will ever arrive
    /// from this endpoint.
    pub fn mark_read_closed(&mut self) {
        self.half.read_open = false;
    }

    /// Records that this endpoint's write half is gone, either because we
    /// issued `shutdown(Write)` ourselves (the "enhanced" half-close
    /// forwarding the peer's EOF onward) or because a write failed with a
    /// broken-pipe-class error.
    pub fn mark_write_closed(&mut self) {
        self.half.write_open = false;
    }

    /// Forwards EOF onward: shuts down the write half without touching the
    /// read half, so any bytes already queued toward this endpoint still
    /// drain normally, and any bytes still arriving from this endpoint (if
    /// `read_open`) are still read. Idempotent.
    pub fn shutdown_write(&mut self) -> io::Result<()> {
        if self.write_shutdown_sent {
            return Ok(());
        }
        self.stream.shutdown(std::net::Shutdown::Write)?;
        self.write_shutdown_sent = true;
        self.mark_write_closed();
        Ok(())
    }

    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    pub fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    pub async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }

    pub async fn writable(&self) -> io::Result<()> {
        self.stream.writable().await
    }
}
