// SPDX-License-Identifier: GPL-3.0-or-later

//! The accept loop: binds the listen address, and for every accepted
//! connection resolves its original destination, opens a nonblocking
//! connect toward it, and spawns a [`crate::relay::Pair`] to run the relay.

use std::{io, net::SocketAddr, sync::Arc};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ImmediateConnectError;
use crate::lookup::OrigDestLookup;
use crate::relay::Pair;

/// Runs the accept loop until `shutdown` is cancelled.
///
/// Each accepted connection is handled on its own spawned task so a slow or
/// stuck relay never blocks new connections from being accepted.
pub async fn serve(
    listen_addr: SocketAddr,
    lookup: Arc<dyn OrigDestLookup>,
    buffer_capacity: usize,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("accept loop shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (client, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let lookup = Arc::clone(&lookup);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(client, peer, lookup, buffer_capacity).await {
                        warn!(peer = %peer, error = %e, "connection setup failed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    client: TcpStream,
    peer: SocketAddr,
    lookup: Arc<dyn OrigDestLookup>,
    buffer_capacity: usize,
) -> Result<(), ImmediateConnectError> {
    let original_dst = match lookup.resolve(&client) {
        Ok(addr) => addr,
        Err(e) => {
            warn!(peer = %peer, error = %e, "original-destination lookup failed");
            return Ok(());
        },
    };

    let remote = match connect_nonblocking(original_dst) {
        Ok(stream) => stream,
        Err(source) => {
            return Err(ImmediateConnectError { addr: original_dst, source });
        },
    };

    info!(peer = %peer, dest = %original_dst, "relaying");
    let pair = Pair::new(client, remote, buffer_capacity);
    let reason = pair.run().await;
    info!(peer = %peer, dest = %original_dst, reason = %reason, "connection closed");
    Ok(())
}

/// Opens a nonblocking `connect()` toward `addr` and hands the in-progress
/// socket to Tokio, without waiting for the handshake to complete here: the
/// `Pair` event loop owns the connect-completion probe (§7's design note on
/// keeping connect-in-progress visible to the scheduler, rather than using
/// `tokio::net::TcpStream::connect`'s fully-async-to-completion behavior).
fn connect_nonblocking(addr: SocketAddr) -> io::Result<TcpStream> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;

    match socket.connect(&addr.into()) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
        // EINPROGRESS surfaces as WouldBlock on most platforms via the
        // socket2/io crate mapping; some platforms report it directly.
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {},
        Err(e) => return Err(e),
    }

    TcpStream::from_std(socket.into())
}
