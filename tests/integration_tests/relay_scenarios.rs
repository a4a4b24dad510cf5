// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end relay scenarios, each driving a real `Pair` over real loopback
//! sockets rather than mocking the transport.

use std::time::Duration;

use l4proxy::error::TerminationReason;
use l4proxy::relay::Pair;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const BUFFER_CAPACITY: usize = 2048;

async fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let connect = TcpStream::connect(addr);
    let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
    let (accepted, _) = accept_res.expect("accept");
    (accepted, connect_res.expect("connect"))
}

/// Opens a nonblocking connect the same way the real listener does, so S4
/// can exercise the `ConnectFailed` path without a unix-domain test hook
/// into private listener internals.
fn connect_nonblocking(addr: std::net::SocketAddr) -> std::io::Result<TcpStream> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {},
        Err(e) => return Err(e),
    }
    TcpStream::from_std(socket.into())
}

// S1: echo through proxy
#[tokio::test]
async fn s1_echo_through_proxy() {
    let (proxy_client_side, mut test_client) = loopback_pair().await;
    let (proxy_remote_side, mut test_remote) = loopback_pair().await;

    let pair = Pair::new(proxy_client_side, proxy_remote_side, BUFFER_CAPACITY);
    let handle = tokio::spawn(pair.run());

    test_client.write_all(b"ping").await.expect("write");
    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(5), test_remote.read_exact(&mut buf))
        .await
        .expect("no timeout")
        .expect("read");
    assert_eq!(&buf, b"ping");

    test_remote.write_all(b"pong").await.expect("write");
    let mut buf2 = [0u8; 4];
    timeout(Duration::from_secs(5), test_client.read_exact(&mut buf2))
        .await
        .expect("no timeout")
        .expect("read");
    assert_eq!(&buf2, b"pong");

    drop(test_client);
    drop(test_remote);
    let reason = timeout(Duration::from_secs(5), handle).await.expect("no timeout").expect("join");
    assert!(matches!(reason, TerminationReason::BothClosed));
}

// S2: large unidirectional transfer, larger than the ring capacity, so the
// relay must cycle through many fill/drain rounds.
#[tokio::test]
async fn s2_large_unidirectional_transfer() {
    let (proxy_client_side, mut test_client) = loopback_pair().await;
    let (proxy_remote_side, mut test_remote) = loopback_pair().await;

    let pair = Pair::new(proxy_client_side, proxy_remote_side, BUFFER_CAPACITY);
    let handle = tokio::spawn(pair.run());

    let payload: Vec<u8> = (0..(BUFFER_CAPACITY * 50)).map(|i| (i % 256) as u8).collect();
    let payload_len = payload.len();

    let sender = {
        let payload = payload.clone();
        tokio::spawn(async move {
            test_client.write_all(&payload).await.expect("write");
            test_client.shutdown().await.expect("shutdown");
            test_client
        })
    };

    let mut received = vec![0u8; payload_len];
    timeout(Duration::from_secs(10), test_remote.read_exact(&mut received))
        .await
        .expect("no timeout")
        .expect("read");
    assert_eq!(received, payload);

    let _test_client = sender.await.expect("sender task");
    drop(test_remote);

    let reason = timeout(Duration::from_secs(5), handle).await.expect("no timeout").expect("join");
    assert!(matches!(reason, TerminationReason::BothClosed));
}

// S3: a slow consumer applies backpressure — the relay must not drop or
// reorder bytes even when the destination only drains a little at a time.
#[tokio::test]
async fn s3_slow_consumer_backpressure() {
    let (proxy_client_side, mut test_client) = loopback_pair().await;
    let (proxy_remote_side, mut test_remote) = loopback_pair().await;

    let pair = Pair::new(proxy_client_side, proxy_remote_side, 64);
    let handle = tokio::spawn(pair.run());

    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
    let payload_len = payload.len();
    let sender = {
        let payload = payload.clone();
        tokio::spawn(async move {
            test_client.write_all(&payload).await.expect("write");
            test_client.shutdown().await.expect("shutdown");
        })
    };

    let mut received = Vec::with_capacity(payload_len);
    let mut chunk = [0u8; 8];
    loop {
        let n = timeout(Duration::from_secs(10), test_remote.read(&mut chunk))
            .await
            .expect("no timeout")
            .expect("read");
        if n == 0 {
            break;
        }
        received.extend_from_slice(&chunk[..n]);
        // Simulate a slow reader between reads.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(received, payload);
    sender.await.expect("sender task");
    drop(test_remote);

    let reason = timeout(Duration::from_secs(5), handle).await.expect("no timeout").expect("join");
    assert!(matches!(reason, TerminationReason::BothClosed));
}

// S4: the remote refuses the connection outright.
#[tokio::test]
async fn s4_remote_connect_refused() {
    // Bind then immediately drop to get a port nothing is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    drop(listener);

    let (proxy_client_side, test_client) = loopback_pair().await;
    let remote = connect_nonblocking(addr).expect("nonblocking connect starts");

    let pair = Pair::new(proxy_client_side, remote, BUFFER_CAPACITY);
    let reason = timeout(Duration::from_secs(5), pair.run()).await.expect("no timeout");
    assert!(matches!(reason, TerminationReason::ConnectFailed(_)));

    drop(test_client);
}

// S5: the remote closes its write half in an orderly way while data is
// still queued toward the client; the client must still receive it all.
#[tokio::test]
async fn s5_remote_orderly_close_with_pending_data() {
    let (proxy_client_side, test_client) = loopback_pair().await;
    let (proxy_remote_side, mut test_remote) = loopback_pair().await;

    let pair = Pair::new(proxy_client_side, proxy_remote_side, BUFFER_CAPACITY);
    let handle = tokio::spawn(pair.run());

    test_remote.write_all(b"final words").await.expect("write");
    test_remote.shutdown().await.expect("shutdown");

    let mut test_client = test_client;
    let mut received = Vec::new();
    timeout(Duration::from_secs(5), test_client.read_to_end(&mut received))
        .await
        .expect("no timeout")
        .expect("read to eof");
    assert_eq!(received, b"final words");

    drop(test_client);
    let reason = timeout(Duration::from_secs(5), handle).await.expect("no timeout").expect("join");
    assert!(matches!(reason, TerminationReason::BothClosed));
}

// S6: both sides close at roughly the same time.
#[tokio::test]
async fn s6_simultaneous_close() {
    let (proxy_client_side, test_client) = loopback_pair().await;
    let (proxy_remote_side, test_remote) = loopback_pair().await;

    let pair = Pair::new(proxy_client_side, proxy_remote_side, BUFFER_CAPACITY);
    let handle = tokio::spawn(pair.run());

    let mut test_client = test_client;
    let mut test_remote = test_remote;
    tokio::join!(
        async { test_client.shutdown().await.expect("client shutdown") },
        async { test_remote.shutdown().await.expect("remote shutdown") },
    );
    drop(test_client);
    drop(test_remote);

    let reason = timeout(Duration::from_secs(5), handle).await.expect("no timeout").expect("join");
    assert!(matches!(
        reason,
        TerminationReason::BothClosed
            | TerminationReason::ClientClosedAndDrained
            | TerminationReason::RemoteClosedAndDrained
    ));
}
