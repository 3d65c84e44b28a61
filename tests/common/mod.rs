//! Shared utilities for integration testing: raw-TCP mock peers and helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::Request;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use conn_coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle, TcpTransport};

/// Coordinator over plain TCP with default settings.
pub fn start_coordinator() -> CoordinatorHandle {
    Coordinator::new(Arc::new(CoordinatorConfig::default()), TcpTransport).spawn()
}

pub fn get(path: &str) -> Request<Bytes> {
    Request::get(path).body(Bytes::new()).unwrap()
}

/// Read one request or response head, leaving any surplus in `buf`.
///
/// Returns `None` once the peer closes.
pub async fn read_head(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<String> {
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            buf.drain(..end + 4);
            return Some(head);
        }
        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Start a keep-alive peer that answers every request with its own path.
///
/// Returns the address and the count of requests answered so far.
pub async fn start_path_echo_peer() -> (SocketAddr, Arc<AtomicUsize>) {
    echo_peer(None).await
}

/// Like [`start_path_echo_peer`], but requests for `slow_path` are answered
/// only after `delay`.
pub async fn start_slow_echo_peer(
    slow_path: &'static str,
    delay: Duration,
) -> (SocketAddr, Arc<AtomicUsize>) {
    echo_peer(Some((slow_path, delay))).await
}

async fn echo_peer(slow: Option<(&'static str, Duration)>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = Arc::new(AtomicUsize::new(0));

    let counter = served.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                while let Some(head) = read_head(&mut socket, &mut buf).await {
                    let path = head
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    if let Some((slow_path, delay)) = slow {
                        if path == slow_path {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                        path.len(),
                        path
                    );
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        break;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    (addr, served)
}

/// Start a peer that reads requests and never answers.
pub async fn start_silent_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                while read_head(&mut socket, &mut buf).await.is_some() {}
            });
        }
    });

    addr
}

/// Start a peer that drops each connection after reading the first request.
pub async fn start_hangup_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = read_head(&mut socket, &mut buf).await;
                drop(socket);
            });
        }
    });

    addr
}

/// Write `request` verbatim and read back one response as (status, body).
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_response(&mut stream).await
}

pub async fn read_response(stream: &mut TcpStream) -> (u16, String) {
    let mut buf = Vec::new();
    let head = read_head(stream, &mut buf).await.expect("no response head");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("malformed status line");

    let length = content_length(&head);
    while buf.len() < length {
        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    buf.truncate(length);
    (status, String::from_utf8_lossy(&buf).into_owned())
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
