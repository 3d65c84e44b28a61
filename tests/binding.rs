//! Bind-side integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use hyper::Response;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use conn_coordinator::failure::TimedOutRequest;
use conn_coordinator::{BindRequest, ConnectRequest, Failure, RemoteAddress, ServerOverride, SetupError};

mod common;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn bound_socket_delivers_requests_and_writes_responses() {
    let coordinator = common::start_coordinator();
    let mut binding = coordinator.bind(BindRequest::new(loopback())).await.unwrap();
    let addr = binding.local_addr();
    assert_ne!(addr.port(), 0);
    let mut incoming = binding.incoming().unwrap();

    let client = tokio::spawn(async move {
        common::raw_exchange(
            addr,
            b"POST /submit HTTP/1.1\r\nHost: test\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await
    });

    let mut connection = incoming.recv().await.unwrap();
    assert_eq!(connection.local_addr(), addr);

    let request = connection.requests().recv().await.unwrap().unwrap();
    assert_eq!(request.message.method(), "POST");
    assert_eq!(request.message.uri(), "/submit");
    assert_eq!(&request.message.body()[..], b"hello");
    assert_eq!(connection.responses().outstanding(), 1);

    connection
        .responses()
        .send(request.token, Response::new(Bytes::from_static(b"accepted")))
        .unwrap();

    assert_eq!(client.await.unwrap(), (200, "accepted".to_string()));
}

#[tokio::test]
async fn coordinator_talks_to_its_own_binding() {
    let coordinator = common::start_coordinator();
    let mut binding = coordinator.bind(BindRequest::new(loopback())).await.unwrap();
    let mut incoming = binding.incoming().unwrap();

    let server = tokio::spawn(async move {
        let (mut requests, responses) = incoming.recv().await.unwrap().split();
        while let Some(Ok(request)) = requests.recv().await {
            let body = Bytes::from(format!("echo {}", request.message.uri()));
            responses.send(request.token, Response::new(body)).unwrap();
        }
    });

    let mut connection = coordinator
        .connect(ConnectRequest::new(RemoteAddress::from(binding.local_addr())))
        .await
        .unwrap();
    for path in ["/one", "/two"] {
        connection.requests().send(common::get(path)).await.unwrap();
    }
    for expected in ["echo /one", "echo /two"] {
        let response = connection.responses().recv().await.unwrap().unwrap();
        assert_eq!(&response.message.body()[..], expected.as_bytes());
    }

    drop(connection);
    server.await.unwrap();
}

#[tokio::test]
async fn occupied_port_fails_to_bind() {
    let coordinator = common::start_coordinator();
    let first = coordinator.bind(BindRequest::new(loopback())).await.unwrap();

    let second = coordinator
        .bind(BindRequest::new(first.local_addr()))
        .await;
    assert!(matches!(
        second,
        Err(SetupError::Failure(Failure::BindFailed))
    ));
    assert!(!first.is_released());
}

#[tokio::test]
async fn unusable_override_fails_the_bind() {
    let coordinator = common::start_coordinator();

    for settings in [
        ServerOverride::default().max_connections(usize::MAX),
        ServerOverride::default().accept_buffer(0),
        ServerOverride::default().request_timeout_ms(0),
    ] {
        let request = BindRequest::new(loopback()).settings(settings);
        assert!(matches!(
            coordinator.bind(request).await,
            Err(SetupError::Failure(Failure::BindFailed))
        ));
    }
    assert!(!coordinator.is_stopped());
}

#[tokio::test]
async fn release_is_idempotent_and_ends_the_stream() {
    let coordinator = common::start_coordinator();
    let mut binding = coordinator
        .bind(BindRequest::new(loopback()).backlog(8))
        .await
        .unwrap();
    let addr = binding.local_addr();
    let mut incoming = binding.incoming().unwrap();
    assert!(binding.incoming().is_none());

    binding.release().await;
    binding.release().await;
    assert!(binding.is_released());

    assert!(incoming.recv().await.is_none());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn dropping_the_binding_releases_it() {
    let coordinator = common::start_coordinator();
    let binding = coordinator.bind(BindRequest::new(loopback())).await.unwrap();
    let addr = binding.local_addr();
    let release = binding.release_handle();

    drop(binding);
    release.release().await;
    assert!(release.is_released());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn release_closes_connections_nobody_pulled() {
    let coordinator = common::start_coordinator();
    let mut binding = coordinator.bind(BindRequest::new(loopback())).await.unwrap();
    let addr = binding.local_addr();
    let incoming = binding.incoming().unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    assert!(common::wait_until(Duration::from_secs(2), || coordinator.active_connections() == 1).await);

    binding.release().await;

    // The stream is still held, but the buffered connection is gone.
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), peer.read(&mut buf)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))), "peer still connected: {read:?}");
    assert!(common::wait_until(Duration::from_secs(2), || coordinator.active_connections() == 0).await);
    drop(incoming);
}

#[tokio::test]
async fn dropping_the_stream_marks_the_binding_released() {
    let coordinator = common::start_coordinator();
    let mut binding = coordinator.bind(BindRequest::new(loopback())).await.unwrap();
    let addr = binding.local_addr();

    drop(binding.incoming().unwrap());
    assert!(common::wait_until(Duration::from_secs(2), || binding.is_released()).await);
    binding.release().await;
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn dropping_the_request_source_lets_the_pending_response_through() {
    let coordinator = common::start_coordinator();
    let mut binding = coordinator.bind(BindRequest::new(loopback())).await.unwrap();
    let addr = binding.local_addr();
    let mut incoming = binding.incoming().unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.write_all(b"GET /inflight HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();

    let (mut requests, responses) = incoming.recv().await.unwrap().split();
    let request = requests.recv().await.unwrap().unwrap();
    drop(requests);

    responses
        .send(request.token, Response::new(Bytes::from_static(b"done")))
        .unwrap();
    assert_eq!(common::read_response(&mut peer).await, (200, "done".to_string()));

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), peer.read(&mut buf)).await;
    assert!(matches!(read, Ok(Ok(0))), "connection left open: {read:?}");
}

#[tokio::test]
async fn oversized_body_is_rejected_before_delivery() {
    let coordinator = common::start_coordinator();
    let request = BindRequest::new(loopback())
        .settings(ServerOverride::default().max_request_body_bytes(16));
    let mut binding = coordinator.bind(request).await.unwrap();
    let addr = binding.local_addr();
    let mut incoming = binding.incoming().unwrap();

    let body = "x".repeat(64);
    let raw = format!("POST /big HTTP/1.1\r\nHost: test\r\nContent-Length: 64\r\n\r\n{body}");
    let (status, _) = common::raw_exchange(addr, raw.as_bytes()).await;
    assert_eq!(status, 413);

    let mut connection = incoming.recv().await.unwrap();
    assert_eq!(connection.requests().pending(), 0);
}

#[tokio::test]
async fn unanswered_request_gets_503_and_late_response_is_refused() {
    let coordinator = common::start_coordinator();
    let request =
        BindRequest::new(loopback()).settings(ServerOverride::default().request_timeout_ms(200));
    let mut binding = coordinator.bind(request).await.unwrap();
    let addr = binding.local_addr();
    let mut incoming = binding.incoming().unwrap();

    let client = tokio::spawn(async move {
        common::raw_exchange(addr, b"GET /wait HTTP/1.1\r\nHost: test\r\n\r\n").await
    });

    let mut connection = incoming.recv().await.unwrap();
    let request = connection.requests().recv().await.unwrap().unwrap();

    let (status, _) = client.await.unwrap();
    assert_eq!(status, 503);

    let late = connection
        .responses()
        .send(request.token, Response::new(Bytes::from_static(b"too late")));
    match late {
        Err(Failure::RequestTimeout { request: timed_out, .. }) => match *timed_out {
            TimedOutRequest::Http(descriptor) => {
                assert_eq!(descriptor.token, request.token);
                assert_eq!(descriptor.uri, "/wait");
            }
            other => panic!("unexpected request: {other:?}"),
        },
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_limit_defers_accepts() {
    let coordinator = common::start_coordinator();
    let request =
        BindRequest::new(loopback()).settings(ServerOverride::default().max_connections(1));
    let mut binding = coordinator.bind(request).await.unwrap();
    let addr = binding.local_addr();
    let mut incoming = binding.incoming().unwrap();

    let first_peer = TcpStream::connect(addr).await.unwrap();
    let _second_peer = TcpStream::connect(addr).await.unwrap();

    let first = incoming.recv().await.unwrap();
    let waiting = tokio::time::timeout(Duration::from_millis(200), incoming.recv()).await;
    assert!(waiting.is_err(), "second peer accepted beyond the limit");

    drop(first_peer);
    drop(first);
    let second = tokio::time::timeout(Duration::from_secs(2), incoming.recv()).await;
    assert!(matches!(second, Ok(Some(_))));
}
