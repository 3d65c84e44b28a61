//! Failure injection through substitute transports.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use conn_coordinator::endpoint::SocketOptions;
use conn_coordinator::failure::TimedOutRequest;
use conn_coordinator::net::{Connected, TcpAcceptor, Transport};
use conn_coordinator::{
    BindRequest, ClientOverride, ConnectRequest, Coordinator, CoordinatorConfig, Failure, Fault,
    RemoteAddress, SetupError, TcpTransport,
};

mod common;

/// Never completes a connection attempt.
struct StallingTransport;

impl Transport for StallingTransport {
    type Io = TcpStream;
    type Listener = TcpAcceptor;

    async fn open_connection(&self, _request: &ConnectRequest) -> io::Result<Connected<TcpStream>> {
        std::future::pending().await
    }

    async fn open_listener(
        &self,
        _endpoint: SocketAddr,
        _backlog: u32,
        _options: &SocketOptions,
    ) -> io::Result<TcpAcceptor> {
        Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use"))
    }
}

/// Panics for one host, plain TCP for every other.
struct PanickingTransport;

const PANIC_HOST: &str = "panic.invalid";

impl Transport for PanickingTransport {
    type Io = TcpStream;
    type Listener = TcpAcceptor;

    async fn open_connection(&self, request: &ConnectRequest) -> io::Result<Connected<TcpStream>> {
        if request.remote.host() == PANIC_HOST {
            panic!("injected transport panic");
        }
        TcpTransport.open_connection(request).await
    }

    async fn open_listener(
        &self,
        endpoint: SocketAddr,
        backlog: u32,
        options: &SocketOptions,
    ) -> io::Result<TcpAcceptor> {
        TcpTransport.open_listener(endpoint, backlog, options).await
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_times_out_with_the_original_request() {
    let coordinator =
        Coordinator::new(Arc::new(CoordinatorConfig::default()), StallingTransport).spawn();

    let request = ConnectRequest::new(RemoteAddress::new("stalled.invalid", 8443))
        .settings(ClientOverride::default().connect_timeout_ms(2_000));
    let start = Instant::now();
    let result = coordinator.connect(request).await;
    assert!(start.elapsed() >= Duration::from_secs(2));

    match result {
        Err(SetupError::Failure(Failure::RequestTimeout { request, message })) => {
            assert!(message.contains("2000ms"), "message: {message}");
            match *request {
                TimedOutRequest::Connect(original) => {
                    assert_eq!(original.remote, RemoteAddress::new("stalled.invalid", 8443));
                    let overrides = original.settings.expect("override kept");
                    assert_eq!(overrides.connect_timeout_ms, Some(2_000));
                }
                other => panic!("unexpected request: {other:?}"),
            }
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn configured_connect_timeout_applies_without_override() {
    let mut config = CoordinatorConfig::default();
    config.client.connect_timeout_ms = 300;
    let coordinator = Coordinator::new(Arc::new(config), StallingTransport).spawn();

    let start = Instant::now();
    let result = coordinator
        .connect(ConnectRequest::new(RemoteAddress::new("stalled.invalid", 80)))
        .await;
    assert!(matches!(
        result,
        Err(SetupError::Failure(Failure::RequestTimeout { .. }))
    ));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn transport_bind_error_is_bind_failed() {
    let coordinator =
        Coordinator::new(Arc::new(CoordinatorConfig::default()), StallingTransport).spawn();

    let result = coordinator
        .bind(BindRequest::new("127.0.0.1:0".parse().unwrap()))
        .await;
    assert!(matches!(
        result,
        Err(SetupError::Failure(Failure::BindFailed))
    ));
}

#[tokio::test]
async fn panicking_worker_only_affects_its_own_caller() {
    let (peer, _) = common::start_path_echo_peer().await;
    let coordinator =
        Coordinator::new(Arc::new(CoordinatorConfig::default()), PanickingTransport).spawn();

    let doomed = coordinator.connect(ConnectRequest::new(RemoteAddress::new(PANIC_HOST, 80)));
    let healthy = coordinator.connect(ConnectRequest::new(RemoteAddress::from(peer)));
    let (doomed, healthy) = tokio::join!(doomed, healthy);

    assert!(matches!(
        doomed,
        Err(SetupError::Fault(Fault::WorkerAborted))
    ));
    let mut connection = healthy.unwrap();

    connection.requests().send(common::get("/ok")).await.unwrap();
    let response = connection.responses().recv().await.unwrap().unwrap();
    assert_eq!(&response.message.body()[..], b"/ok");

    // The coordinator keeps serving after the fault.
    let again = coordinator
        .connect(ConnectRequest::new(RemoteAddress::from(peer)))
        .await;
    assert!(again.is_ok());
    assert!(!coordinator.is_stopped());
}
