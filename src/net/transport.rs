//! Socket transport seam.
//!
//! # Responsibilities
//! - Open outgoing TCP connections (name resolution, local bind, socket options)
//! - Open listening sockets with a backlog
//! - Report addresses as actually negotiated by the OS
//!
//! # Design Decisions
//! - The coordinator only sees the [`Transport`] trait, so tests can swap in
//!   stalled or failing transports without touching sockets
//! - No retries or backoff here; a failed attempt is reported as-is

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};

use crate::endpoint::{ConnectRequest, SocketOptions};

/// An established byte stream plus the addresses it was negotiated with.
#[derive(Debug)]
pub struct Connected<Io> {
    pub io: Io,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

/// A listening socket.
pub trait TransportListener: Send + 'static {
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Address actually bound (ephemeral port resolved).
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Wait for the next peer.
    fn accept(&mut self) -> impl Future<Output = io::Result<Connected<Self::Io>>> + Send + '_;
}

/// Opens sockets on behalf of the coordinator.
pub trait Transport: Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    type Listener: TransportListener;

    fn open_connection(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = io::Result<Connected<Self::Io>>> + Send;

    fn open_listener(
        &self,
        endpoint: SocketAddr,
        backlog: u32,
        options: &SocketOptions,
    ) -> impl Future<Output = io::Result<Self::Listener>> + Send;
}

/// Plain TCP over `tokio::net`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Io = TcpStream;
    type Listener = TcpAcceptor;

    async fn open_connection(&self, request: &ConnectRequest) -> io::Result<Connected<TcpStream>> {
        let remote = &request.remote;
        let mut last_error = None;

        for addr in lookup_host((remote.host(), remote.port())).await? {
            match connect_one(addr, request.local, &request.options).await {
                Ok(connected) => return Ok(connected),
                Err(e) => {
                    tracing::debug!(remote = %remote, addr = %addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{remote} resolved to no addresses"),
            )
        }))
    }

    async fn open_listener(
        &self,
        endpoint: SocketAddr,
        backlog: u32,
        options: &SocketOptions,
    ) -> io::Result<TcpAcceptor> {
        let socket = new_socket(endpoint)?;
        apply_options(&socket, options)?;
        socket.bind(endpoint)?;
        let inner = socket.listen(backlog)?;
        Ok(TcpAcceptor {
            inner,
            no_delay: options.no_delay,
        })
    }
}

/// Listening TCP socket produced by [`TcpTransport`].
#[derive(Debug)]
pub struct TcpAcceptor {
    inner: TcpListener,
    no_delay: Option<bool>,
}

impl TransportListener for TcpAcceptor {
    type Io = TcpStream;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    async fn accept(&mut self) -> io::Result<Connected<TcpStream>> {
        let (io, remote_addr) = self.inner.accept().await?;
        if let Some(on) = self.no_delay {
            io.set_nodelay(on)?;
        }
        let local_addr = io.local_addr()?;
        Ok(Connected {
            io,
            local_addr,
            remote_addr,
        })
    }
}

async fn connect_one(
    addr: SocketAddr,
    local: Option<SocketAddr>,
    options: &SocketOptions,
) -> io::Result<Connected<TcpStream>> {
    let socket = new_socket(addr)?;
    apply_options(&socket, options)?;
    if let Some(local) = local {
        socket.bind(local)?;
    }

    let io = socket.connect(addr).await?;
    if let Some(on) = options.no_delay {
        io.set_nodelay(on)?;
    }
    Ok(Connected {
        local_addr: io.local_addr()?,
        remote_addr: io.peer_addr()?,
        io,
    })
}

fn new_socket(addr: SocketAddr) -> io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

fn apply_options(socket: &TcpSocket, options: &SocketOptions) -> io::Result<()> {
    if let Some(on) = options.reuse_address {
        socket.set_reuseaddr(on)?;
    }
    if let Some(on) = options.keep_alive {
        socket.set_keepalive(on)?;
    }
    if let Some(bytes) = options.recv_buffer_size {
        socket.set_recv_buffer_size(bytes)?;
    }
    if let Some(bytes) = options.send_buffer_size {
        socket.set_send_buffer_size(bytes)?;
    }
    Ok(())
}
