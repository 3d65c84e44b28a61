//! Connection-lifecycle coordinator command line.
//!
//! ```text
//! conn-coordinator serve --bind 127.0.0.1:8080     echo every request body back
//! conn-coordinator fetch 127.0.0.1:8080 --path /   send one GET, print the reply
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use hyper::{Request, Response};

use conn_coordinator::channel::{Correlated, IncomingConnection};
use conn_coordinator::config::loader::load_config;
use conn_coordinator::lifecycle::{self, Shutdown};
use conn_coordinator::observability::{logging, metrics};
use conn_coordinator::{
    BindRequest, ConnectRequest, Coordinator, CoordinatorConfig, RemoteAddress, TcpTransport,
};

/// Grace period for open connections after a shutdown signal.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "conn-coordinator")]
#[command(about = "Connect and bind HTTP/1.1 endpoints through the coordinator", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a listener and answer every request with its own body
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: std::net::SocketAddr,

        /// Listen backlog (overrides the configured default)
        #[arg(long)]
        backlog: Option<u32>,
    },
    /// Send one GET request and print the response
    Fetch {
        /// Remote as host:port
        remote: RemoteAddress,

        #[arg(short, long, default_value = "/")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => CoordinatorConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!("conn-coordinator v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let config = Arc::new(config);
    match cli.command {
        Commands::Serve { bind, backlog } => serve(config, bind, backlog).await,
        Commands::Fetch { remote, path } => fetch(config, remote, path).await,
    }
}

async fn serve(
    config: Arc<CoordinatorConfig>,
    bind: std::net::SocketAddr,
    backlog: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();
    lifecycle::spawn_signal_listener(&shutdown);

    let coordinator =
        Coordinator::new(config, TcpTransport).spawn_with_shutdown(shutdown.subscribe());

    let mut request = BindRequest::new(bind);
    if let Some(backlog) = backlog {
        request = request.backlog(backlog);
    }
    let mut binding = coordinator.bind(request).await?;
    let Some(mut incoming) = binding.incoming() else {
        return Err("binding has no incoming stream".into());
    };
    tracing::info!(address = %binding.local_addr(), "Serving");

    let mut signal = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = signal.recv() => break,
            next = incoming.recv() => match next {
                Some(connection) => {
                    tokio::spawn(echo(connection));
                }
                None => break,
            },
        }
    }

    binding.release().await;
    let remaining = lifecycle::drain(coordinator.tracker(), DRAIN_GRACE).await;
    tracing::info!(remaining, "Shutdown complete");
    Ok(())
}

async fn echo(connection: IncomingConnection) {
    let id = connection.id();
    let remote = connection.remote_addr();
    let (mut requests, responses) = connection.split();

    while let Some(item) = requests.recv().await {
        match item {
            Ok(Correlated { token, message }) => {
                tracing::debug!(connection_id = %id, %token, method = %message.method(), uri = %message.uri(), "Echoing request");
                let response = Response::new(message.into_body());
                if let Err(e) = responses.send(token, response) {
                    tracing::warn!(connection_id = %id, error = %e, "Response not delivered");
                }
            }
            Err(failure) => {
                tracing::warn!(connection_id = %id, %remote, error = %failure, "Connection failed");
                break;
            }
        }
    }
}

async fn fetch(
    config: Arc<CoordinatorConfig>,
    remote: RemoteAddress,
    path: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = Coordinator::new(config, TcpTransport).spawn();
    let connection = coordinator.connect(ConnectRequest::new(remote)).await?;
    let (requests, mut responses) = connection.split();

    let request = Request::get(path).body(Bytes::new())?;
    requests.send(request).await?;

    match responses.recv().await {
        Some(Ok(response)) => {
            let response = response.into_message();
            println!("{}", response.status());
            println!("{}", String::from_utf8_lossy(response.body()));
            Ok(())
        }
        Some(Err(failure)) => Err(failure.into()),
        None => Err("connection closed before a response arrived".into()),
    }
}
