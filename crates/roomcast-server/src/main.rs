//! Roomcast server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: control on 0.0.0.0:12346, relay on 0.0.0.0:12347
//! roomcast-server
//!
//! # Local testing with short liveness windows
//! roomcast-server --control 127.0.0.1:12346 --relay 127.0.0.1:12347 --idle-timeout 10
//! ```

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use roomcast_core::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_FAILURES, DEFAULT_MAX_MEMBERS, DEFAULT_SWEEP_INTERVAL,
    RelayConfig, RoomConfig,
};
use roomcast_server::{
    DEFAULT_CONTROL_BIND, DEFAULT_MAX_CONTROL_PAYLOAD, DEFAULT_RELAY_BIND,
    DEFAULT_SESSION_TIMEOUT, Server, ServerRuntimeConfig,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Roomcast chat relay server
#[derive(Parser, Debug)]
#[command(name = "roomcast-server")]
#[command(about = "Room-based chat relay: TCP control plane, UDP data channel")]
#[command(version)]
struct Args {
    /// Control-plane (TCP) address
    #[arg(short, long, default_value_t = DEFAULT_CONTROL_BIND)]
    control: SocketAddr,

    /// Relay (UDP) address
    #[arg(short, long, default_value_t = DEFAULT_RELAY_BIND)]
    relay: SocketAddr,

    /// Seconds allowed for each control-plane read or write
    #[arg(long, default_value_t = DEFAULT_SESSION_TIMEOUT.as_secs())]
    session_timeout: u64,

    /// Largest control REQUEST payload in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_CONTROL_PAYLOAD)]
    max_control_payload: usize,

    /// Seconds of silence before a member is evicted
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    idle_timeout: u64,

    /// Consecutive invalid datagrams tolerated before eviction
    #[arg(long, default_value_t = DEFAULT_MAX_FAILURES)]
    max_failures: u32,

    /// Seconds between liveness sweeps
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs())]
    sweep_interval: u64,

    /// Maximum members per room, host included
    #[arg(long, default_value_t = DEFAULT_MAX_MEMBERS)]
    max_members: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> ServerRuntimeConfig {
        ServerRuntimeConfig {
            control_bind: self.control,
            relay_bind: self.relay,
            session_timeout: Duration::from_secs(self.session_timeout),
            max_control_payload: self.max_control_payload,
            relay: RelayConfig {
                idle_timeout: Duration::from_secs(self.idle_timeout),
                max_failures: self.max_failures,
                sweep_interval: Duration::from_secs(self.sweep_interval),
            },
            rooms: RoomConfig { max_members: self.max_members },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    info!("Roomcast server starting");

    let server = Server::bind(args.config()).await?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    server.run().await?;

    info!("Roomcast server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, shutting down"),
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, shutting down");
            },
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
