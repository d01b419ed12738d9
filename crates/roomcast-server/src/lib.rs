//! Roomcast production server.
//!
//! This crate provides the production runtime around the Sans-IO core:
//! - Tokio TCP listener for the control plane
//! - Tokio UDP socket for the relay
//! - System time and cryptographic RNG
//!
//! ## Architecture
//!
//! ```text
//! roomcast-server
//!   ├─ SystemEnv      (production Environment impl)
//!   ├─ control        (one task per TCP connection, ControlSession)
//!   ├─ relay          (receive loop + liveness sweep, RelayEngine)
//!   └─ RoomRegistry   (shared by both planes)
//! ```
//!
//! Every task watches one [`CancellationToken`]. Cancelling it stops the
//! accept loop, the receive loop and the sweep; [`Server::run`] then tears
//! down every room before returning.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod control;
mod error;
mod relay;
mod system_env;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

pub use error::ServerError;
use roomcast_core::{RelayConfig, RelayEngine, RoomConfig, RoomRegistry};
pub use system_env::SystemEnv;
use tokio::net::{TcpListener, UdpSocket};
pub use tokio_util::sync::CancellationToken;

use crate::control::ControlLimits;

/// Default control-plane address.
pub const DEFAULT_CONTROL_BIND: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 12346);

/// Default relay address.
pub const DEFAULT_RELAY_BIND: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 12347);

/// Default bound on each control-plane read and write.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit on a control REQUEST payload.
pub const DEFAULT_MAX_CONTROL_PAYLOAD: usize = 64 * 1024;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Control-plane (TCP) address
    pub control_bind: SocketAddr,
    /// Relay (UDP) address
    pub relay_bind: SocketAddr,
    /// Bound on each control-plane read and write
    pub session_timeout: Duration,
    /// Largest REQUEST payload accepted
    pub max_control_payload: usize,
    /// Relay engine configuration (liveness)
    pub relay: RelayConfig,
    /// Room configuration (capacity)
    pub rooms: RoomConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            control_bind: DEFAULT_CONTROL_BIND,
            relay_bind: DEFAULT_RELAY_BIND,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            max_control_payload: DEFAULT_MAX_CONTROL_PAYLOAD,
            relay: RelayConfig::default(),
            rooms: RoomConfig::default(),
        }
    }
}

impl ServerRuntimeConfig {
    /// Check the configuration for values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.session_timeout.is_zero() {
            return Err(ServerError::Config("session timeout must be positive".to_string()));
        }
        if self.relay.sweep_interval.is_zero() {
            return Err(ServerError::Config("sweep interval must be positive".to_string()));
        }
        if self.relay.idle_timeout.is_zero() {
            return Err(ServerError::Config("idle timeout must be positive".to_string()));
        }
        if self.rooms.max_members == 0 {
            return Err(ServerError::Config("room capacity must be at least 1".to_string()));
        }
        if self.max_control_payload > roomcast_proto::MAX_CONTROL_PAYLOAD_SIZE {
            return Err(ServerError::Config(format!(
                "max control payload {} exceeds the protocol limit {}",
                self.max_control_payload,
                roomcast_proto::MAX_CONTROL_PAYLOAD_SIZE
            )));
        }
        Ok(())
    }
}

/// Production Roomcast server.
///
/// Owns both sockets and the shared registry.
pub struct Server {
    config: ServerRuntimeConfig,
    listener: TcpListener,
    socket: UdpSocket,
    registry: Arc<RoomRegistry<SystemEnv>>,
    engine: RelayEngine<SystemEnv>,
    cancel: CancellationToken,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is invalid
    /// - Binding either address fails
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let env = SystemEnv::new();
        let registry = Arc::new(RoomRegistry::new(env.clone(), config.rooms.clone()));
        let engine = RelayEngine::new(env, Arc::clone(&registry), config.relay.clone());

        let listener = TcpListener::bind(config.control_bind).await.map_err(|e| {
            ServerError::Transport(format!("bind control {}: {e}", config.control_bind))
        })?;
        let socket = UdpSocket::bind(config.relay_bind).await.map_err(|e| {
            ServerError::Transport(format!("bind relay {}: {e}", config.relay_bind))
        })?;

        Ok(Self { config, listener, socket, registry, engine, cancel: CancellationToken::new() })
    }

    /// Run both planes until [`Self::shutdown`] is called.
    ///
    /// Every room is destroyed and every token revoked before this returns.
    pub async fn run(&self) -> Result<(), ServerError> {
        tracing::info!("control plane listening on {}", self.control_addr()?);
        tracing::info!("relay listening on {}", self.relay_addr()?);

        let limits = ControlLimits {
            session_timeout: self.config.session_timeout,
            max_payload: self.config.max_control_payload,
        };

        tokio::join!(
            control::serve(&self.listener, &self.registry, limits, &self.cancel),
            relay::serve(&self.socket, &self.engine, &self.cancel),
            relay::sweep(&self.socket, &self.engine, &self.cancel),
        );

        let closed = self.registry.clear();
        tracing::info!("server stopped, {} rooms torn down", closed);
        Ok(())
    }

    /// Signal every task to stop. Idempotent.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("shutting down");
        }
        self.cancel.cancel();
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Address the control plane is bound to.
    pub fn control_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Address the relay is bound to.
    pub fn relay_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Registry shared by both planes.
    pub fn registry(&self) -> &Arc<RoomRegistry<SystemEnv>> {
        &self.registry
    }

    /// Runtime configuration.
    pub fn config(&self) -> &ServerRuntimeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        let config = ServerRuntimeConfig::default();
        assert_eq!(config.control_bind.to_string(), "0.0.0.0:12346");
        assert_eq!(config.relay_bind.to_string(), "0.0.0.0:12347");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let mut config = ServerRuntimeConfig::default();
        config.relay.sweep_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = ServerRuntimeConfig::default();
        config.rooms.max_members = 0;
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }
}
