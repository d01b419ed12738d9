//! UDP relay runtime.
//!
//! Executes the [`RelayAction`]s produced by the engine. No room state is held
//! across an await: the engine returns owned actions and releases every lock
//! before a single byte is sent.

use roomcast_core::{RelayAction, RelayEngine};
use roomcast_proto::MAX_INBOUND_DATAGRAM;
use tokio::{net::UdpSocket, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::system_env::SystemEnv;

/// Receive datagrams until cancelled.
pub(crate) async fn serve(
    socket: &UdpSocket,
    engine: &RelayEngine<SystemEnv>,
    cancel: &CancellationToken,
) {
    // One spare byte so an oversized datagram is seen as oversized, not
    // silently truncated to a valid length.
    let mut buf = vec![0u8; MAX_INBOUND_DATAGRAM + 1];

    loop {
        let (len, source) = tokio::select! {
            () = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("relay receive error: {}", e);
                    continue;
                },
            },
        };

        let actions = engine.handle_datagram(&buf[..len], source);
        execute(socket, actions).await;
    }

    tracing::debug!("relay receive loop stopped");
}

/// Run the liveness sweep every `sweep_interval` until cancelled.
pub(crate) async fn sweep(
    socket: &UdpSocket,
    engine: &RelayEngine<SystemEnv>,
    cancel: &CancellationToken,
) {
    let mut ticker = tokio::time::interval(engine.config().sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately.
    ticker.tick().await;

    let mut last_status = None;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let actions = engine.sweep();
        execute(socket, actions).await;

        let registry = engine.registry();
        let status = (registry.room_count(), registry.tokens().len());
        if last_status != Some(status) {
            tracing::info!("status: {} active rooms, {} live tokens", status.0, status.1);
            last_status = Some(status);
        }
    }

    tracing::debug!("relay sweep stopped");
}

/// Execute actions in order. A failed send affects only its destination.
pub(crate) async fn execute(socket: &UdpSocket, actions: Vec<RelayAction>) {
    for action in actions {
        match action {
            RelayAction::Send { to, payload } => {
                if let Err(e) = socket.send_to(&payload, to).await {
                    tracing::warn!("send to {} failed: {}", to, e);
                }
            },
            RelayAction::Drop { from, reason } => {
                tracing::debug!("dropped datagram from {}: {}", from, reason);
            },
            RelayAction::Evicted { room, member, .. } => {
                tracing::trace!("{} removed from {}", member, room);
            },
            RelayAction::RoomClosed { room } => tracing::info!("room {} closed", room),
        }
    }
}
