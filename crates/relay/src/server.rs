//! WebSocket accept loop.
//!
//! Accepts TCP connections, performs the WebSocket handshake off the accept
//! loop, and hands each resulting stream to a [`ChannelActor`]. All channel
//! actors are children of the coordinator's cancellation token, so relay
//! shutdown tears the whole tree down.

use crate::channel::ChannelActor;
use crate::coordinator::CoordinatorHandle;
use crate::errors::RelayError;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bind the signaling listener.
///
/// Split from [`run`] so callers (and the test harness) can bind to an
/// ephemeral port and read the address back before serving.
pub async fn bind(bind_address: &str) -> Result<TcpListener, RelayError> {
    let listener = TcpListener::bind(bind_address).await?;
    Ok(listener)
}

/// The listener's local address.
pub fn local_addr(listener: &TcpListener) -> Result<SocketAddr, RelayError> {
    Ok(listener.local_addr()?)
}

/// Run the accept loop until cancelled.
pub async fn run(
    listener: TcpListener,
    coordinator: CoordinatorHandle,
    cancel_token: CancellationToken,
) {
    match listener.local_addr() {
        Ok(addr) => info!(target: "relay.server", %addr, "Signaling server listening"),
        Err(e) => warn!(target: "relay.server", error = %e, "Listener has no local address"),
    }

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "relay.server", "Accept loop received cancellation signal");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(target: "relay.server", %peer, "Connection accepted");
                        let coordinator = coordinator.clone();
                        let channel_token = coordinator.child_token();
                        // Handshake off the accept loop: a stalled client
                        // must not block other rooms' connections.
                        tokio::spawn(async move {
                            match tokio_tungstenite::accept_async(stream).await {
                                Ok(ws) => {
                                    ChannelActor::spawn(ws, peer.ip(), coordinator, channel_token);
                                }
                                Err(e) => {
                                    debug!(
                                        target: "relay.server",
                                        %peer,
                                        error = %e,
                                        "WebSocket handshake failed"
                                    );
                                }
                            }
                        });
                    }
                    Err(e) => {
                        warn!(target: "relay.server", error = %e, "Accept failed");
                    }
                }
            }
        }
    }

    info!(target: "relay.server", "Accept loop stopped");
}
