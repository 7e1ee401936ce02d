//! `ChannelActor` - per-connection signaling channel actor.
//!
//! Each WebSocket connection gets one actor that:
//! - registers itself (and its outbox) with the coordinator
//! - deserializes inbound JSON frames into coordinator events; malformed
//!   frames are logged and dropped, never fatal
//! - drains `ChannelCommand`s from the coordinator to the socket
//! - reports exactly one disconnect to the coordinator when it exits,
//!   whichever side closed first

use crate::coordinator::{ChannelCommand, CoordinatorHandle};

use common::protocol::ClientEvent;
use common::types::ChannelId;

use futures_util::{SinkExt, StreamExt};
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outbox buffer per channel. A client that stops reading for longer than
/// this backlog starts losing events instead of stalling the coordinator.
const CHANNEL_OUTBOX_BUFFER: usize = 200;

/// The channel actor implementation.
pub struct ChannelActor<S> {
    channel_id: ChannelId,
    addr: IpAddr,
    ws: WebSocketStream<S>,
    coordinator: CoordinatorHandle,
    cancel_token: CancellationToken,
}

impl<S> ChannelActor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawn a channel actor for an accepted WebSocket connection.
    ///
    /// Returns the channel ID and the task join handle.
    pub fn spawn(
        ws: WebSocketStream<S>,
        addr: IpAddr,
        coordinator: CoordinatorHandle,
        cancel_token: CancellationToken,
    ) -> (ChannelId, JoinHandle<()>) {
        let channel_id = ChannelId::new();
        let actor = Self {
            channel_id,
            addr,
            ws,
            coordinator,
            cancel_token,
        };
        let task_handle = tokio::spawn(actor.run());
        (channel_id, task_handle)
    }

    /// Run the actor loop.
    #[instrument(skip_all, name = "relay.channel", fields(channel = %self.channel_id, addr = %self.addr))]
    async fn run(self) {
        let Self {
            channel_id,
            addr,
            mut ws,
            coordinator,
            cancel_token,
        } = self;

        let (outbox_tx, mut outbox_rx) = mpsc::channel(CHANNEL_OUTBOX_BUFFER);
        if !coordinator.register(channel_id, addr, outbox_tx).await {
            warn!(target: "relay.channel", "Coordinator gone before registration, dropping connection");
            return;
        }

        debug!(target: "relay.channel", "ChannelActor started");

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!(target: "relay.channel", "ChannelActor received cancellation signal");
                    let _ = ws.close(None).await;
                    break;
                }

                cmd = outbox_rx.recv() => {
                    match cmd {
                        Some(ChannelCommand::Deliver(event)) => {
                            match serde_json::to_string(&event) {
                                Ok(json) => {
                                    if ws.send(Message::text(json)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(
                                        target: "relay.channel",
                                        error = %e,
                                        "Failed to encode server event, dropping"
                                    );
                                }
                            }
                        }
                        Some(ChannelCommand::Close { reason }) => {
                            debug!(target: "relay.channel", reason, "Closing channel");
                            let _ = ws.close(None).await;
                            break;
                        }
                        None => break,
                    }
                }

                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientEvent>(&text) {
                                Ok(event) => {
                                    if !coordinator.from_client(channel_id, event).await {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    // Malformed input is the sender's
                                    // problem, not a reason to crash or to
                                    // punish the channel.
                                    warn!(
                                        target: "relay.channel",
                                        error = %e,
                                        "Malformed client frame, ignoring"
                                    );
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Binary(_))) => {
                            warn!(target: "relay.channel", "Unexpected binary frame, ignoring");
                        }
                        // Ping/pong are handled inside tungstenite.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(target: "relay.channel", error = %e, "Socket error, closing");
                            break;
                        }
                    }
                }
            }
        }

        // Single exit point: the coordinator hears about this channel's
        // death exactly once, regardless of which select arm ended the loop.
        let _ = coordinator.disconnected(channel_id).await;
        info!(target: "relay.channel", "ChannelActor stopped");
    }
}
