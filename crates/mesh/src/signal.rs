//! WebSocket signaling channel to the relay.
//!
//! One connection per session. `SignalChannel::connect` performs the
//! handshake and starts two pump tasks: a writer serializing
//! [`ClientEvent`]s into text frames, and a reader parsing text frames
//! into [`ServerEvent`]s. Malformed inbound frames are logged and skipped;
//! a closed socket is surfaced to the consumer by the inbound channel
//! closing.

use crate::errors::MeshError;

use common::protocol::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffer for each pump direction.
const SIGNAL_BUFFER: usize = 64;

/// A connected signaling channel.
pub struct SignalChannel {
    outbound: mpsc::Sender<ClientEvent>,
    inbound: mpsc::Receiver<ServerEvent>,
}

impl SignalChannel {
    /// Connect to the relay at `url` (a `ws://` address) and start the
    /// pump tasks. The tasks stop on cancellation or when either side of
    /// the socket closes.
    pub async fn connect(url: &str, cancel_token: CancellationToken) -> Result<Self, MeshError> {
        let (ws, _response) = connect_async(url).await?;
        debug!(target: "mesh.signal", url, "Signaling channel connected");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(SIGNAL_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<ServerEvent>(SIGNAL_BUFFER);

        let writer_cancel = cancel_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_cancel.cancelled() => break,
                    event = out_rx.recv() => {
                        let Some(event) = event else { break };
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(target: "mesh.signal", error = %e, "Failed to encode event, dropping");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            debug!(target: "mesh.signal", error = %e, "Signaling write failed");
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        let reader_cancel = cancel_token;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reader_cancel.cancelled() => break,
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if in_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(
                                            target: "mesh.signal",
                                            error = %e,
                                            "Malformed server frame, skipping"
                                        );
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(target: "mesh.signal", "Signaling channel closed by relay");
                                break;
                            }
                            Some(Ok(_)) => {
                                // Ping/pong handled by the library; other
                                // frame types carry nothing for us.
                            }
                            Some(Err(e)) => {
                                debug!(target: "mesh.signal", error = %e, "Signaling read failed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    /// Split into the halves the orchestrator consumes.
    #[must_use]
    pub fn split(self) -> (mpsc::Sender<ClientEvent>, mpsc::Receiver<ServerEvent>) {
        (self.outbound, self.inbound)
    }
}
