//! Scripted signaling client speaking raw JSON text frames.

use common::protocol::{ClientEvent, ServerEvent};
use common::types::SessionId;

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long a test waits for one server event.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// One raw signaling connection.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to a relay.
    pub async fn connect(url: &str) -> Self {
        let (ws, _response) = connect_async(url).await.expect("client failed to connect");
        Self { ws }
    }

    /// Send one event.
    pub async fn send(&mut self, event: &ClientEvent) {
        let text = serde_json::to_string(event).expect("failed to encode event");
        self.ws
            .send(Message::Text(text))
            .await
            .expect("failed to send frame");
    }

    /// Send a raw text frame, bypassing the protocol types.
    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("failed to send frame");
    }

    /// Send a join request. `session_id: None` lets the relay mint one.
    pub async fn join(&mut self, room_id: &str, name: &str, password: &str, session_id: Option<&str>) {
        self.send(&ClientEvent::Join {
            room_id: room_id.to_string(),
            name: name.to_string(),
            password: password.to_string(),
            session_id: session_id.map(SessionId::from),
        })
        .await;
    }

    /// Receive the next server event. Panics on timeout or if the relay
    /// closes the connection instead.
    pub async fn recv(&mut self) -> ServerEvent {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for server event")
                .expect("connection closed by relay")
                .expect("transport error");
            match frame {
                Message::Text(text) => {
                    return serde_json::from_str(&text).expect("malformed server event");
                }
                Message::Close(_) => panic!("relay closed the connection"),
                // Control frames are not events.
                _ => {}
            }
        }
    }

    /// Wait for the relay to close this connection. Panics if an event
    /// arrives first or nothing happens within the timeout.
    pub async fn expect_closed(&mut self) {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for close");
            match frame {
                None | Some(Ok(Message::Close(_))) => return,
                Some(Ok(Message::Text(text))) => {
                    panic!("expected close, got event: {text}");
                }
                Some(Ok(_)) => {}
                // A reset after the relay drops the channel also counts.
                Some(Err(_)) => return,
            }
        }
    }

    /// Close the connection from the client side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
