//! WebSocket session: one broker connection per socket.

use crate::broker::Broker;
use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// GET /mqtt
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broker))
}

async fn handle_socket(socket: WebSocket, broker: Arc<Broker>) {
    let (id, mut deliveries) = match broker.connect() {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "refusing websocket connection");
            return;
        },
    };
    debug!(id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            delivery = deliveries.recv() => match delivery {
                Some(message) => {
                    if sink.send(Message::Text(message)).await.is_err() {
                        break;
                    }
                },
                // Broker dropped the connection.
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    // Rejections are logged by the broker; the socket stays open.
                    let _ = broker.handle_control(id, &text);
                },
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        let _ = broker.handle_control(id, text);
                    },
                    Err(_) => debug!(id, "ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    debug!(id, error = %e, "websocket error");
                    break;
                },
            },
        }
    }

    broker.disconnect(id);
    let _ = sink.close().await;
    debug!(id, "websocket closed");
}
