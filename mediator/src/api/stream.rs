use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use protocol::NormalizedEvent;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::AppState;

/// `GET /v1/stream/transcript` (§6). Push-only SSE, one event per normalized
/// pipeline event, with a 30s keep-alive ping so idle connections aren't
/// reaped by intermediate proxies.
pub async fn sse(State(supervisor): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = supervisor.broadcaster().add_sse_subscriber().await;
    let stream = ReceiverStream::new(rx).map(|event| Ok(to_sse_event(&event)));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}

fn to_sse_event(event: &NormalizedEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(_) => Event::default().data("{}"),
    }
}

/// `GET /v1/stream/transcript/ws` (§6). Each normalized event is pushed as a
/// JSON text frame; the socket is also read so a client close is noticed
/// promptly instead of leaking the subscriber slot.
pub async fn ws(State(supervisor): State<AppState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_ws(socket, supervisor))
}

async fn handle_ws(mut socket: WebSocket, supervisor: AppState) {
    let mut rx = supervisor.broadcaster().add_ws_subscriber().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let Ok(json) = serde_json::to_string(&event) else { continue };
                        if socket.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {} // clients don't drive this socket; ignore inbound frames
                }
            }
        }
    }
    debug!("stream subscriber disconnected");
}
