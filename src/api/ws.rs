use crate::state::SolarLinkState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Instrument, Level, debug, span, warn};

pub async fn ws_handler(
    State(state): State<Arc<SolarLinkState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_socket(state, socket).instrument(span!(Level::INFO, "WebSocket"))
    })
}

async fn handle_socket(state: Arc<SolarLinkState>, socket: WebSocket) {
    debug!("client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut clients_rx = state.clients.subscribe();

    if ws_tx.send(Message::Text("connected".into())).await.is_err() {
        return;
    }

    let mut tx_task = tokio::spawn(
        async move {
            loop {
                match clients_rx.recv().await {
                    Ok(msg) => {
                        if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("client lagged, skipped {n} messages"),
                    Err(RecvError::Closed) => return,
                }
            }
        }
        .in_current_span(),
    );

    // clients only ever close
    let mut rx_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let Message::Close(_) = msg {
                return;
            }
        }
    });

    tokio::select! {
        _ = (&mut tx_task) => {
            rx_task.abort();
        },
        _ = (&mut rx_task) => {
            tx_task.abort();
        }
    }

    debug!("client disconnected");
}
