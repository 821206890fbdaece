//! WebSocket handlers
//!
//! - `/api/v1/stream` pushes every [`StatusEvent`] to the client as JSON.
//! - `/api/v1/reports/stream` accepts a chunked report: each text frame is
//!   one JSON [`ReportChunk`]; the server answers with a single JSON frame
//!   (the acknowledgment or `{"error": ...}`) and closes.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, future, stream::StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::ReportChunk;
use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn status_stream_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_status_stream(socket, state))
}

async fn handle_status_stream(socket: WebSocket, state: ApiState) {
    info!("WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut status_rx = state.status_tx.subscribe();

    let mut send_task = tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => {
                    if let Ok(text) = serde_json::to_string(&event)
                        && sender.send(Message::Text(text)).await.is_err()
                    {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagging, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}

/// WebSocket upgrade handler
///
/// GET /api/v1/reports/stream
pub async fn report_stream_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_report_stream(socket, state))
}

async fn handle_report_stream(socket: WebSocket, state: ApiState) {
    let (mut sender, receiver) = socket.split();

    let chunks = receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(parse_chunk(text.as_bytes())),
                Ok(Message::Binary(bytes)) => Some(parse_chunk(&bytes)),
                Ok(_) => None,
                Err(e) => Some(Err(e.to_string())),
            })
        });

    let reply = match state.ingestor.stream_status(chunks).await {
        Ok(ack) => serde_json::to_value(ack).unwrap_or_else(|_| json!({ "received": true })),
        Err(e) => {
            warn!("rejected report stream: {}", e);
            json!({ "error": e.to_string() })
        }
    };

    if sender.send(Message::Text(reply.to_string())).await.is_err() {
        debug!("report stream client left before the acknowledgment");
        return;
    }
    let _ = sender.send(Message::Close(None)).await;
}

fn parse_chunk(bytes: &[u8]) -> Result<ReportChunk, String> {
    serde_json::from_slice(bytes).map_err(|e| format!("invalid chunk: {}", e))
}
