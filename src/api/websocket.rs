use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::protocol::{ClientFrame, ServerEvent};
use crate::server::SignalingHub;

pub async fn handle_signal_websocket(websocket: WebSocket, hub: Arc<SignalingHub>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let session_id = hub.connect(tx).await;
    tracing::info!(session_id = %session_id, "Signaling WebSocket connection established");

    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode server event");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                handle_websocket_message(&hub, &session_id, message).await;
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    hub.disconnect(&session_id).await;
    sender_task.abort();
    tracing::info!(session_id = %session_id, "Signaling WebSocket connection closed");
}

async fn handle_websocket_message(hub: &SignalingHub, session_id: &str, message: Message) {
    let Ok(text) = message.to_str() else {
        return;
    };
    tracing::debug!(session_id = %session_id, "Received signaling frame: {}", text);

    match ClientFrame::decode(text) {
        Ok(frame) => hub.handle_frame(session_id, frame).await,
        Err(e) => {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                raw_message = %text,
                "Failed to parse signaling frame"
            );
        }
    }
}
