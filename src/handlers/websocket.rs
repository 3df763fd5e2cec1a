use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::core::message_types::{ClientMessage, ServerMessage};
use crate::core::session::{Session, SharedSessionManager};
use crate::error::RedchatError;

// Handle a WebSocket connection
pub async fn handle_ws_client(ws: WebSocket, manager: SharedSessionManager, max_message_size: usize) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn a task to forward events from our channel to the WebSocket
    tokio::task::spawn(async move {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outbound event: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::text(text)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut session = manager.open_session(tx);
    info!("Client connected: {}", session.id());
    info!("Current connections: {}", manager.client_count());

    // Send a welcome message to the client
    session.notify(ServerMessage::Connected {
        client_id: session.id().to_string(),
    });

    // Handle incoming messages
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) => {
                if msg.is_close() {
                    break;
                }
                // Only process text messages
                if msg.is_text() {
                    process_message(msg, &mut session, max_message_size).await;
                }
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Client disconnected
    session.disconnect().await;
    info!("Current connections: {}", manager.client_count());
}

// Process an incoming WebSocket message
async fn process_message(msg: Message, session: &mut Session, max_message_size: usize) {
    // Extract the message content
    let msg_str = match msg.to_str() {
        Ok(s) => s,
        Err(_) => {
            warn!("Failed to extract text from message of {}", session.id());
            return;
        }
    };

    if msg_str.len() > max_message_size {
        warn!("Large message rejected from {}: {} bytes", session.id(), msg_str.len());
        report(session, RedchatError::MessageTooLarge(msg_str.len()));
        return;
    }

    let client_message = match serde_json::from_str::<ClientMessage>(msg_str) {
        Ok(message) => message,
        Err(e) => {
            warn!("Failed to parse message from {}: {}", session.id(), e);
            report(session, RedchatError::MessageParseError(e.to_string()));
            return;
        }
    };

    match client_message {
        ClientMessage::JoinRoom { room } => {
            if let Err(e) = session.join_room(&room).await {
                report(session, e);
            }
        }
        ClientMessage::LeaveRoom { room } => {
            if !session.leave_room(&room).await {
                debug!("Client {} asked to leave room {} it is not in", session.id(), room);
            }
        }
        ClientMessage::ChatMessage {
            room,
            text,
            sender_display_name,
            sender_id,
        } => {
            if let Err(e) = session
                .send_message(&room, text, sender_display_name, sender_id)
                .await
            {
                warn!("Message from {} to room {} not published: {}", session.id(), room, e);
                report(session, e);
            }
        }
    }
}

// Tell the client which of its requests failed
fn report(session: &Session, err: RedchatError) {
    session.notify(ServerMessage::error(err.code(), err.to_string()));
}
