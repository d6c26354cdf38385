use chrono::{DateTime, Utc};
use rocket::State;
use rocket::futures::{SinkExt, StreamExt};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::tokio::sync::broadcast;
use rocket_ws as ws;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::auth::{Permission, User};
use crate::db::{get_recent_messages, insert_chat_message};
use crate::models::ChatMessage;

pub const EVENT_SEND_MESSAGE: &str = "sendMessage";
pub const EVENT_RECEIVE_MESSAGE: &str = "receiveMessage";

/// Fan-out point for the community chat: every connected client holds a
/// subscription, every persisted message is published once.
pub struct ChatHub {
    tx: broadcast::Sender<String>,
}

impl ChatHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn sender(&self) -> broadcast::Sender<String> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct IncomingFrame {
    event: String,
    text: String,
    sender: String,
}

#[derive(Serialize)]
struct OutgoingFrame {
    event: &'static str,
    text: String,
    sender: String,
    created_at: DateTime<Utc>,
}

impl From<ChatMessage> for OutgoingFrame {
    fn from(message: ChatMessage) -> Self {
        Self {
            event: EVENT_RECEIVE_MESSAGE,
            text: message.text,
            sender: message.sender,
            created_at: message.created_at,
        }
    }
}

#[get("/chat/messages")]
pub async fn api_get_chat_messages(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ChatMessage>>, Status> {
    user.require_permission(Permission::Chat)?;

    let messages = get_recent_messages(db).await?;
    Ok(Json(messages))
}

#[get("/chat/ws")]
pub fn chat_ws(
    ws: ws::WebSocket,
    user: User,
    hub: &State<ChatHub>,
    db: &State<Pool<Sqlite>>,
) -> Result<ws::Channel<'static>, Status> {
    user.require_permission(Permission::Chat)?;

    let tx = hub.sender();
    let mut rx = hub.subscribe();
    let pool = db.inner().clone();
    let email = user.email.clone();

    Ok(ws.channel(move |mut stream| {
        Box::pin(async move {
            info!(email = %email, "Chat client connected");

            loop {
                rocket::tokio::select! {
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(ws::Message::Text(raw))) => {
                                handle_incoming(&pool, &tx, &raw).await;
                            }
                            Some(Ok(ws::Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(email = %email, error = %err, "Chat stream error");
                                break;
                            }
                        }
                    }
                    broadcasted = rx.recv() => {
                        match broadcasted {
                            Ok(frame) => {
                                if stream.send(ws::Message::Text(frame)).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(email = %email, skipped, "Chat receiver lagging");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }

            info!(email = %email, "Chat client disconnected");
            Ok(())
        })
    }))
}

async fn handle_incoming(pool: &Pool<Sqlite>, tx: &broadcast::Sender<String>, raw: &str) {
    let frame = match serde_json::from_str::<IncomingFrame>(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "Malformed chat frame");
            return;
        }
    };

    if frame.event != EVENT_SEND_MESSAGE {
        warn!(event = %frame.event, "Ignoring unknown chat event");
        return;
    }

    match insert_chat_message(pool, &frame.sender, &frame.text).await {
        Ok(message) => {
            if let Ok(json) = serde_json::to_string(&OutgoingFrame::from(message)) {
                // Nobody listening is fine; the message is already stored.
                let _ = tx.send(json);
            }
        }
        Err(err) => err.log_and_record("persisting chat message"),
    }
}
