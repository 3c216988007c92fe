//! WebSocket transport
//!
//! Translates protocol JSON frames into `DeliveryEngine` calls.
//! Responsibilities:
//! - Accept TCP/WebSocket connections, one task per connection
//! - Forward outgoing frames through a per-connection send loop
//! - Run one session task per `subscribe`, plus a forwarder turning records
//!   into `message` frames
//! - Stop every subscription of a connection when the peer goes away
//!
//! On disconnect each forwarder closes its session sink, so the session
//! stops at its next emission. Records already drained from the volatile
//! queue but not written to the socket are requeued through the engine.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use std::sync::Arc;

use crate::broker::engine::DeliveryEngine;
use crate::broker::message::MessageRecord;
use crate::broker::session::SubscriptionSession;
use crate::transport::message::{ClientMessage, ServerMessage};

type Outbox = mpsc::UnboundedSender<WsMessage>;

/// Binds `addr` and serves connections until the listener fails.
pub async fn start_websocket_server(
    addr: String,
    engine: Arc<DeliveryEngine>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, engine).await
}

/// Serves connections from an already bound listener.
pub async fn serve(listener: TcpListener, engine: Arc<DeliveryEngine>) -> std::io::Result<()> {
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = engine.clone();
        spawn(async move {
            debug!(%peer, "connection accepted");
            handle_connection(stream, engine).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, engine: Arc<DeliveryEngine>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let conn_id = format!("conn-{}", uuid::Uuid::new_v4());
    let (closed_tx, closed_rx) = watch::channel(false);

    {
        let conn_id = conn_id.clone();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!("Failed to send message to {conn_id}: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!("Send loop closed for {conn_id}");
        });
    }

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Submit {
                from_user,
                to_user,
                body,
                timestamp,
            }) => {
                let record = MessageRecord::new(from_user, to_user, body, timestamp.unwrap_or(0));
                let reply = match engine.submit(record) {
                    Ok(stored) => ServerMessage::Ack {
                        timestamp: stored.timestamp(),
                    },
                    Err(e) => ServerMessage::error(e),
                };
                let _ = tx.send(reply.to_ws());
            }
            Ok(ClientMessage::Subscribe { recipient, since }) => {
                match engine.open_subscription(&recipient, since.unwrap_or(0)) {
                    Ok(session) => {
                        spawn_subscription(
                            session,
                            engine.clone(),
                            tx.clone(),
                            closed_rx.clone(),
                        );
                        info!("{conn_id} subscribed to {recipient}");
                    }
                    Err(e) => {
                        let _ = tx.send(ServerMessage::error(e).to_ws());
                    }
                }
            }
            Ok(ClientMessage::GetMessages {}) => {
                spawn(pull_pending(engine.clone(), tx.clone(), closed_rx.clone()));
            }
            Ok(ClientMessage::ListUsers {}) => {
                let reply = match engine.list_users() {
                    Ok(users) => ServerMessage::Users { users },
                    Err(e) => ServerMessage::error(e),
                };
                let _ = tx.send(reply.to_ws());
            }
            Ok(ClientMessage::Recipients {}) => {
                let reply = match engine.recipients_with_activity() {
                    Ok(set) => ServerMessage::Recipients {
                        recipients: set.into_iter().collect(),
                    },
                    Err(e) => ServerMessage::error(e),
                };
                let _ = tx.send(reply.to_ws());
            }
            Err(err) => {
                warn!(
                    "Invalid client message from {conn_id}: {err} | {}",
                    &text.chars().take(100).collect::<String>()
                );
                let _ = tx.send(ServerMessage::error(format!("invalid message: {err}")).to_ws());
            }
        }
    }

    let _ = closed_tx.send(true);
    info!("{conn_id} disconnected");
}

// Runs the session in its own task and relays its records to the outbox
// until the connection closes.
fn spawn_subscription(
    session: SubscriptionSession,
    engine: Arc<DeliveryEngine>,
    outbox: Outbox,
    mut closed: watch::Receiver<bool>,
) {
    let (sink, mut records) = mpsc::unbounded_channel::<MessageRecord>();

    let errors = outbox.clone();
    spawn(async move {
        let recipient = session.recipient().to_string();
        if let Err(e) = session.run(sink).await {
            error!("subscription for {recipient} ended: {e}");
            let _ = errors.send(ServerMessage::error(e).to_ws());
        }
    });

    spawn(async move {
        let mut undelivered = Vec::new();
        loop {
            tokio::select! {
                record = records.recv() => match record {
                    Some(record) => {
                        let frame = ServerMessage::from(&record).to_ws();
                        if *closed.borrow() || outbox.send(frame).is_err() {
                            undelivered.push(record);
                            break;
                        }
                    }
                    None => return,
                },
                _ = closed.changed() => break,
            }
        }

        records.close();
        while let Ok(record) = records.try_recv() {
            undelivered.push(record);
        }
        if !undelivered.is_empty() {
            debug!(count = undelivered.len(), "requeueing records for a closed connection");
            engine.requeue(undelivered);
        }
    });
}

// Waits for pending records in bounded steps so a departed client stops
// the wait within one poll interval. A batch taken after the client left is
// requeued.
async fn pull_pending(engine: Arc<DeliveryEngine>, outbox: Outbox, closed: watch::Receiver<bool>) {
    let interval = engine.poll_interval();
    loop {
        if *closed.borrow() {
            return;
        }
        let worker = engine.clone();
        let batch = tokio::task::spawn_blocking(move || worker.drain_all_timeout(interval)).await;
        let messages = match batch {
            Ok(Ok(messages)) if messages.is_empty() => continue,
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                let _ = outbox.send(ServerMessage::error(e).to_ws());
                return;
            }
            Err(e) => {
                let _ = outbox.send(ServerMessage::error(e).to_ws());
                return;
            }
        };

        if *closed.borrow() {
            engine.requeue(messages);
            return;
        }
        let frame = ServerMessage::Messages {
            messages: messages.clone(),
        }
        .to_ws();
        if outbox.send(frame).is_err() {
            warn!("connection closed before pending messages were sent");
            engine.requeue(messages);
        }
        return;
    }
}
