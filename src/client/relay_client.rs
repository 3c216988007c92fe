//! Client for the relay protocol
//!
//! `RelayClient` wraps one WebSocket connection. Request/reply calls send a
//! frame and wait for the next one; `subscribe` consumes the client and
//! turns the connection into a stream of delivered records.

use futures::stream::{self, BoxStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::{MessageRecord, User};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::ClientError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RelayClient {
    ws: Socket,
}

impl RelayClient {
    /// Connects to a relay at `url`, e.g. `ws://127.0.0.1:50052`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, _response) = connect_async(url).await?;
        Ok(Self { ws })
    }

    /// Submits a message and returns the timestamp it was stored under.
    /// `timestamp == None` lets the server stamp it.
    pub async fn submit(
        &mut self,
        from_user: &str,
        to_user: &str,
        body: &str,
        timestamp: Option<i64>,
    ) -> Result<i64, ClientError> {
        let request = ClientMessage::Submit {
            from_user: from_user.to_string(),
            to_user: to_user.to_string(),
            body: body.to_string(),
            timestamp,
        };
        match self.request(&request).await? {
            ServerMessage::Ack { timestamp } => Ok(timestamp),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_users(&mut self) -> Result<Vec<User>, ClientError> {
        match self.request(&ClientMessage::ListUsers {}).await? {
            ServerMessage::Users { users } => Ok(users),
            other => Err(unexpected(other)),
        }
    }

    /// Takes every pending message. Waits until at least one exists.
    pub async fn get_messages(&mut self) -> Result<Vec<MessageRecord>, ClientError> {
        match self.request(&ClientMessage::GetMessages {}).await? {
            ServerMessage::Messages { messages } => Ok(messages),
            other => Err(unexpected(other)),
        }
    }

    pub async fn recipients(&mut self) -> Result<Vec<String>, ClientError> {
        match self.request(&ClientMessage::Recipients {}).await? {
            ServerMessage::Recipients { recipients } => Ok(recipients),
            other => Err(unexpected(other)),
        }
    }

    /// Subscribes to `recipient` after watermark `since` and yields every
    /// delivered record until the server closes the connection.
    pub async fn subscribe(
        mut self,
        recipient: &str,
        since: i64,
    ) -> Result<BoxStream<'static, Result<MessageRecord, ClientError>>, ClientError> {
        self.send(&ClientMessage::Subscribe {
            recipient: recipient.to_string(),
            since: Some(since),
        })
        .await?;

        Ok(stream::unfold(self, |mut client| async move {
            let item = match client.next_reply().await {
                Ok(ServerMessage::Message {
                    from_user,
                    to_user,
                    body,
                    timestamp,
                }) => Ok(MessageRecord::new(from_user, to_user, body, timestamp)),
                Err(ClientError::Closed) => return None,
                Ok(other) => Err(unexpected(other)),
                Err(e) => Err(e),
            };
            Some((item, client))
        })
        .boxed())
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }

    async fn request(&mut self, message: &ClientMessage) -> Result<ServerMessage, ClientError> {
        self.send(message).await?;
        self.next_reply().await
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = serde_json::to_string(message)?;
        self.ws.send(WsMessage::text(text)).await?;
        Ok(())
    }

    async fn next_reply(&mut self) -> Result<ServerMessage, ClientError> {
        loop {
            match self.ws.next().await {
                None
                | Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                )) => return Err(ClientError::Closed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(msg)) if msg.is_text() => {
                    return Ok(serde_json::from_str(msg.to_text()?)?);
                }
                Some(Ok(msg)) if msg.is_close() => return Err(ClientError::Closed),
                Some(Ok(_)) => continue,
            }
        }
    }
}

fn unexpected(reply: ServerMessage) -> ClientError {
    match reply {
        ServerMessage::Error { message } => ClientError::Server(message),
        other => ClientError::UnexpectedReply(format!("{other:?}")),
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient").finish_non_exhaustive()
    }
}
