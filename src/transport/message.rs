use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::{MessageRecord, User};

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "submit")]
    Submit {
        from_user: String,
        to_user: String,
        body: String,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        recipient: String,
        #[serde(default)]
        since: Option<i64>,
    },
    #[serde(rename = "get_messages")]
    GetMessages {},
    #[serde(rename = "list_users")]
    ListUsers {},
    #[serde(rename = "recipients")]
    Recipients {},
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "ack")]
    Ack { timestamp: i64 },
    #[serde(rename = "message")]
    Message {
        from_user: String,
        to_user: String,
        body: String,
        timestamp: i64,
    },
    #[serde(rename = "messages")]
    Messages { messages: Vec<MessageRecord> },
    #[serde(rename = "users")]
    Users { users: Vec<User> },
    #[serde(rename = "recipients")]
    Recipients { recipients: Vec<String> },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl ToString) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }

    /// Encodes the message as a text frame.
    pub fn to_ws(&self) -> WsMessage {
        match serde_json::to_string(self) {
            Ok(json) => WsMessage::text(json),
            // only reachable if a field refuses to serialize
            Err(e) => WsMessage::text(
                serde_json::json!({ "type": "error", "message": format!("encode failed: {e}") })
                    .to_string(),
            ),
        }
    }
}

impl From<&MessageRecord> for ServerMessage {
    fn from(record: &MessageRecord) -> Self {
        ServerMessage::Message {
            from_user: record.from_user().to_string(),
            to_user: record.to_user().to_string(),
            body: record.body().to_string(),
            timestamp: record.timestamp(),
        }
    }
}
