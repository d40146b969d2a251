//! Wire frame model
//!
//! Every message on the persistent connection is a single JSON frame:
//! `{ "type": ..., "conversationId": ..., "data": { ... } }`.
//! Frames are ephemeral; they are produced by the wire, dispatched once
//! through the router and never persisted.

use serde::{Deserialize, Serialize};

/// Frame type tags used on the wire
pub mod kind {
    /// Inbound: a message was posted to a conversation
    pub const NEW_MESSAGE: &str = "new_message";
    /// Inbound: a message was read by a participant
    pub const MESSAGE_READ: &str = "message_read";
    /// Both directions: typing indicator
    pub const USER_TYPING: &str = "user_typing";
    /// Inbound: connection status notification (also published locally
    /// whenever the manager changes state)
    pub const CONNECTION: &str = "connection";
    /// Outbound: enter a conversation room
    pub const JOIN_CONVERSATION: &str = "join_conversation";
    /// Outbound: leave a conversation room
    pub const LEAVE_CONVERSATION: &str = "leave_conversation";
    /// Router-only: matches every frame type
    pub const WILDCARD: &str = "*";
}

/// A single typed JSON message unit exchanged over the connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(
        rename = "conversationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    /// Build a frame with no conversation scope
    pub fn new(kind: &str, data: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            conversation_id: None,
            data,
        }
    }

    /// Build a frame scoped to a conversation
    pub fn for_conversation(kind: &str, conversation_id: &str, data: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            conversation_id: Some(conversation_id.to_string()),
            data,
        }
    }

    /// Outbound `join_conversation` frame
    pub fn join(conversation_id: &str) -> Self {
        Self::for_conversation(kind::JOIN_CONVERSATION, conversation_id, serde_json::json!({}))
    }

    /// Outbound `leave_conversation` frame
    pub fn leave(conversation_id: &str) -> Self {
        Self::for_conversation(kind::LEAVE_CONVERSATION, conversation_id, serde_json::json!({}))
    }

    /// Outbound `user_typing` frame
    pub fn typing(conversation_id: &str, is_typing: bool) -> Self {
        Self::for_conversation(
            kind::USER_TYPING,
            conversation_id,
            serde_json::json!({ "isTyping": is_typing }),
        )
    }

    /// Local `connection` status frame published on state transitions
    pub fn connection_status(status: &str) -> Self {
        Self::new(kind::CONNECTION, serde_json::json!({ "status": status }))
    }

    /// Parse a frame from wire text
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize for the wire
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A chat message as carried in `new_message` frame data
///
/// Also the element type of the locally reconciled per-conversation message
/// lists (optimistic inserts use the same shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default = "new_local_id")]
    pub id: String,

    #[serde(rename = "conversationId", default)]
    pub conversation_id: String,

    #[serde(rename = "senderId", default)]
    pub sender_id: String,

    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    /// Build a locally authored message with a fresh id
    pub fn local(conversation_id: &str, sender_id: &str, content: &str) -> Self {
        Self {
            id: new_local_id(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
        }
    }

    /// Extract the message payload from a `new_message` frame
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let mut message: ChatMessage = serde_json::from_value(frame.data.clone()).ok()?;
        if message.conversation_id.is_empty() {
            message.conversation_id = frame.conversation_id.clone()?;
        }
        Some(message)
    }
}

fn new_local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip_renames() {
        let frame = Frame::typing("conv-1", true);
        let wire = frame.to_wire().unwrap();

        assert!(wire.contains("\"type\":\"user_typing\""));
        assert!(wire.contains("\"conversationId\":\"conv-1\""));
        assert!(wire.contains("\"isTyping\":true"));

        let parsed = Frame::parse(&wire).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_frame_without_conversation_omits_field() {
        let frame = Frame::connection_status("open");
        let wire = frame.to_wire().unwrap();
        assert!(!wire.contains("conversationId"));
    }

    #[test]
    fn test_parse_missing_data_defaults_to_null() {
        let frame = Frame::parse(r#"{"type":"connection"}"#).unwrap();
        assert_eq!(frame.kind, kind::CONNECTION);
        assert_eq!(frame.conversation_id, None);
        assert!(frame.data.is_null());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Frame::parse("not json").is_err());
        assert!(Frame::parse(r#"{"no_type":1}"#).is_err());
    }

    #[test]
    fn test_chat_message_from_frame() {
        let frame = Frame::parse(
            r#"{
                "type": "new_message",
                "conversationId": "conv-9",
                "data": { "id": "m1", "senderId": "user-2", "content": "hello" }
            }"#,
        )
        .unwrap();

        let message = ChatMessage::from_frame(&frame).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.sender_id, "user-2");
        // Conversation id inherited from the frame envelope
        assert_eq!(message.conversation_id, "conv-9");
        assert_eq!(message.content, "hello");
    }

    #[test]
    fn test_local_message_gets_fresh_id() {
        let a = ChatMessage::local("conv-1", "me", "hi");
        let b = ChatMessage::local("conv-1", "me", "hi");
        assert_ne!(a.id, b.id);
    }
}
