//! WebSocket wire events.
//!
//! Both directions use JSON text frames tagged by a `type` field. The
//! event kinds are closed sum types matched exhaustively -- an unknown
//! `type` is a deserialization failure answered with an `error` event at
//! the transport layer, not a silent fallback.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Message;

/// Normal closure, including server shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Policy violation: authentication failure.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Event sent by a client over an established connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// A new user utterance for the bound (or lazily created) conversation.
    Message {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Uuid>,
    },
    /// Request the ordered message list of the bound conversation,
    /// re-resolving (or creating) the binding first.
    LoadHistory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Uuid>,
    },
    /// Create a fresh conversation and rebind the session to it.
    NewConversation,
}

/// Event sent by the gateway to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Sent once immediately after successful authentication.
    Connected,
    /// A persisted turn: the echoed user message, or the assistant reply.
    Message { message: Message },
    /// Ordered message list of the bound conversation.
    History {
        conversation_id: Uuid,
        title: String,
        messages: Vec<Message>,
    },
    /// Confirmation of a rebind to a freshly created conversation.
    NewConversation { conversation_id: Uuid, title: String },
    /// A recoverable failure; the connection stays open.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_client_event_message_parses() {
        let json = r#"{"type": "message", "text": "What is the pressure on pump A?"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::Message {
                text: "What is the pressure on pump A?".to_string(),
                conversation_id: None,
            }
        );
    }

    #[test]
    fn test_client_event_conversation_id_camel_case() {
        let id = Uuid::now_v7();
        let json = format!(r#"{{"type": "load_history", "conversationId": "{id}"}}"#);
        let event: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(
            event,
            ClientEvent::LoadHistory {
                conversation_id: Some(id)
            }
        );
    }

    #[test]
    fn test_client_event_new_conversation_parses() {
        let event: ClientEvent = serde_json::from_str(r#"{"type": "new_conversation"}"#).unwrap();
        assert_eq!(event, ClientEvent::NewConversation);
    }

    #[test]
    fn test_client_event_unknown_type_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type": "reboot_pump"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_connected_shape() {
        let json = serde_json::to_string(&ServerEvent::Connected).unwrap();
        assert_eq!(json, r#"{"type":"connected"}"#);
    }

    #[test]
    fn test_server_event_history_shape() {
        let id = Uuid::now_v7();
        let event = ServerEvent::History {
            conversation_id: id,
            title: "Pump A pressure".to_string(),
            messages: vec![],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"history""#));
        assert!(json.contains(r#""conversationId""#));
        assert!(json.contains(r#""messages":[]"#));
    }

    #[test]
    fn test_server_event_message_roundtrip() {
        let event = ServerEvent::Message {
            message: Message {
                id: Uuid::now_v7(),
                conversation_id: Uuid::now_v7(),
                author: "user-7".to_string(),
                text: "hello".to_string(),
                created_at: Utc::now(),
                is_assistant: false,
                deleted: false,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }
}
