use serde::{Deserialize, Serialize};

use crate::error::{RedchatError, Result};

/// Chat payload carried through the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    pub sender_display_name: String,
    /// Client-supplied identity, trusted verbatim for attribution
    pub sender_id: String,
}

impl ChatMessage {
    pub fn new(text: String, sender_display_name: String, sender_id: String) -> Self {
        Self {
            text,
            sender_display_name,
            sender_id,
        }
    }

    /// Serialize into the broker wire format
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RedchatError::DecodeError(e.to_string()))
    }

    /// Parse a raw broker payload
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| RedchatError::DecodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_uses_camel_case_keys() {
        let msg = ChatMessage::new("hi".to_string(), "alice".to_string(), "x1".to_string());
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["text"], "hi");
        assert_eq!(value["senderDisplayName"], "alice");
        assert_eq!(value["senderId"], "x1");
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        assert!(matches!(ChatMessage::decode("not json"), Err(RedchatError::DecodeError(_))));
        assert!(matches!(
            ChatMessage::decode(r#"{"text":"hi"}"#),
            Err(RedchatError::DecodeError(_))
        ));
    }

    #[test]
    fn test_decode_keeps_text_unchanged() {
        let raw = r#"{"text":"  spaced  <b>","senderDisplayName":"bob","senderId":"y2"}"#;
        let msg = ChatMessage::decode(raw).unwrap();
        assert_eq!(msg.text, "  spaced  <b>");
        assert_eq!(msg.sender_display_name, "bob");
    }
}
