//! Shared message-source types

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for Telegram chat IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for message IDs (unique within a chat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for update IDs (monotonic per bot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UpdateId(pub i64);

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one delivered message. Redelivery carries the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl std::fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.message_id)
    }
}

/// A text message received from the chat platform
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub update_id: UpdateId,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
    /// When the platform received the message
    pub sent_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn key(&self) -> DeliveryKey {
        DeliveryKey { chat_id: self.chat_id, message_id: self.message_id }
    }

    /// Bot command name without the leading slash or `@botname` suffix.
    ///
    /// Returns `None` for ordinary text.
    pub fn command(&self) -> Option<&str> {
        let first = self.text.trim_start().split_whitespace().next()?;
        let name = first.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// Convert a Unix timestamp in seconds, falling back to now on out-of-range input
pub fn timestamp_from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            update_id: UpdateId(1),
            chat_id: ChatId(42),
            message_id: MessageId(7),
            text: text.to_string(),
            sent_at: timestamp_from_unix(1_700_000_000),
        }
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(message("/start").command(), Some("start"));
        assert_eq!(message("/table@ledger_bot").command(), Some("table"));
        assert_eq!(message("  /help me").command(), Some("help"));
        assert_eq!(message("100₽ coffee").command(), None);
        assert_eq!(message("/").command(), None);
    }

    #[test]
    fn test_delivery_key_display() {
        assert_eq!(message("x").key().to_string(), "42:7");
    }

    #[test]
    fn test_timestamp_from_unix() {
        let ts = timestamp_from_unix(1_700_000_000);
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }
}
