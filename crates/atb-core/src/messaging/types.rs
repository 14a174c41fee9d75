use crate::domain::{ChatId, UserId};

/// Cross-messenger incoming text message.
///
/// Telegram-specific fields live in the Telegram adapter.
#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    /// Display name used as the employee identifier in the attendance store.
    pub author: String,
    pub text: String,
}

/// Limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
}
