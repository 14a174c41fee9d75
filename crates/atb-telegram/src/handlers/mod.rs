//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - filters out bots and unauthorized users
//! - turns the Telegram message into a transport-neutral `TextMessage`
//! - calls into the `atb-core` tracker / report and replies through the messenger

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{Message, User},
};

use atb_core::{
    attendance::AttendanceEvent,
    domain::{ChatId, UserId},
    formatting::split_message,
    messaging::types::TextMessage,
    security::is_authorized,
};

use crate::router::AppState;

mod commands;
mod text;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    // Ignore other bots (including our own echoes in groups).
    if user.is_bot {
        return Ok(());
    }
    let Some(body) = msg.text() else {
        return Ok(());
    };

    let incoming = TextMessage {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        author: employee_name(user),
        text: body.to_string(),
    };
    let is_command = incoming.text.starts_with('/');

    if !is_authorized(Some(incoming.user_id), &state.cfg.telegram_allowed_users) {
        // Stay quiet on ordinary group chatter; only answer things aimed at the bot.
        if is_command || AttendanceEvent::parse(&incoming.text).is_some() {
            tracing::warn!(user_id = incoming.user_id.0, author = %incoming.author, "unauthorized");
            reply_html(
                &state,
                incoming.chat_id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        }
        return Ok(());
    }

    if is_command {
        return commands::handle_command(incoming, state).await;
    }
    text::handle_text(incoming, state).await
}

/// Employee identifier stored in the attendance table.
pub(crate) fn employee_name(user: &User) -> String {
    match &user.username {
        Some(username) if !username.trim().is_empty() => username.clone(),
        _ => user.full_name(),
    }
}

/// Best-effort HTML reply, split to the messenger's length limit.
pub(crate) async fn reply_html(state: &AppState, chat_id: ChatId, html: &str) {
    let limit = state.messenger.capabilities().max_message_len;
    for chunk in split_message(html, limit) {
        if let Err(e) = state.messenger.send_html(chat_id, &chunk).await {
            tracing::warn!(chat_id = chat_id.0, error = %e, "failed to send reply");
            return;
        }
    }
}
