use std::sync::Arc;

use chrono::Local;
use teloxide::prelude::*;

use atb_core::{formatting::escape_html, messaging::types::TextMessage};

use crate::handlers::reply_html;
use crate::router::AppState;

pub async fn handle_text(msg: TextMessage, state: Arc<AppState>) -> ResponseResult<()> {
    let now = Local::now().naive_local();

    // The store write happens under the tracker lock, so events are applied one
    // at a time and the file is settled before we reply.
    let reply = {
        let mut tracker = state.tracker.lock().await;
        tracker.handle_event(&msg.author, &msg.text, now)
    };

    match reply {
        Ok(None) => {}
        Ok(Some(text)) => reply_html(&state, msg.chat_id, &escape_html(&text)).await,
        Err(e) => {
            tracing::error!(author = %msg.author, error = %e, "failed to record check-out");
            let text = format!(
                "⚠️ {}, your check-out could not be saved. You are still checked in, please try again.",
                escape_html(&msg.author)
            );
            reply_html(&state, msg.chat_id, &text).await;
        }
    }

    Ok(())
}
