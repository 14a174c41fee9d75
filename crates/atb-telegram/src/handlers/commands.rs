use std::sync::Arc;

use chrono::Local;
use teloxide::prelude::*;

use atb_core::{
    formatting::{escape_html, format_timestamp},
    messaging::types::TextMessage,
    report::weekly_report,
};

use crate::handlers::reply_html;
use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn help_html(min_hours: f64) -> String {
    format!(
        "🕘 <b>Attendance Bot</b>\n\n\
Send <code>in</code> or <code>I am in</code> when you start work,\n\
and <code>out</code> or <code>I am out</code> when you finish.\n\n\
<b>Commands:</b>\n\
/report - This week's hours (Monday to Friday)\n\
/status - Your current check-in state\n\
/help - Show this message\n\n\
A weekly report is posted automatically. Minimum per week: {min_hours} hours."
    )
}

pub async fn handle_command(msg: TextMessage, state: Arc<AppState>) -> ResponseResult<()> {
    let (cmd, _arg) = parse_command(&msg.text);
    tracing::debug!(command = %cmd, author = %msg.author, "command");

    match cmd.as_str() {
        "start" | "help" => {
            reply_html(&state, msg.chat_id, &help_html(state.cfg.min_weekly_hours)).await;
        }

        "report" | "weekly_report" => {
            let now = Local::now().naive_local();
            let html = {
                let tracker = state.tracker.lock().await;
                weekly_report(tracker.store(), now, state.cfg.min_weekly_hours).to_html()
            };
            reply_html(&state, msg.chat_id, &html).await;
        }

        "status" => {
            let name = escape_html(&msg.author);
            let session_line = {
                let tracker = state.tracker.lock().await;
                match tracker.session(&msg.author).and_then(|s| s.in_time.filter(|_| s.is_open())) {
                    Some(since) => format!(
                        "🟢 {name}, you are checked in since {}.",
                        format_timestamp(since)
                    ),
                    None => format!("⚪ {name}, you are not checked in."),
                }
            };

            let next = state
                .scheduler
                .next_run(Local::now())
                .await
                .map(|dt| dt.format("%a %Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());

            let body = format!("{session_line}\n📅 Next weekly report: {}", escape_html(&next));
            reply_html(&state, msg.chat_id, &body).await;
        }

        _ => {
            reply_html(
                &state,
                msg.chat_id,
                "Unknown command. Use /help for the list of commands.",
            )
            .await;
        }
    }

    Ok(())
}
