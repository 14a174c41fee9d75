//! Formatting utilities (Telegram HTML, hour amounts, message chunking).

use chrono::NaiveDateTime;

/// Timestamp layout used in replies and in the `In_Time`/`Out_Time` columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date layout used in the `Date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Round to two decimals (the precision stored in `Hours_Worked`).
pub fn round_hours(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}

/// Shortest decimal form of an already rounded hour amount, keeping at least one
/// fractional digit: `8.5`, `8.0`, `7.25`.
pub fn format_hours(hours: f64) -> String {
    let fixed = format!("{:.2}", round_hours(hours));
    let trimmed = fixed.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    }
}

/// Split a message on line boundaries so every chunk fits in `limit` bytes.
///
/// A single line longer than `limit` is cut at a char boundary, never inside an
/// HTML entity or tag.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    for line in text.lines() {
        let extra = if chunk.is_empty() { 0 } else { 1 };
        if chunk.len() + extra + line.len() > limit && !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
        }

        let mut rest = line;
        while rest.len() > limit {
            let (head, tail) = split_utf8_prefix(rest, limit);
            out.push(head.to_string());
            rest = tail;
        }

        if !chunk.is_empty() {
            chunk.push('\n');
        }
        chunk.push_str(rest);
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}

fn split_utf8_prefix(s: &str, max_bytes: usize) -> (&str, &str) {
    let mut idx = 0usize;
    for (i, _) in s.char_indices() {
        if i > max_bytes {
            break;
        }
        idx = i;
    }
    if let Some(open) = s[..idx].rfind(&['&', '<'][..]) {
        if open > 0 && !s[open..idx].contains(&[';', '>'][..]) {
            idx = open;
        }
    }
    if idx == 0 {
        let next = s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len());
        return s.split_at(next);
    }
    s.split_at(idx)
}
