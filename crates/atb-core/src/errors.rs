use std::path::PathBuf;

/// Core error type for the attendance bot.
///
/// Adapter crates should map their specific errors into this type so the bot
/// core can handle failures consistently (user-facing message vs fatal).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("attendance store {path}: line {line}: {reason}")]
    Storage {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("invalid cron expression: {0}")]
    Cron(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
