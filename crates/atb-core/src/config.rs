use std::{env, path::PathBuf};

use crate::{errors::Error, report::DEFAULT_MIN_WEEKLY_HOURS, scheduler::CronExpr, Result};

pub const DEFAULT_ATTENDANCE_FILE: &str = "attendance.csv";
pub const DEFAULT_REPORT_CRON: &str = "0 18 * * 5";

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub telegram_allowed_users: Vec<i64>,

    // Storage
    pub attendance_file: PathBuf,

    // Weekly report
    pub report_chat_id: i64,
    pub report_schedule: CronExpr,
    pub min_weekly_hours: f64,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Existing environment variables win over `.env` entries.
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(Error::Config(format!("failed to read .env: {e}")));
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required env vars
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let report_chat_id = get("ATTENDANCE_REPORT_CHAT_ID")
            .ok_or_else(|| {
                Error::Config(
                    "ATTENDANCE_REPORT_CHAT_ID environment variable is required".to_string(),
                )
            })?
            .trim()
            .parse::<i64>()
            .map_err(|e| Error::Config(format!("ATTENDANCE_REPORT_CHAT_ID: {e}")))?;

        // Optional
        let telegram_allowed_users = parse_csv_i64(get("ATTENDANCE_ALLOWED_USERS"))?;
        let attendance_file = PathBuf::from(
            get("ATTENDANCE_FILE").unwrap_or_else(|| DEFAULT_ATTENDANCE_FILE.to_string()),
        );

        let cron = get("WEEKLY_REPORT_CRON").unwrap_or_else(|| DEFAULT_REPORT_CRON.to_string());
        let report_schedule = CronExpr::parse(&cron)
            .map_err(|e| Error::Config(format!("WEEKLY_REPORT_CRON: {e}")))?;

        let min_weekly_hours = match get("WEEKLY_MIN_HOURS") {
            None => DEFAULT_MIN_WEEKLY_HOURS,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => v,
                _ => {
                    return Err(Error::Config(format!(
                        "WEEKLY_MIN_HOURS must be a non-negative number, got {raw:?}"
                    )))
                }
            },
        };

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            attendance_file,
            report_chat_id,
            report_schedule,
            min_weekly_hours,
        })
    }
}

fn parse_csv_i64(v: Option<String>) -> Result<Vec<i64>> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::Config(format!("invalid user id in ATTENDANCE_ALLOWED_USERS: {s}")))
        })
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
