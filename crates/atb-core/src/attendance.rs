//! Check-in / check-out state machine.
//!
//! One in-memory [`AttendanceSession`] per employee. A completed shift is
//! flushed to the [`ShiftStore`] and the session is reset, so the next check-in
//! starts from a clean slate.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::{
    formatting::{format_hours, format_timestamp},
    store::{ShiftRecord, ShiftStore},
    Result,
};

const CHECK_IN_PHRASES: &[&str] = &["i am in", "in"];
const CHECK_OUT_PHRASES: &[&str] = &["i am out", "out"];

/// A recognized attendance phrase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttendanceEvent {
    CheckIn,
    CheckOut,
}

impl AttendanceEvent {
    /// Case-insensitive match against the fixed phrase sets.
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text.trim().to_lowercase();
        if CHECK_IN_PHRASES.contains(&normalized.as_str()) {
            return Some(Self::CheckIn);
        }
        if CHECK_OUT_PHRASES.contains(&normalized.as_str()) {
            return Some(Self::CheckOut);
        }
        None
    }
}

/// Current work interval of one employee.
///
/// `out_time` is only ever set while `in_time` is set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttendanceSession {
    pub in_time: Option<NaiveDateTime>,
    pub out_time: Option<NaiveDateTime>,
}

impl AttendanceSession {
    pub fn is_open(&self) -> bool {
        self.in_time.is_some() && self.out_time.is_none()
    }
}

/// Result of applying an event to an employee's session.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    CheckedIn { at: NaiveDateTime },
    AlreadyCheckedIn,
    CheckedOut { record: ShiftRecord },
    NotCheckedIn,
    AlreadyCheckedOut,
}

impl Outcome {
    /// Plain-text reply for the employee.
    pub fn message(&self, employee: &str) -> String {
        match self {
            Self::CheckedIn { at } => {
                format!("{employee} checked in at {}", format_timestamp(*at))
            }
            Self::AlreadyCheckedIn => format!(
                "{employee}, you are already checked in! Check out before checking in again."
            ),
            Self::CheckedOut { record } => format!(
                "{employee} checked out at {}. Hours Worked: {}",
                format_timestamp(record.out_time),
                format_hours(record.hours_worked)
            ),
            Self::NotCheckedIn => format!("{employee}, you haven't checked in today!"),
            Self::AlreadyCheckedOut => format!(
                "{employee}, you have already checked out! Check in before checking out again."
            ),
        }
    }
}

/// Owns the per-employee sessions and the durable shift log.
pub struct AttendanceTracker<S> {
    sessions: HashMap<String, AttendanceSession>,
    store: S,
}

impl<S: ShiftStore> AttendanceTracker<S> {
    pub fn new(store: S) -> Self {
        Self {
            sessions: HashMap::new(),
            store,
        }
    }

    /// Read access for the report generator.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn session(&self, employee: &str) -> Option<&AttendanceSession> {
        self.sessions.get(employee)
    }

    /// Apply a free-text message. `Ok(None)` for text that is not an attendance phrase.
    pub fn handle_event(
        &mut self,
        employee: &str,
        text: &str,
        now: NaiveDateTime,
    ) -> Result<Option<String>> {
        let Some(event) = AttendanceEvent::parse(text) else {
            return Ok(None);
        };

        let outcome = match event {
            AttendanceEvent::CheckIn => self.check_in(employee, now),
            AttendanceEvent::CheckOut => self.check_out(employee, now)?,
        };
        Ok(Some(outcome.message(employee)))
    }

    pub fn check_in(&mut self, employee: &str, now: NaiveDateTime) -> Outcome {
        let now = truncate_to_seconds(now);
        if self.sessions.get(employee).is_some_and(AttendanceSession::is_open) {
            return Outcome::AlreadyCheckedIn;
        }

        self.sessions.insert(
            employee.to_string(),
            AttendanceSession {
                in_time: Some(now),
                out_time: None,
            },
        );
        tracing::info!(employee, at = %format_timestamp(now), "checked in");
        Outcome::CheckedIn { at: now }
    }

    /// Close the open session and flush it.
    ///
    /// On a store failure the session stays open and nothing is recorded, so the
    /// employee can simply retry.
    pub fn check_out(&mut self, employee: &str, now: NaiveDateTime) -> Result<Outcome> {
        let now = truncate_to_seconds(now);
        let Some(session) = self.sessions.get(employee) else {
            return Ok(Outcome::NotCheckedIn);
        };
        let Some(in_time) = session.in_time else {
            return Ok(Outcome::NotCheckedIn);
        };
        // Sessions are reset on flush, so a closed session is never observed here.
        if session.out_time.is_some() {
            return Ok(Outcome::AlreadyCheckedOut);
        }

        let record = ShiftRecord::closed(employee, in_time, now);
        self.store.append(record.clone())?;
        self.sessions
            .insert(employee.to_string(), AttendanceSession::default());

        tracing::info!(
            employee,
            at = %format_timestamp(now),
            hours = record.hours_worked,
            "checked out"
        );
        Ok(Outcome::CheckedOut { record })
    }
}

fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    use chrono::Timelike;
    ts.with_nanosecond(0).unwrap_or(ts)
}
