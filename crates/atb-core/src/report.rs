//! Weekly hours summary.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::{
    formatting::{escape_html, round_hours},
    store::{ShiftRecord, ShiftStore},
};

pub const DEFAULT_MIN_WEEKLY_HOURS: f64 = 40.0;

const TITLE: &str = "Weekly Work Report";
const NO_RECORDS: &str = "No records found for this week.";

/// Monday..Friday (inclusive) calendar range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeeklyWindow {
    pub monday: NaiveDate,
    pub friday: NaiveDate,
}

impl WeeklyWindow {
    /// The working week containing `date`. Weekend dates map to the week that
    /// just ended.
    pub fn containing(date: NaiveDate) -> Self {
        let offset = date.weekday().num_days_from_monday() as i64;
        let monday = date - Duration::days(offset);
        Self {
            monday,
            friday: monday + Duration::days(4),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.monday <= date && date <= self.friday
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EmployeeHours {
    pub employee: String,
    pub hours: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WeeklyReport {
    pub window: WeeklyWindow,
    pub min_hours: f64,
    /// Sorted by employee name.
    pub entries: Vec<EmployeeHours>,
}

impl WeeklyReport {
    pub fn build(records: &[ShiftRecord], now: NaiveDateTime, min_hours: f64) -> Self {
        let window = WeeklyWindow::containing(now.date());

        let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
        for record in records.iter().filter(|r| window.contains(r.date)) {
            *totals.entry(record.employee.as_str()).or_insert(0.0) += record.hours_worked;
        }

        let entries = totals
            .into_iter()
            .map(|(employee, hours)| EmployeeHours {
                employee: employee.to_string(),
                hours: round_hours(hours),
            })
            .collect();

        Self {
            window,
            min_hours,
            entries,
        }
    }

    /// One line per employee, or the single "no records" line.
    pub fn lines(&self) -> Vec<String> {
        self.lines_with(|name| name.to_string())
    }

    pub fn to_text(&self) -> String {
        let mut out = format!("📊 {TITLE} 📊\n");
        out.push_str(&self.lines().join("\n"));
        out
    }

    /// Telegram HTML rendering; employee names are escaped.
    pub fn to_html(&self) -> String {
        let mut out = format!("📊 <b>{TITLE}</b> 📊\n");
        out.push_str(&self.lines_with(escape_html).join("\n"));
        out
    }

    fn lines_with(&self, name: impl Fn(&str) -> String) -> Vec<String> {
        if self.entries.is_empty() {
            return vec![NO_RECORDS.to_string()];
        }

        self.entries
            .iter()
            .map(|e| {
                let who = name(&e.employee);
                if e.hours >= self.min_hours {
                    format!("✅ {who} worked {:.2} hours. Great Job!", e.hours)
                } else {
                    format!(
                        "⚠️ {who} worked only {:.2} hours. Minimum required: {}.",
                        e.hours, self.min_hours
                    )
                }
            })
            .collect()
    }
}

/// Summarize the store for the working week containing `now`.
pub fn weekly_report<S: ShiftStore>(store: &S, now: NaiveDateTime, min_hours: f64) -> WeeklyReport {
    WeeklyReport::build(store.records(), now, min_hours)
}
