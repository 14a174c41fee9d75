//! Durable shift storage.
//!
//! Completed shifts are kept in memory and mirrored to a flat CSV table:
//!
//! ```text
//! Employee,Date,In_Time,Out_Time,Hours_Worked
//! Alice,2024-06-03,2024-06-03 09:00:00,2024-06-03 17:30:00,8.5
//! ```
//!
//! Every append rewrites the whole table (O(records)); the rewrite goes through
//! a sibling `.tmp` file and a rename so an interrupted write leaves the
//! previous table in place.

use std::{
    ffi::OsString,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{NaiveDate, NaiveDateTime};

use crate::{
    formatting::{format_hours, format_timestamp, round_hours, DATE_FORMAT, TIMESTAMP_FORMAT},
    Error, Result,
};

pub const CSV_HEADER: [&str; 5] = ["Employee", "Date", "In_Time", "Out_Time", "Hours_Worked"];

/// One completed work interval. Never mutated once stored.
#[derive(Clone, Debug, PartialEq)]
pub struct ShiftRecord {
    pub employee: String,
    pub date: NaiveDate,
    pub in_time: NaiveDateTime,
    pub out_time: NaiveDateTime,
    pub hours_worked: f64,
}

impl ShiftRecord {
    /// Build the record for a shift closed at `out_time`.
    ///
    /// The row is dated by the check-out day. A clock that went backwards yields
    /// zero hours rather than a negative amount.
    pub fn closed(employee: &str, in_time: NaiveDateTime, out_time: NaiveDateTime) -> Self {
        let seconds = (out_time - in_time).num_seconds().max(0);
        Self {
            employee: employee.to_string(),
            date: out_time.date(),
            in_time,
            out_time,
            hours_worked: round_hours(seconds as f64 / 3600.0),
        }
    }

    fn to_row(&self) -> [String; 5] {
        [
            self.employee.clone(),
            self.date.format(DATE_FORMAT).to_string(),
            format_timestamp(self.in_time),
            format_timestamp(self.out_time),
            format_hours(self.hours_worked),
        ]
    }
}

/// Append-only shift log.
///
/// `append` either keeps the record durably or returns an error with the
/// visible contents unchanged.
pub trait ShiftStore: Send {
    fn records(&self) -> &[ShiftRecord];

    fn append(&mut self, record: ShiftRecord) -> Result<()>;
}

/// Shift log backed by a CSV file.
#[derive(Debug)]
pub struct CsvShiftStore {
    path: PathBuf,
    records: Vec<ShiftRecord>,
}

impl CsvShiftStore {
    /// Load the table at `path`. A missing file is an empty table.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) => parse_table(&path, &content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no attendance file yet, starting empty");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "attendance store loaded"
        );
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let mut out = String::new();
        push_row(&mut out, CSV_HEADER.iter().copied());
        for record in &self.records {
            let row = record.to_row();
            push_row(&mut out, row.iter().map(String::as_str));
        }

        let tmp = tmp_path(&self.path);
        fs::write(&tmp, out)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl ShiftStore for CsvShiftStore {
    fn records(&self) -> &[ShiftRecord] {
        &self.records
    }

    fn append(&mut self, record: ShiftRecord) -> Result<()> {
        self.records.push(record);
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

// === CSV codec ===

fn push_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (idx, field) in fields.enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if field.contains(&[',', '"', '\n', '\r'][..]) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Split CSV text into rows of fields, tagging each row with its 1-based
/// starting line. Quoted fields may contain commas, doubled quotes and newlines.
fn split_rows(content: &str) -> std::result::Result<Vec<(usize, Vec<String>)>, (usize, String)> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut row_start = 1usize;

    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push((row_start, std::mem::take(&mut row)));
                }
                row.clear();
                line += 1;
                row_start = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err((row_start, "unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push((row_start, row));
    }
    Ok(rows)
}

fn parse_table(path: &Path, content: &str) -> Result<Vec<ShiftRecord>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let storage_err = |line: usize, reason: String| Error::Storage {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let rows = split_rows(content).map_err(|(line, reason)| storage_err(line, reason))?;
    let mut rows = rows.into_iter();

    let Some((line, header)) = rows.next() else {
        return Ok(Vec::new());
    };
    let header_ok = header.len() == CSV_HEADER.len()
        && header.iter().zip(CSV_HEADER).all(|(h, want)| h.trim() == want);
    if !header_ok {
        return Err(storage_err(
            line,
            format!("unexpected header, expected {}", CSV_HEADER.join(",")),
        ));
    }

    rows.map(|(line, fields)| parse_record(fields).map_err(|reason| storage_err(line, reason)))
        .collect()
}

fn parse_record(fields: Vec<String>) -> std::result::Result<ShiftRecord, String> {
    let [employee, date, in_time, out_time, hours]: [String; 5] = fields
        .try_into()
        .map_err(|f: Vec<String>| format!("expected 5 fields, got {}", f.len()))?;

    let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
        .map_err(|e| format!("invalid Date {date:?}: {e}"))?;
    let in_time = NaiveDateTime::parse_from_str(in_time.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| format!("invalid In_Time {in_time:?}: {e}"))?;
    let out_time = NaiveDateTime::parse_from_str(out_time.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| format!("invalid Out_Time {out_time:?}: {e}"))?;
    let hours_worked: f64 = hours
        .trim()
        .parse()
        .map_err(|_| format!("invalid Hours_Worked {hours:?}"))?;
    if !hours_worked.is_finite() || hours_worked < 0.0 {
        return Err(format!("Hours_Worked must be non-negative, got {hours:?}"));
    }

    Ok(ShiftRecord {
        employee,
        date,
        in_time,
        out_time,
        hours_worked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn closed_shift_computes_rounded_hours_and_checkout_date() {
        let r = ShiftRecord::closed("Alice", ts("2024-06-03 09:00:00"), ts("2024-06-03 17:30:00"));
        assert_eq!(r.hours_worked, 8.5);
        assert_eq!(r.date, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());

        let night = ShiftRecord::closed("Bob", ts("2024-06-03 22:00:00"), ts("2024-06-04 02:20:00"));
        assert_eq!(night.hours_worked, 4.33);
        assert_eq!(night.date, NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
    }

    #[test]
    fn backwards_clock_gives_zero_hours() {
        let r = ShiftRecord::closed("Alice", ts("2024-06-03 09:00:00"), ts("2024-06-03 08:00:00"));
        assert_eq!(r.hours_worked, 0.0);
    }

    #[test]
    fn missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvShiftStore::open(dir.path().join("attendance.csv")).unwrap();
        assert!(store.records().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn append_writes_header_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let mut store = CsvShiftStore::open(&path).unwrap();

        store
            .append(ShiftRecord::closed(
                "Alice",
                ts("2024-06-03 09:00:00"),
                ts("2024-06-03 17:30:00"),
            ))
            .unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "Employee,Date,In_Time,Out_Time,Hours_Worked\n\
             Alice,2024-06-03,2024-06-03 09:00:00,2024-06-03 17:30:00,8.5\n"
        );
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn reopen_restores_records_including_quoted_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let mut store = CsvShiftStore::open(&path).unwrap();
        let tricky = ShiftRecord::closed(
            "Doe, \"JD\" John",
            ts("2024-06-04 08:00:00"),
            ts("2024-06-04 16:00:00"),
        );
        store.append(tricky.clone()).unwrap();

        let reopened = CsvShiftStore::open(&path).unwrap();
        assert_eq!(reopened.records(), &[tricky]);
    }

    #[test]
    fn reads_table_written_by_other_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(
            &path,
            "\u{feff}Employee,Date,In_Time,Out_Time,Hours_Worked\r\n\
             bob,2024-06-05,2024-06-05 10:00:00,2024-06-05 12:15:00,2.25\r\n\
             \r\n",
        )
        .unwrap();

        let store = CsvShiftStore::open(&path).unwrap();
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].employee, "bob");
        assert_eq!(store.records()[0].hours_worked, 2.25);
    }

    #[test]
    fn malformed_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(
            &path,
            "Employee,Date,In_Time,Out_Time,Hours_Worked\n\
             a,2024-06-05,2024-06-05 10:00:00,2024-06-05 12:00:00,2.0\n\
             b,yesterday,2024-06-05 10:00:00,2024-06-05 12:00:00,2.0\n",
        )
        .unwrap();

        match CsvShiftStore::open(&path) {
            Err(Error::Storage { line, reason, .. }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("Date"));
            }
            other => panic!("expected storage error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "name,hours\n").unwrap();
        assert!(matches!(
            CsvShiftStore::open(&path),
            Err(Error::Storage { line: 1, .. })
        ));
    }

    #[test]
    fn failed_write_keeps_contents_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory does not exist, so the write must fail.
        let path = dir.path().join("missing").join("attendance.csv");
        let mut store = CsvShiftStore::open(&path).unwrap();

        let res = store.append(ShiftRecord::closed(
            "Alice",
            ts("2024-06-03 09:00:00"),
            ts("2024-06-03 10:00:00"),
        ));
        assert!(matches!(res, Err(Error::Io(_))));
        assert!(store.records().is_empty());
    }
}
