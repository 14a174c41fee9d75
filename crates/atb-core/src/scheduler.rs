//! Weekly report scheduler.
//!
//! - Standard 5-field cron syntax (min hour dom mon dow), local time
//! - Computes the exact next fire instant and sleeps until it
//! - Never fires twice for the same instant: the next run is always searched
//!   strictly after the last fire, even if the timer woke up early
//! - A fire missed while the process was down is not replayed

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    attendance::AttendanceTracker,
    domain::ChatId,
    formatting::split_message,
    messaging::port::MessagingPort,
    report::weekly_report,
    store::ShiftStore,
    Error, Result,
};

/// Re-check the wall clock at least this often while waiting, so clock
/// adjustments and suspend/resume do not push a fire far past its instant.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(15 * 60);

pub type SharedTracker<S> = Arc<Mutex<AttendanceTracker<S>>>;

pub struct WeeklyReportScheduler<S> {
    inner: Arc<SchedulerInner<S>>,
}

impl<S> Clone for WeeklyReportScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct SchedulerInner<S> {
    schedule: CronExpr,
    tracker: SharedTracker<S>,
    messenger: Arc<dyn MessagingPort>,
    chat_id: ChatId,
    min_hours: f64,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    job: Option<(CancellationToken, JoinHandle<()>)>,
    last_fire: Option<DateTime<Local>>,
}

impl<S: ShiftStore + 'static> WeeklyReportScheduler<S> {
    pub fn new(
        schedule: CronExpr,
        tracker: SharedTracker<S>,
        messenger: Arc<dyn MessagingPort>,
        chat_id: ChatId,
        min_hours: f64,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                schedule,
                tracker,
                messenger,
                chat_id,
                min_hours,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Spawn the delivery loop. Calling it again while running is a no-op.
    pub async fn start(&self) {
        let mut st = self.inner.state.lock().await;
        if st.job.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let scheduler = self.clone();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler.job_loop(cancel_clone).await;
        });
        st.job = Some((cancel, handle));

        tracing::info!(
            cron = self.inner.schedule.source(),
            chat_id = self.inner.chat_id.0,
            "weekly report scheduler started"
        );
    }

    pub async fn stop(&self) {
        let mut st = self.inner.state.lock().await;
        if let Some((cancel, handle)) = st.job.take() {
            cancel.cancel();
            handle.abort();
            tracing::info!("weekly report scheduler stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.job.is_some()
    }

    /// Next delivery instant after `now` (and after the last delivery).
    pub async fn next_run(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let last = self.inner.state.lock().await.last_fire;
        let from = match last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.inner.schedule.next_after(from)
    }

    /// Record a fire at `at` and deliver the report for the week containing it.
    pub async fn fire(&self, at: DateTime<Local>) -> Result<()> {
        self.inner.state.lock().await.last_fire = Some(at);
        self.deliver(at).await
    }

    /// Build the report under the tracker lock and send it to the report chat.
    pub async fn deliver(&self, at: DateTime<Local>) -> Result<()> {
        let html = {
            let tracker = self.inner.tracker.lock().await;
            weekly_report(tracker.store(), at.naive_local(), self.inner.min_hours).to_html()
        };

        let limit = self.inner.messenger.capabilities().max_message_len;
        for chunk in split_message(&html, limit) {
            self.inner
                .messenger
                .send_html(self.inner.chat_id, &chunk)
                .await?;
        }
        Ok(())
    }

    async fn job_loop(&self, cancel: CancellationToken) {
        loop {
            let Some(next) = self.next_run(Local::now()).await else {
                tracing::error!(
                    cron = self.inner.schedule.source(),
                    "schedule has no upcoming run, stopping"
                );
                break;
            };
            tracing::info!(next = %next.format("%Y-%m-%d %H:%M"), "next weekly report");

            loop {
                let remaining = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                if remaining.is_zero() {
                    break;
                }
                tokio::select! {
                  _ = cancel.cancelled() => return,
                  _ = sleep(remaining.min(MAX_SLEEP_SLICE)) => {}
                }
            }

            match self.fire(next).await {
                Ok(()) => tracing::info!("weekly report delivered"),
                Err(e) => tracing::error!(error = %e, "weekly report delivery failed"),
            }
        }
    }
}

// === Cron expression engine ===

#[derive(Clone, Debug)]
pub struct CronExpr {
    source: String,
    min: Field,
    hour: Field,
    dom: Field,
    mon: Field,
    dow: Field,
}

#[derive(Clone, Debug)]
struct Field {
    min: u32,
    max: u32,
    any: bool,
    allowed: Vec<bool>, // index = value
}

const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts = expr.split_whitespace().collect::<Vec<_>>();
        if parts.len() != 5 {
            return Err(Error::Cron(format!(
                "{expr:?}: expected 5 fields, got {}",
                parts.len()
            )));
        }

        Ok(Self {
            source: parts.join(" "),
            min: Field::parse(parts[0], 0, 59, false)?,
            hour: Field::parse(parts[1], 0, 23, false)?,
            dom: Field::parse(parts[2], 1, 31, false)?,
            mon: Field::parse(parts[3], 1, 12, false)?,
            dow: Field::parse(parts[4], 0, 6, true)?,
        })
    }

    /// The normalized expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches<Tz: TimeZone>(&self, dt: &DateTime<Tz>) -> bool {
        if !self.min.contains(dt.minute())
            || !self.hour.contains(dt.hour())
            || !self.mon.contains(dt.month())
        {
            return false;
        }

        // Standard cron semantics: if both DOM and DOW are restricted, match when EITHER matches.
        let dom_match = self.dom.contains(dt.day());
        let dow_match = self.dow.contains(dt.weekday().num_days_from_sunday());

        match (self.dom.any, self.dow.any) {
            (true, true) => true,
            (true, false) => dow_match,
            (false, true) => dom_match,
            (false, false) => dom_match || dow_match,
        }
    }

    /// First matching minute strictly after `now`.
    pub fn next_after<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
        // Truncate in absolute time: an ambiguous local time (the repeated hour
        // when clocks fall back) must not be resolved again.
        let t = now + chrono::Duration::minutes(1);
        let sub_minute = chrono::Duration::seconds(i64::from(t.second()))
            + chrono::Duration::nanoseconds(i64::from(t.nanosecond()));
        let mut t = t - sub_minute;

        // Hard cap to avoid infinite loops for impossible expressions (e.g. Feb 31).
        let max_iters = 366usize * 24 * 60;
        for _ in 0..max_iters {
            if self.matches(&t) {
                return Some(t);
            }
            t += chrono::Duration::minutes(1);
        }
        None
    }
}

impl Field {
    fn parse(raw: &str, min: u32, max: u32, is_dow: bool) -> Result<Self> {
        let mut allowed = vec![false; (max + 1) as usize];
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (base, step) = match part.split_once('/') {
                Some((a, b)) => {
                    let step: u32 = b
                        .trim()
                        .parse()
                        .map_err(|_| Error::Cron(format!("invalid step: {b}")))?;
                    if step == 0 {
                        return Err(Error::Cron("step must be > 0".to_string()));
                    }
                    (a.trim(), Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                (parse_value(a, is_dow)?, parse_value(b, is_dow)?)
            } else {
                let a = parse_value(base, is_dow)?;
                if step.is_some() {
                    (a, max)
                } else {
                    (a, a)
                }
            };

            if start < min || end > max || start > end {
                return Err(Error::Cron(format!(
                    "{part:?} out of range {min}-{max}"
                )));
            }

            let step = step.unwrap_or(1);
            for v in (start..=end).step_by(step as usize) {
                allowed[v as usize] = true;
            }
        }

        if !(min..=max).any(|v| allowed[v as usize]) {
            return Err(Error::Cron(format!("empty field: {raw:?}")));
        }
        let any = (min..=max).all(|v| allowed[v as usize]);

        Ok(Self {
            min,
            max,
            any,
            allowed,
        })
    }

    fn contains(&self, v: u32) -> bool {
        if v < self.min || v > self.max {
            return false;
        }
        self.allowed.get(v as usize).copied().unwrap_or(false)
    }
}

/// Numbers, plus `sun`..`sat` and `7` (Sunday) in the day-of-week field.
fn parse_value(s: &str, is_dow: bool) -> Result<u32> {
    let s = s.trim();
    if is_dow {
        let lower = s.to_ascii_lowercase();
        if let Some(idx) = DOW_NAMES.iter().position(|n| *n == lower) {
            return Ok(idx as u32);
        }
    }
    let v: u32 = s
        .parse()
        .map_err(|_| Error::Cron(format!("invalid value: {s}")))?;
    if is_dow && v == 7 {
        return Ok(0);
    }
    Ok(v)
}

// === Tests ===

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attendance::tests::{ts, MemoryStore},
        domain::{MessageId, MessageRef},
        messaging::types::MessagingCapabilities,
        store::ShiftRecord,
    };
    use async_trait::async_trait;
    use chrono::{FixedOffset, LocalResult, NaiveDate, NaiveDateTime};

    #[derive(Default)]
    struct FakeMessenger {
        max_len: usize,
        sends: std::sync::Mutex<Vec<(ChatId, String)>>,
    }

    impl FakeMessenger {
        fn sent(&self) -> Vec<(ChatId, String)> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: if self.max_len == 0 { 4096 } else { self.max_len },
            }
        }

        async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
            let mut sends = self.sends.lock().unwrap();
            sends.push((chat_id, html.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(sends.len() as i32),
            })
        }
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn scheduler(
        records: Vec<ShiftRecord>,
        messenger: Arc<FakeMessenger>,
    ) -> WeeklyReportScheduler<MemoryStore> {
        let tracker = AttendanceTracker::new(MemoryStore {
            records,
            ..Default::default()
        });
        WeeklyReportScheduler::new(
            CronExpr::parse("0 18 * * 5").unwrap(),
            Arc::new(Mutex::new(tracker)),
            messenger,
            ChatId(-100),
            40.0,
        )
    }

    #[test]
    fn cron_expr_parses_and_matches_basic() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        assert!(expr.matches(&local(2026, 1, 1, 10, 0, 0)));
        assert!(!expr.matches(&local(2026, 1, 1, 10, 1, 0)));
    }

    #[test]
    fn cron_expr_next_after_finds_next_minute_boundary() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        let next = expr.next_after(local(2026, 1, 1, 10, 1, 30)).unwrap();
        assert_eq!(next.minute(), 5);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn friday_evening_is_next_fire() {
        let expr = CronExpr::parse("0 18 * * fri").unwrap();
        // Monday 2024-06-03 -> Friday 2024-06-07 18:00.
        let next = expr.next_after(local(2024, 6, 3, 9, 0, 0)).unwrap();
        assert_eq!(next, local(2024, 6, 7, 18, 0, 0));

        // Exactly at the fire instant, the next run is a week later.
        let after = expr.next_after(local(2024, 6, 7, 18, 0, 0)).unwrap();
        assert_eq!(after, local(2024, 6, 14, 18, 0, 0));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(CronExpr::parse("0 18 * *").is_err());
        assert!(CronExpr::parse("0 24 * * 5").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("0 18 * * someday").is_err());
        assert!(CronExpr::parse("0 18 5-1 * *").is_err());
    }

    #[test]
    fn sunday_accepts_seven_and_name() {
        let a = CronExpr::parse("0 9 * * 7").unwrap();
        let b = CronExpr::parse("0 9 * * SUN").unwrap();
        let sunday = local(2024, 6, 9, 9, 0, 0);
        assert!(a.matches(&sunday));
        assert!(b.matches(&sunday));
    }

    /// US Eastern around the 2024 fall-back: UTC-4 until 2024-11-03 06:00 UTC,
    /// UTC-5 after, so local 01:00-02:00 that night happens twice.
    #[derive(Clone, Copy, Debug)]
    struct FallBackZone;

    impl FallBackZone {
        fn edt() -> FixedOffset {
            FixedOffset::west_opt(4 * 3600).unwrap()
        }

        fn est() -> FixedOffset {
            FixedOffset::west_opt(5 * 3600).unwrap()
        }

        fn switch_utc() -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2024, 11, 3)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap()
        }
    }

    impl TimeZone for FallBackZone {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            FallBackZone
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let valid: Vec<FixedOffset> = [Self::edt(), Self::est()]
                .into_iter()
                .filter(|off| self.offset_from_utc_datetime(&(*local - *off)) == *off)
                .collect();
            match valid.as_slice() {
                [] => LocalResult::None,
                [one] => LocalResult::Single(*one),
                [early, late, ..] => LocalResult::Ambiguous(*early, *late),
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc < Self::switch_utc() {
                Self::edt()
            } else {
                Self::est()
            }
        }
    }

    #[test]
    fn next_run_is_found_during_repeated_hour() {
        let expr = CronExpr::parse("0 18 * * 5").unwrap();

        // 2024-11-03 01:30 EDT, first pass through the repeated hour.
        let first = FallBackZone.timestamp_opt(1_730_611_800, 0).unwrap();
        assert!(matches!(
            FallBackZone.from_local_datetime(&first.naive_local()),
            LocalResult::Ambiguous(..)
        ));
        let next = expr.next_after(first).unwrap();
        assert_eq!(next, FallBackZone.with_ymd_and_hms(2024, 11, 8, 18, 0, 0).unwrap());
        assert_eq!(next.offset(), &FallBackZone::est());

        // 01:30:45 EST, second pass, with a sub-minute remainder to drop.
        let second = FallBackZone.timestamp_opt(1_730_615_445, 0).unwrap();
        assert_eq!(expr.next_after(second), Some(next));

        let hourly = CronExpr::parse("0 * * * *").unwrap();
        assert_eq!(
            hourly.next_after(first).unwrap().timestamp(),
            1_730_613_600
        );
    }

    #[tokio::test]
    async fn fire_sends_report_to_report_chat() {
        let messenger = Arc::new(FakeMessenger::default());
        let records = vec![ShiftRecord::closed(
            "Alice",
            ts("2024-06-03 09:00:00"),
            ts("2024-06-03 17:30:00"),
        )];
        let s = scheduler(records, messenger.clone());

        s.fire(local(2024, 6, 7, 18, 0, 0)).await.unwrap();

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId(-100));
        assert!(sent[0]
            .1
            .contains("Alice worked only 8.50 hours. Minimum required: 40."));
    }

    #[tokio::test]
    async fn next_run_skips_instant_already_fired() {
        let messenger = Arc::new(FakeMessenger::default());
        let s = scheduler(Vec::new(), messenger.clone());

        let friday = local(2024, 6, 7, 18, 0, 0);
        let early = local(2024, 6, 7, 17, 59, 59);
        assert_eq!(s.next_run(early).await, Some(friday));

        s.fire(friday).await.unwrap();
        // A timer that woke up a little early must not fire the same Friday again.
        assert_eq!(
            s.next_run(early).await,
            Some(local(2024, 6, 14, 18, 0, 0))
        );
        assert_eq!(
            messenger.sent()[0].1,
            "📊 <b>Weekly Work Report</b> 📊\nNo records found for this week."
        );
    }

    #[tokio::test]
    async fn long_report_is_split_to_messenger_limit() {
        let messenger = Arc::new(FakeMessenger {
            max_len: 120,
            ..Default::default()
        });
        let records = (0..10)
            .map(|i| {
                ShiftRecord::closed(
                    &format!("employee-{i}"),
                    ts("2024-06-04 09:00:00"),
                    ts("2024-06-04 17:00:00"),
                )
            })
            .collect();
        let s = scheduler(records, messenger.clone());

        s.deliver(local(2024, 6, 7, 18, 0, 0)).await.unwrap();

        let sent = messenger.sent();
        assert!(sent.len() > 1);
        assert!(sent.iter().all(|(_, html)| html.len() <= 120));
        let all = sent
            .iter()
            .map(|(_, html)| html.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(all.matches("worked only 8.00 hours").count(), 10);
    }

    #[tokio::test]
    async fn start_and_stop_toggle_running_state() {
        let messenger = Arc::new(FakeMessenger::default());
        let s = scheduler(Vec::new(), messenger.clone());

        s.start().await;
        s.start().await;
        assert!(s.is_running().await);

        s.stop().await;
        assert!(!s.is_running().await);
        assert!(messenger.sent().is_empty());
    }
}
