use std::sync::Arc;

use tokio::sync::Mutex;

use atb_core::{attendance::AttendanceTracker, config::Config, store::CsvShiftStore};

#[tokio::main]
async fn main() -> Result<(), atb_core::Error> {
    atb_core::logging::init("atb")?;

    let cfg = Arc::new(Config::load()?);

    // A malformed table stops startup here; rewriting it later would drop rows.
    let store = CsvShiftStore::open(&cfg.attendance_file)?;
    let tracker = Arc::new(Mutex::new(AttendanceTracker::new(store)));

    atb_telegram::router::run_polling(cfg, tracker)
        .await
        .map_err(|e| atb_core::Error::External(format!("telegram bot failed: {e}")))?;

    tracing::info!("attendance bot stopped");
    Ok(())
}
