use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use atb_core::{
    config::Config,
    domain::ChatId,
    messaging::port::MessagingPort,
    scheduler::{SharedTracker, WeeklyReportScheduler},
    store::CsvShiftStore,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub tracker: SharedTracker<CsvShiftStore>,
    pub messenger: Arc<dyn MessagingPort>,
    pub scheduler: WeeklyReportScheduler<CsvShiftStore>,
}

pub async fn run_polling(
    cfg: Arc<Config>,
    tracker: SharedTracker<CsvShiftStore>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Basic startup info.
    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "attendance bot started"),
        Err(e) => tracing::warn!(error = %e, "could not fetch bot identity"),
    }
    tracing::info!(
        file = %cfg.attendance_file.display(),
        allowed_users = cfg.telegram_allowed_users.len(),
        "attendance store ready"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let scheduler = WeeklyReportScheduler::new(
        cfg.report_schedule.clone(),
        tracker.clone(),
        messenger.clone(),
        ChatId(cfg.report_chat_id),
        cfg.min_weekly_hours,
    );
    scheduler.start().await;

    let state = Arc::new(AppState {
        cfg,
        tracker,
        messenger,
        scheduler: scheduler.clone(),
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    scheduler.stop().await;
    Ok(())
}
