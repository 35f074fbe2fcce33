//! Daily schedule computation and the recurring trigger loop.
//!
//! The schedule space is one run per day at a configured hour and minute, so
//! the next-run computation is an explicit function instead of a cron engine.
//! Scheduling again replaces whatever loop was active before.

use crate::config::ScheduleConfig;
use crate::services::runner::MirrorRunner;
use chrono::{DateTime, Days, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The instant the next scheduled run should fire.
///
/// Today at hour:minute if that is still ahead of `now`; otherwise tomorrow at
/// the same wall-clock time. An instant exactly equal to `now` counts as
/// passed, so a run finishing within its own minute cannot re-trigger itself.
pub fn next_run_instant(schedule: &ScheduleConfig, now: DateTime<Local>) -> DateTime<Local> {
    let time = NaiveTime::from_hms_opt(schedule.hour, schedule.minute, 0)
        .unwrap_or(NaiveTime::MIN);

    let today = now.date_naive().and_time(time);
    if let Some(target) = resolve_local(today) {
        if target > now {
            return target;
        }
    }

    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .map(|d| d.and_time(time))
        .and_then(resolve_local);
    // skipped or ambiguous wall-clock times (DST) fall back to a plain day
    tomorrow.unwrap_or_else(|| now + chrono::TimeDelta::hours(24))
}

fn resolve_local(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

struct ActiveSchedule {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the recurring trigger loop.
pub struct Scheduler {
    runner: Arc<MirrorRunner>,
    active: Mutex<Option<ActiveSchedule>>,
}

impl Scheduler {
    pub fn new(runner: Arc<MirrorRunner>) -> Self {
        Self {
            runner,
            active: Mutex::new(None),
        }
    }

    /// Apply a schedule, replacing any previous one. A disabled schedule just
    /// cancels whatever was active.
    pub async fn schedule(&self, config: &ScheduleConfig, shutdown: &CancellationToken) {
        self.cancel_active().await;

        if !config.enabled {
            tracing::info!("Schedule disabled, no recurring runs");
            return;
        }

        let token = shutdown.child_token();
        let loop_token = token.clone();
        let runner = self.runner.clone();
        let config = config.clone();

        let handle = tokio::spawn(async move {
            run_loop(runner, config, loop_token).await;
        });

        let mut active = self.active.lock().await;
        *active = Some(ActiveSchedule { token, handle });
    }

    /// Stop the recurring loop and wait for it to wind down.
    pub async fn shutdown(&self) {
        self.cancel_active().await;
    }

    async fn cancel_active(&self) {
        let prior = self.active.lock().await.take();
        if let Some(prior) = prior {
            prior.token.cancel();
            let _ = prior.handle.await;
        }
    }
}

async fn run_loop(runner: Arc<MirrorRunner>, config: ScheduleConfig, token: CancellationToken) {
    loop {
        let now = Local::now();
        let next = next_run_instant(&config, now);
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        tracing::info!(at = %next.format("%Y-%m-%d %H:%M"), "Next scheduled mirror run");

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                if let Err(e) = runner.run_scheduled(&token).await {
                    tracing::error!(error = %e, "Scheduled mirror run failed");
                }
            }
        }
    }
    tracing::info!("Schedule loop stopped");
}
