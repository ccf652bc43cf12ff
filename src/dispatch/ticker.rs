//! Cron-driven background dispatch loop.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dispatch::dispatcher::Dispatcher;
use crate::error::ConfigError;

/// Longest single sleep between shutdown checks.
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Spawn the dispatch loop, running `run_due_batch` at every fire time of the
/// six-field cron `schedule`.
///
/// Returns the task handle and the dispatcher's cancel flag; setting the flag
/// stops the loop and any run in progress between sends.
pub fn spawn_dispatch_ticker(
    dispatcher: Arc<Dispatcher>,
    schedule: &str,
) -> Result<(JoinHandle<()>, Arc<AtomicBool>), ConfigError> {
    let schedule = cron::Schedule::from_str(schedule).map_err(|e| ConfigError::InvalidValue {
        key: "DRIP_DISPATCH_SCHEDULE".into(),
        message: format!("invalid cron: {e}"),
    })?;
    let shutdown = dispatcher.cancel_flag();
    let flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Dispatch ticker started");
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                info!("Dispatch schedule has no further fire times");
                break;
            };

            // Sleep in short slices so shutdown is noticed promptly.
            loop {
                if flag.load(Ordering::Relaxed) {
                    info!("Dispatch ticker stopped");
                    return;
                }
                let remaining = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(remaining.min(SHUTDOWN_POLL)).await;
            }

            match dispatcher.run_due_batch(Utc::now()).await {
                Ok(report) if report.cancelled => {
                    info!("Dispatch ticker stopped mid-run");
                    return;
                }
                Ok(_) => {}
                Err(e) => error!("Scheduled dispatch failed: {e}"),
            }
        }
    });

    Ok((handle, shutdown))
}
