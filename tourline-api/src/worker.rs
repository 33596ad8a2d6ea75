use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use tourline_booking::{JobRunner, JobTrigger};
use tourline_store::app_config::SchedulerConfig;

/// Feeds the job runner from two interval tickers. The first tick of each
/// fires immediately, so the horizon is topped up at startup.
pub async fn start_job_worker(runner: JobRunner, scheduler: SchedulerConfig) {
    let (tx, rx) = mpsc::channel(16);

    spawn_ticker(
        tx.clone(),
        JobTrigger::SlotHorizon,
        Duration::from_secs(scheduler.horizon_interval_secs),
    );
    spawn_ticker(
        tx,
        JobTrigger::CompletionSweep,
        Duration::from_secs(scheduler.completion_interval_secs),
    );

    info!(
        "Job worker started (horizon every {}s, completion sweep every {}s)",
        scheduler.horizon_interval_secs, scheduler.completion_interval_secs
    );
    runner.run(rx).await;
}

fn spawn_ticker(tx: mpsc::Sender<JobTrigger>, trigger: JobTrigger, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = tx.send(trigger).await {
                warn!("Job runner gone, stopping {:?} ticker: {}", trigger, e);
                break;
            }
        }
    });
}
