//! Background scheduler loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use holdfast_core::ActorHost;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run `ActorHost::tick` every `interval` on the blocking pool.
pub fn spawn(host: Arc<ActorHost>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let host = host.clone();
            match tokio::task::spawn_blocking(move || host.tick(Utc::now())).await {
                Ok(Ok(report)) if report.fired > 0 || report.failed > 0 => {
                    tracing::info!(
                        fired = report.fired,
                        failed = report.failed,
                        skipped = report.skipped,
                        "scheduler tick"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "scheduler tick failed"),
                Err(e) => tracing::error!("scheduler tick join error: {e}"),
            }
        }
    })
}
