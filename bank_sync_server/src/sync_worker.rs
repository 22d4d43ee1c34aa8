use bank_providers::AnyProvider;
use bank_sync_engine::{ConnectionApi, SqliteDatabase, SyncOrchestrator};
use chrono::Duration;
use log::*;
use tokio::task::JoinHandle;

/// Starts the scheduled sync worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Every `interval`, unfinished authorization attempts past their timeout are expired and every live connection is
/// synced. The first run starts straight away.
pub fn start_sync_worker(
    orchestrator: SyncOrchestrator<SqliteDatabase, AnyProvider>,
    connections: ConnectionApi<SqliteDatabase, AnyProvider>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = interval.to_std().unwrap_or(std::time::Duration::from_secs(6 * 3600));
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("🕰️ Sync worker started. Syncing every {} minutes.", interval.num_minutes());
        loop {
            timer.tick().await;
            match connections.expire_stale_authorizations().await {
                Ok(n) => debug!("🕰️ {n} stale authorization attempts expired"),
                Err(e) => error!("🕰️ Error expiring stale authorization attempts: {e}"),
            }
            info!("🕰️ Running scheduled sync");
            let report = orchestrator.run_all().await;
            info!(
                "🕰️ Scheduled sync finished. {} connection(s) synced, {} transaction(s) matched",
                report.connections.len(),
                report.total_matched()
            );
        }
    })
}
