use chrono::Utc;
use cron::Schedule;
use log::{error, info};
use std::str::FromStr;
use std::sync::Arc;

use crate::pipeline::pg::PgStore;
use crate::pipeline::sla::run_sla_scan;
use crate::shared::state::AppState;

/// Spawns the recurring SLA scan on the configured cron schedule. The scan
/// is fire-and-forget: results are logged, failures never stop the loop,
/// and the per-day notification dedup makes overlapping or repeated runs
/// harmless.
pub fn spawn_sla_monitor(
    state: Arc<AppState>,
) -> Result<tokio::task::JoinHandle<()>, cron::error::Error> {
    let schedule = Schedule::from_str(&state.config.pipeline.sla_cron)?;
    let expr = state.config.pipeline.sla_cron.clone();

    let handle = tokio::spawn(async move {
        info!("SLA monitor scheduled with cron \"{expr}\"");
        loop {
            let now = Utc::now();
            let Some(next) = schedule.after(&now).next() else {
                error!("SLA cron \"{expr}\" yields no future runs, monitor stopped");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            run_scan_once(&state);
        }
    });

    Ok(handle)
}

fn run_scan_once(state: &AppState) {
    let mut conn = match state.conn.get() {
        Ok(conn) => conn,
        Err(e) => {
            error!("SLA scan skipped, connection pool unavailable: {e}");
            return;
        }
    };
    let mut store = PgStore::new(&mut conn);

    match run_sla_scan(&mut store, Utc::now()) {
        Ok(report) => info!(
            "SLA scan finished: {} scanned, {} breached, {} notified, {} duplicates, {} errors",
            report.scanned,
            report.breached,
            report.notified,
            report.skipped_duplicate,
            report.errors
        ),
        Err(e) => error!("SLA scan failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use cron::Schedule;
    use std::str::FromStr;

    #[test]
    fn default_sla_cron_parses_and_recurs() {
        let schedule = Schedule::from_str("0 0 * * * *").unwrap();
        let mut upcoming = schedule.upcoming(chrono::Utc);
        let first = upcoming.next().unwrap();
        let second = upcoming.next().unwrap();
        assert_eq!(second - first, chrono::Duration::hours(1));
    }
}
