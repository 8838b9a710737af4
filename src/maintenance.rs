//! Periodic housekeeping: expire lapsed subscriptions, fail abandoned checkouts.

use std::time::Duration;

use rusqlite::Connection;

use crate::db::{DbPool, queries};
use crate::error::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_subscriptions: usize,
    pub failed_payments: usize,
}

/// One maintenance pass. `pending_ttl_hours` bounds how long a website
/// checkout may stay pending.
pub fn run_maintenance(conn: &Connection, now: i64, pending_ttl_hours: i64) -> Result<MaintenanceReport> {
    let expired_subscriptions = queries::expire_lapsed_subscriptions(conn, now)?;
    let failed_payments =
        queries::fail_stale_pending_payments(conn, now - pending_ttl_hours.max(1) * 3600)?;

    Ok(MaintenanceReport {
        expired_subscriptions,
        failed_payments,
    })
}

pub fn spawn_maintenance_task(db: DbPool, interval_secs: u64, pending_ttl_hours: i64) {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let conn = match db.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to get db connection for maintenance: {}", e);
                    continue;
                }
            };

            match run_maintenance(&conn, queries::now(), pending_ttl_hours) {
                Ok(report) => {
                    if report != MaintenanceReport::default() {
                        tracing::info!(
                            expired_subscriptions = report.expired_subscriptions,
                            failed_payments = report.failed_payments,
                            "Maintenance pass"
                        );
                    }
                }
                Err(e) => tracing::warn!("Maintenance pass failed: {}", e),
            }
        }
    });

    tracing::info!(
        "Background maintenance task started (runs every {} seconds)",
        interval.as_secs()
    );
}
