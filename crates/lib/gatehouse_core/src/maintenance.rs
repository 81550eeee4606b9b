//! Periodic housekeeping: expired revocations and stale login attempts.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::auth::brute_force::BruteForceGuard;
use crate::auth::revocation::RevocationService;
use crate::auth::session::Authenticator;

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub revocations_swept: u64,
    pub attempts_purged: u64,
    /// Jobs that failed during the pass.
    pub failures: u32,
}

#[derive(Clone)]
pub struct Maintenance {
    revocations: RevocationService,
    guard: BruteForceGuard,
}

impl Maintenance {
    pub fn new(revocations: RevocationService, guard: BruteForceGuard) -> Self {
        Self { revocations, guard }
    }

    pub fn for_authenticator(auth: &Authenticator) -> Self {
        Self::new(auth.revocations().clone(), auth.guard().clone())
    }

    /// Run both jobs once. A failing job does not stop the other.
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.revocations.sweep().await {
            Ok(n) => report.revocations_swept = n,
            Err(e) => {
                error!(error = %e, "revocation sweep failed");
                report.failures += 1;
            }
        }

        match self.guard.cleanup_stale().await {
            Ok(n) => report.attempts_purged = n,
            Err(e) => {
                error!(error = %e, "login attempt cleanup failed");
                report.failures += 1;
            }
        }

        info!(
            revocations_swept = report.revocations_swept,
            attempts_purged = report.attempts_purged,
            failures = report.failures,
            "maintenance pass finished"
        );
        report
    }

    /// Run a pass now and then every `every` until the task is aborted.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
