// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of KWatch.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use kwatch_core::scheduling::{PushStatus, ScheduleGate, TickOutcome};

/// Periodic driver for the schedule gate.
#[derive(Debug)]
pub struct SchedulerService {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerService {
    pub fn start(gate: Arc<ScheduleGate>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = interval.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                for report in gate.tick(Utc::now()).await {
                    match &report.outcome {
                        TickOutcome::Skipped => {
                            debug!(group = %report.group, "Previous tick still running");
                        }
                        TickOutcome::Failed { error } => {
                            error!(group = %report.group, error = %error, "Scheduler tick failed");
                        }
                        TickOutcome::Evaluated {
                            push: PushStatus::Failed(e),
                            ..
                        } => {
                            warn!(group = %report.group, error = %e, "Relay push pending");
                        }
                        TickOutcome::Evaluated { .. } => {}
                    }
                }
            }

            info!("Scheduler stopped");
        });

        Self { stop_tx, handle }
    }

    /// Signal the loop and wait for the in-flight tick to finish.
    pub async fn stop(self) {
        // Receiver gone means the task already ended
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
}
