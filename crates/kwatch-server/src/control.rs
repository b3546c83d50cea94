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

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use kwatch_core::scheduling::{GroupStatus, TickReport};
use kwatch_types::ScheduleRule;
use kwatch_types::api::ErrorResponse;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RuleView {
    #[serde(flatten)]
    pub rule: ScheduleRule,
    /// Day name as shown to building operators
    pub day_name: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SchedulesResponse {
    pub success: bool,
    pub rules: Vec<RuleView>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub enabled: bool,
    pub interval_secs: u64,
    pub groups: Vec<GroupStatus>,
}

#[derive(Debug, Serialize)]
pub struct TickResponse {
    pub success: bool,
    pub reports: Vec<TickReport>,
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn schedules_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.list_rules() {
        Ok(rules) => {
            let rules = rules
                .into_iter()
                .map(|rule| RuleView {
                    day_name: rule.day_of_week.local_name(),
                    rule,
                })
                .collect();
            (
                StatusCode::OK,
                Json(SchedulesResponse {
                    success: true,
                    rules,
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to list schedule rules");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Database error")),
            )
                .into_response()
        }
    }
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        enabled: state.config.scheduler.enabled,
        interval_secs: state.config.scheduler.interval_secs,
        groups: state.gate.status(),
    })
}

/// Run one evaluation now. Groups with a tick already in flight report
/// `skipped`.
pub async fn tick_handler(State(state): State<AppState>) -> Json<TickResponse> {
    let reports = state.gate.tick(Utc::now()).await;
    info!(groups = reports.len(), "Manual scheduler tick");
    Json(TickResponse {
        success: true,
        reports,
    })
}
