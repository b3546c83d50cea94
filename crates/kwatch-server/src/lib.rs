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

//! HTTP service for the building telemetry pipeline.

pub mod config;
pub mod control;
pub mod db;
pub mod ingest;
pub mod insights;
pub mod query;
pub mod scheduler;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use kwatch_core::PipelineError;
use kwatch_core::forecast::Forecaster;
use kwatch_core::relay::RelaySink;
use kwatch_core::scheduling::{ScheduleGate, ScheduleSource};
use kwatch_types::api::ErrorResponse;

use crate::config::ServerConfig;
use crate::db::Database;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<ServerConfig>,
    pub forecaster: Arc<Forecaster>,
    pub gate: Arc<ScheduleGate>,
    pub tz: Tz,
}

impl AppState {
    pub fn new(
        config: Arc<ServerConfig>,
        db: Arc<Database>,
        sink: Arc<dyn RelaySink>,
    ) -> anyhow::Result<Self> {
        let tz = config.timezone()?;
        let forecaster = Arc::new(Forecaster::new(config.forecast.clone(), tz));
        let source = Arc::clone(&db) as Arc<dyn ScheduleSource>;
        let gate = Arc::new(ScheduleGate::new(
            config.scheduler.groups.clone(),
            source,
            sink,
            config.scheduler.sink_timeout(),
            tz,
        ));

        Ok(Self {
            db,
            config,
            forecaster,
            gate,
            tz,
        })
    }

    /// `[now - days, now]`, with `days` falling back to the configured default.
    pub fn window(&self, days: Option<u32>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let days = days
            .filter(|d| *d > 0)
            .unwrap_or(self.config.building.default_query_days);
        (now - Duration::days(i64::from(days)), now)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/samples",
            post(ingest::ingest_handler).get(query::samples_handler),
        )
        .route("/api/samples/latest", get(query::latest_handler))
        .route("/api/series", get(query::series_handler))
        .route("/api/summary", get(query::summary_handler))
        .route("/api/daily", get(query::daily_handler))
        .route("/api/predictions", get(insights::predictions_handler))
        .route("/api/analysis", get(insights::analysis_handler))
        .route("/api/schedules", get(control::schedules_handler))
        .route("/api/scheduler/status", get(control::status_handler))
        .route("/api/scheduler/tick", post(control::tick_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Pipeline failure rendered as `{success: false, message}`.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::InvalidSample { .. } | PipelineError::InvalidTimestamp(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::InsufficientData { .. } => StatusCode::BAD_REQUEST,
            PipelineError::EmptyWindow => StatusCode::NOT_FOUND,
            PipelineError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

pub(crate) fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}
