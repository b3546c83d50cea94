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

//! Forecast and usage-analysis endpoints.

use std::ops::RangeInclusive;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kwatch_core::PipelineError;
use kwatch_core::analysis::{UsageAnalysis, usage_analysis};
use kwatch_core::store::SampleStore;
use kwatch_types::forecast::{ForecastAlgorithm, ForecastResult, LinearProjection};

use crate::{ApiError, AppState, bad_request};

const HOURS_AHEAD: RangeInclusive<u32> = 1..=168;

#[derive(Debug, Deserialize)]
pub struct PredictionQuery {
    pub algorithm: Option<String>,
    pub hours_ahead: Option<u32>,
    pub location: Option<String>,
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    pub location: Option<String>,
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub forecast: ForecastResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<LinearProjection>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(flatten)]
    pub analysis: UsageAnalysis,
}

fn location(raw: Option<&str>) -> Option<&str> {
    raw.filter(|l| !l.trim().is_empty())
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn predictions_handler(
    State(state): State<AppState>,
    Query(query): Query<PredictionQuery>,
) -> Response {
    let algorithm = match query.algorithm.as_deref() {
        None | Some("") => ForecastAlgorithm::default(),
        Some(raw) => match raw.parse::<ForecastAlgorithm>() {
            Ok(algorithm) => algorithm,
            Err(e) => return bad_request(e),
        },
    };
    let hours_ahead = query.hours_ahead.unwrap_or(1);
    if !HOURS_AHEAD.contains(&hours_ahead) {
        return bad_request(format!(
            "hours_ahead must be between {} and {}",
            HOURS_AHEAD.start(),
            HOURS_AHEAD.end()
        ));
    }

    let now = Utc::now();
    let (start, end) = state.window(query.days, now);
    let window = match state.db.query(start, end, location(query.location.as_deref())) {
        Ok(window) => window,
        Err(e) => return ApiError(e).into_response(),
    };
    let samples = window.as_slice();

    let forecast = match state.forecaster.forecast(algorithm, samples, hours_ahead, now) {
        Ok(forecast) => forecast,
        // Seasonal over nothing is still a data shortage to the caller
        Err(PipelineError::EmptyWindow) => {
            return ApiError(PipelineError::InsufficientData {
                required: 1,
                available: 0,
            })
            .into_response();
        }
        Err(e) => return ApiError(e).into_response(),
    };

    let projection = if algorithm == ForecastAlgorithm::LinearRegression {
        match state
            .forecaster
            .project_linear(samples, state.config.analysis.projection_steps, now)
        {
            Ok(projection) => Some(projection),
            Err(e) => return ApiError(e).into_response(),
        }
    } else {
        None
    };

    info!(
        algorithm = %algorithm,
        hours_ahead,
        data_points = forecast.data_points,
        predicted_power = forecast.predicted_power,
        "Forecast served"
    );

    (
        StatusCode::OK,
        Json(PredictionResponse {
            success: true,
            forecast,
            projection,
        }),
    )
        .into_response()
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn analysis_handler(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let now = Utc::now();
    let (start, end) = state.window(query.days, now);
    let window = state
        .db
        .query(start, end, location(query.location.as_deref()))?;

    let analysis = usage_analysis(
        window.as_slice(),
        &state.forecaster,
        &state.config.analysis,
        state.tz,
        now,
    )?;
    debug!(
        samples = window.len(),
        confidence = analysis.overall_confidence,
        "Usage analysis computed"
    );

    Ok(Json(AnalysisResponse {
        success: true,
        analysis,
    }))
}
