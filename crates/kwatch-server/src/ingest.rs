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
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::{info, warn};

use kwatch_core::ingest::normalize;
use kwatch_core::store::SampleStore;
use kwatch_types::SampleReading;
use kwatch_types::api::{ErrorResponse, IngestResponse};

use crate::{ApiError, AppState};

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn ingest_handler(
    State(state): State<AppState>,
    payload: Result<Json<SampleReading>, JsonRejection>,
) -> Response {
    let reading = match payload {
        Ok(Json(reading)) => reading,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Malformed sample payload");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse::new(rejection.body_text())),
            )
                .into_response();
        }
    };

    let sample = match normalize(reading, Utc::now(), state.tz, &state.config.ingest) {
        Ok(sample) => sample,
        Err(e) => {
            warn!(error = %e, "Sample rejected");
            return ApiError(e).into_response();
        }
    };
    let timestamp = sample.timestamp;
    let power = sample.power;

    match state.db.append(sample) {
        Ok(id) => {
            info!(id, %timestamp, power, "Sample stored");
            (
                StatusCode::CREATED,
                Json(IngestResponse {
                    success: true,
                    id: Some(id),
                    timestamp: Some(timestamp),
                    message: None,
                }),
            )
                .into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}
