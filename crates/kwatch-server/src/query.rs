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

//! Read-side endpoints: raw windows, chart series and aggregates.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use kwatch_core::aggregation::{
    self, DailySummary, DayOfWeekBucket, HourlyProfile, MonthlyProjection, WindowSummary,
};
use kwatch_core::ingest::parse_timestamp;
use kwatch_core::series;
use kwatch_core::store::SampleStore;
use kwatch_types::Sample;
use kwatch_types::api::{ErrorResponse, Period};

use crate::{ApiError, AppState};

/// Raw window when the caller gives no bounds.
const DEFAULT_RAW_WINDOW_HOURS: i64 = 24;

/// Daily breakdowns look back a month unless told otherwise.
const DEFAULT_DAILY_DAYS: u32 = 30;

#[derive(Debug, Deserialize)]
pub struct RawQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub period: Option<Period>,
    pub location: Option<String>,
    pub days: Option<u32>,
}

impl WindowQuery {
    /// Explicit `days`, else the period's span when a period was given.
    fn days(&self) -> Option<u32> {
        self.days.or_else(|| self.period.map(Period::days))
    }

    fn location(&self) -> Option<&str> {
        self.location.as_deref().filter(|l| !l.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct SamplesResponse {
    pub success: bool,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
    pub data: Vec<Sample>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub success: bool,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: WindowSummary,
    pub hourly: HourlyProfile,
    pub peak_hours: Vec<u32>,
    pub off_peak_hours: Vec<u32>,
    pub weekdays: Vec<DayOfWeekBucket>,
}

#[derive(Debug, Serialize)]
pub struct DailyResponse {
    pub success: bool,
    pub days: Vec<DailySummary>,
    pub monthly: Option<MonthlyProjection>,
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn samples_handler(
    State(state): State<AppState>,
    Query(query): Query<RawQuery>,
) -> Result<Json<SamplesResponse>, ApiError> {
    let now = Utc::now();
    let end = match query.end.as_deref() {
        Some(raw) => parse_timestamp(raw, state.tz)?,
        None => now,
    };
    let start = match query.start.as_deref() {
        Some(raw) => parse_timestamp(raw, state.tz)?,
        None => end - Duration::hours(DEFAULT_RAW_WINDOW_HOURS),
    };

    let location = query.location.as_deref().filter(|l| !l.trim().is_empty());
    let window = state.db.query(start, end, location)?;
    debug!(count = window.len(), %start, %end, "Raw window queried");

    Ok(Json(SamplesResponse {
        success: true,
        start,
        end,
        count: window.len(),
        data: window.as_slice().to_vec(),
    }))
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn latest_handler(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Response {
    match state.db.latest(query.location()) {
        Ok(Some(sample)) => (StatusCode::OK, Json(sample)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("No readings recorded yet")),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Chart series. Never fails: an empty window serves demo data and a storage
/// error serves demo data flagged as a fallback.
#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn series_handler(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> impl IntoResponse {
    let period = query.period.unwrap_or_default();
    let now = Utc::now();
    let (start, end) = state.window(query.days(), now);

    let response = match state.db.query(start, end, query.location()) {
        Ok(window) if !window.is_empty() => series::from_samples(period, window.as_slice(), state.tz),
        Ok(_) => {
            debug!(?period, "No readings in window, serving demo series");
            series::demo(period, now, state.tz, &mut rand::thread_rng(), None)
        }
        Err(e) => {
            warn!(error = %e, "Series query failed, serving demo series");
            series::demo(
                period,
                now,
                state.tz,
                &mut rand::thread_rng(),
                Some(e.to_string()),
            )
        }
    };

    (StatusCode::OK, Json(response))
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn summary_handler(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let (start, end) = state.window(query.days(), Utc::now());
    let window = state.db.query(start, end, query.location())?;
    let samples = window.as_slice();

    let summary = aggregation::summarize(samples)?;
    let hourly = aggregation::hourly_profile(samples, state.tz);
    let analysis = &state.config.analysis;

    Ok(Json(SummaryResponse {
        success: true,
        start,
        end,
        summary,
        peak_hours: aggregation::peak_hours(&hourly, analysis.peak_ratio),
        off_peak_hours: aggregation::off_peak_hours(&hourly, analysis.off_peak_ratio),
        weekdays: aggregation::weekday_profile(samples, state.tz),
        hourly,
    }))
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
pub async fn daily_handler(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<DailyResponse>, ApiError> {
    let days = query.days.or(Some(DEFAULT_DAILY_DAYS));
    let (start, end) = state.window(days, Utc::now());
    let window = state.db.query(start, end, query.location())?;

    let monthly = if window.is_empty() {
        None
    } else {
        Some(aggregation::monthly_projection(window.as_slice())?)
    };

    Ok(Json(DailyResponse {
        success: true,
        days: aggregation::daily_summaries(window.as_slice(), state.tz),
        monthly,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_query_days() {
        let q = WindowQuery {
            period: Some(Period::Bulanan),
            ..WindowQuery::default()
        };
        assert_eq!(q.days(), Some(30));

        let q = WindowQuery {
            period: Some(Period::Mingguan),
            days: Some(2),
            ..WindowQuery::default()
        };
        assert_eq!(q.days(), Some(2));

        assert_eq!(WindowQuery::default().days(), None);
    }

    #[test]
    fn test_blank_location_is_ignored() {
        let q = WindowQuery {
            location: Some("  ".to_owned()),
            ..WindowQuery::default()
        };
        assert_eq!(q.location(), None);
    }
}
