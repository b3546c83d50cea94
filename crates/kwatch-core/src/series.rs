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

//! Chart series for the dashboard, with a demo fallback when no readings exist.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rand::Rng;

use kwatch_types::Sample;
use kwatch_types::api::{DataSource, Period, SeriesResponse};

/// Points in a demo series.
pub const DEMO_POINTS: usize = 30;

/// Demo readings never drop below this.
const DEMO_FLOOR_W: f64 = 30.0;

/// Synthetic office-shaped load, one value per hour starting at midnight.
pub fn demo_series<R: Rng>(points: usize, rng: &mut R) -> Vec<f64> {
    (0..points)
        .map(|i| {
            let hour = i % 24;
            let power: i32 = match hour {
                7..=9 => 180 + rng.gen_range(-30..=80),
                10..=16 => 220 + rng.gen_range(-30..=80),
                17..=21 => 140 + rng.gen_range(-30..=60),
                _ => 60 + rng.gen_range(-20..=40),
            };
            f64::from(power).max(DEMO_FLOOR_W)
        })
        .collect()
}

/// One label per point, counting back one hour per point from `now`.
pub fn hourly_labels(period: Period, count: usize, now: DateTime<Utc>, tz: Tz) -> Vec<String> {
    let local_now = now.with_timezone(&tz);
    (0..count)
        .rev()
        .map(|back| {
            let back = i64::try_from(back).unwrap_or(i64::MAX);
            (local_now - Duration::hours(back))
                .format(period.label_format())
                .to_string()
        })
        .collect()
}

/// Labels taken from the samples' own timestamps.
pub fn sample_labels(period: Period, samples: &[Sample], tz: Tz) -> Vec<String> {
    samples
        .iter()
        .map(|s| {
            s.timestamp
                .with_timezone(&tz)
                .format(period.label_format())
                .to_string()
        })
        .collect()
}

/// Series built from stored readings.
pub fn from_samples(period: Period, samples: &[Sample], tz: Tz) -> SeriesResponse {
    let data: Vec<f64> = samples.iter().map(|s| s.power).collect();
    SeriesResponse {
        success: true,
        period,
        labels: sample_labels(period, samples, tz),
        total_records: data.len(),
        interpretation: period.interpretation(data.len()),
        data,
        source: DataSource::Database,
        error: None,
    }
}

/// Demo series, used when the window is empty or the store failed.
///
/// `error` is set for the storage-failure case, which also flips `success`
/// and reports the `error_fallback` source.
pub fn demo<R: Rng>(
    period: Period,
    now: DateTime<Utc>,
    tz: Tz,
    rng: &mut R,
    error: Option<String>,
) -> SeriesResponse {
    let data = demo_series(DEMO_POINTS, rng);
    let source = if error.is_some() {
        DataSource::ErrorFallback
    } else {
        DataSource::Demo
    };
    SeriesResponse {
        success: error.is_none(),
        period,
        labels: hourly_labels(period, data.len(), now, tz),
        total_records: data.len(),
        interpretation: period.interpretation(data.len()),
        data,
        source,
        error,
    }
}
