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

//! Windowed statistics over stored samples.
//!
//! Hour-of-day profiles superimpose every date in the window: a seven-day
//! window yields one bucket per hour, not 168.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Timelike};
use chrono_tz::Tz;
use serde::Serialize;

use kwatch_types::{DayOfWeek, Sample};

use crate::error::{PipelineError, Result};

/// Hours whose average exceeds this multiple of the overall average are peak hours.
pub const DEFAULT_PEAK_RATIO: f64 = 1.2;
/// Hours whose average is below this multiple of the overall average are off-peak.
pub const DEFAULT_OFF_PEAK_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowSummary {
    pub avg_power: f64,
    pub max_power: f64,
    pub min_power: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HourBucket {
    pub hour: u32,
    pub avg: f64,
    pub max: f64,
    pub min: f64,
    pub count: usize,
}

/// Per-hour statistics. Hours without samples are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HourlyProfile {
    pub hours: Vec<HourBucket>,
}

impl HourlyProfile {
    pub fn get(&self, hour: u32) -> Option<&HourBucket> {
        self.hours.iter().find(|b| b.hour == hour)
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }

    /// Mean of the populated hourly averages.
    pub fn overall_average(&self) -> Option<f64> {
        mean(self.hours.iter().map(|b| b.avg))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DayOfWeekBucket {
    pub day: DayOfWeek,
    pub avg_power: f64,
    pub peak_power: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub avg_power: f64,
    pub max_power: f64,
    pub min_power: f64,
    /// Average power held for a full day
    pub estimated_kwh: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonthlyProjection {
    pub avg_power: f64,
    /// Average power held for 30 days
    pub projected_kwh: f64,
    /// Average power over the span actually covered by the window
    pub observed_kwh: f64,
    pub observed_hours: f64,
}

pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn stats(powers: &[f64]) -> Option<(f64, f64, f64)> {
    let avg = mean(powers.iter().copied())?;
    let max = powers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = powers.iter().copied().fold(f64::INFINITY, f64::min);
    Some((avg, max, min))
}

/// Average, extremes and count of `power`.
pub fn summarize(samples: &[Sample]) -> Result<WindowSummary> {
    let powers: Vec<f64> = samples.iter().map(|s| s.power).collect();
    let (avg_power, max_power, min_power) = stats(&powers).ok_or(PipelineError::EmptyWindow)?;
    Ok(WindowSummary {
        avg_power,
        max_power,
        min_power,
        count: powers.len(),
    })
}

/// Group by local hour of day across all dates.
pub fn hourly_profile(samples: &[Sample], tz: Tz) -> HourlyProfile {
    let mut grouped: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for s in samples {
        let hour = s.timestamp.with_timezone(&tz).hour();
        grouped.entry(hour).or_default().push(s.power);
    }

    let hours = grouped
        .into_iter()
        .filter_map(|(hour, powers)| {
            let (avg, max, min) = stats(&powers)?;
            Some(HourBucket {
                hour,
                avg,
                max,
                min,
                count: powers.len(),
            })
        })
        .collect();

    HourlyProfile { hours }
}

/// Hours whose average is above `ratio` x the overall average.
pub fn peak_hours(profile: &HourlyProfile, ratio: f64) -> Vec<u32> {
    let Some(overall) = profile.overall_average() else {
        return Vec::new();
    };
    let threshold = overall * ratio;
    profile
        .hours
        .iter()
        .filter(|b| b.avg > threshold)
        .map(|b| b.hour)
        .collect()
}

/// Hours whose average is below `ratio` x the overall average.
pub fn off_peak_hours(profile: &HourlyProfile, ratio: f64) -> Vec<u32> {
    let Some(overall) = profile.overall_average() else {
        return Vec::new();
    };
    let threshold = overall * ratio;
    profile
        .hours
        .iter()
        .filter(|b| b.avg < threshold)
        .map(|b| b.hour)
        .collect()
}

/// Group by local day of week, Monday first.
pub fn weekday_profile(samples: &[Sample], tz: Tz) -> Vec<DayOfWeekBucket> {
    let mut grouped: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for s in samples {
        let weekday = s.timestamp.with_timezone(&tz).weekday();
        grouped
            .entry(weekday.num_days_from_monday())
            .or_default()
            .push(s.power);
    }

    grouped
        .into_iter()
        .filter_map(|(idx, powers)| {
            let day = *DayOfWeek::ALL.get(usize::try_from(idx).ok()?)?;
            let (avg, max, _) = stats(&powers)?;
            Some(DayOfWeekBucket {
                day,
                avg_power: avg,
                peak_power: max,
                count: powers.len(),
            })
        })
        .collect()
}

/// Per local date statistics, oldest first.
pub fn daily_summaries(samples: &[Sample], tz: Tz) -> Vec<DailySummary> {
    let mut grouped: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for s in samples {
        let date = s.timestamp.with_timezone(&tz).date_naive();
        grouped.entry(date).or_default().push(s.power);
    }

    grouped
        .into_iter()
        .filter_map(|(date, powers)| {
            let (avg, max, min) = stats(&powers)?;
            Some(DailySummary {
                date,
                avg_power: avg,
                max_power: max,
                min_power: min,
                estimated_kwh: avg / 1000.0 * 24.0,
                count: powers.len(),
            })
        })
        .collect()
}

/// Project the window's average power over a 30-day month.
pub fn monthly_projection(samples: &[Sample]) -> Result<MonthlyProjection> {
    let summary = summarize(samples)?;
    let observed_hours = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => {
            (last.timestamp - first.timestamp).num_seconds().max(0) as f64 / 3600.0
        }
        _ => 0.0,
    };
    let avg_kw = summary.avg_power / 1000.0;
    Ok(MonthlyProjection {
        avg_power: summary.avg_power,
        projected_kwh: avg_kw * 24.0 * 30.0,
        observed_kwh: avg_kw * observed_hours,
        observed_hours,
    })
}
