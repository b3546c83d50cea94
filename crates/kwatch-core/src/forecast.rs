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

//! Short-horizon power forecasting.
//!
//! Three estimators share one [`Forecaster`]:
//!
//! - **Linear**: ordinary least squares on `(index, power)`. The x axis is the
//!   sample's position in the window, not wall-clock time, so unevenly spaced
//!   samples bias the slope. Callers that need time-weighted regression should
//!   resample first.
//! - **Seasonal**: the historical average for the target local hour. A weak
//!   estimator with a fixed nominal confidence.
//! - **Ensemble**: the two above blended, weighted by the linear fit's R².

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use kwatch_types::Sample;
use kwatch_types::forecast::{
    AccuracyLevel, ForecastAlgorithm, ForecastResult, LinearProjection, ProjectionPoint,
};

use crate::aggregation::hourly_profile;
use crate::error::{PipelineError, Result};

/// Fewest samples a regression is ever fitted on.
pub const MIN_REGRESSION_POINTS: usize = 3;

/// Longest forecast step accepted, one week.
pub const MAX_STEP_SECS: u64 = 7 * 24 * 3600;

/// Building-specific forecast calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Minimum samples for a linear fit. Values below 3 are raised to 3.
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    /// Most recent samples used by the multi-step projection.
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    #[serde(default = "default_clamp_min_w")]
    pub clamp_min_w: f64,
    #[serde(default = "default_clamp_max_w")]
    pub clamp_max_w: f64,
    #[serde(default = "default_seasonal_confidence")]
    pub seasonal_confidence: f64,
    /// Weight given to the seasonal estimate in the ensemble, and to the linear
    /// estimate when its R² is undefined.
    #[serde(default = "default_fallback_weight")]
    pub fallback_weight: f64,
    /// Length of one forecast step.
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    /// Projection confidence lost per step ahead (0.02 = 2 %).
    #[serde(default = "default_confidence_decay")]
    pub confidence_decay_per_step: f64,
    /// Load multiplier per local hour, 0 = midnight.
    #[serde(default = "default_hourly_load_factors")]
    pub hourly_load_factors: [f64; 24],
    /// Load multiplier per weekday, Monday first.
    #[serde(default = "default_daily_load_factors")]
    pub daily_load_factors: [f64; 7],
}

fn default_min_points() -> usize {
    MIN_REGRESSION_POINTS
}

fn default_max_points() -> usize {
    168
}

fn default_clamp_min_w() -> f64 {
    50.0
}

fn default_clamp_max_w() -> f64 {
    800.0
}

fn default_seasonal_confidence() -> f64 {
    0.7
}

fn default_fallback_weight() -> f64 {
    0.5
}

fn default_step_secs() -> u64 {
    3600
}

fn default_confidence_decay() -> f64 {
    0.02
}

fn default_hourly_load_factors() -> [f64; 24] {
    [
        0.3, 0.25, 0.2, 0.2, 0.25, 0.4, // 00-05
        0.6, 0.8, 0.95, 1.0, 0.95, 0.9, // 06-11
        0.85, 0.9, 1.0, 0.95, 0.9, 0.8, // 12-17
        0.6, 0.4, 0.35, 0.3, 0.28, 0.25, // 18-23
    ]
}

fn default_daily_load_factors() -> [f64; 7] {
    [1.0, 1.0, 1.0, 1.0, 0.9, 0.4, 0.3]
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_points: default_min_points(),
            max_points: default_max_points(),
            clamp_min_w: default_clamp_min_w(),
            clamp_max_w: default_clamp_max_w(),
            seasonal_confidence: default_seasonal_confidence(),
            fallback_weight: default_fallback_weight(),
            step_secs: default_step_secs(),
            confidence_decay_per_step: default_confidence_decay(),
            hourly_load_factors: default_hourly_load_factors(),
            daily_load_factors: default_daily_load_factors(),
        }
    }
}

/// Closed-form OLS fit of `power = slope * index + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// In `[0, 1]`; 0 when the series has no variance.
    pub r_squared: f64,
    pub n: usize,
    /// False for a constant series, where R² is undefined.
    pub has_variance: bool,
}

impl LinearFit {
    pub fn predict_at(&self, index: f64) -> f64 {
        self.slope * index + self.intercept
    }

    /// Value `steps` past the last fitted sample.
    pub fn predict_ahead(&self, steps: u32) -> f64 {
        self.predict_at((self.n - 1) as f64 + f64::from(steps))
    }
}

/// Fit OLS over `values` against their position.
pub fn fit_values(values: &[f64], min_points: usize) -> Result<LinearFit> {
    let required = min_points.max(MIN_REGRESSION_POINTS);
    let n = values.len();
    if n < required {
        return Err(PipelineError::InsufficientData {
            required,
            available: n,
        });
    }

    let nf = n as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    // n >= 3 distinct indices, so the denominator is positive
    let slope = (nf * sum_xy - sum_x * sum_y) / (nf * sum_x2 - sum_x * sum_x);
    let intercept = (sum_y - slope * sum_x) / nf;

    let mean_y = sum_y / nf;
    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }

    let has_variance = ss_tot > f64::EPSILON * mean_y.abs().max(1.0);
    let r_squared = if has_variance {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(LinearFit {
        slope,
        intercept,
        r_squared,
        n,
        has_variance,
    })
}

/// Forecasting service bound to one building's calibration and timezone.
#[derive(Debug, Clone)]
pub struct Forecaster {
    config: ForecastConfig,
    tz: Tz,
}

impl Forecaster {
    pub fn new(config: ForecastConfig, tz: Tz) -> Self {
        Self { config, tz }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    fn step_secs(&self) -> u64 {
        self.config.step_secs.clamp(1, MAX_STEP_SECS)
    }

    fn horizon_secs(&self, horizon_steps: u32) -> u64 {
        self.step_secs().saturating_mul(u64::from(horizon_steps))
    }

    /// Instant `steps` forecast steps after `now`.
    fn step_time(&self, now: DateTime<Utc>, steps: u32) -> Result<DateTime<Utc>> {
        i64::try_from(self.horizon_secs(steps))
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ahead| now.checked_add_signed(ahead))
            .ok_or_else(|| {
                PipelineError::InvalidTimestamp(format!("{steps} steps after {now} is out of range"))
            })
    }

    pub fn fit_linear(&self, samples: &[Sample]) -> Result<LinearFit> {
        let powers: Vec<f64> = samples.iter().map(|s| s.power).collect();
        fit_values(&powers, self.config.min_points)
    }

    /// OLS point forecast `horizon_steps` past the last sample, clamped to the
    /// configured range. Confidence is the fit's R².
    pub fn linear_forecast(&self, samples: &[Sample], horizon_steps: u32) -> Result<ForecastResult> {
        let fit = self.fit_linear(samples)?;
        let predicted = fit
            .predict_ahead(horizon_steps)
            .clamp(self.config.clamp_min_w, self.config.clamp_max_w);

        Ok(ForecastResult {
            predicted_power: predicted,
            horizon_steps,
            horizon_secs: self.horizon_secs(horizon_steps),
            confidence: fit.r_squared,
            algorithm: ForecastAlgorithm::LinearRegression,
            data_points: samples.len(),
        })
    }

    /// Historical average for the local hour `horizon_steps` after `now`.
    ///
    /// Falls back to the average across all hours when the target hour has
    /// never been observed.
    pub fn seasonal_forecast(
        &self,
        samples: &[Sample],
        horizon_steps: u32,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult> {
        let profile = hourly_profile(samples, self.tz);
        let target = self.step_time(now, horizon_steps)?;
        let hour = target.with_timezone(&self.tz).hour();

        let predicted = match profile.get(hour) {
            Some(bucket) => bucket.avg,
            None => profile.overall_average().ok_or(PipelineError::EmptyWindow)?,
        };

        Ok(ForecastResult {
            predicted_power: predicted,
            horizon_steps,
            horizon_secs: self.horizon_secs(horizon_steps),
            confidence: self.config.seasonal_confidence,
            algorithm: ForecastAlgorithm::Seasonal,
            data_points: samples.len(),
        })
    }

    /// Weighted blend of the linear and seasonal forecasts.
    ///
    /// The linear weight is its R², or the fallback weight for a constant
    /// series; the seasonal weight is the fallback weight. Weights are
    /// normalized, and confidence is blended with the same weights.
    pub fn ensemble_forecast(
        &self,
        samples: &[Sample],
        horizon_steps: u32,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult> {
        let fit = self.fit_linear(samples)?;
        let linear = self.linear_forecast(samples, horizon_steps)?;
        let seasonal = self.seasonal_forecast(samples, horizon_steps, now)?;

        let linear_weight = if fit.has_variance {
            fit.r_squared
        } else {
            self.config.fallback_weight
        };
        let seasonal_weight = self.config.fallback_weight;
        let total = linear_weight + seasonal_weight;

        let (predicted, confidence) = if total > 0.0 {
            (
                (linear_weight * linear.predicted_power
                    + seasonal_weight * seasonal.predicted_power)
                    / total,
                (linear_weight * linear.confidence + seasonal_weight * seasonal.confidence)
                    / total,
            )
        } else {
            (seasonal.predicted_power, seasonal.confidence)
        };

        Ok(ForecastResult {
            predicted_power: predicted,
            horizon_steps,
            horizon_secs: self.horizon_secs(horizon_steps),
            confidence,
            algorithm: ForecastAlgorithm::Ensemble,
            data_points: samples.len(),
        })
    }

    /// Dispatch on `algorithm`.
    pub fn forecast(
        &self,
        algorithm: ForecastAlgorithm,
        samples: &[Sample],
        horizon_steps: u32,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult> {
        match algorithm {
            ForecastAlgorithm::LinearRegression => self.linear_forecast(samples, horizon_steps),
            ForecastAlgorithm::Seasonal => self.seasonal_forecast(samples, horizon_steps, now),
            ForecastAlgorithm::Ensemble => self.ensemble_forecast(samples, horizon_steps, now),
        }
    }

    /// Step-by-step linear projection shaped by the hourly and daily load factors.
    ///
    /// Only the most recent `max_points` samples are fitted. Each step's
    /// confidence is `R² x 100` decayed linearly with distance.
    pub fn project_linear(
        &self,
        samples: &[Sample],
        steps: u32,
        now: DateTime<Utc>,
    ) -> Result<LinearProjection> {
        let recent = samples
            .len()
            .checked_sub(self.config.max_points.max(MIN_REGRESSION_POINTS))
            .and_then(|skip| samples.get(skip..))
            .unwrap_or(samples);
        let fit = self.fit_linear(recent)?;
        let step_hours = self.step_secs() as f64 / 3600.0;

        let points = (1..=steps)
            .map(|step| {
                let timestamp = self.step_time(now, step)?;
                let local = timestamp.with_timezone(&self.tz);
                let hourly = self
                    .config
                    .hourly_load_factors
                    .get(local.hour() as usize)
                    .copied()
                    .unwrap_or(1.0);
                let daily = self
                    .config
                    .daily_load_factors
                    .get(local.weekday().num_days_from_monday() as usize)
                    .copied()
                    .unwrap_or(1.0);

                let predicted_power = (fit.predict_ahead(step) * hourly * daily).max(0.0);
                let decay = 1.0 - f64::from(step) * self.config.confidence_decay_per_step;
                let confidence = (fit.r_squared * 100.0 * decay).clamp(0.0, 100.0);

                Ok(ProjectionPoint {
                    step,
                    timestamp,
                    predicted_power,
                    predicted_energy_kwh: predicted_power / 1000.0 * step_hours,
                    confidence,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let total_energy_kwh = points.iter().map(|p| p.predicted_energy_kwh).sum();
        let mean_confidence = if points.is_empty() {
            0.0
        } else {
            points.iter().map(|p| p.confidence).sum::<f64>() / points.len() as f64
        };

        Ok(LinearProjection {
            next_step_power: points.first().map_or(0.0, |p| p.predicted_power),
            points,
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            accuracy: AccuracyLevel::from_r_squared(fit.r_squared),
            data_points: recent.len(),
            total_energy_kwh,
            mean_confidence,
        })
    }
}
