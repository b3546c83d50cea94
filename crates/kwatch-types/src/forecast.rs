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

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastAlgorithm {
    #[default]
    LinearRegression,
    Seasonal,
    Ensemble,
}

impl ForecastAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinearRegression => "linear_regression",
            Self::Seasonal => "seasonal",
            Self::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for ForecastAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForecastAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "linear_regression" | "linear" => Ok(Self::LinearRegression),
            "seasonal" => Ok(Self::Seasonal),
            "ensemble" => Ok(Self::Ensemble),
            other => Err(format!("unknown forecast algorithm: {other}")),
        }
    }
}

/// Point forecast. Computed on request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Watts
    pub predicted_power: f64,
    pub horizon_steps: u32,
    /// Horizon in seconds (`horizon_steps` x step length)
    pub horizon_secs: u64,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub algorithm: ForecastAlgorithm,
    pub data_points: usize,
}

/// Qualitative label for a regression fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyLevel {
    VeryHigh,
    High,
    Good,
    Moderate,
    Low,
}

impl AccuracyLevel {
    pub fn from_r_squared(r_squared: f64) -> Self {
        if r_squared >= 0.9 {
            Self::VeryHigh
        } else if r_squared >= 0.8 {
            Self::High
        } else if r_squared >= 0.7 {
            Self::Good
        } else if r_squared >= 0.5 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

/// One future step of a [`LinearProjection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionPoint {
    pub step: u32,
    pub timestamp: DateTime<Utc>,
    /// Watts, after load-factor adjustment and clamping
    pub predicted_power: f64,
    /// kWh for the step
    pub predicted_energy_kwh: f64,
    /// Percent, 0 - 100
    pub confidence: f64,
}

/// Multi-step linear projection shaped by hour-of-day and day-of-week load factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearProjection {
    pub points: Vec<ProjectionPoint>,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub accuracy: AccuracyLevel,
    pub data_points: usize,
    pub next_step_power: f64,
    pub total_energy_kwh: f64,
    pub mean_confidence: f64,
}
