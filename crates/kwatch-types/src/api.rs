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

//! JSON envelopes exchanged with the dashboard and sensors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chart period, named the way the dashboard sends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    #[serde(alias = "day", alias = "daily")]
    Harian,
    #[serde(alias = "week", alias = "weekly")]
    Mingguan,
    #[serde(alias = "month", alias = "monthly")]
    Bulanan,
}

impl Period {
    pub fn days(self) -> u32 {
        match self {
            Self::Harian => 1,
            Self::Mingguan => 7,
            Self::Bulanan => 30,
        }
    }

    /// strftime pattern for chart labels.
    pub fn label_format(self) -> &'static str {
        match self {
            Self::Harian => "%H:%M",
            Self::Mingguan | Self::Bulanan => "%d/%m %H:%M",
        }
    }

    pub fn interpretation(self, data_points: usize) -> String {
        match self {
            Self::Harian => {
                format!("Viewing {data_points} data points as hourly readings for daily analysis")
            }
            Self::Mingguan => {
                format!("Viewing {data_points} data points in weekly context (recent readings)")
            }
            Self::Bulanan => {
                format!("Viewing {data_points} data points in monthly context (recent readings)")
            }
        }
    }
}

/// Where the numbers in a series response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Database,
    Demo,
    ErrorFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Uniform failure body for every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub success: bool,
    pub period: Period,
    /// Watts, oldest first
    pub data: Vec<f64>,
    pub labels: Vec<String>,
    pub source: DataSource,
    pub total_records: usize,
    pub interpretation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
