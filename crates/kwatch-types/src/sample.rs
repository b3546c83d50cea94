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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nominal grid frequency assumed when a meter does not report one.
pub const DEFAULT_FREQUENCY_HZ: f64 = 50.0;

/// Power factor assumed when a meter does not report one.
pub const DEFAULT_POWER_FACTOR: f64 = 0.85;

/// One stored electrical reading.
///
/// Samples are immutable once appended. All measurements are finite and
/// non-negative; `power_factor` is additionally bounded by 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Volts
    pub voltage: f64,
    /// Amperes
    pub current: f64,
    /// Watts
    pub power: f64,
    /// Cumulative kWh reported by the meter
    pub energy: f64,
    /// Hz
    pub frequency: f64,
    pub power_factor: f64,
    /// Optional location tag (meter panel, floor, building wing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Sample {
    /// Named measurement fields, in the order they are validated.
    pub fn measurements(&self) -> [(&'static str, f64); 6] {
        [
            ("voltage", self.voltage),
            ("current", self.current),
            ("power", self.power),
            ("energy", self.energy),
            ("frequency", self.frequency),
            ("power_factor", self.power_factor),
        ]
    }

    /// Power in kW.
    pub fn power_kw(&self) -> f64 {
        self.power / 1000.0
    }

    pub fn at_location(&self, location: Option<&str>) -> bool {
        match location {
            None => true,
            Some(wanted) => self.location.as_deref() == Some(wanted),
        }
    }
}

/// Ingestion payload as posted by sensors and gateways.
///
/// Older meter firmware posts Indonesian field names, so those are accepted
/// as aliases. The payload is normalized into a [`Sample`] at the ingestion
/// boundary and nothing downstream sees this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleReading {
    #[serde(alias = "tegangan")]
    pub voltage: f64,
    #[serde(alias = "arus")]
    pub current: f64,
    #[serde(alias = "daya")]
    pub power: f64,
    #[serde(default, alias = "energi")]
    pub energy: f64,
    #[serde(default = "default_frequency", alias = "frekuensi")]
    pub frequency: f64,
    #[serde(default = "default_power_factor")]
    pub power_factor: f64,
    /// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` in the building timezone.
    /// Receive time is used when absent.
    #[serde(default, alias = "waktu")]
    pub timestamp: Option<String>,
    #[serde(default, alias = "lokasi")]
    pub location: Option<String>,
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY_HZ
}

fn default_power_factor() -> f64 {
    DEFAULT_POWER_FACTOR
}
