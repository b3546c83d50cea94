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

//! Shared data types for the KWatch building telemetry service.
//!
//! Everything that crosses a boundary lives here: readings posted by sensors,
//! schedule rules read by the gate, and the JSON envelopes the HTTP API returns.

pub mod api;
pub mod forecast;
pub mod sample;
pub mod schedule;

pub use forecast::{ForecastAlgorithm, ForecastResult};
pub use sample::{Sample, SampleReading};
pub use schedule::{DayOfWeek, ScheduleRule};
