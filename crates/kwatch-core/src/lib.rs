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
//! Telemetry pipeline for the KWatch building service.
//!
//! - [`store`]: append-only sample storage
//! - [`ingest`]: payload normalization and validation
//! - [`aggregation`] / [`analysis`]: windowed statistics and usage analysis
//! - [`forecast`]: linear, seasonal and ensemble forecasts
//! - [`scheduling`] / [`relay`]: relay schedule gate and the external relay store

pub mod aggregation;
pub mod analysis;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod relay;
pub mod scheduling;
pub mod series;
pub mod store;

pub use error::{PipelineError, Result};
