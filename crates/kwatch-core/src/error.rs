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
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the telemetry pipeline.
///
/// There is no schedule-conflict variant. Rules only ever switch a group on,
/// so overlapping rules agree.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid sample: {field} {reason}")]
    InvalidSample { field: &'static str, reason: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("No samples in the requested window")]
    EmptyWindow,

    #[error("Insufficient data: need at least {required} samples, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Upstream did not answer within {after:?}")]
    UpstreamTimeout { after: Duration },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSample {
            field,
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        Self::Upstream(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
