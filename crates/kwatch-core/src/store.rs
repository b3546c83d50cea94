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

//! Append-only sample storage.
//!
//! Writers are serialized behind one lock, readers get an owned snapshot
//! ([`SampleWindow`]) so aggregation and forecasting never hold the lock while
//! they compute.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use kwatch_types::Sample;

use crate::error::{PipelineError, Result};

/// Time-ordered, append-only store of readings.
pub trait SampleStore: Send + Sync {
    /// Validate and persist a sample, returning its id.
    ///
    /// Appending a sample identical to one already stored returns the existing
    /// id, so sensors can safely retry.
    fn append(&self, sample: Sample) -> Result<i64>;

    /// Samples with `start <= timestamp <= end`, oldest first.
    fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        location: Option<&str>,
    ) -> Result<SampleWindow>;

    /// Most recent sample, optionally restricted to one location.
    fn latest(&self, location: Option<&str>) -> Result<Option<Sample>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Reject non-finite and negative measurements, power factors above 1, and
/// timestamps finer than a microsecond.
pub fn validate_sample(sample: &Sample) -> Result<()> {
    if sample.timestamp.timestamp_subsec_nanos() % 1_000 != 0 {
        return Err(PipelineError::InvalidTimestamp(format!(
            "{} has sub-microsecond precision",
            sample.timestamp.to_rfc3339()
        )));
    }
    for (field, value) in sample.measurements() {
        if !value.is_finite() {
            return Err(PipelineError::invalid(field, "must be a finite number"));
        }
        if value < 0.0 {
            return Err(PipelineError::invalid(
                field,
                format!("must be non-negative, got {value}"),
            ));
        }
    }
    if sample.power_factor > 1.0 {
        return Err(PipelineError::invalid(
            "power_factor",
            format!("must not exceed 1, got {}", sample.power_factor),
        ));
    }
    Ok(())
}

/// Owned, immutable snapshot of a query result.
///
/// Cloning is cheap and every clone can be iterated from the start again.
#[derive(Debug, Clone, Default)]
pub struct SampleWindow {
    samples: Arc<[Sample]>,
}

impl SampleWindow {
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Power readings in watts, oldest first.
    pub fn powers(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.power).collect()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

impl From<Vec<Sample>> for SampleWindow {
    fn from(mut samples: Vec<Sample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self {
            samples: samples.into(),
        }
    }
}

impl<'a> IntoIterator for &'a SampleWindow {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    // Sorted by timestamp; equal timestamps keep arrival order.
    rows: Vec<(i64, Sample)>,
    next_id: i64,
}

/// In-process store with the same semantics as the SQLite one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleStore for MemoryStore {
    fn append(&self, sample: Sample) -> Result<i64> {
        validate_sample(&sample)?;

        let mut inner = self.inner.write();
        let lower = inner
            .rows
            .partition_point(|(_, s)| s.timestamp < sample.timestamp);
        let upper = inner
            .rows
            .partition_point(|(_, s)| s.timestamp <= sample.timestamp);

        if let Some((id, _)) = inner
            .rows
            .get(lower..upper)
            .and_then(|same_instant| same_instant.iter().find(|(_, s)| *s == sample))
        {
            debug!(id, "Duplicate sample ignored");
            return Ok(*id);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.rows.insert(upper, (id, sample));
        Ok(id)
    }

    fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        location: Option<&str>,
    ) -> Result<SampleWindow> {
        if end < start {
            return Ok(SampleWindow::default());
        }
        let inner = self.inner.read();
        let lower = inner.rows.partition_point(|(_, s)| s.timestamp < start);
        let upper = inner.rows.partition_point(|(_, s)| s.timestamp <= end);

        let samples: Vec<Sample> = inner
            .rows
            .get(lower..upper)
            .unwrap_or_default()
            .iter()
            .filter(|(_, s)| s.at_location(location))
            .map(|(_, s)| s.clone())
            .collect();

        Ok(SampleWindow {
            samples: samples.into(),
        })
    }

    fn latest(&self, location: Option<&str>) -> Result<Option<Sample>> {
        let inner = self.inner.read();
        Ok(inner
            .rows
            .iter()
            .rev()
            .find(|(_, s)| s.at_location(location))
            .map(|(_, s)| s.clone()))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.read().rows.len())
    }
}
