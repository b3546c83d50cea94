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

//! Normalization of sensor payloads into [`Sample`]s.

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use kwatch_types::{Sample, SampleReading};

use crate::error::{PipelineError, Result};
use crate::store::validate_sample;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Plausibility limits for a single-phase building meter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestLimits {
    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,
    #[serde(default = "default_max_current")]
    pub max_current: f64,
    #[serde(default = "default_max_power")]
    pub max_power: f64,
    #[serde(default = "default_min_frequency")]
    pub min_frequency: f64,
    #[serde(default = "default_max_frequency")]
    pub max_frequency: f64,
}

fn default_max_voltage() -> f64 {
    500.0
}

fn default_max_current() -> f64 {
    1000.0
}

fn default_max_power() -> f64 {
    100_000.0
}

fn default_min_frequency() -> f64 {
    45.0
}

fn default_max_frequency() -> f64 {
    55.0
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_voltage: default_max_voltage(),
            max_current: default_max_current(),
            max_power: default_max_power(),
            min_frequency: default_min_frequency(),
            max_frequency: default_max_frequency(),
        }
    }
}

impl IngestLimits {
    fn check(&self, sample: &Sample) -> Result<()> {
        let over = |field: &'static str, value: f64, max: f64| {
            if value > max {
                Err(PipelineError::invalid(
                    field,
                    format!("exceeds limit {max}, got {value}"),
                ))
            } else {
                Ok(())
            }
        };
        over("voltage", sample.voltage, self.max_voltage)?;
        over("current", sample.current, self.max_current)?;
        over("power", sample.power, self.max_power)?;

        if sample.frequency < self.min_frequency || sample.frequency > self.max_frequency {
            return Err(PipelineError::invalid(
                "frequency",
                format!(
                    "must be within {}-{} Hz, got {}",
                    self.min_frequency, self.max_frequency, sample.frequency
                ),
            ));
        }
        Ok(())
    }
}

/// Parse a reading timestamp.
///
/// RFC 3339 strings carry their own offset. Naive strings are wall-clock time
/// in the building timezone.
pub fn parse_timestamp(raw: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| PipelineError::InvalidTimestamp(raw.to_owned()))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| PipelineError::InvalidTimestamp(raw.to_owned()))
}

/// Turn a posted reading into a validated sample.
pub fn normalize(
    reading: SampleReading,
    received_at: DateTime<Utc>,
    tz: Tz,
    limits: &IngestLimits,
) -> Result<Sample> {
    let timestamp = match reading.timestamp.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_timestamp(raw, tz)?,
        _ => received_at,
    };
    // Stores keep microseconds
    let timestamp = timestamp.trunc_subsecs(6);

    let location = reading
        .location
        .map(|l| l.trim().to_owned())
        .filter(|l| !l.is_empty());

    let sample = Sample {
        timestamp,
        voltage: reading.voltage,
        current: reading.current,
        power: reading.power,
        energy: reading.energy,
        frequency: reading.frequency,
        power_factor: reading.power_factor,
        location,
    };

    validate_sample(&sample)?;
    limits.check(&sample)?;
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Jakarta;

    fn reading(power: f64) -> SampleReading {
        SampleReading {
            voltage: 220.0,
            current: 1.5,
            power,
            energy: 10.0,
            frequency: 50.0,
            power_factor: 0.85,
            timestamp: None,
            location: None,
        }
    }

    #[test]
    fn test_naive_timestamp_uses_building_timezone() {
        let ts = parse_timestamp("2025-07-22 14:10:51", Jakarta).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 7, 22, 7, 10, 51).unwrap());
    }

    #[test]
    fn test_rfc3339_timestamp_keeps_offset() {
        let ts = parse_timestamp("2025-07-22T14:10:51+02:00", Jakarta).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 7, 22, 12, 10, 51).unwrap());
    }

    #[test]
    fn test_garbage_timestamp_rejected() {
        let err = parse_timestamp("kemarin", Jakarta).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTimestamp(_)));
    }

    #[test]
    fn test_missing_timestamp_uses_receive_time() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let sample = normalize(reading(300.0), now, Jakarta, &IngestLimits::default()).unwrap();
        assert_eq!(sample.timestamp, now);
    }

    #[test]
    fn test_timestamps_truncated_to_microseconds() {
        let received = Utc.with_ymd_and_hms(2025, 3, 3, 1, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let sample = normalize(reading(300.0), received, Jakarta, &IngestLimits::default()).unwrap();
        assert_eq!(sample.timestamp.timestamp_subsec_nanos(), 123_456_000);

        let mut r = reading(300.0);
        r.timestamp = Some("2025-03-03T08:00:00.987654321+07:00".to_owned());
        let sample = normalize(r, received, Jakarta, &IngestLimits::default()).unwrap();
        assert_eq!(sample.timestamp.to_rfc3339(), "2025-03-03T01:00:00.987654+00:00");
    }

    #[test]
    fn test_blank_location_dropped() {
        let mut r = reading(300.0);
        r.location = Some("  ".to_owned());
        let sample = normalize(r, Utc::now(), Jakarta, &IngestLimits::default()).unwrap();
        assert!(sample.location.is_none());
    }

    #[test]
    fn test_limits_enforced() {
        let limits = IngestLimits::default();

        let err = normalize(reading(150_000.0), Utc::now(), Jakarta, &limits).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidSample { field: "power", .. }
        ));

        let mut r = reading(300.0);
        r.frequency = 60.5;
        let err = normalize(r, Utc::now(), Jakarta, &limits).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidSample {
                field: "frequency",
                ..
            }
        ));
    }

    #[test]
    fn test_negative_rejected_before_limits() {
        let err = normalize(reading(-5.0), Utc::now(), Jakarta, &IngestLimits::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidSample { field: "power", .. }
        ));
    }
}
