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

//! Usage analysis: efficiency metrics, trend, load patterns and recommendations.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use kwatch_types::Sample;
use kwatch_types::forecast::{ForecastResult, LinearProjection};

use crate::aggregation::{
    self, DEFAULT_OFF_PEAK_RATIO, DEFAULT_PEAK_RATIO, HourlyProfile, WindowSummary, mean,
};
use crate::error::{PipelineError, Result};
use crate::forecast::Forecaster;

/// Number of trailing samples compared against the block before them.
const TREND_BLOCK: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Fewest samples for a full usage analysis.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// First local business hour, inclusive.
    #[serde(default = "default_business_start")]
    pub business_start_hour: u32,
    /// Last local business hour, inclusive.
    #[serde(default = "default_business_end")]
    pub business_end_hour: u32,
    #[serde(default = "default_peak_ratio")]
    pub peak_ratio: f64,
    #[serde(default = "default_off_peak_ratio")]
    pub off_peak_ratio: f64,
    /// Trend changes smaller than this percentage count as stable.
    #[serde(default = "default_stable_trend_pct")]
    pub stable_trend_pct: f64,
    /// Steps projected ahead in the analysis report.
    #[serde(default = "default_projection_steps")]
    pub projection_steps: u32,
}

fn default_min_samples() -> usize {
    7
}

fn default_business_start() -> u32 {
    8
}

fn default_business_end() -> u32 {
    17
}

fn default_peak_ratio() -> f64 {
    DEFAULT_PEAK_RATIO
}

fn default_off_peak_ratio() -> f64 {
    DEFAULT_OFF_PEAK_RATIO
}

fn default_stable_trend_pct() -> f64 {
    5.0
}

fn default_projection_steps() -> u32 {
    24
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            business_start_hour: default_business_start(),
            business_end_hour: default_business_end(),
            peak_ratio: default_peak_ratio(),
            off_peak_ratio: default_off_peak_ratio(),
            stable_trend_pct: default_stable_trend_pct(),
            projection_steps: default_projection_steps(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityRating {
    VeryStable,
    Stable,
    Moderate,
    Variable,
    HighlyVariable,
}

impl StabilityRating {
    pub fn from_cv(cv: f64) -> Self {
        if cv <= 0.1 {
            Self::VeryStable
        } else if cv <= 0.2 {
            Self::Stable
        } else if cv <= 0.3 {
            Self::Moderate
        } else if cv <= 0.5 {
            Self::Variable
        } else {
            Self::HighlyVariable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EfficiencyMetrics {
    pub mean_power: f64,
    pub std_dev: f64,
    /// Coefficient of variation (std / mean); 0 when the mean is 0
    pub cv: f64,
    pub stability: StabilityRating,
    /// 0 - 100, higher is steadier
    pub efficiency_score: f64,
    /// avg / max
    pub load_factor: f64,
    /// max / (max x 1.2), i.e. peak against an assumed 20 % connected-load margin
    pub demand_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub change_pct: f64,
    pub stable: bool,
    pub recent_avg: f64,
    pub previous_avg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandStats {
    pub avg_power: f64,
    pub peak_power: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadPatterns {
    pub business_hours: BandStats,
    pub off_hours: BandStats,
    pub weekend: BandStats,
    pub weekday_avg: f64,
    pub weekend_avg: f64,
    /// How much lower weekend load is than weekday load, in percent
    pub weekend_reduction_pct: f64,
    pub peak_hours: Vec<u32>,
    pub off_peak_hours: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Efficiency,
    CostOptimization,
    Capacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentStats {
    pub power: f64,
    pub voltage: f64,
    pub current: f64,
    pub summary: WindowSummary,
    /// Sum of readings treated as hourly averages
    pub total_energy_kwh: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageAnalysis {
    pub current: CurrentStats,
    pub trend: Trend,
    pub hourly_profile: HourlyProfile,
    pub projection: LinearProjection,
    pub seasonal: ForecastResult,
    pub efficiency: EfficiencyMetrics,
    pub patterns: LoadPatterns,
    pub recommendations: Vec<Recommendation>,
    /// 0 - 100, blends sample coverage with steadiness
    pub overall_confidence: f64,
}

fn band(powers: &[f64]) -> BandStats {
    BandStats {
        avg_power: mean(powers.iter().copied()).unwrap_or(0.0),
        peak_power: powers.iter().copied().fold(0.0, f64::max),
        count: powers.len(),
    }
}

pub fn efficiency_metrics(samples: &[Sample]) -> Result<EfficiencyMetrics> {
    let powers: Vec<f64> = samples.iter().map(|s| s.power).collect();
    let mean_power = mean(powers.iter().copied()).ok_or(PipelineError::EmptyWindow)?;
    let variance = mean(powers.iter().map(|p| (p - mean_power).powi(2))).unwrap_or(0.0);
    let std_dev = variance.sqrt();
    let cv = if mean_power > 0.0 {
        std_dev / mean_power
    } else {
        0.0
    };
    let max = powers.iter().copied().fold(0.0, f64::max);

    Ok(EfficiencyMetrics {
        mean_power,
        std_dev,
        cv,
        stability: StabilityRating::from_cv(cv),
        efficiency_score: ((1.0 - cv) * 100.0).clamp(0.0, 100.0),
        load_factor: if max > 0.0 { mean_power / max } else { 0.0 },
        demand_factor: if max > 0.0 { max / (max * 1.2) } else { 0.0 },
    })
}

/// Compare the last 24 samples with the 24 before them.
pub fn trend(samples: &[Sample], stable_pct: f64) -> Trend {
    let powers: Vec<f64> = samples.iter().map(|s| s.power).collect();
    let split = powers.len().saturating_sub(TREND_BLOCK);
    let prev_start = split.saturating_sub(TREND_BLOCK);

    let recent_avg = powers
        .get(split..)
        .and_then(|r| mean(r.iter().copied()))
        .unwrap_or(0.0);
    let previous_avg = powers
        .get(prev_start..split)
        .and_then(|r| mean(r.iter().copied()))
        .unwrap_or(0.0);

    let change_pct = if previous_avg > 0.0 {
        (recent_avg - previous_avg) / previous_avg * 100.0
    } else {
        0.0
    };

    Trend {
        direction: if recent_avg > previous_avg {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        },
        change_pct,
        stable: change_pct.abs() < stable_pct,
        recent_avg,
        previous_avg,
    }
}

pub fn load_patterns(
    samples: &[Sample],
    tz: Tz,
    config: &AnalysisConfig,
    profile: &HourlyProfile,
) -> LoadPatterns {
    let mut business = Vec::new();
    let mut off = Vec::new();
    let mut weekend = Vec::new();
    let mut weekday = Vec::new();

    for s in samples {
        let local = s.timestamp.with_timezone(&tz);
        let hour = local.hour();
        if (config.business_start_hour..=config.business_end_hour).contains(&hour) {
            business.push(s.power);
        } else {
            off.push(s.power);
        }
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            weekend.push(s.power);
        } else {
            weekday.push(s.power);
        }
    }

    let weekday_avg = mean(weekday.iter().copied()).unwrap_or(0.0);
    let weekend_avg = mean(weekend.iter().copied()).unwrap_or(0.0);
    let weekend_reduction_pct = if weekday_avg > 0.0 {
        (1.0 - weekend_avg / weekday_avg) * 100.0
    } else {
        0.0
    };

    LoadPatterns {
        business_hours: band(&business),
        off_hours: band(&off),
        weekend: band(&weekend),
        weekday_avg,
        weekend_avg,
        weekend_reduction_pct,
        peak_hours: aggregation::peak_hours(profile, config.peak_ratio),
        off_peak_hours: aggregation::off_peak_hours(profile, config.off_peak_ratio),
    }
}

pub fn recommendations(metrics: &EfficiencyMetrics, peak_hours: &[u32]) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if metrics.cv > 0.3 {
        out.push(Recommendation {
            kind: RecommendationKind::Efficiency,
            priority: Priority::High,
            title: "High power variability detected".to_owned(),
            description: "Consumption swings widely between readings. Consider load balancing."
                .to_owned(),
            action: "Install automatic load management or review equipment schedules.".to_owned(),
        });
    }

    if !peak_hours.is_empty() {
        let hours = peak_hours
            .iter()
            .map(|h| format!("{h:02}:00"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push(Recommendation {
            kind: RecommendationKind::CostOptimization,
            priority: Priority::Medium,
            title: "Optimize peak-hour usage".to_owned(),
            description: format!("Peak consumption detected during: {hours}"),
            action: "Move non-critical loads to off-peak hours to reduce electricity cost."
                .to_owned(),
        });
    }

    if metrics.load_factor < 0.6 {
        out.push(Recommendation {
            kind: RecommendationKind::Capacity,
            priority: Priority::Medium,
            title: "Low load factor".to_owned(),
            description: format!(
                "The installation is under-utilized. Current load factor: {:.1}%",
                metrics.load_factor * 100.0
            ),
            action: "Consider load balancing or consolidating equipment.".to_owned(),
        });
    }

    out
}

/// Full report over a window, oldest sample first.
pub fn usage_analysis(
    samples: &[Sample],
    forecaster: &Forecaster,
    config: &AnalysisConfig,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<UsageAnalysis> {
    let required = config.min_samples;
    if samples.len() < required {
        return Err(PipelineError::InsufficientData {
            required,
            available: samples.len(),
        });
    }
    let latest = samples.last().ok_or(PipelineError::EmptyWindow)?;

    let summary = aggregation::summarize(samples)?;
    let profile = aggregation::hourly_profile(samples, tz);
    let efficiency = efficiency_metrics(samples)?;
    let patterns = load_patterns(samples, tz, config, &profile);
    let recommendations = recommendations(&efficiency, &patterns.peak_hours);

    let coverage = (samples.len() as f64 / forecaster.config().max_points as f64 * 100.0).min(100.0);

    Ok(UsageAnalysis {
        current: CurrentStats {
            power: latest.power,
            voltage: latest.voltage,
            current: latest.current,
            summary,
            total_energy_kwh: samples.iter().map(Sample::power_kw).sum(),
            last_updated: latest.timestamp,
        },
        trend: trend(samples, config.stable_trend_pct),
        projection: forecaster.project_linear(samples, config.projection_steps, now)?,
        seasonal: forecaster.seasonal_forecast(samples, 1, now)?,
        hourly_profile: profile,
        efficiency,
        patterns,
        recommendations,
        overall_confidence: (coverage + efficiency.efficiency_score) / 2.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastConfig;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Asia::Jakarta;

    fn at(local_day: u32, hour: u32, power: f64) -> Sample {
        // March 2025: the 3rd is a Monday, the 8th a Saturday
        Sample {
            timestamp: Jakarta
                .with_ymd_and_hms(2025, 3, local_day, hour, 0, 0)
                .unwrap()
                .with_timezone(&Utc),
            voltage: 220.0,
            current: 1.0,
            power,
            energy: 0.0,
            frequency: 50.0,
            power_factor: 0.9,
            location: None,
        }
    }

    #[test]
    fn test_efficiency_metrics_steady_load() {
        let samples: Vec<Sample> = (0..10).map(|h| at(3, h, 400.0)).collect();
        let m = efficiency_metrics(&samples).unwrap();

        assert!(m.cv.abs() < 1e-12);
        assert_eq!(m.stability, StabilityRating::VeryStable);
        assert!((m.efficiency_score - 100.0).abs() < 1e-9);
        assert!((m.load_factor - 1.0).abs() < 1e-12);
        assert!((m.demand_factor - 1.0 / 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_efficiency_metrics_variable_load() {
        // mean 200, population std 100 -> cv 0.5
        let samples = vec![at(3, 1, 100.0), at(3, 2, 300.0)];
        let m = efficiency_metrics(&samples).unwrap();

        assert!((m.cv - 0.5).abs() < 1e-12);
        assert_eq!(m.stability, StabilityRating::Variable);
        assert!((m.efficiency_score - 50.0).abs() < 1e-9);
        assert!((m.load_factor - 200.0 / 300.0).abs() < 1e-12);
    }

    #[test]
    fn test_efficiency_metrics_empty() {
        assert!(matches!(
            efficiency_metrics(&[]),
            Err(PipelineError::EmptyWindow)
        ));
    }

    #[test]
    fn test_trend_compares_last_two_blocks() {
        let mut samples: Vec<Sample> = (0..24).map(|h| at(3, h, 100.0)).collect();
        samples.extend((0..24).map(|h| at(4, h, 150.0)));
        let t = trend(&samples, 5.0);

        assert_eq!(t.direction, TrendDirection::Increasing);
        assert!((t.change_pct - 50.0).abs() < 1e-9);
        assert!(!t.stable);
    }

    #[test]
    fn test_trend_short_series_is_stable() {
        let samples: Vec<Sample> = (0..10).map(|h| at(3, h, 100.0)).collect();
        let t = trend(&samples, 5.0);

        assert!(t.previous_avg.abs() < f64::EPSILON);
        assert!(t.change_pct.abs() < f64::EPSILON);
        assert!(t.stable);
    }

    #[test]
    fn test_load_patterns_business_and_weekend() {
        let samples = vec![
            at(3, 8, 500.0),  // Monday business
            at(3, 17, 300.0), // Monday business (inclusive end)
            at(3, 18, 100.0), // Monday off-hours
            at(8, 10, 200.0), // Saturday business hour, weekend
        ];
        let config = AnalysisConfig::default();
        let profile = aggregation::hourly_profile(&samples, Jakarta);
        let p = load_patterns(&samples, Jakarta, &config, &profile);

        assert_eq!(p.business_hours.count, 3);
        assert!((p.business_hours.peak_power - 500.0).abs() < f64::EPSILON);
        assert_eq!(p.off_hours.count, 1);
        assert_eq!(p.weekend.count, 1);
        assert!((p.weekday_avg - 300.0).abs() < 1e-9);
        assert!((p.weekend_reduction_pct - (1.0 - 200.0 / 300.0) * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_recommendations_triggered() {
        let metrics = EfficiencyMetrics {
            mean_power: 200.0,
            std_dev: 100.0,
            cv: 0.5,
            stability: StabilityRating::Variable,
            efficiency_score: 50.0,
            load_factor: 0.4,
            demand_factor: 1.0 / 1.2,
        };
        let recs = recommendations(&metrics, &[9, 14]);

        let kinds: Vec<RecommendationKind> = recs.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecommendationKind::Efficiency,
                RecommendationKind::CostOptimization,
                RecommendationKind::Capacity
            ]
        );
        assert!(recs[1].description.contains("09:00, 14:00"));
        assert!(recs[2].description.contains("40.0%"));
    }

    #[test]
    fn test_no_recommendations_for_steady_load() {
        let samples: Vec<Sample> = (0..10).map(|h| at(3, h, 400.0)).collect();
        let m = efficiency_metrics(&samples).unwrap();
        assert!(recommendations(&m, &[]).is_empty());
    }

    #[test]
    fn test_usage_analysis_requires_minimum_samples() {
        let forecaster = Forecaster::new(ForecastConfig::default(), Jakarta);
        let samples: Vec<Sample> = (0..6).map(|h| at(3, h, 400.0)).collect();
        let err = usage_analysis(
            &samples,
            &forecaster,
            &AnalysisConfig::default(),
            Jakarta,
            Utc::now(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::InsufficientData {
                required: 7,
                available: 6
            }
        ));
    }

    #[test]
    fn test_usage_analysis_report() {
        let forecaster = Forecaster::new(ForecastConfig::default(), Jakarta);
        let samples: Vec<Sample> = (0..12)
            .map(|h| at(3, h, 100.0 + f64::from(h) * 10.0))
            .collect();
        let now = samples[11].timestamp + Duration::minutes(5);
        let report = usage_analysis(
            &samples,
            &forecaster,
            &AnalysisConfig::default(),
            Jakarta,
            now,
        )
        .unwrap();

        assert!((report.current.power - 210.0).abs() < f64::EPSILON);
        assert_eq!(report.current.summary.count, 12);
        assert_eq!(report.projection.points.len(), 24);
        assert!((report.projection.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(report.hourly_profile.hours.len(), 12);
        assert!(report.overall_confidence > 0.0 && report.overall_confidence <= 100.0);
    }
}
