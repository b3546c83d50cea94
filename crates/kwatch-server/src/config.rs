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

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono_tz::Tz;
use serde::Deserialize;

use kwatch_core::analysis::AnalysisConfig;
use kwatch_core::forecast::{ForecastConfig, MAX_STEP_SECS};
use kwatch_core::ingest::IngestLimits;
use kwatch_core::scheduling::DeviceGroup;
use kwatch_types::ScheduleRule;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub building: BuildingSettings,
    #[serde(default)]
    pub ingest: IngestLimits,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub relay_sink: RelaySinkSettings,
    /// Rules inserted into an empty rule table on first start.
    #[serde(default)]
    pub schedules: Vec<ScheduleRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildingSettings {
    #[serde(default = "default_building_name")]
    pub name: String,
    /// IANA timezone used for hour-of-day buckets, labels and schedules.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Window used when a query gives no `days`.
    #[serde(default = "default_query_days")]
    pub default_query_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_sink_timeout_secs")]
    pub sink_timeout_secs: u64,
    #[serde(default = "default_groups")]
    pub groups: Vec<DeviceGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelaySinkSettings {
    /// Realtime database root, e.g. `https://<project>.firebasedatabase.app`.
    /// Relay states stay in memory when unset.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8100
}

fn default_db_path() -> String {
    "./data/kwatch.db".to_owned()
}

fn default_building_name() -> String {
    "PT Krakatau Sarana Property".to_owned()
}

fn default_timezone() -> String {
    "Asia/Jakarta".to_owned()
}

fn default_query_days() -> u32 {
    7
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

fn default_sink_timeout_secs() -> u64 {
    5
}

fn default_groups() -> Vec<DeviceGroup> {
    vec![DeviceGroup {
        name: kwatch_types::schedule::DEFAULT_DEVICE_GROUP.to_owned(),
        relays: vec!["relay1".to_owned(), "relay2".to_owned()],
    }]
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for BuildingSettings {
    fn default() -> Self {
        Self {
            name: default_building_name(),
            timezone: default_timezone(),
            default_query_days: default_query_days(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_secs: default_interval_secs(),
            sink_timeout_secs: default_sink_timeout_secs(),
            groups: default_groups(),
        }
    }
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

impl ServerConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).with_context(|| "Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.building
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("building.timezone '{}' is invalid: {e}", self.building.timezone))
    }

    fn validate(&self) -> Result<()> {
        self.timezone()?;

        if self.building.default_query_days == 0 {
            bail!("building.default_query_days must be at least 1");
        }

        let f = &self.forecast;
        if !(f.clamp_min_w.is_finite() && f.clamp_max_w.is_finite()) || f.clamp_min_w > f.clamp_max_w {
            bail!(
                "forecast.clamp_min_w ({}) must not exceed forecast.clamp_max_w ({})",
                f.clamp_min_w,
                f.clamp_max_w
            );
        }
        if !(0.0..=1.0).contains(&f.seasonal_confidence) {
            bail!("forecast.seasonal_confidence must be within 0-1");
        }
        if !(f.fallback_weight.is_finite() && f.fallback_weight > 0.0) {
            bail!("forecast.fallback_weight must be a positive number");
        }
        if !(1..=MAX_STEP_SECS).contains(&f.step_secs) {
            bail!("forecast.step_secs must be within 1-{MAX_STEP_SECS}");
        }
        if !(f.confidence_decay_per_step.is_finite() && f.confidence_decay_per_step >= 0.0) {
            bail!("forecast.confidence_decay_per_step must be a non-negative number");
        }
        let mut factors = f.hourly_load_factors.iter().chain(&f.daily_load_factors);
        if factors.any(|x| !(x.is_finite() && *x >= 0.0)) {
            bail!("forecast load factors must be non-negative numbers");
        }

        let a = &self.analysis;
        if a.business_start_hour > a.business_end_hour || a.business_end_hour > 23 {
            bail!("analysis business hours must satisfy start <= end <= 23");
        }

        let s = &self.scheduler;
        if s.interval_secs == 0 {
            bail!("scheduler.interval_secs must be positive");
        }
        if s.sink_timeout_secs == 0 {
            bail!("scheduler.sink_timeout_secs must be positive");
        }
        let mut names = HashSet::new();
        for group in &s.groups {
            if group.name.trim().is_empty() {
                bail!("scheduler.groups entries need a name");
            }
            if group.relays.is_empty() {
                bail!("scheduler group '{}' has no relays", group.name);
            }
            if !names.insert(group.name.as_str()) {
                bail!("scheduler group '{}' is defined twice", group.name);
            }
        }
        for rule in &self.schedules {
            if !names.contains(rule.device_group.as_str()) {
                bail!(
                    "schedule '{}' targets unknown device group '{}'",
                    rule.name,
                    rule.device_group
                );
            }
        }

        if let Some(url) = &self.relay_sink.base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            bail!("relay_sink.base_url must be an http(s) URL");
        }

        Ok(())
    }
}
