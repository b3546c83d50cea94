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

//! Recurring on-windows for relay groups.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Device group used when a rule does not name one.
pub const DEFAULT_DEVICE_GROUP: &str = "lights";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [Self; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }

    /// Indonesian day name shown on the building dashboard.
    pub fn local_name(self) -> &'static str {
        match self {
            Self::Monday => "Senin",
            Self::Tuesday => "Selasa",
            Self::Wednesday => "Rabu",
            Self::Thursday => "Kamis",
            Self::Friday => "Jumat",
            Self::Saturday => "Sabtu",
            Self::Sunday => "Minggu",
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayOfWeek {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|day| day.as_str() == lower)
            .ok_or_else(|| format!("unknown day of week: {s}"))
    }
}

/// A recurring window during which a device group is switched on.
///
/// `end_time < start_time` marks an overnight window that wraps past midnight
/// (e.g. 22:00 - 06:00). Both bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRule {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default = "default_device_group")]
    pub device_group: String,
    pub day_of_week: DayOfWeek,
    #[serde(with = "time_of_day")]
    pub start_time: NaiveTime,
    #[serde(with = "time_of_day")]
    pub end_time: NaiveTime,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_device_group() -> String {
    DEFAULT_DEVICE_GROUP.to_owned()
}

fn default_active() -> bool {
    true
}

impl ScheduleRule {
    pub fn is_overnight(&self) -> bool {
        self.end_time < self.start_time
    }

    /// Whether `time` falls inside the window, ignoring the day and the active flag.
    pub fn covers(&self, time: NaiveTime) -> bool {
        if self.is_overnight() {
            time >= self.start_time || time <= self.end_time
        } else {
            time >= self.start_time && time <= self.end_time
        }
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

/// Format as `HH:MM`, keeping seconds only when they are set.
pub fn format_time_of_day(time: NaiveTime) -> String {
    use chrono::Timelike;
    if time.second() == 0 {
        time.format("%H:%M").to_string()
    } else {
        time.format("%H:%M:%S").to_string()
    }
}

/// Serde adapter for wall-clock times written as `HH:MM`.
pub mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_time_of_day(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid time of day: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn rule(start: NaiveTime, end: NaiveTime) -> ScheduleRule {
        ScheduleRule {
            id: None,
            name: "Lampu ITMS".to_owned(),
            device_group: DEFAULT_DEVICE_GROUP.to_owned(),
            day_of_week: DayOfWeek::Monday,
            start_time: start,
            end_time: end,
            is_active: true,
        }
    }

    #[test]
    fn test_same_day_window_bounds_inclusive() {
        let r = rule(hm(8, 0), hm(18, 0));
        assert!(!r.is_overnight());
        assert!(r.covers(hm(8, 0)));
        assert!(r.covers(hm(12, 30)));
        assert!(r.covers(hm(18, 0)));
        assert!(!r.covers(hm(7, 59)));
        assert!(!r.covers(hm(18, 1)));
    }

    #[test]
    fn test_overnight_window() {
        let r = rule(hm(22, 0), hm(6, 0));
        assert!(r.is_overnight());
        assert!(r.covers(hm(23, 0)));
        assert!(r.covers(hm(0, 0)));
        assert!(r.covers(hm(6, 0)));
        assert!(!r.covers(hm(12, 0)));
        assert!(!r.covers(hm(21, 59)));
    }

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let r: ScheduleRule = serde_json::from_str(
            r#"{"name": "Malam", "day_of_week": "friday", "start_time": "18:30", "end_time": "05:00:00"}"#,
        )
        .unwrap();

        assert_eq!(r.day_of_week, DayOfWeek::Friday);
        assert_eq!(r.start_time, hm(18, 30));
        assert_eq!(r.end_time, hm(5, 0));
        assert_eq!(r.device_group, DEFAULT_DEVICE_GROUP);
        assert!(r.is_active);
    }

    #[test]
    fn test_rule_rejects_bad_time() {
        let result = serde_json::from_str::<ScheduleRule>(
            r#"{"name": "x", "day_of_week": "monday", "start_time": "25:00", "end_time": "06:00"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_day_of_week_from_str_and_weekday() {
        assert_eq!("Sunday".parse::<DayOfWeek>(), Ok(DayOfWeek::Sunday));
        assert!("minggu".parse::<DayOfWeek>().is_err());
        assert_eq!(DayOfWeek::from(Weekday::Wed), DayOfWeek::Wednesday);
        assert_eq!(DayOfWeek::Wednesday.local_name(), "Rabu");
    }

    #[test]
    fn test_time_format_drops_zero_seconds() {
        assert_eq!(format_time_of_day(hm(7, 5)), "07:05");
        assert_eq!(
            format_time_of_day(NaiveTime::from_hms_opt(7, 5, 30).unwrap()),
            "07:05:30"
        );
    }
}
