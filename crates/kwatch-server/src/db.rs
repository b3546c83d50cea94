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

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

use kwatch_core::PipelineError;
use kwatch_core::scheduling::ScheduleSource;
use kwatch_core::store::{SampleStore, SampleWindow, validate_sample};
use kwatch_types::schedule::{format_time_of_day, parse_time_of_day};
use kwatch_types::{DayOfWeek, Sample, ScheduleRule};

const SAMPLE_COLUMNS: &str =
    "ts_us, voltage, current, power, energy, frequency, power_factor, location";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<rusqlite::Connection>,
}

fn storage(e: rusqlite::Error) -> PipelineError {
    PipelineError::Storage(e.to_string())
}

fn conversion_error(column: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, ty, message.into())
}

fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<Sample> {
    let ts_us: i64 = row.get(0)?;
    let timestamp = DateTime::<Utc>::from_timestamp_micros(ts_us)
        .ok_or_else(|| conversion_error(0, Type::Integer, format!("timestamp {ts_us} out of range")))?;
    let location: String = row.get(7)?;

    Ok(Sample {
        timestamp,
        voltage: row.get(1)?,
        current: row.get(2)?,
        power: row.get(3)?,
        energy: row.get(4)?,
        frequency: row.get(5)?,
        power_factor: row.get(6)?,
        location: (!location.is_empty()).then_some(location),
    })
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<ScheduleRule> {
    let day: String = row.get(3)?;
    let start: String = row.get(4)?;
    let end: String = row.get(5)?;

    Ok(ScheduleRule {
        id: row.get(0)?,
        name: row.get(1)?,
        device_group: row.get(2)?,
        day_of_week: DayOfWeek::from_str(&day).map_err(|e| conversion_error(3, Type::Text, e))?,
        start_time: parse_time_of_day(&start)
            .ok_or_else(|| conversion_error(4, Type::Text, format!("bad start time '{start}'")))?,
        end_time: parse_time_of_day(&end)
            .ok_or_else(|| conversion_error(5, Type::Text, format!("bad end time '{end}'")))?,
        is_active: row.get(6)?,
    })
}

fn insert_rule_row(conn: &rusqlite::Connection, rule: &ScheduleRule) -> Result<i64> {
    conn.execute(
        "INSERT INTO schedule_rules (name, device_group, day_of_week, start_time, end_time, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            rule.name,
            rule.device_group,
            rule.day_of_week.as_str(),
            format_time_of_day(rule.start_time),
            format_time_of_day(rule.end_time),
            rule.is_active,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open database: {path}"))?;

        // Readings are unique on every column, so a retried POST maps to the
        // row it already created.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS samples (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_us          INTEGER NOT NULL,
                voltage        REAL NOT NULL,
                current        REAL NOT NULL,
                power          REAL NOT NULL,
                energy         REAL NOT NULL,
                frequency      REAL NOT NULL,
                power_factor   REAL NOT NULL,
                location       TEXT NOT NULL DEFAULT '',
                UNIQUE (ts_us, location, voltage, current, power, energy, frequency, power_factor)
            );

            CREATE INDEX IF NOT EXISTS idx_samples_ts
                ON samples(ts_us);
            CREATE INDEX IF NOT EXISTS idx_samples_location_ts
                ON samples(location, ts_us);

            CREATE TABLE IF NOT EXISTS schedule_rules (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                name           TEXT NOT NULL,
                device_group   TEXT NOT NULL DEFAULT 'lights',
                day_of_week    TEXT NOT NULL,
                start_time     TEXT NOT NULL,
                end_time       TEXT NOT NULL,
                is_active      BOOLEAN NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_schedule_rules_group
                ON schedule_rules(device_group, is_active);",
        )
        .context("Failed to initialize database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// All rules, active or not, grouped by device group then weekday.
    pub fn list_rules(&self) -> Result<Vec<ScheduleRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, device_group, day_of_week, start_time, end_time, is_active
             FROM schedule_rules ORDER BY device_group, id",
        )?;
        let mut rules = stmt
            .query_map([], row_to_rule)?
            .collect::<Result<Vec<_>, _>>()?;
        rules.sort_by_key(|r| (r.device_group.clone(), r.day_of_week, r.start_time));
        Ok(rules)
    }

    /// Insert `rules` only when the table has never been filled.
    pub fn seed_rules_if_empty(&self, rules: &[ScheduleRule]) -> Result<usize> {
        if rules.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let count: i64 = tx.query_row("SELECT COUNT(*) FROM schedule_rules", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }

        for rule in rules {
            insert_rule_row(&tx, rule)?;
        }
        tx.commit()?;
        info!(count = rules.len(), "Seeded schedule rules from config");
        Ok(rules.len())
    }
}

impl SampleStore for Database {
    fn append(&self, sample: Sample) -> kwatch_core::Result<i64> {
        validate_sample(&sample)?;

        let location = sample.location.as_deref().unwrap_or_default();
        let ts_us = sample.timestamp.timestamp_micros();
        let conn = self.conn.lock();

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO samples (ts_us, voltage, current, power, energy, frequency, power_factor, location)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    ts_us,
                    sample.voltage,
                    sample.current,
                    sample.power,
                    sample.energy,
                    sample.frequency,
                    sample.power_factor,
                    location,
                ],
            )
            .map_err(storage)?;

        if inserted > 0 {
            return Ok(conn.last_insert_rowid());
        }

        let id: i64 = conn
            .query_row(
                "SELECT id FROM samples
                 WHERE ts_us = ?1 AND voltage = ?2 AND current = ?3 AND power = ?4
                   AND energy = ?5 AND frequency = ?6 AND power_factor = ?7 AND location = ?8",
                params![
                    ts_us,
                    sample.voltage,
                    sample.current,
                    sample.power,
                    sample.energy,
                    sample.frequency,
                    sample.power_factor,
                    location,
                ],
                |row| row.get(0),
            )
            .map_err(storage)?;
        debug!(id, "Duplicate sample ignored");
        Ok(id)
    }

    fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        location: Option<&str>,
    ) -> kwatch_core::Result<SampleWindow> {
        if end < start {
            return Ok(SampleWindow::default());
        }

        let conn = self.conn.lock();
        let start_us = start.timestamp_micros();
        let end_us = end.timestamp_micros();

        let samples = match location {
            Some(location) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {SAMPLE_COLUMNS} FROM samples
                         WHERE ts_us BETWEEN ?1 AND ?2 AND location = ?3
                         ORDER BY ts_us, id"
                    ))
                    .map_err(storage)?;
                stmt.query_map(params![start_us, end_us, location], row_to_sample)
                    .map_err(storage)?
                    .collect::<Result<Vec<_>, _>>()
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {SAMPLE_COLUMNS} FROM samples
                         WHERE ts_us BETWEEN ?1 AND ?2
                         ORDER BY ts_us, id"
                    ))
                    .map_err(storage)?;
                stmt.query_map(params![start_us, end_us], row_to_sample)
                    .map_err(storage)?
                    .collect::<Result<Vec<_>, _>>()
            }
        }
        .map_err(storage)?;

        Ok(SampleWindow::from(samples))
    }

    fn latest(&self, location: Option<&str>) -> kwatch_core::Result<Option<Sample>> {
        let conn = self.conn.lock();
        match location {
            Some(location) => conn.query_row(
                &format!(
                    "SELECT {SAMPLE_COLUMNS} FROM samples WHERE location = ?1
                     ORDER BY ts_us DESC, id DESC LIMIT 1"
                ),
                params![location],
                row_to_sample,
            ),
            None => conn.query_row(
                &format!(
                    "SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY ts_us DESC, id DESC LIMIT 1"
                ),
                [],
                row_to_sample,
            ),
        }
        .optional()
        .map_err(storage)
    }

    fn len(&self) -> kwatch_core::Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
            .map_err(storage)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl ScheduleSource for Database {
    fn active_rules(&self, device_group: &str) -> kwatch_core::Result<Vec<ScheduleRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, device_group, day_of_week, start_time, end_time, is_active
                 FROM schedule_rules WHERE device_group = ?1 AND is_active = 1",
            )
            .map_err(storage)?;
        stmt.query_map(params![device_group], row_to_rule)
            .map_err(storage)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};
    use chrono_tz::Asia::Jakarta;
    use kwatch_core::ingest::{IngestLimits, normalize};
    use kwatch_types::SampleReading;
    use tempfile::TempDir;

    fn sample_at(ts: DateTime<Utc>, power: f64, location: Option<&str>) -> Sample {
        Sample {
            timestamp: ts,
            voltage: 220.0,
            current: power / 220.0,
            power,
            energy: 0.5,
            frequency: 50.0,
            power_factor: 0.85,
            location: location.map(str::to_owned),
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 1, 0, 0).unwrap()
    }

    fn rule(name: &str, group: &str, day: DayOfWeek, active: bool) -> ScheduleRule {
        ScheduleRule {
            id: None,
            name: name.to_owned(),
            device_group: group.to_owned(),
            day_of_week: day,
            start_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            is_active: active,
        }
    }

    #[test]
    fn test_append_and_query_round_trip() {
        let db = Database::open(":memory:").unwrap();
        let first = db.append(sample_at(base(), 500.0, None)).unwrap();
        let second = db
            .append(sample_at(base() + Duration::hours(1), 520.0, None))
            .unwrap();
        assert!(second > first);

        let window = db
            .query(base(), base() + Duration::hours(1), None)
            .unwrap();
        assert_eq!(window.powers(), vec![500.0, 520.0]);
        assert_eq!(window.first().unwrap().timestamp, base());
        assert_eq!(window.first().unwrap().location, None);
    }

    #[test]
    fn test_point_query_returns_normalized_sample_exactly() {
        let db = Database::open(":memory:").unwrap();
        let received = base() + Duration::nanoseconds(123_456_789);
        let reading = SampleReading {
            voltage: 220.0,
            current: 2.0,
            power: 440.0,
            energy: 0.5,
            frequency: 50.0,
            power_factor: 0.85,
            timestamp: None,
            location: Some("Gedung A".to_owned()),
        };
        let sample = normalize(reading, received, Jakarta, &IngestLimits::default()).unwrap();
        db.append(sample.clone()).unwrap();

        let window = db.query(sample.timestamp, sample.timestamp, None).unwrap();
        assert_eq!(window.as_slice(), std::slice::from_ref(&sample));
    }

    #[test]
    fn test_append_rejects_sub_microsecond_timestamp() {
        let db = Database::open(":memory:").unwrap();
        let sample = sample_at(base() + Duration::nanoseconds(1), 500.0, None);
        let err = db.append(sample).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTimestamp(_)));
        assert!(db.is_empty().unwrap());
    }

    #[test]
    fn test_append_duplicate_returns_same_id() {
        let db = Database::open(":memory:").unwrap();
        let sample = sample_at(base(), 500.0, Some("Gedung A"));
        let id = db.append(sample.clone()).unwrap();

        assert_eq!(db.append(sample).unwrap(), id);
        assert_eq!(db.len().unwrap(), 1);
    }

    #[test]
    fn test_append_rejects_invalid() {
        let db = Database::open(":memory:").unwrap();
        let err = db.append(sample_at(base(), -1.0, None)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSample { field: "power", .. }));
        assert!(db.is_empty().unwrap());
    }

    #[test]
    fn test_query_orders_out_of_order_appends() {
        let db = Database::open(":memory:").unwrap();
        db.append(sample_at(base() + Duration::hours(2), 3.0, None))
            .unwrap();
        db.append(sample_at(base(), 1.0, None)).unwrap();
        db.append(sample_at(base() + Duration::hours(1), 2.0, None))
            .unwrap();

        let window = db
            .query(base(), base() + Duration::hours(5), None)
            .unwrap();
        assert_eq!(window.powers(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_query_location_filter_and_bounds() {
        let db = Database::open(":memory:").unwrap();
        db.append(sample_at(base(), 100.0, Some("Gedung A")))
            .unwrap();
        db.append(sample_at(base(), 200.0, Some("Gedung B")))
            .unwrap();
        db.append(sample_at(base() + Duration::hours(3), 300.0, Some("Gedung A")))
            .unwrap();

        let window = db
            .query(base(), base() + Duration::hours(1), Some("Gedung A"))
            .unwrap();
        assert_eq!(window.powers(), vec![100.0]);

        let all = db
            .query(base(), base() + Duration::hours(3), None)
            .unwrap();
        assert_eq!(all.len(), 3);

        let inverted = db
            .query(base() + Duration::hours(1), base(), None)
            .unwrap();
        assert!(inverted.is_empty());
    }

    #[test]
    fn test_latest() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.latest(None).unwrap().is_none());

        db.append(sample_at(base() + Duration::hours(1), 150.0, Some("Gedung A")))
            .unwrap();
        db.append(sample_at(base(), 250.0, Some("Gedung B")))
            .unwrap();

        assert_eq!(db.latest(None).unwrap().unwrap().power, 150.0);
        assert_eq!(db.latest(Some("Gedung B")).unwrap().unwrap().power, 250.0);
        assert!(db.latest(Some("Gedung C")).unwrap().is_none());
    }

    #[test]
    fn test_rules_round_trip_and_active_filter() {
        let db = Database::open(":memory:").unwrap();
        let seeded = db
            .seed_rules_if_empty(&[
                rule("Lampu malam", "lights", DayOfWeek::Monday, true),
                rule("Lampu libur", "lights", DayOfWeek::Sunday, false),
                rule("Pompa", "pump", DayOfWeek::Monday, true),
            ])
            .unwrap();
        assert_eq!(seeded, 3);

        let active = db.active_rules("lights").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, Some(1));
        assert!(active[0].is_overnight());

        assert_eq!(db.list_rules().unwrap().len(), 3);
    }

    #[test]
    fn test_seed_rules_only_once() {
        let db = Database::open(":memory:").unwrap();
        let seed = vec![
            rule("a", "lights", DayOfWeek::Monday, true),
            rule("b", "lights", DayOfWeek::Tuesday, true),
        ];

        assert_eq!(db.seed_rules_if_empty(&seed).unwrap(), 2);
        assert_eq!(db.seed_rules_if_empty(&seed).unwrap(), 0);
        assert_eq!(db.list_rules().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_seeding_inserts_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kwatch.db");
        let db = std::sync::Arc::new(Database::open(path.to_str().unwrap()).unwrap());
        let seed = vec![
            rule("a", "lights", DayOfWeek::Monday, true),
            rule("b", "lights", DayOfWeek::Tuesday, true),
        ];

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = std::sync::Arc::clone(&db);
                let seed = seed.clone();
                std::thread::spawn(move || db.seed_rules_if_empty(&seed).unwrap())
            })
            .collect();
        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(inserted, 2);
        assert_eq!(db.list_rules().unwrap().len(), 2);
    }

    #[test]
    fn test_on_disk_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("kwatch.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(path).unwrap();
            db.append(sample_at(base(), 420.0, None)).unwrap();
        }

        let db = Database::open(path).unwrap();
        assert_eq!(db.len().unwrap(), 1);
        assert_eq!(db.latest(None).unwrap().unwrap().power, 420.0);
    }
}
