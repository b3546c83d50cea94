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

//! Schedule gate for relay groups.
//!
//! Each device group moves between three states on every tick:
//!
//! ```text
//!            manual flag set
//!   AUTO_OFF ───────────────▶ MANUAL_OVERRIDE
//!      ▲  │                        │
//!  no  │  │ a rule covers now      │ flag cleared: next tick
//! rule │  ▼                        ▼ re-evaluates the rules
//!   AUTO_ON ◀──────────────────────┘
//! ```
//!
//! Rules are OR-ed: any active rule for today's weekday covering the current
//! local time switches the group on. Two rules can never disagree, so rule
//! conflicts need no resolution.
//!
//! An overnight rule belongs to the weekday it is filed under. A Monday
//! 22:00-06:00 rule covers Monday 00:00-06:00 and Monday 22:00-23:59.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use kwatch_types::{DayOfWeek, ScheduleRule};

use crate::error::{PipelineError, Result};
use crate::relay::{RelaySink, RelayStates};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    AutoOff,
    AutoOn,
    ManualOverride,
}

impl DeviceState {
    /// Value written to each relay, or `None` while an operator is in control.
    pub fn relay_value(self) -> Option<u8> {
        match self {
            Self::AutoOff => Some(0),
            Self::AutoOn => Some(1),
            Self::ManualOverride => None,
        }
    }
}

/// Relays switched together by one set of rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub name: String,
    pub relays: Vec<String>,
}

/// Read access to the operator-maintained rule table.
pub trait ScheduleSource: Send + Sync {
    /// Active rules for one device group.
    fn active_rules(&self, device_group: &str) -> Result<Vec<ScheduleRule>>;
}

/// Rules held in memory.
#[derive(Debug, Default)]
pub struct MemoryRules {
    rules: Vec<ScheduleRule>,
}

impl MemoryRules {
    pub fn new(rules: Vec<ScheduleRule>) -> Self {
        Self { rules }
    }
}

impl ScheduleSource for MemoryRules {
    fn active_rules(&self, device_group: &str) -> Result<Vec<ScheduleRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.is_active && r.device_group == device_group)
            .cloned()
            .collect())
    }
}

/// Whether `rule` switches its group on at local `now`.
pub fn rule_matches(rule: &ScheduleRule, now: NaiveDateTime) -> bool {
    rule.is_active
        && rule.day_of_week == DayOfWeek::from(now.weekday())
        && rule.covers(now.time())
}

/// Pure state decision for local time `now`.
pub fn evaluate(now: NaiveDateTime, rules: &[ScheduleRule], manual_override: bool) -> DeviceState {
    if manual_override {
        return DeviceState::ManualOverride;
    }
    if rules.iter().any(|r| rule_matches(r, now)) {
        DeviceState::AutoOn
    } else {
        DeviceState::AutoOff
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum PushStatus {
    NotNeeded,
    Pushed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Another tick for the group was still running.
    Skipped,
    Evaluated {
        state: DeviceState,
        changed: bool,
        push: PushStatus,
    },
    /// Rules could not be read; the group keeps its previous state.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub group: String,
    #[serde(flatten)]
    pub outcome: TickOutcome,
}

/// Point-in-time view of one group, for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    pub group: String,
    pub relays: Vec<String>,
    pub state: Option<DeviceState>,
    pub manual_override: bool,
    pub pending_push: bool,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_push: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct GroupState {
    state: Option<DeviceState>,
    manual_override: bool,
    pending_push: bool,
}

#[derive(Debug)]
struct GroupSlot {
    group: DeviceGroup,
    // Held for the whole tick; try_lock failure means a tick is in flight.
    tick_guard: tokio::sync::Mutex<GroupState>,
    status: RwLock<GroupStatus>,
}

/// Per-group schedule evaluation with single-flight ticks.
pub struct ScheduleGate {
    slots: Vec<GroupSlot>,
    source: Arc<dyn ScheduleSource>,
    sink: Arc<dyn RelaySink>,
    sink_timeout: Duration,
    tz: Tz,
}

impl std::fmt::Debug for ScheduleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleGate")
            .field("groups", &self.slots.len())
            .field("sink_timeout", &self.sink_timeout)
            .field("tz", &self.tz)
            .finish_non_exhaustive()
    }
}

impl ScheduleGate {
    pub fn new(
        groups: Vec<DeviceGroup>,
        source: Arc<dyn ScheduleSource>,
        sink: Arc<dyn RelaySink>,
        sink_timeout: Duration,
        tz: Tz,
    ) -> Self {
        let slots = groups
            .into_iter()
            .map(|group| GroupSlot {
                status: RwLock::new(GroupStatus {
                    group: group.name.clone(),
                    relays: group.relays.clone(),
                    state: None,
                    manual_override: false,
                    pending_push: false,
                    last_tick: None,
                    last_push: None,
                    last_error: None,
                }),
                tick_guard: tokio::sync::Mutex::new(GroupState::default()),
                group,
            })
            .collect();

        Self {
            slots,
            source,
            sink,
            sink_timeout,
            tz,
        }
    }

    pub fn status(&self) -> Vec<GroupStatus> {
        self.slots.iter().map(|s| s.status.read().clone()).collect()
    }

    /// Evaluate every group once.
    ///
    /// The manual override flag is global, so it is read once per tick. When
    /// the read fails each group keeps its last known value.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<TickReport> {
        let manual_override = match self.with_timeout(self.sink.manual_override()).await {
            Ok(flag) => Some(flag),
            Err(e) => {
                warn!(error = %e, "Could not read manual override flag, using last known value");
                None
            }
        };

        let mut reports = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let outcome = self.tick_group(slot, now, manual_override).await;
            reports.push(TickReport {
                group: slot.group.name.clone(),
                outcome,
            });
        }
        reports
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.sink_timeout, call)
            .await
            .unwrap_or(Err(PipelineError::UpstreamTimeout {
                after: self.sink_timeout,
            }))
    }

    async fn tick_group(
        &self,
        slot: &GroupSlot,
        now: DateTime<Utc>,
        manual_override: Option<bool>,
    ) -> TickOutcome {
        let group = slot.group.name.as_str();
        let Ok(mut current) = slot.tick_guard.try_lock() else {
            debug!(group, "Tick already in progress, skipping");
            return TickOutcome::Skipped;
        };

        if let Some(flag) = manual_override {
            current.manual_override = flag;
        }

        let rules = match self.source.active_rules(group) {
            Ok(rules) => rules,
            Err(e) => {
                error!(group, error = %e, "Failed to load schedule rules");
                let error = e.to_string();
                {
                    let mut status = slot.status.write();
                    status.last_tick = Some(now);
                    status.last_error = Some(error.clone());
                }
                return TickOutcome::Failed { error };
            }
        };

        let local = now.with_timezone(&self.tz).naive_local();
        let next = evaluate(local, &rules, current.manual_override);
        let changed = current.state != Some(next);
        if changed {
            info!(
                group,
                from = ?current.state,
                to = ?next,
                rules = rules.len(),
                "Device group state changed"
            );
        }
        current.state = Some(next);

        let push = match next.relay_value() {
            Some(value) if changed || current.pending_push => {
                let states: RelayStates = slot
                    .group
                    .relays
                    .iter()
                    .map(|relay| (relay.clone(), value))
                    .collect();
                match self.with_timeout(self.sink.push_states(&states)).await {
                    Ok(()) => {
                        current.pending_push = false;
                        info!(group, value, relays = states.len(), "Relay states pushed");
                        PushStatus::Pushed
                    }
                    Err(e) => {
                        current.pending_push = true;
                        warn!(group, error = %e, "Relay push failed, will retry next tick");
                        PushStatus::Failed(e.to_string())
                    }
                }
            }
            _ => PushStatus::NotNeeded,
        };

        {
            let mut status = slot.status.write();
            status.state = current.state;
            status.manual_override = current.manual_override;
            status.pending_push = current.pending_push;
            status.last_tick = Some(now);
            match &push {
                PushStatus::Pushed => {
                    status.last_push = Some(now);
                    status.last_error = None;
                }
                PushStatus::Failed(e) => status.last_error = Some(e.clone()),
                PushStatus::NotNeeded => status.last_error = None,
            }
        }

        TickOutcome::Evaluated {
            state: next,
            changed,
            push,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MemoryRelaySink;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use chrono_tz::Asia::Jakarta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn rule(day: DayOfWeek, start: NaiveTime, end: NaiveTime) -> ScheduleRule {
        ScheduleRule {
            id: None,
            name: "Lampu ITMS".to_owned(),
            device_group: "lights".to_owned(),
            day_of_week: day,
            start_time: start,
            end_time: end,
            is_active: true,
        }
    }

    /// 2025-03-03 is a Monday.
    fn monday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 3)
            .unwrap()
            .and_time(hm(h, m))
    }

    fn monday_utc(h: u32, m: u32) -> DateTime<Utc> {
        Jakarta
            .with_ymd_and_hms(2025, 3, 3, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn lights() -> DeviceGroup {
        DeviceGroup {
            name: "lights".to_owned(),
            relays: vec!["relay1".to_owned(), "relay2".to_owned()],
        }
    }

    fn gate(
        rules: Vec<ScheduleRule>,
        sink: Arc<dyn RelaySink>,
        timeout: Duration,
    ) -> ScheduleGate {
        ScheduleGate::new(
            vec![lights()],
            Arc::new(MemoryRules::new(rules)),
            sink,
            timeout,
            Jakarta,
        )
    }

    fn outcome_state(report: &TickReport) -> Option<DeviceState> {
        match &report.outcome {
            TickOutcome::Evaluated { state, .. } => Some(*state),
            TickOutcome::Skipped | TickOutcome::Failed { .. } => None,
        }
    }

    // ---------------------------------------------------------------------------
    // Pure evaluation
    // ---------------------------------------------------------------------------

    #[test]
    fn test_same_day_rule() {
        let rules = vec![rule(DayOfWeek::Monday, hm(8, 0), hm(18, 0))];
        assert_eq!(evaluate(monday(9, 0), &rules, false), DeviceState::AutoOn);
        assert_eq!(evaluate(monday(19, 0), &rules, false), DeviceState::AutoOff);
    }

    #[test]
    fn test_overnight_rule() {
        let rules = vec![rule(DayOfWeek::Monday, hm(22, 0), hm(6, 0))];
        assert_eq!(evaluate(monday(23, 0), &rules, false), DeviceState::AutoOn);
        assert_eq!(evaluate(monday(12, 0), &rules, false), DeviceState::AutoOff);
        assert_eq!(evaluate(monday(5, 59), &rules, false), DeviceState::AutoOn);
    }

    #[test]
    fn test_rule_for_other_day_ignored() {
        let rules = vec![rule(DayOfWeek::Tuesday, hm(0, 0), hm(23, 59))];
        assert_eq!(evaluate(monday(9, 0), &rules, false), DeviceState::AutoOff);
    }

    #[test]
    fn test_inactive_rule_ignored() {
        let mut r = rule(DayOfWeek::Monday, hm(8, 0), hm(18, 0));
        r.is_active = false;
        assert!(!rule_matches(&r, monday(9, 0)));
    }

    #[test]
    fn test_overlapping_rules_are_idempotent() {
        let rules = vec![
            rule(DayOfWeek::Monday, hm(8, 0), hm(12, 0)),
            rule(DayOfWeek::Monday, hm(10, 0), hm(18, 0)),
        ];
        assert_eq!(evaluate(monday(11, 0), &rules, false), DeviceState::AutoOn);
    }

    #[test]
    fn test_manual_override_short_circuits() {
        let rules = vec![rule(DayOfWeek::Monday, hm(8, 0), hm(18, 0))];
        for h in [3, 9, 20] {
            assert_eq!(
                evaluate(monday(h, 0), &rules, true),
                DeviceState::ManualOverride
            );
        }
    }

    // ---------------------------------------------------------------------------
    // Gate
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn test_gate_pushes_on_first_tick_and_on_change_only() {
        let sink = Arc::new(MemoryRelaySink::new());
        let g = gate(
            vec![rule(DayOfWeek::Monday, hm(8, 0), hm(18, 0))],
            sink.clone(),
            Duration::from_secs(5),
        );

        let r = g.tick(monday_utc(7, 0)).await;
        assert_eq!(outcome_state(&r[0]), Some(DeviceState::AutoOff));
        assert_eq!(sink.push_count(), 1);
        assert_eq!(sink.states().get("relay1"), Some(&0));

        g.tick(monday_utc(7, 30)).await;
        assert_eq!(sink.push_count(), 1);

        let r = g.tick(monday_utc(9, 0)).await;
        assert!(matches!(
            &r[0].outcome,
            TickOutcome::Evaluated {
                state: DeviceState::AutoOn,
                changed: true,
                push: PushStatus::Pushed
            }
        ));
        assert_eq!(sink.states().get("relay2"), Some(&1));
        assert_eq!(sink.push_count(), 2);
    }

    #[tokio::test]
    async fn test_gate_manual_override_freezes_relays() {
        let sink = Arc::new(MemoryRelaySink::new());
        let g = gate(
            vec![rule(DayOfWeek::Monday, hm(8, 0), hm(18, 0))],
            sink.clone(),
            Duration::from_secs(5),
        );

        g.tick(monday_utc(9, 0)).await;
        assert_eq!(sink.push_count(), 1);

        sink.set_manual_override(true);
        for (h, m) in [(12, 0), (19, 0), (23, 0)] {
            let r = g.tick(monday_utc(h, m)).await;
            assert_eq!(outcome_state(&r[0]), Some(DeviceState::ManualOverride));
        }
        assert_eq!(sink.push_count(), 1);
        assert_eq!(sink.states().get("relay1"), Some(&1));

        sink.set_manual_override(false);
        let r = g.tick(monday_utc(23, 5)).await;
        assert_eq!(outcome_state(&r[0]), Some(DeviceState::AutoOff));
        assert_eq!(sink.states().get("relay1"), Some(&0));
        assert!(!g.status()[0].manual_override);
    }

    struct FlakySink {
        fail: std::sync::atomic::AtomicBool,
        delay: Duration,
        pushes: AtomicUsize,
    }

    #[async_trait]
    impl RelaySink for FlakySink {
        async fn push_states(&self, _states: &RelayStates) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(PipelineError::Upstream("unreachable".to_owned()));
            }
            self.pushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn manual_override(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_gate_sink_failure_keeps_local_state_and_retries() {
        let sink = Arc::new(FlakySink {
            fail: std::sync::atomic::AtomicBool::new(true),
            delay: Duration::ZERO,
            pushes: AtomicUsize::new(0),
        });
        let g = gate(
            vec![rule(DayOfWeek::Monday, hm(8, 0), hm(18, 0))],
            sink.clone(),
            Duration::from_secs(5),
        );

        let r = g.tick(monday_utc(9, 0)).await;
        assert!(matches!(
            &r[0].outcome,
            TickOutcome::Evaluated {
                state: DeviceState::AutoOn,
                push: PushStatus::Failed(_),
                ..
            }
        ));
        let status = &g.status()[0];
        assert_eq!(status.state, Some(DeviceState::AutoOn));
        assert!(status.pending_push);
        assert!(status.last_error.is_some());

        sink.fail.store(false, Ordering::SeqCst);
        let r = g.tick(monday_utc(9, 1)).await;
        assert!(matches!(
            &r[0].outcome,
            TickOutcome::Evaluated {
                changed: false,
                push: PushStatus::Pushed,
                ..
            }
        ));
        assert_eq!(sink.pushes.load(Ordering::SeqCst), 1);
        assert!(!g.status()[0].pending_push);
    }

    #[tokio::test]
    async fn test_gate_sink_timeout() {
        let sink = Arc::new(FlakySink {
            fail: std::sync::atomic::AtomicBool::new(false),
            delay: Duration::from_secs(2),
            pushes: AtomicUsize::new(0),
        });
        let g = gate(Vec::new(), sink, Duration::from_millis(50));

        let r = g.tick(monday_utc(9, 0)).await;
        match &r[0].outcome {
            TickOutcome::Evaluated {
                state,
                push: PushStatus::Failed(e),
                ..
            } => {
                assert_eq!(*state, DeviceState::AutoOff);
                assert!(e.contains("did not answer"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(g.status()[0].pending_push);
    }

    struct BlockingSink {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RelaySink for BlockingSink {
        async fn push_states(&self, _states: &RelayStates) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn manual_override(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_gate_drops_overlapping_tick() {
        let sink = Arc::new(BlockingSink {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let g = Arc::new(gate(Vec::new(), sink.clone(), Duration::from_secs(5)));

        let first = {
            let g = Arc::clone(&g);
            tokio::spawn(async move { g.tick(monday_utc(9, 0)).await })
        };
        sink.entered.notified().await;

        let second = g.tick(monday_utc(9, 0)).await;
        assert_eq!(second[0].outcome, TickOutcome::Skipped);

        sink.release.notify_one();
        let first = first.await.unwrap();
        assert_eq!(outcome_state(&first[0]), Some(DeviceState::AutoOff));
    }

    struct CountingSink {
        override_reads: AtomicUsize,
        inner: MemoryRelaySink,
    }

    #[async_trait]
    impl RelaySink for CountingSink {
        async fn push_states(&self, states: &RelayStates) -> Result<()> {
            self.inner.push_states(states).await
        }

        async fn manual_override(&self) -> Result<bool> {
            self.override_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.manual_override().await
        }
    }

    #[tokio::test]
    async fn test_gate_reads_override_once_per_tick() {
        let sink = Arc::new(CountingSink {
            override_reads: AtomicUsize::new(0),
            inner: MemoryRelaySink::new(),
        });
        let pump = DeviceGroup {
            name: "pump".to_owned(),
            relays: vec!["relay3".to_owned()],
        };
        let g = ScheduleGate::new(
            vec![lights(), pump],
            Arc::new(MemoryRules::new(Vec::new())),
            sink.clone(),
            Duration::from_secs(5),
            Jakarta,
        );

        let r = g.tick(monday_utc(9, 0)).await;
        assert_eq!(r.len(), 2);
        assert_eq!(sink.override_reads.load(Ordering::SeqCst), 1);

        sink.inner.set_manual_override(true);
        let r = g.tick(monday_utc(9, 1)).await;
        assert_eq!(sink.override_reads.load(Ordering::SeqCst), 2);
        assert!(
            r.iter()
                .all(|report| outcome_state(report) == Some(DeviceState::ManualOverride))
        );
    }

    struct BrokenRules;

    impl ScheduleSource for BrokenRules {
        fn active_rules(&self, _device_group: &str) -> Result<Vec<ScheduleRule>> {
            Err(PipelineError::Storage("database is locked".to_owned()))
        }
    }

    #[tokio::test]
    async fn test_gate_rule_source_failure() {
        let sink = Arc::new(MemoryRelaySink::new());
        let g = ScheduleGate::new(
            vec![lights()],
            Arc::new(BrokenRules),
            sink.clone(),
            Duration::from_secs(5),
            Jakarta,
        );

        let r = g.tick(monday_utc(9, 0)).await;
        assert!(matches!(&r[0].outcome, TickOutcome::Failed { error } if error.contains("locked")));
        assert_eq!(sink.push_count(), 0);
        assert_eq!(g.status()[0].state, None);
    }
}
