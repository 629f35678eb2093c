//! Threshold alerts with per-rule cooldown.
//!
//! A rule fires at most once per cooldown window while its condition holds.
//! It re-arms only when the cooldown expires, never because the condition
//! cleared.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::metrics::SystemSnapshot;

pub const HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_COOLDOWN_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    BatteryCharge,
    Temperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    AtLeast,
    AtMost,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::AtLeast => value >= threshold,
            Comparison::AtMost => value <= threshold,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

fn default_cooldown_secs() -> f64 {
    DEFAULT_COOLDOWN_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub metric: AlertMetric,
    pub comparison: Comparison,
    pub threshold: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64, // fractional seconds allowed
    #[serde(default)]
    pub sound: bool,
}

impl AlertRule {
    pub fn new(id: &str, name: &str, metric: AlertMetric, comparison: Comparison, threshold: f64) -> Self {
        AlertRule {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            metric,
            comparison,
            threshold,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            sound: false,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = cooldown.as_secs_f64();
        self
    }

    pub fn with_sound(mut self, sound: bool) -> Self {
        self.sound = sound;
        self
    }

    /// Negative or NaN cooldowns count as none; an infinite one never expires.
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Rules shipped out of the box: CPU ≥ 80 %, memory ≥ 85 %, disk ≥ 90 % used,
/// battery ≤ 20 % while discharging.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new("cpu_80", "CPU Alert (80%)", AlertMetric::CpuUsage, Comparison::AtLeast, 80.0)
            .with_sound(true),
        AlertRule::new("memory_85", "Memory Alert (85%)", AlertMetric::MemoryUsage, Comparison::AtLeast, 85.0),
        AlertRule::new("disk_low", "Disk Space Low (10%)", AlertMetric::DiskUsage, Comparison::AtLeast, 90.0)
            .with_sound(true),
        AlertRule::new("battery_low", "Battery Low (20%)", AlertMetric::BatteryCharge, Comparison::AtMost, 20.0)
            .with_sound(true),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub title: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub play_sound: bool,
}

/// Newest-first event log capped at `HISTORY_CAPACITY`.
#[derive(Debug, Clone)]
pub struct AlertHistory {
    events: VecDeque<AlertEvent>,
    capacity: usize,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        AlertHistory {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: AlertEvent) {
        self.events.push_front(event);
        while self.events.len() > self.capacity {
            self.events.pop_back();
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<AlertEvent> {
        self.events.iter().take(limit).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<AlertEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlertEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Idle,
    CoolingDown { remaining: Duration },
}

pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
    last_fired: HashMap<String, Instant>,
    history: AlertHistory,
    notifications_enabled: bool,
    notification_sound: bool,
}

impl AlertEvaluator {
    pub fn new(config: &MonitorConfig) -> Self {
        AlertEvaluator {
            rules: config.alert_rules.clone(),
            last_fired: HashMap::new(),
            history: AlertHistory::new(),
            notifications_enabled: config.notifications_enabled,
            notification_sound: config.notification_sound,
        }
    }

    /// Swap in new rules and toggles. Cooldowns survive for rule ids that are
    /// still present.
    pub fn apply_config(&mut self, config: &MonitorConfig) {
        self.rules = config.alert_rules.clone();
        let rules = &self.rules;
        self.last_fired.retain(|id, _| rules.iter().any(|r| &r.id == id));
        self.notifications_enabled = config.notifications_enabled;
        self.notification_sound = config.notification_sound;
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&AlertRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn set_rule_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn rule_state(&self, id: &str, now: Instant) -> Option<RuleState> {
        let rule = self.rule(id)?;
        let state = match self.last_fired.get(id) {
            Some(fired) => {
                let elapsed = now.saturating_duration_since(*fired);
                if elapsed >= rule.cooldown() {
                    RuleState::Idle
                } else {
                    RuleState::CoolingDown {
                        remaining: rule.cooldown() - elapsed,
                    }
                }
            }
            None => RuleState::Idle,
        };
        Some(state)
    }

    /// Check every enabled rule against `snapshot`, record fired events in the
    /// history and return them oldest-first.
    pub fn evaluate(&mut self, snapshot: &SystemSnapshot, now: Instant, at: DateTime<Utc>) -> Vec<AlertEvent> {
        if !self.notifications_enabled {
            return Vec::new();
        }

        let mut fired = Vec::new();
        for rule in self.rules.iter().filter(|r| r.enabled) {
            let Some(value) = metric_value(rule.metric, snapshot) else {
                continue;
            };
            if !rule.comparison.holds(value, rule.threshold) {
                continue;
            }
            if let Some(last) = self.last_fired.get(&rule.id) {
                if now.saturating_duration_since(*last) < rule.cooldown() {
                    continue;
                }
            }

            let (title, message) = describe(rule.metric, value);
            let event = AlertEvent {
                id: uuid::Uuid::new_v4().to_string(),
                rule_id: rule.id.clone(),
                title,
                message,
                value,
                threshold: rule.threshold,
                timestamp: at,
                play_sound: self.notification_sound && rule.sound,
            };
            info!("alert {}: {}", rule.id, event.message);
            self.last_fired.insert(rule.id.clone(), now);
            fired.push(event);
        }

        for event in &fired {
            self.history.push(event.clone());
        }
        fired
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Current value of `metric`, or `None` when the rule should not be checked.
/// Battery charge is withheld while charging so low-battery alerts stay quiet.
pub fn metric_value(metric: AlertMetric, snapshot: &SystemSnapshot) -> Option<f64> {
    match metric {
        AlertMetric::CpuUsage => snapshot.cpu.value.as_ref().map(|c| c.usage_percent),
        AlertMetric::MemoryUsage => snapshot.memory.value.as_ref().map(|m| m.used_percentage),
        AlertMetric::DiskUsage => snapshot
            .disk
            .value
            .as_ref()
            .filter(|d| d.total_bytes > 0)
            .map(|d| d.usage_percentage),
        AlertMetric::BatteryCharge => snapshot
            .battery
            .value
            .as_ref()
            .and_then(|b| b.as_ref())
            .filter(|b| !b.is_charging)
            .map(|b| b.percentage),
        AlertMetric::Temperature => snapshot.max_temperature(),
    }
}

fn describe(metric: AlertMetric, value: f64) -> (String, String) {
    match metric {
        AlertMetric::CpuUsage => ("High CPU Usage".into(), format!("CPU usage is {:.1}%", value)),
        AlertMetric::MemoryUsage => ("High Memory Usage".into(), format!("Memory usage is {:.1}%", value)),
        AlertMetric::DiskUsage => (
            "Low Disk Space".into(),
            format!("Only {:.1}% free", (100.0 - value).max(0.0)),
        ),
        AlertMetric::BatteryCharge => ("Low Battery".into(), format!("Battery is {:.0}%", value)),
        AlertMetric::Temperature => ("High Temperature".into(), format!("Hottest sensor at {:.0}°C", value)),
    }
}
