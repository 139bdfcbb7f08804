//! Rule evaluation against newly ingested records.
//!
//! Rules are authored externally; the engine keeps a cached snapshot of the
//! enabled set and refreshes it on a timer, so rule edits take effect within
//! one refresh interval. Evaluation is side-effect-isolated per rule: a
//! store failure for one rule never stops the remaining rules or records.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::broadcast::{Broadcaster, Subscription};
use crate::storage::RuleStore;
use crate::types::{
    AlertCondition, AlertRule, ConditionOperator, ConditionType, NormalizedRecord, Notification,
    NotificationStatus,
};

/// Evaluates cached alert rules against records and raises notifications.
pub struct AlertEngine {
    store: Arc<dyn RuleStore>,
    refresh_interval: Duration,
    rules: Mutex<Arc<Vec<AlertRule>>>,
    /// Trigger times observed since the last refresh. The cached rule list
    /// is an immutable snapshot, so cooldown updates live here and are
    /// merged with the stored `last_triggered` on evaluation.
    recent_triggers: Mutex<HashMap<String, DateTime<Utc>>>,
    notifications: Broadcaster<Notification>,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn RuleStore>, refresh_interval: Duration) -> Self {
        Self {
            store,
            refresh_interval,
            rules: Mutex::new(Arc::new(Vec::new())),
            recent_triggers: Mutex::new(HashMap::new()),
            notifications: Broadcaster::new(),
        }
    }

    /// Re-queries the rule store and atomically swaps the cached snapshot.
    /// A failed refresh keeps the previous cache.
    pub fn refresh_rules(&self) {
        match self.store.list_enabled_rules() {
            Ok(rules) => {
                tracing::debug!(count = rules.len(), "Loaded active alert rules");
                let snapshot = Arc::new(rules);
                *self.rules.lock().expect("rule cache lock poisoned") = snapshot;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to refresh alert rules; keeping previous cache");
            }
        }
    }

    /// Number of rules in the current cache snapshot.
    pub fn cached_rule_count(&self) -> usize {
        self.rules.lock().expect("rule cache lock poisoned").len()
    }

    /// Evaluates every cached rule against one record, raising a
    /// notification per matching rule that is out of cooldown.
    pub fn check_record(&self, record: &NormalizedRecord) {
        let rules = Arc::clone(&self.rules.lock().expect("rule cache lock poisoned"));
        if rules.is_empty() {
            return;
        }

        let now = Utc::now();
        for rule in rules.iter() {
            if self.in_cooldown(rule, now) {
                continue;
            }
            let matches = rule
                .conditions
                .iter()
                .all(|condition| evaluate_condition(record, condition));
            if matches {
                self.trigger(rule, record, now);
            }
        }
    }

    fn in_cooldown(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        if rule.cooldown_minutes == 0 {
            return false;
        }
        let recent = self
            .recent_triggers
            .lock()
            .expect("trigger map lock poisoned")
            .get(&rule.id)
            .copied();
        let last_triggered = match (rule.last_triggered, recent) {
            (Some(stored), Some(seen)) => Some(stored.max(seen)),
            (stored, seen) => stored.or(seen),
        };
        let Some(last_triggered) = last_triggered else {
            return false;
        };
        now - last_triggered < ChronoDuration::minutes(rule.cooldown_minutes)
    }

    fn trigger(&self, rule: &AlertRule, record: &NormalizedRecord, now: DateTime<Utc>) {
        let notification = Notification {
            id: ulid::Ulid::new().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            message: alert_message(rule, record),
            record_id: record.record_id.clone(),
            method: record.request.method.clone(),
            uri: record.request.uri.clone(),
            status_code: record.response.as_ref().map(|response| response.status_code),
            source_ip: record.source_ip.clone(),
            dest_ip: record.dest_ip.clone(),
            timestamp: record.timestamp,
            status: NotificationStatus::Unread,
            created_at: now,
        };

        if let Err(err) = self.store.insert_notification(&notification) {
            tracing::warn!(error = %err, rule = %rule.name, "Failed to persist notification");
            return;
        }
        if let Err(err) = self.store.mark_triggered(&rule.id, now) {
            tracing::warn!(error = %err, rule = %rule.name, "Failed to update rule trigger time");
        }
        self.recent_triggers
            .lock()
            .expect("trigger map lock poisoned")
            .insert(rule.id.clone(), now);

        tracing::info!(rule = %rule.name, record = %record.record_id, "Alert triggered");
        self.notifications.publish(&notification);
    }

    pub fn subscribe_notifications<F>(&self, listener: F) -> Subscription<Notification>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.notifications.subscribe(listener)
    }

    /// Blocking refresh loop; refreshes immediately, then on the configured
    /// interval until `stop` is set. Meant to run on its own thread.
    pub fn run_refresh_loop(&self, stop: &AtomicBool) {
        self.refresh_rules();
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(self.refresh_interval);
            if stop.load(Ordering::SeqCst) {
                break;
            }
            self.refresh_rules();
        }
    }
}

fn alert_message(rule: &AlertRule, record: &NormalizedRecord) -> String {
    let mut message = format!(
        "Alert: {}\n{} {}",
        rule.name, record.request.method, record.request.uri
    );
    if let Some(response) = record.response.as_ref() {
        message.push_str(&format!(" returned {}", response.status_code));
    }
    message
}

// ─────────────────────────────────────────────────────────────────────────────
// Condition evaluation
// ─────────────────────────────────────────────────────────────────────────────

fn evaluate_condition(record: &NormalizedRecord, condition: &AlertCondition) -> bool {
    match condition.condition_type {
        ConditionType::StatusCode => match record.response.as_ref() {
            Some(response) => compare_value(
                &serde_json::json!(response.status_code),
                condition.operator,
                &condition.value,
            ),
            None => false,
        },
        ConditionType::StatusRange => {
            let Some(status_code) = record.response.as_ref().map(|r| r.status_code) else {
                return false;
            };
            let Some(range) = condition.value.as_str() else {
                return false;
            };
            let Ok(range_prefix) = range.trim_end_matches('x').parse::<u16>() else {
                return false;
            };
            let status_prefix = status_code / 100;
            if condition.operator == ConditionOperator::Equals {
                status_prefix == range_prefix
            } else {
                status_prefix != range_prefix
            }
        }
        // Timing data is not captured yet; never matches.
        ConditionType::ResponseTime => false,
        ConditionType::Method => compare_value(
            &serde_json::json!(record.request.method),
            condition.operator,
            &condition.value,
        ),
        ConditionType::UrlPattern => {
            let uri = record.request.uri.as_str();
            match condition.operator {
                ConditionOperator::Contains => uri.contains(&value_as_string(&condition.value)),
                ConditionOperator::Regex => regex_matches(&condition.value, uri),
                _ => compare_value(
                    &serde_json::json!(uri),
                    condition.operator,
                    &condition.value,
                ),
            }
        }
    }
}

/// Generic comparator with loose typing: equality coerces numbers and
/// numeric strings, ordering coerces to numbers, `contains` is a substring
/// test, and a malformed regex is simply a non-match.
fn compare_value(
    actual: &serde_json::Value,
    operator: ConditionOperator,
    expected: &serde_json::Value,
) -> bool {
    match operator {
        ConditionOperator::Equals => loose_eq(actual, expected),
        ConditionOperator::NotEquals => !loose_eq(actual, expected),
        ConditionOperator::GreaterThan => match (value_as_f64(actual), value_as_f64(expected)) {
            (Some(actual), Some(expected)) => actual > expected,
            _ => false,
        },
        ConditionOperator::LessThan => match (value_as_f64(actual), value_as_f64(expected)) {
            (Some(actual), Some(expected)) => actual < expected,
            _ => false,
        },
        ConditionOperator::Contains => {
            value_as_string(actual).contains(&value_as_string(expected))
        }
        ConditionOperator::Regex => regex_matches(expected, &value_as_string(actual)),
    }
}

fn loose_eq(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    if let (Some(actual), Some(expected)) = (value_as_f64(actual), value_as_f64(expected)) {
        return actual == expected;
    }
    value_as_string(actual) == value_as_string(expected)
}

fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn regex_matches(pattern: &serde_json::Value, text: &str) -> bool {
    match Regex::new(&value_as_string(pattern)) {
        Ok(regex) => regex.is_match(text),
        Err(_) => false,
    }
}
