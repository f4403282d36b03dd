//! Environment conditions
//!
//! A closed set of condition types; exactly one is true at a time. Equality
//! for status-write suppression ignores transition timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed condition set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Progressing,
    Available,
    Degraded,
    Terminated,
}

impl ConditionType {
    pub const ALL: [ConditionType; 4] = [
        ConditionType::Progressing,
        ConditionType::Available,
        ConditionType::Degraded,
        ConditionType::Terminated,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    pub status: bool,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    pub last_transition_time: DateTime<Utc>,
}

/// Replace the condition list so that `active` is the single true condition.
///
/// Transition timestamps are preserved for conditions whose (type, status)
/// pair did not change, so repeated identical updates never touch the list.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    active: ConditionType,
    reason: &str,
    message: &str,
) {
    let now = Utc::now();
    let previous = std::mem::take(conditions);

    for condition_type in ConditionType::ALL {
        let status = condition_type == active;
        let (reason, message) = if status {
            (reason.to_string(), message.to_string())
        } else {
            (String::new(), String::new())
        };

        let last_transition_time = previous
            .iter()
            .find(|c| c.condition_type == condition_type && c.status == status)
            .map(|c| c.last_transition_time)
            .unwrap_or(now);

        conditions.push(Condition {
            condition_type,
            status,
            reason,
            message,
            last_transition_time,
        });
    }
}

/// Condition equality for write suppression: timestamps are ignored.
pub fn conditions_equal(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.condition_type == y.condition_type
                && x.status == y.status
                && x.reason == y.reason
                && x.message == y.message
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_condition_true() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::Progressing,
            "Provisioning",
            "phase 1",
        );
        assert_eq!(conditions.len(), 4);
        assert_eq!(conditions.iter().filter(|c| c.status).count(), 1);
        assert!(conditions
            .iter()
            .any(|c| c.condition_type == ConditionType::Progressing && c.status));
    }

    #[test]
    fn test_repeated_update_keeps_timestamps() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, ConditionType::Available, "Ready", "ok");
        let first = conditions.clone();

        set_condition(&mut conditions, ConditionType::Available, "Ready", "ok");
        let timestamps_before: Vec<_> = first.iter().map(|c| c.last_transition_time).collect();
        let timestamps_after: Vec<_> = conditions.iter().map(|c| c.last_transition_time).collect();
        assert_eq!(timestamps_before, timestamps_after);
    }

    #[test]
    fn test_transition_updates_only_changed_entries() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, ConditionType::Progressing, "Run", "go");
        set_condition(&mut conditions, ConditionType::Degraded, "NodeFailed", "x");

        let degraded = conditions
            .iter()
            .find(|c| c.condition_type == ConditionType::Degraded)
            .unwrap();
        assert!(degraded.status);
        assert_eq!(degraded.reason, "NodeFailed");

        // Available stayed false through both updates, so its timestamp held
        let available = conditions
            .iter()
            .find(|c| c.condition_type == ConditionType::Available)
            .unwrap();
        assert!(!available.status);
    }

    #[test]
    fn test_equality_ignores_timestamps() {
        let mut a = Vec::new();
        set_condition(&mut a, ConditionType::Available, "Ready", "ok");
        let mut b = a.clone();
        for c in &mut b {
            c.last_transition_time = c.last_transition_time + chrono::Duration::hours(1);
        }
        assert!(conditions_equal(&a, &b));

        set_condition(&mut b, ConditionType::Degraded, "NodeFailed", "x");
        assert!(!conditions_equal(&a, &b));
    }
}
