use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Debug, JsonSchema)]
pub enum ConditionType {
    Available,
    Progressing,
    Degraded,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(b: bool) -> Self {
        if b { ConditionStatus::True } else { ConditionStatus::False }
    }
}

/// Condition contains details about one aspect of the managed object health
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type is the condition type
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// Status ("True", "False" or "Unknown")
    pub status: ConditionStatus,
    /// Machine readable reason for the last transition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human-readable message indicating details about the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// LastTransitionTime is the time the status last changed
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    #[must_use]
    pub fn new(condition_type: ConditionType, status: ConditionStatus, reason: &str, message: &str) -> Condition {
        Condition {
            condition_type,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Some(Utc::now()),
        }
    }

    /// Same type, status, reason and message
    pub fn same_content(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

pub fn find_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == ConditionStatus::True)
}

pub fn is_condition_false(conditions: &[Condition], condition_type: ConditionType) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == ConditionStatus::False)
}

/// Insert or update a condition, keeping at most one entry per type.
///
/// The transition time only moves when the status changes.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.condition_type == new.condition_type) {
        Some(existing) => {
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = new.last_transition_time.or_else(|| Some(Utc::now()));
            }
            existing.reason = new.reason;
            existing.message = new.message;
        }
        None => conditions.push(new),
    }
}

pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: ConditionType) {
    conditions.retain(|c| c.condition_type != condition_type);
}

/// Snapshot of the condition statuses, for comparison
pub fn condition_values(conditions: &[Condition]) -> BTreeMap<ConditionType, ConditionStatus> {
    conditions.iter().map(|c| (c.condition_type, c.status)).collect()
}

pub fn conditions_changed(
    original: &BTreeMap<ConditionType, ConditionStatus>,
    new: &BTreeMap<ConditionType, ConditionStatus>,
) -> bool {
    original != new
}

/// Content comparison ignoring transition times
pub fn conditions_content_changed(original: &[Condition], new: &[Condition]) -> bool {
    original.len() != new.len()
        || new.iter().any(|n| {
            find_condition(original, n.condition_type)
                .is_none_or(|o| !o.same_content(n))
        })
}

fn set_all(
    conditions: &mut Vec<Condition>,
    available: bool,
    progressing: bool,
    degraded: bool,
    target: ConditionType,
    reason: &str,
    message: &str,
) {
    for (condition_type, value) in [
        (ConditionType::Available, available),
        (ConditionType::Progressing, progressing),
        (ConditionType::Degraded, degraded),
    ] {
        let (r, m) = if condition_type == target { (reason, message) } else { ("", "") };
        set_condition(conditions, Condition::new(condition_type, value.into(), r, m));
    }
}

/// Available, not progressing, not degraded
pub fn mark_healthy(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_all(conditions, true, false, false, ConditionType::Available, reason, message);
}

/// Available while progressing toward a new version with some dependents not ready
pub fn mark_upgrade_healing_degraded(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_all(conditions, true, true, true, ConditionType::Degraded, reason, message);
}

/// Not available and not progressing: needs human intervention
pub fn mark_failed(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_all(conditions, false, false, true, ConditionType::Degraded, reason, message);
}

pub fn mark_failed_healing(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_all(conditions, false, true, true, ConditionType::Degraded, reason, message);
}

pub fn mark_deploying(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_all(conditions, false, true, false, ConditionType::Progressing, reason, message);
}

/// First deployment with some dependents already ready
pub fn mark_deploying_available(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_all(conditions, true, true, false, ConditionType::Progressing, reason, message);
}
