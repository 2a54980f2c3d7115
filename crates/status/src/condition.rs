//! Timestamped lifecycle conditions, keyed by a fixed type name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CompositeStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    Cleanup,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A timestamped fact about a resource's lifecycle state. At most one
/// condition per type exists in a condition set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub last_update_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
    pub reason: String,
    pub message: String,
}

impl CompositeStatus {
    fn add_condition(
        &mut self,
        ctype: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let now = Utc::now();
        self.conditions.push(Condition {
            type_: ctype,
            status,
            last_update_time: now,
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    /// Update or create the condition for `ctype`. A fully-identical update
    /// (same status, reason, and message) touches nothing; otherwise
    /// `last_update_time` is stamped, and `last_transition_time` only when
    /// the status value flips.
    fn set_condition_value(
        &mut self,
        ctype: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let Some(c) = self.conditions.iter_mut().find(|c| c.type_ == ctype) else {
            self.add_condition(ctype, status, reason, message);
            return;
        };
        if c.status == status && c.reason == reason && c.message == message {
            return;
        }
        let now = Utc::now();
        c.last_update_time = now;
        if c.status != status {
            c.last_transition_time = now;
        }
        c.status = status;
        c.reason = reason.to_string();
        c.message = message.to_string();
    }

    pub fn set_condition_true(&mut self, ctype: ConditionType, reason: &str, message: &str) {
        self.set_condition_value(ctype, ConditionStatus::True, reason, message);
    }

    pub fn set_condition_false(&mut self, ctype: ConditionType, reason: &str, message: &str) {
        self.set_condition_value(ctype, ConditionStatus::False, reason, message);
    }

    pub fn get_condition(&self, ctype: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == ctype)
    }

    pub fn is_condition_true(&self, ctype: ConditionType) -> bool {
        self.get_condition(ctype)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    pub fn is_ready(&self) -> bool {
        self.is_condition_true(ConditionType::Ready)
    }

    pub fn is_not_ready(&self) -> bool {
        !self.is_ready()
    }

    pub fn condition_reason(&self, ctype: ConditionType) -> &str {
        self.get_condition(ctype).map(|c| c.reason.as_str()).unwrap_or("")
    }

    /// Shortcut: set the Ready condition true.
    pub fn ready(&mut self, reason: &str, message: &str) {
        self.set_condition_true(ConditionType::Ready, reason, message);
    }

    /// Shortcut: set the Ready condition false.
    pub fn not_ready(&mut self, reason: &str, message: &str) {
        self.set_condition_false(ConditionType::Ready, reason, message);
    }

    pub fn set_error(&mut self, reason: &str, message: &str) {
        self.set_condition_true(ConditionType::Error, reason, message);
    }

    pub fn clear_error(&mut self) {
        self.set_condition_false(ConditionType::Error, "NoError", "No error seen");
    }

    pub fn remove_condition(&mut self, ctype: ConditionType) {
        self.conditions.retain(|c| c.type_ != ctype);
    }

    pub fn remove_all_conditions(&mut self) {
        self.conditions.clear();
    }

    /// Flip every condition's status to False in place, without restamping.
    pub fn clear_all_conditions(&mut self) {
        for c in &mut self.conditions {
            c.status = ConditionStatus::False;
        }
    }
}
