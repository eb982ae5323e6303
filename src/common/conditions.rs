use std::fmt::Display;

use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    chrono::Utc,
};

pub const CONDITION_TYPE_ACCEPTED: &str = "Accepted";
pub const CONDITION_TYPE_RESOLVED_REFS: &str = "ResolvedRefs";
pub const CONDITION_TYPE_PROGRAMMED: &str = "Programmed";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

/// Machine readable reasons written into conditions and ancestor statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionReason {
    Accepted,
    ResolvedRefs,
    NoMatchingParent,
    NoMatchingListenerHostname,
    NotAllowedByListeners,
    RefNotPermitted,
    BackendNotFound,
    Conflicted,
    Invalid,
}

impl ConditionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionReason::Accepted => "Accepted",
            ConditionReason::ResolvedRefs => "ResolvedRefs",
            ConditionReason::NoMatchingParent => "NoMatchingParent",
            ConditionReason::NoMatchingListenerHostname => "NoMatchingListenerHostname",
            ConditionReason::NotAllowedByListeners => "NotAllowedByListeners",
            ConditionReason::RefNotPermitted => "RefNotPermitted",
            ConditionReason::BackendNotFound => "BackendNotFound",
            ConditionReason::Conflicted => "Conflicted",
            ConditionReason::Invalid => "Invalid",
        }
    }
}

impl Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn new_condition(type_: &str, status: bool, reason: ConditionReason, message: impl Into<String>, observed_generation: Option<i64>) -> Condition {
    Condition {
        last_transition_time: Time(Utc::now()),
        message: message.into(),
        observed_generation,
        reason: reason.to_string(),
        status: if status { STATUS_TRUE } else { STATUS_FALSE }.to_owned(),
        type_: type_.to_owned(),
    }
}

pub fn accepted_condition(reason: ConditionReason, message: impl Into<String>, observed_generation: Option<i64>) -> Condition {
    new_condition(CONDITION_TYPE_ACCEPTED, reason == ConditionReason::Accepted, reason, message, observed_generation)
}

pub fn is_condition_present_and_equal(conditions: &[Condition], condition: &Condition) -> bool {
    conditions.iter().any(|c| {
        c.type_ == condition.type_
            && c.status == condition.status
            && c.reason == condition.reason
            && c.message == condition.message
            && c.observed_generation == condition.observed_generation
    })
}

/// Upserts `condition` by type and reports whether the list changed.
///
/// The transition time is kept unless the status flipped. A condition observed for
/// an older generation never replaces a newer one.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    if is_condition_present_and_equal(conditions, &condition) {
        return false;
    }

    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) else {
        conditions.push(condition);
        return true;
    };

    if let (Some(current), Some(new)) = (existing.observed_generation, condition.observed_generation) {
        if current > new {
            return false;
        }
    }

    if existing.status != condition.status {
        existing.last_transition_time = condition.last_transition_time;
    }
    existing.status = condition.status;
    existing.reason = condition.reason;
    existing.message = condition.message;
    existing.observed_generation = condition.observed_generation;
    true
}
