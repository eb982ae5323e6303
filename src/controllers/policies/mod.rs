mod ancestors;
mod backend_traffic_policy;
mod http_route_policy;

pub use ancestors::{accepted_gateways, AncestorScan};
pub use backend_traffic_policy::{
    evaluate_backend_traffic_policies, process_backend_traffic_policies, update_delete_backend_traffic_ancestors, BackendTrafficPolicyOutcome,
};
pub use http_route_policy::{
    check_policies_conflict, policies_targeting, process_http_route_policies, process_ingress_http_route_policies, update_delete_ancestors,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use tracing::{debug, warn};

use crate::{
    common::{set_condition, ManagedObject, NamespacedName, ObjectKind, ParentReference},
    crds::{PolicyAncestorStatus, PolicyStatus, PolicyTargetReference},
    services::{Mutation, MutatorError, StatusUpdate},
};

/// Gateway API caps the ancestor list of a policy.
pub const MAX_ANCESTORS: usize = 16;
pub const CONFLICT_MESSAGE: &str = "conflicts with another policy targeting the same resource";

/// Canonical identity of a policy target, optionally narrowed to a section.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyTargetKey {
    pub namespaced_name: NamespacedName,
    pub group: String,
    pub kind: String,
    pub section_name: Option<String>,
}

impl PolicyTargetKey {
    pub fn new(policy_namespace: &str, target: &PolicyTargetReference) -> Self {
        Self {
            namespaced_name: NamespacedName::new(policy_namespace, &target.name),
            group: target.group.clone(),
            kind: target.kind.clone(),
            section_name: target.section().map(ToOwned::to_owned),
        }
    }

    pub fn targets(&self, namespaced_name: &NamespacedName, group: &str, kind: &str) -> bool {
        self.namespaced_name == *namespaced_name && self.group == group && self.kind == kind
    }
}

/// Merges `entry` into `status`, keyed by ancestor ref and controller.
///
/// Returns false when the same condition is already present, and when the entry
/// would exceed [`MAX_ANCESTORS`].
pub fn set_ancestor_status(status: &mut PolicyStatus, entry: PolicyAncestorStatus, policy_namespace: &str) -> bool {
    let existing = status
        .ancestors
        .iter_mut()
        .find(|a| a.controller_name == entry.controller_name && a.ancestor_ref.value_eq(&entry.ancestor_ref, policy_namespace));

    if let Some(existing) = existing {
        return entry.conditions.into_iter().fold(false, |changed, condition| set_condition(&mut existing.conditions, condition) || changed);
    }

    if status.ancestors.len() >= MAX_ANCESTORS {
        warn!("Policy already reports {MAX_ANCESTORS} ancestors, dropping {:?}", entry.ancestor_ref);
        return false;
    }
    status.ancestors.push(entry);
    true
}

/// Removes the entries of `controller_name` whose ancestor is not in `valid`.
pub fn delete_ancestors(status: &mut PolicyStatus, controller_name: &str, valid: &[ParentReference], policy_namespace: &str) -> bool {
    let before = status.ancestors.len();
    status
        .ancestors
        .retain(|a| a.controller_name != controller_name || valid.iter().any(|v| v.value_eq(&a.ancestor_ref, policy_namespace)));
    let removed = before - status.ancestors.len();
    if removed > 0 {
        debug!("Pruned {removed} stale ancestors");
    }
    removed > 0
}

pub fn ancestor_status(ancestor_ref: ParentReference, controller_name: &str, condition: Condition) -> PolicyAncestorStatus {
    PolicyAncestorStatus {
        ancestor_ref,
        controller_name: controller_name.to_owned(),
        conditions: vec![condition],
    }
}

/// Ancestor entries to merge into a policy status, and optionally the complete set
/// of still valid ancestors.
#[derive(Clone, Debug, Default)]
pub struct AncestorChange {
    pub controller_name: String,
    pub entries: Vec<PolicyAncestorStatus>,
    pub retain: Option<Vec<ParentReference>>,
}

impl AncestorChange {
    fn apply(&self, status: &mut Option<PolicyStatus>, policy_namespace: &str) -> bool {
        let status = status.get_or_insert_with(PolicyStatus::default);
        let mut changed = match &self.retain {
            Some(valid) => delete_ancestors(status, &self.controller_name, valid, policy_namespace),
            None => false,
        };
        for entry in &self.entries {
            changed = set_ancestor_status(status, entry.clone(), policy_namespace) || changed;
        }
        changed
    }
}

/// Status write re-applying `change` onto the live policy.
pub fn policy_status_update(kind: ObjectKind, template: ManagedObject, change: AncestorChange) -> StatusUpdate {
    StatusUpdate::new(kind, template, move |live| {
        let namespace = live.meta().namespace.clone().unwrap_or_default();
        let updated = match live {
            ManagedObject::BackendTrafficPolicy(policy) if kind == ObjectKind::BackendTrafficPolicy => {
                let mut policy = policy.as_ref().clone();
                change.apply(&mut policy.status, &namespace).then(|| ManagedObject::from(policy))
            },
            ManagedObject::HttpRoutePolicy(policy) if kind == ObjectKind::HttpRoutePolicy => {
                let mut policy = policy.as_ref().clone();
                change.apply(&mut policy.status, &namespace).then(|| ManagedObject::from(policy))
            },
            _ => return Err(MutatorError::unexpected(live)),
        };
        Ok(updated.map_or(Mutation::Skip, Mutation::Apply))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{accepted_condition, ConditionReason};

    const CONTROLLER: &str = "apisix.apache.org/apisix-ingress-controller";

    fn entry(gateway: &str, reason: ConditionReason) -> PolicyAncestorStatus {
        ancestor_status(ParentReference::gateway("infra", gateway), CONTROLLER, accepted_condition(reason, "message", Some(1)))
    }

    #[test]
    fn set_ancestor_status_is_idempotent() {
        let mut status = PolicyStatus::default();
        assert!(set_ancestor_status(&mut status, entry("gw", ConditionReason::Accepted), "apps"));
        assert!(!set_ancestor_status(&mut status, entry("gw", ConditionReason::Accepted), "apps"));
        assert_eq!(status.ancestors.len(), 1);

        assert!(set_ancestor_status(&mut status, entry("gw", ConditionReason::Conflicted), "apps"));
        assert_eq!(status.ancestors.len(), 1);
        assert_eq!(status.ancestors[0].conditions[0].reason, "Conflicted");

        let other_controller = PolicyAncestorStatus {
            controller_name: "example.com/other".to_owned(),
            ..entry("gw", ConditionReason::Accepted)
        };
        assert!(set_ancestor_status(&mut status, other_controller, "apps"));
        assert_eq!(status.ancestors.len(), 2);
    }

    #[test]
    fn ancestors_are_bounded() {
        let mut status = PolicyStatus::default();
        for i in 0..MAX_ANCESTORS {
            assert!(set_ancestor_status(&mut status, entry(&format!("gw{i}"), ConditionReason::Accepted), "apps"));
        }
        assert!(!set_ancestor_status(&mut status, entry("one-too-many", ConditionReason::Accepted), "apps"));
        assert_eq!(status.ancestors.len(), MAX_ANCESTORS);
    }

    #[test]
    fn stale_ancestors_are_deleted() {
        let mut status = PolicyStatus::default();
        set_ancestor_status(&mut status, entry("gw1", ConditionReason::Accepted), "apps");
        set_ancestor_status(&mut status, entry("gw2", ConditionReason::Accepted), "apps");
        let foreign = PolicyAncestorStatus {
            controller_name: "example.com/other".to_owned(),
            ..entry("gw3", ConditionReason::Accepted)
        };
        set_ancestor_status(&mut status, foreign, "apps");

        assert!(delete_ancestors(&mut status, CONTROLLER, &[ParentReference::gateway("infra", "gw2")], "apps"));
        let names: Vec<_> = status.ancestors.iter().map(|a| a.ancestor_ref.name.as_str()).collect();
        assert_eq!(names, vec!["gw2", "gw3"]);
        assert!(!delete_ancestors(&mut status, CONTROLLER, &[ParentReference::gateway("infra", "gw2")], "apps"));
    }
}
