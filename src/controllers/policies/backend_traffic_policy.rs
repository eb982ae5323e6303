use std::collections::BTreeSet;

use itertools::Itertools;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::debug;

use super::{
    ancestor_status,
    ancestors::{extend_unique, AncestorScan},
    policy_status_update, AncestorChange, PolicyTargetKey, CONFLICT_MESSAGE,
};
use crate::{
    cluster::{ClusterError, ClusterReader},
    common::{accepted_condition, ConditionReason, NamespacedName, ObjectKind, ParentReference, ResourceKey, Route, CORE_GROUP_NAME, DEFAULT_KIND_NAME, SERVICE_KIND_NAME},
    crds::BackendTrafficPolicy,
    services::StatusUpdate,
    translate_context::TranslateContext,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendTrafficPolicyOutcome {
    pub policy: NamespacedName,
    pub reason: ConditionReason,
    pub message: String,
}

/// Decides, for every policy targeting `service`, whether it applies.
///
/// Claims are keyed by (service, port name). A port name the Service does not
/// declare makes the claim invalid and keeps it out of conflict accounting. Among
/// the claimants of one key the first wins when all priorities agree; otherwise
/// every claimant is conflicted.
pub fn evaluate_backend_traffic_policies(policies: &[BackendTrafficPolicy], service: &Service) -> Vec<BackendTrafficPolicyOutcome> {
    let service_name = NamespacedName::of(service);
    let port_names: Vec<&str> = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| ports.iter().filter_map(|p| p.name.as_deref()).collect())
        .unwrap_or_default();

    let mut targeting = vec![];
    let mut invalid: BTreeSet<usize> = BTreeSet::new();
    let mut claims: Vec<(PolicyTargetKey, Vec<usize>)> = vec![];

    for (index, policy) in policies.iter().enumerate() {
        let namespace = policy.namespace().unwrap_or_default();
        for target in &policy.spec.target_refs {
            let key = PolicyTargetKey::new(&namespace, target);
            if !key.targets(&service_name, CORE_GROUP_NAME, SERVICE_KIND_NAME) {
                continue;
            }
            if !targeting.contains(&index) {
                targeting.push(index);
            }
            if let Some(section) = key.section_name.as_deref() {
                if !port_names.contains(&section) {
                    debug!("Policy {namespace}/{} targets unknown port {section} of {service_name}", policy.name_any());
                    invalid.insert(index);
                    continue;
                }
            }
            match claims.iter().position(|(k, _)| *k == key) {
                Some(position) => {
                    let claimants = &mut claims[position].1;
                    if !claimants.contains(&index) {
                        claimants.push(index);
                    }
                },
                None => claims.push((key, vec![index])),
            }
        }
    }

    let mut conflicted: BTreeSet<usize> = BTreeSet::new();
    for (key, claimants) in &claims {
        if claimants.len() < 2 {
            continue;
        }
        let same_priority = claimants.iter().map(|i| policies[*i].spec.priority.unwrap_or_default()).all_equal();
        debug!("Policies {claimants:?} claim {key:?}, same priority {same_priority}");
        if same_priority {
            conflicted.extend(claimants.iter().skip(1));
        } else {
            conflicted.extend(claimants.iter());
        }
    }

    targeting
        .into_iter()
        .map(|index| {
            let policy = &policies[index];
            let (reason, message) = if conflicted.contains(&index) {
                (ConditionReason::Conflicted, CONFLICT_MESSAGE.to_owned())
            } else if invalid.contains(&index) {
                (ConditionReason::Invalid, format!("section name not found in service {service_name}"))
            } else {
                (ConditionReason::Accepted, "Policy has been accepted".to_owned())
            };
            BackendTrafficPolicyOutcome {
                policy: NamespacedName::of(policy),
                reason,
                message,
            }
        })
        .collect()
}

/// Attaches the accepted traffic policies of `service` to the context and queues
/// one ancestor condition per Gateway the service is currently reached through,
/// from this context or any other route of the cluster. Ancestors no longer
/// reached are pruned in the same write.
pub async fn process_backend_traffic_policies(
    reader: &dyn ClusterReader,
    tctx: &mut TranslateContext,
    service: &Service,
    controller_name: &str,
) -> Result<Vec<BackendTrafficPolicyOutcome>, ClusterError> {
    let service_name = NamespacedName::of(service);
    let service_key = ResourceKey::from(service);
    let policies = reader.backend_traffic_policies(&service_name.namespace).await?;
    let outcomes = evaluate_backend_traffic_policies(&policies, service);
    if outcomes.is_empty() {
        return Ok(outcomes);
    }

    let mut ancestors: Vec<ParentReference> = tctx
        .parent_refs
        .ancestors_of_kind(&service_key, DEFAULT_KIND_NAME)
        .iter()
        .map(|gateway| ParentReference::gateway(&gateway.namespace, &gateway.name))
        .collect();
    let in_context: Vec<&ResourceKey> = tctx.parent_refs.parents_of(&service_key).iter().collect();
    let elsewhere = AncestorScan::new(reader, controller_name).service_gateways(&service_key, &in_context).await?;
    extend_unique(&mut ancestors, elsewhere);

    for outcome in &outcomes {
        let Some(policy) = policies.iter().find(|p| NamespacedName::of(*p) == outcome.policy) else {
            continue;
        };
        if outcome.reason == ConditionReason::Accepted {
            tctx.add_backend_traffic_policy(outcome.policy.clone(), policy.clone());
        }
        let condition = accepted_condition(outcome.reason, outcome.message.clone(), policy.metadata.generation);
        let change = AncestorChange {
            controller_name: controller_name.to_owned(),
            entries: ancestors.iter().map(|a| ancestor_status(a.clone(), controller_name, condition.clone())).collect(),
            retain: Some(ancestors.clone()),
        };
        tctx.enqueue_status(policy_status_update(ObjectKind::BackendTrafficPolicy, policy.clone().into(), change));
    }
    Ok(outcomes)
}

/// Status writes retracting the Gateways `deleted` led to from the traffic
/// policies of its backend Services.
pub async fn update_delete_backend_traffic_ancestors(reader: &dyn ClusterReader, deleted: &Route, controller_name: &str) -> Result<Vec<StatusUpdate>, ClusterError> {
    let mut services: Vec<ResourceKey> = vec![];
    for backend in deleted.backend_refs().filter(|b| b.is_service()) {
        let key = backend.resource_key(deleted.namespace());
        if !services.contains(&key) {
            services.push(key);
        }
    }

    let mut scan = AncestorScan::new(reader, controller_name);
    let mut updates = vec![];
    for service in &services {
        let service_name = service.namespaced_name();
        let policies = reader.backend_traffic_policies(&service_name.namespace).await?;
        let targeting: Vec<_> = policies
            .iter()
            .filter(|policy| {
                let namespace = policy.namespace().unwrap_or_default();
                policy.spec.target_refs.iter().any(|t| PolicyTargetKey::new(&namespace, t).targets(&service_name, CORE_GROUP_NAME, SERVICE_KIND_NAME))
            })
            .collect();
        if targeting.is_empty() {
            continue;
        }

        let valid = scan.service_gateways(service, &[&deleted.key]).await?;
        debug!("Traffic policies of {service} keep {} ancestors after {} was deleted", valid.len(), deleted.key);
        for policy in targeting {
            let change = AncestorChange {
                controller_name: controller_name.to_owned(),
                entries: vec![],
                retain: Some(valid.clone()),
            };
            updates.push(policy_status_update(ObjectKind::BackendTrafficPolicy, policy.clone().into(), change));
        }
    }
    Ok(updates)
}
