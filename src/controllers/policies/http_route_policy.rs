use std::collections::BTreeMap;

use itertools::Itertools;
use k8s_openapi::api::networking::v1::Ingress;
use tracing::debug;

use super::{
    ancestor_status,
    ancestors::{accepted_gateways, extend_unique, AncestorScan},
    policy_status_update, AncestorChange, PolicyTargetKey, CONFLICT_MESSAGE,
};
use crate::{
    cluster::{ClusterError, ClusterReader},
    common::{accepted_condition, ConditionReason, NamespacedName, ObjectKind, ParentReference, ResourceKey, Route, RouteKind, INGRESS_GROUP_NAME, INGRESS_KIND_NAME},
    controllers::utils::AttachmentVerdict,
    crds::HTTPRoutePolicy,
    services::StatusUpdate,
    translate_context::TranslateContext,
};

type Outcomes<'p> = BTreeMap<NamespacedName, (&'p HTTPRoutePolicy, bool)>;

fn policy_key(policy: &HTTPRoutePolicy) -> NamespacedName {
    NamespacedName::of(policy)
}

fn targets<'a>(policy: &'a HTTPRoutePolicy) -> impl Iterator<Item = PolicyTargetKey> + 'a {
    let namespace = policy.metadata.namespace.clone().unwrap_or_default();
    policy.spec.target_refs.iter().map(move |target| PolicyTargetKey::new(&namespace, target))
}

/// Policies applying to `section` of the target. A target ref without a section
/// covers every section; one with a section only covers the section of that name.
pub fn policies_targeting<'a>(policies: &'a [HTTPRoutePolicy], target: &NamespacedName, group: &str, kind: &str, section: Option<&str>) -> Vec<&'a HTTPRoutePolicy> {
    policies
        .iter()
        .filter(|policy| {
            targets(policy).any(|key| key.targets(target, group, kind) && key.section_name.as_deref().is_none_or(|s| Some(s) == section))
        })
        .collect()
}

/// A group of policies on one target conflicts as a whole as soon as one
/// priority differs from the others.
pub fn check_policies_conflict(policies: &[&HTTPRoutePolicy]) -> bool {
    !policies.iter().map(|p| p.spec.priority.unwrap_or_default()).all_equal()
}

fn ingress_ref(namespace: &str, name: &str) -> ParentReference {
    ParentReference {
        group: Some(INGRESS_GROUP_NAME.to_owned()),
        kind: Some(INGRESS_KIND_NAME.to_owned()),
        namespace: Some(namespace.to_owned()),
        name: name.to_owned(),
        ..Default::default()
    }
}

/// Every ancestor `policy` is currently reachable through, ignoring the routes in `skip`.
async fn valid_ancestors(scan: &mut AncestorScan<'_>, policy: &HTTPRoutePolicy, skip: &[&ResourceKey]) -> Result<Vec<ParentReference>, ClusterError> {
    let mut valid = vec![];
    for key in targets(policy) {
        if key.group == INGRESS_GROUP_NAME && key.kind == INGRESS_KIND_NAME {
            extend_unique(&mut valid, [ingress_ref(&key.namespaced_name.namespace, &key.namespaced_name.name)]);
            continue;
        }
        let Some(kind) = RouteKind::from_kind(&key.kind).filter(|k| k.group() == key.group) else {
            continue;
        };
        extend_unique(&mut valid, scan.route_gateways(kind, &key.namespaced_name, skip).await?);
    }
    Ok(valid)
}

/// Queues the ancestor conditions of every evaluated policy. `ancestors` are the
/// ancestors of the evaluated target; entries no longer reachable through any
/// target of the policy are pruned in the same write.
async fn record_outcomes(
    scan: &mut AncestorScan<'_>,
    tctx: &mut TranslateContext,
    outcomes: Outcomes<'_>,
    ancestors: &[ParentReference],
    skip: &ResourceKey,
    controller_name: &str,
) -> Result<(), ClusterError> {
    for (key, (policy, conflicted)) in outcomes {
        let condition = if conflicted {
            accepted_condition(ConditionReason::Conflicted, CONFLICT_MESSAGE, policy.metadata.generation)
        } else {
            tctx.add_http_route_policy(key.clone(), policy.clone());
            accepted_condition(ConditionReason::Accepted, "Policy has been accepted", policy.metadata.generation)
        };
        let mut valid = valid_ancestors(scan, policy, &[skip]).await?;
        extend_unique(&mut valid, ancestors.iter().cloned());
        debug!("Route policy {key} conflicted {conflicted}, {} valid ancestors", valid.len());

        let change = AncestorChange {
            controller_name: controller_name.to_owned(),
            entries: ancestors.iter().map(|a| ancestor_status(a.clone(), controller_name, condition.clone())).collect(),
            retain: Some(valid),
        };
        tctx.enqueue_status(policy_status_update(ObjectKind::HttpRoutePolicy, policy.clone().into(), change));
    }
    Ok(())
}

/// Evaluates the route policies of every rule of `route`. A policy conflicted in
/// any rule is kept out of the context. Every policy is reported against each
/// Gateway the route is accepted by, as given by `verdicts`.
pub async fn process_http_route_policies(
    reader: &dyn ClusterReader,
    tctx: &mut TranslateContext,
    route: &Route,
    verdicts: &[AttachmentVerdict],
    controller_name: &str,
) -> Result<(), ClusterError> {
    let policies = reader.http_route_policies(route.namespace()).await?;
    let target = route.key.namespaced_name();
    let mut sections = route.rule_names();
    if sections.is_empty() {
        sections.push(None);
    }

    let mut outcomes: Outcomes<'_> = BTreeMap::new();
    for section in sections {
        let group = policies_targeting(&policies, &target, route.kind.group(), route.kind.as_str(), section);
        if group.is_empty() {
            continue;
        }
        let conflicted = check_policies_conflict(&group);
        for policy in group {
            let entry = outcomes.entry(policy_key(policy)).or_insert((policy, false));
            entry.1 |= conflicted;
        }
    }

    let mut scan = AncestorScan::new(reader, controller_name);
    record_outcomes(&mut scan, tctx, outcomes, &accepted_gateways(verdicts), &route.key, controller_name).await
}

/// All policies on one Ingress form a single group; the Ingress is its own ancestor.
pub async fn process_ingress_http_route_policies(reader: &dyn ClusterReader, tctx: &mut TranslateContext, ingress: &Ingress, controller_name: &str) -> Result<(), ClusterError> {
    let target = NamespacedName::of(ingress);
    let policies = reader.http_route_policies(&target.namespace).await?;
    let group = policies_targeting(&policies, &target, INGRESS_GROUP_NAME, INGRESS_KIND_NAME, None);
    if group.is_empty() {
        return Ok(());
    }
    let conflicted = check_policies_conflict(&group);
    let outcomes = group.into_iter().map(|p| (policy_key(p), (p, conflicted))).collect();
    let mut scan = AncestorScan::new(reader, controller_name);
    record_outcomes(&mut scan, tctx, outcomes, &[ingress_ref(&target.namespace, &target.name)], &ResourceKey::from(ingress), controller_name).await
}

/// Status writes retracting the ancestors `deleted` contributed to the policies
/// targeting it. Ancestors still reached through another target are kept.
pub async fn update_delete_ancestors(reader: &dyn ClusterReader, deleted: &Route, controller_name: &str) -> Result<Vec<StatusUpdate>, ClusterError> {
    let policies = reader.http_route_policies(deleted.namespace()).await?;
    let deleted_name = deleted.key.namespaced_name();
    let mut scan = AncestorScan::new(reader, controller_name);
    let mut updates = vec![];

    for policy in &policies {
        if !targets(policy).any(|key| key.targets(&deleted_name, deleted.kind.group(), deleted.kind.as_str())) {
            continue;
        }
        let valid = valid_ancestors(&mut scan, policy, &[&deleted.key]).await?;
        debug!("Policy {} keeps {} ancestors after {} was deleted", policy_key(policy), valid.len(), deleted.key);
        let change = AncestorChange {
            controller_name: controller_name.to_owned(),
            entries: vec![],
            retain: Some(valid),
        };
        updates.push(policy_status_update(ObjectKind::HttpRoutePolicy, policy.clone().into(), change));
    }
    Ok(updates)
}
