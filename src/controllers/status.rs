use std::collections::BTreeMap;

use gateway_api::apis::standard::gateways::{Gateway, GatewayStatusListeners, GatewayStatusListenersSupportedKinds};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::{
    common::{set_condition, Listener, ManagedObject, ObjectKind, ParentReference, RouteKind},
    services::{Mutation, MutatorError, StatusUpdate},
};

/// One `status.parents[]` entry of a route, common to every route kind.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    pub parent_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Merges `entry` into `parents`, keyed by parent ref and controller. Returns
/// whether anything changed.
pub fn set_route_parent_status(parents: &mut Vec<RouteParentStatus>, entry: RouteParentStatus, route_namespace: &str) -> bool {
    let existing = parents
        .iter_mut()
        .find(|p| p.controller_name == entry.controller_name && p.parent_ref.value_eq(&entry.parent_ref, route_namespace));
    match existing {
        Some(existing) => entry.conditions.into_iter().fold(false, |changed, condition| set_condition(&mut existing.conditions, condition) || changed),
        None => {
            parents.push(entry);
            true
        },
    }
}

fn merge_route_parents<R>(route: &R, route_namespace: &str, entries: &[RouteParentStatus]) -> Result<Option<R>, serde_json::Error>
where
    R: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(route)?;
    let mut parents: Vec<RouteParentStatus> = match value.pointer("/status/parents") {
        Some(parents) => serde_json::from_value(parents.clone())?,
        None => vec![],
    };

    let changed = entries
        .iter()
        .fold(false, |changed, entry| set_route_parent_status(&mut parents, entry.clone(), route_namespace) || changed);
    if !changed {
        return Ok(None);
    }

    if value.get("status").is_none_or(serde_json::Value::is_null) {
        value["status"] = serde_json::json!({});
    }
    value["status"]["parents"] = serde_json::to_value(&parents)?;
    Ok(Some(serde_json::from_value(value)?))
}

/// Status write re-applying `entries` onto the live route of `kind`.
pub fn route_status_update(kind: RouteKind, template: ManagedObject, entries: Vec<RouteParentStatus>) -> StatusUpdate {
    StatusUpdate::new(ObjectKind::Route(kind), template, move |live| {
        let namespace = live.meta().namespace.clone().unwrap_or_default();
        let updated = match live {
            ManagedObject::HttpRoute(route) if kind == RouteKind::HttpRoute => merge_route_parents(route.as_ref(), &namespace, &entries)?.map(ManagedObject::from),
            ManagedObject::GrpcRoute(route) if kind == RouteKind::GrpcRoute => merge_route_parents(route.as_ref(), &namespace, &entries)?.map(ManagedObject::from),
            ManagedObject::TcpRoute(route) if kind == RouteKind::TcpRoute => merge_route_parents(route.as_ref(), &namespace, &entries)?.map(ManagedObject::from),
            ManagedObject::TlsRoute(route) if kind == RouteKind::TlsRoute => merge_route_parents(route.as_ref(), &namespace, &entries)?.map(ManagedObject::from),
            _ => return Err(MutatorError::unexpected(live)),
        };
        Ok(updated.map_or(Mutation::Skip, Mutation::Apply))
    })
}

/// Status write setting attached route counts and supported kinds on every listener.
pub fn listener_status_update(gateway: &Gateway, counts: BTreeMap<String, i32>) -> StatusUpdate {
    let listeners: Vec<(String, Vec<GatewayStatusListenersSupportedKinds>)> = Listener::listeners_of(gateway)
        .into_iter()
        .map(|l| {
            let kinds = l
                .supported_kinds()
                .into_iter()
                .map(|k| GatewayStatusListenersSupportedKinds {
                    group: None,
                    kind: k.as_str().to_owned(),
                })
                .collect();
            (l.name, kinds)
        })
        .collect();

    StatusUpdate::new(ObjectKind::Gateway, gateway.clone().into(), move |live| {
        let ManagedObject::Gateway(live) = live else {
            return Err(MutatorError::unexpected(live));
        };
        let mut gateway = live.as_ref().clone();
        let mut status = gateway.status.take().unwrap_or_default();
        let mut statuses = status.listeners.take().unwrap_or_default();
        let mut changed = false;

        for (name, supported_kinds) in &listeners {
            let attached_routes = counts.get(name).copied().unwrap_or_default();
            let index = match statuses.iter().position(|s| s.name == *name) {
                Some(index) => index,
                None => {
                    statuses.push(GatewayStatusListeners { name: name.clone(), ..Default::default() });
                    changed = true;
                    statuses.len() - 1
                },
            };
            let Some(listener_status) = statuses.get_mut(index) else {
                continue;
            };
            if listener_status.attached_routes != attached_routes {
                listener_status.attached_routes = attached_routes;
                changed = true;
            }
            if listener_status.supported_kinds != *supported_kinds {
                listener_status.supported_kinds.clone_from(supported_kinds);
                changed = true;
            }
        }

        if !changed {
            return Ok(Mutation::Skip);
        }
        debug!("Listener statuses changed {:?}", statuses.iter().map(|s| (&s.name, s.attached_routes)).collect::<Vec<_>>());
        status.listeners = Some(statuses);
        gateway.status = Some(status);
        Ok(Mutation::Apply(ManagedObject::from(gateway)))
    })
}
