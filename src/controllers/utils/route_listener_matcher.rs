use std::collections::BTreeMap;

use gateway_api::apis::standard::gateways::Gateway;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use tracing::debug;

use crate::{
    cluster::{ClusterError, ClusterReader},
    common::{accepted_condition, first_intersecting, ConditionReason, Listener, NamespacePolicy, ParentReference, ResourceKey, Route, RouteKind},
};

/// Outcome of attaching one route to the Gateway named by one of its parent refs.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentVerdict {
    pub gateway: ResourceKey,
    pub parent_ref: ParentReference,
    pub listener_name: Option<String>,
    pub accepted: bool,
    pub reason: ConditionReason,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, PartialEq, Eq)]
enum ListenerMatch {
    Accepted,
    Skipped,
    Rejected(ConditionReason),
}

pub struct RouteListenerMatcher<'a> {
    reader: &'a dyn ClusterReader,
    controller_name: &'a str,
    namespace_labels: BTreeMap<String, Option<BTreeMap<String, String>>>,
}

impl<'a> RouteListenerMatcher<'a> {
    pub fn new(reader: &'a dyn ClusterReader, controller_name: &'a str) -> Self {
        Self {
            reader,
            controller_name,
            namespace_labels: BTreeMap::new(),
        }
    }

    /// Classifies every parent ref of `route`. Refs to non-Gateway kinds, to missing
    /// Gateways and to Gateways of another controller produce no verdict.
    pub async fn resolve_parent_refs(&mut self, route: &Route, parent_refs: &[ParentReference]) -> Result<Vec<AttachmentVerdict>, ClusterError> {
        let mut verdicts = vec![];
        for parent_ref in parent_refs {
            if !parent_ref.is_gateway() {
                debug!("Skipping parent {parent_ref:?} of {}", route.key);
                continue;
            }
            let gateway_key = parent_ref.effective_key(route.namespace()).resource_key;
            let Some(gateway) = self.managed_gateway(&gateway_key).await? else {
                continue;
            };

            let mut reason = ConditionReason::NoMatchingParent;
            let mut matched_listener = None;
            for listener in Listener::listeners_of(&gateway) {
                match self.evaluate_listener(route, parent_ref, &listener, &gateway_key.namespace).await? {
                    ListenerMatch::Accepted => {
                        matched_listener = Some(listener.name);
                        break;
                    },
                    ListenerMatch::Rejected(rejection) => reason = rejection,
                    ListenerMatch::Skipped => (),
                }
            }

            let accepted = matched_listener.is_some();
            let reason = if accepted { ConditionReason::Accepted } else { reason };
            let message = match &matched_listener {
                Some(listener) => format!("Route accepted by listener {listener}"),
                None => format!("Route not accepted by {gateway_key}"),
            };
            debug!("Route {} parent {gateway_key} {reason} {matched_listener:?}", route.key);
            verdicts.push(AttachmentVerdict {
                gateway: gateway_key,
                parent_ref: parent_ref.clone(),
                listener_name: matched_listener,
                accepted,
                reason,
                conditions: vec![accepted_condition(reason, message, route.generation)],
            });
        }
        Ok(verdicts)
    }

    /// Number of routes attached to each listener of `gateway`, recomputed from every
    /// route in the cluster. A route counts once per listener.
    pub async fn attached_route_counts(&mut self, gateway: &Gateway) -> Result<BTreeMap<String, i32>, ClusterError> {
        let gateway_key = ResourceKey::from(gateway);
        let listeners = Listener::listeners_of(gateway);
        let mut counts: BTreeMap<String, i32> = listeners.iter().map(|l| (l.name.clone(), 0)).collect();

        for kind in RouteKind::ALL {
            for route in self.reader.routes(kind).await? {
                let parent_refs: Vec<_> = route
                    .parent_refs
                    .iter()
                    .filter(|p| p.is_gateway() && p.effective_key(route.namespace()).resource_key == gateway_key)
                    .cloned()
                    .collect();
                if parent_refs.is_empty() {
                    continue;
                }
                for listener in &listeners {
                    let mut attached = false;
                    for parent_ref in &parent_refs {
                        if self.evaluate_listener(&route, parent_ref, listener, &gateway_key.namespace).await? == ListenerMatch::Accepted {
                            attached = true;
                            break;
                        }
                    }
                    if attached {
                        *counts.entry(listener.name.clone()).or_default() += 1;
                    }
                }
            }
        }
        debug!("Attached routes {gateway_key} {counts:?}");
        Ok(counts)
    }

    async fn managed_gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, ClusterError> {
        let Some(gateway) = self.reader.gateway(key).await? else {
            debug!("Gateway {key} not found");
            return Ok(None);
        };
        Ok(self.manages(&gateway).await?.then_some(gateway))
    }

    /// Whether the class of `gateway` names this controller.
    pub async fn manages(&self, gateway: &Gateway) -> Result<bool, ClusterError> {
        let Some(gateway_class) = self.reader.gateway_class(&gateway.spec.gateway_class_name).await? else {
            debug!("Gateway class {} not found", gateway.spec.gateway_class_name);
            return Ok(false);
        };
        if gateway_class.spec.controller_name != self.controller_name {
            debug!("Gateway {} belongs to {}", ResourceKey::from(gateway), gateway_class.spec.controller_name);
            return Ok(false);
        }
        Ok(true)
    }

    async fn evaluate_listener(&mut self, route: &Route, parent_ref: &ParentReference, listener: &Listener, gateway_namespace: &str) -> Result<ListenerMatch, ClusterError> {
        if let Some(section_name) = parent_ref.section_name.as_deref().filter(|s| !s.is_empty()) {
            if section_name != listener.name {
                return Ok(ListenerMatch::Skipped);
            }
        }

        if let Some(port) = parent_ref.port {
            if port != listener.port {
                return Ok(ListenerMatch::Skipped);
            }
        }

        if !listener.supports_protocol_of(route.kind) {
            return Ok(ListenerMatch::Rejected(ConditionReason::NotAllowedByListeners));
        }

        if first_intersecting(listener.hostname.as_deref(), &route.hostnames).is_none() {
            return Ok(ListenerMatch::Rejected(ConditionReason::NoMatchingListenerHostname));
        }

        if !listener.allows_kind(route.kind) {
            return Ok(ListenerMatch::Rejected(ConditionReason::NotAllowedByListeners));
        }

        let namespace_allowed = match &listener.allowed_routes.namespaces {
            NamespacePolicy::All => true,
            NamespacePolicy::Same => route.namespace() == gateway_namespace,
            NamespacePolicy::Selector(selector) => self.labels_of(route.namespace()).await?.is_some_and(|labels| selector.matches(&labels)),
        };
        if !namespace_allowed {
            return Ok(ListenerMatch::Rejected(ConditionReason::NotAllowedByListeners));
        }

        Ok(ListenerMatch::Accepted)
    }

    async fn labels_of(&mut self, namespace: &str) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        if let Some(labels) = self.namespace_labels.get(namespace) {
            return Ok(labels.clone());
        }
        let labels = self.reader.namespace_labels(namespace).await?;
        self.namespace_labels.insert(namespace.to_owned(), labels.clone());
        Ok(labels)
    }
}
