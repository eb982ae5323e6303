use std::collections::{BTreeSet, HashMap};

use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use tracing::debug;

use crate::{
    common::{NamespacedName, ResourceKey},
    crds::{BackendTrafficPolicy, GatewayProxy, HTTPRoutePolicy, PluginConfig},
    services::StatusUpdate,
};

/// Child to parent edges discovered during one reconciliation.
///
/// Edges point from a child (a Service, a route) to the objects it is reached
/// through (a route, a Gateway). Parents are kept in insertion order.
#[derive(Clone, Debug, Default)]
pub struct ParentRefGraph {
    parents: HashMap<ResourceKey, Vec<ResourceKey>>,
}

impl ParentRefGraph {
    pub fn add_edge(&mut self, child: ResourceKey, parent: ResourceKey) {
        let parents = self.parents.entry(child).or_default();
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }

    pub fn parents_of(&self, child: &ResourceKey) -> &[ResourceKey] {
        self.parents.get(child).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn children_of(&self, parent: &ResourceKey) -> BTreeSet<&ResourceKey> {
        self.parents.iter().filter(|(_, parents)| parents.contains(parent)).map(|(child, _)| child).collect()
    }

    /// Transitive parents of `child`, nearest first, each reported once.
    pub fn ancestors_of(&self, child: &ResourceKey) -> Vec<ResourceKey> {
        let mut ancestors: Vec<ResourceKey> = vec![];
        let mut frontier = vec![child.clone()];
        while let Some(current) = frontier.pop() {
            for parent in self.parents_of(&current) {
                if parent != child && !ancestors.contains(parent) {
                    ancestors.push(parent.clone());
                    frontier.insert(0, parent.clone());
                }
            }
        }
        ancestors
    }

    /// Transitive parents of `child` with the given kind.
    pub fn ancestors_of_kind(&self, child: &ResourceKey, kind: &str) -> Vec<ResourceKey> {
        self.ancestors_of(child).into_iter().filter(|a| a.kind == kind).collect()
    }

    pub fn remove_child(&mut self, child: &ResourceKey) {
        self.parents.remove(child);
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Everything one reconciliation discovered, handed to the translator when done.
#[derive(Default)]
pub struct TranslateContext {
    pub secrets: HashMap<NamespacedName, Secret>,
    pub services: HashMap<NamespacedName, Service>,
    pub endpoint_slices: HashMap<NamespacedName, Vec<EndpointSlice>>,
    pub plugin_configs: HashMap<NamespacedName, PluginConfig>,
    pub gateway_proxies: HashMap<NamespacedName, GatewayProxy>,
    pub backend_traffic_policies: HashMap<NamespacedName, BackendTrafficPolicy>,
    pub http_route_policies: HashMap<NamespacedName, HTTPRoutePolicy>,
    pub parent_refs: ParentRefGraph,
    status_updates: Vec<StatusUpdate>,
}

impl TranslateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_secret(&mut self, key: NamespacedName, secret: Secret) {
        self.secrets.insert(key, secret);
    }

    pub fn add_service(&mut self, key: NamespacedName, service: Service) {
        self.services.insert(key, service);
    }

    pub fn add_endpoint_slices(&mut self, service: NamespacedName, slices: Vec<EndpointSlice>) {
        self.endpoint_slices.insert(service, slices);
    }

    pub fn add_plugin_config(&mut self, key: NamespacedName, plugin_config: PluginConfig) {
        self.plugin_configs.insert(key, plugin_config);
    }

    pub fn add_gateway_proxy(&mut self, key: NamespacedName, gateway_proxy: GatewayProxy) {
        self.gateway_proxies.insert(key, gateway_proxy);
    }

    pub fn add_backend_traffic_policy(&mut self, key: NamespacedName, policy: BackendTrafficPolicy) {
        self.backend_traffic_policies.insert(key, policy);
    }

    pub fn add_http_route_policy(&mut self, key: NamespacedName, policy: HTTPRoutePolicy) {
        self.http_route_policies.insert(key, policy);
    }

    pub fn enqueue_status(&mut self, update: StatusUpdate) {
        debug!("Pending status update {} {}", update.kind, update.key);
        self.status_updates.push(update);
    }

    pub fn pending_status_updates(&self) -> &[StatusUpdate] {
        &self.status_updates
    }

    /// Hands the pending writes over, leaving none behind.
    pub fn take_status_updates(&mut self) -> Vec<StatusUpdate> {
        std::mem::take(&mut self.status_updates)
    }
}
