use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway, referencegrants::ReferenceGrant};
use k8s_openapi::api::{core::v1::Service, discovery::v1::EndpointSlice};
use kube::{Resource, ResourceExt};

use crate::{
    cluster::{ClusterError, ClusterReader},
    common::{NamespacedName, ResourceKey, Route, RouteKind},
    crds::{BackendTrafficPolicy, HTTPRoutePolicy},
};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

type Store<V> = Arc<Mutex<HashMap<NamespacedName, Arc<V>>>>;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn insert<V>(store: &Store<V>, key: NamespacedName, value: V) {
    locked(store).insert(key, Arc::new(value));
}

fn get<V: Clone>(store: &Store<V>, key: &NamespacedName) -> Option<V> {
    locked(store).get(key).map(|v| v.as_ref().clone())
}

fn in_namespace<V: Clone>(store: &Store<V>, namespace: &str) -> Vec<V> {
    let lock = locked(store);
    let mut values: Vec<_> = lock.iter().filter(|(k, _)| k.namespace == namespace).collect();
    values.sort_by(|(a, _), (b, _)| a.cmp(b));
    values.into_iter().map(|(_, v)| v.as_ref().clone()).collect()
}

/// In-memory cluster snapshot served through [`ClusterReader`].
#[derive(Clone, Default)]
pub struct State {
    gateway_classes: Arc<Mutex<HashMap<String, Arc<GatewayClass>>>>,
    gateways: Store<Gateway>,
    namespaces: Arc<Mutex<HashMap<String, BTreeMap<String, String>>>>,
    routes: Arc<Mutex<HashMap<ResourceKey, Route>>>,
    reference_grants: Store<ReferenceGrant>,
    services: Store<Service>,
    endpoint_slices: Store<EndpointSlice>,
    backend_traffic_policies: Store<BackendTrafficPolicy>,
    http_route_policies: Store<HTTPRoutePolicy>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_gateway_class(&self, gateway_class: GatewayClass) {
        locked(&self.gateway_classes).insert(gateway_class.name_any(), Arc::new(gateway_class));
    }

    pub fn save_gateway(&self, gateway: Gateway) {
        insert(&self.gateways, NamespacedName::of(&gateway), gateway);
    }

    pub fn save_namespace(&self, name: &str, labels: BTreeMap<String, String>) {
        locked(&self.namespaces).insert(name.to_owned(), labels);
    }

    pub fn save_route(&self, route: Route) {
        locked(&self.routes).insert(route.key.clone(), route);
    }

    pub fn delete_route(&self, id: &ResourceKey) {
        locked(&self.routes).remove(id);
    }

    pub fn save_reference_grant(&self, grant: ReferenceGrant) {
        insert(&self.reference_grants, NamespacedName::of(&grant), grant);
    }

    pub fn save_service(&self, service: Service) {
        insert(&self.services, NamespacedName::of(&service), service);
    }

    pub fn save_endpoint_slice(&self, slice: EndpointSlice) {
        insert(&self.endpoint_slices, NamespacedName::of(&slice), slice);
    }

    pub fn save_backend_traffic_policy(&self, policy: BackendTrafficPolicy) {
        insert(&self.backend_traffic_policies, NamespacedName::of(&policy), policy);
    }

    pub fn save_http_route_policy(&self, policy: HTTPRoutePolicy) {
        insert(&self.http_route_policies, NamespacedName::of(&policy), policy);
    }
}

#[async_trait]
impl ClusterReader for State {
    async fn gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, ClusterError> {
        Ok(get(&self.gateways, &key.namespaced_name()))
    }

    async fn gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, ClusterError> {
        Ok(locked(&self.gateway_classes).get(name).map(|c| c.as_ref().clone()))
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        Ok(locked(&self.namespaces).get(namespace).cloned())
    }

    async fn routes(&self, kind: RouteKind) -> Result<Vec<Route>, ClusterError> {
        let mut routes: Vec<_> = locked(&self.routes).values().filter(|r| r.kind == kind).cloned().collect();
        routes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(routes)
    }

    async fn reference_grants(&self, namespace: &str) -> Result<Vec<ReferenceGrant>, ClusterError> {
        Ok(in_namespace(&self.reference_grants, namespace))
    }

    async fn service(&self, key: &NamespacedName) -> Result<Option<Service>, ClusterError> {
        Ok(get(&self.services, key))
    }

    async fn endpoint_slices(&self, service: &NamespacedName) -> Result<Vec<EndpointSlice>, ClusterError> {
        Ok(in_namespace(&self.endpoint_slices, &service.namespace)
            .into_iter()
            .filter(|s| s.meta().labels.as_ref().and_then(|l| l.get(SERVICE_NAME_LABEL)) == Some(&service.name))
            .collect())
    }

    async fn backend_traffic_policies(&self, namespace: &str) -> Result<Vec<BackendTrafficPolicy>, ClusterError> {
        Ok(in_namespace(&self.backend_traffic_policies, namespace))
    }

    async fn http_route_policies(&self, namespace: &str) -> Result<Vec<HTTPRoutePolicy>, ClusterError> {
        Ok(in_namespace(&self.http_route_policies, namespace))
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn slice(name: &str, service: &str) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("apps".to_owned()),
                labels: Some(BTreeMap::from([(SERVICE_NAME_LABEL.to_owned(), service.to_owned())])),
                ..Default::default()
            },
            address_type: "IPv4".to_owned(),
            endpoints: vec![],
            ports: None,
        }
    }

    #[tokio::test]
    async fn endpoint_slices_are_selected_by_service() {
        let state = State::new();
        state.save_endpoint_slice(slice("web-1", "web"));
        state.save_endpoint_slice(slice("web-2", "web"));
        state.save_endpoint_slice(slice("api-1", "api"));

        let slices = state.endpoint_slices(&NamespacedName::new("apps", "web")).await.unwrap();
        let names: Vec<_> = slices.iter().map(ResourceExt::name_any).collect();
        assert_eq!(names, vec!["web-1".to_owned(), "web-2".to_owned()]);
        assert!(state.endpoint_slices(&NamespacedName::new("other", "web")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn namespaces_and_routes() {
        let state = State::new();
        state.save_namespace("apps", BTreeMap::from([("team".to_owned(), "a".to_owned())]));
        assert_eq!(state.namespace_labels("apps").await.unwrap().unwrap().get("team"), Some(&"a".to_owned()));
        assert_eq!(state.namespace_labels("missing").await.unwrap(), None);
        assert!(state.routes(RouteKind::HttpRoute).await.unwrap().is_empty());
    }
}
