use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use gateway_api::apis::{
    experimental::{grpcroutes::GRPCRoute, httproutes::HTTPRoute, tcproutes::TCPRoute, tlsroutes::TLSRoute},
    standard::{gatewayclasses::GatewayClass, gateways::Gateway, referencegrants::ReferenceGrant},
};
use k8s_openapi::{
    api::{
        core::v1::{Namespace, Service},
        discovery::v1::EndpointSlice,
        networking::v1::Ingress,
    },
    NamespaceResourceScope,
};
use kube::{
    api::{ListParams, PostParams},
    Api, Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    common::{ManagedObject, NamespacedName, ObjectKind, ResourceKey, Route, RouteKind},
    crds::{BackendTrafficPolicy, HTTPRoutePolicy},
};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("kubernetes api error {0}")]
    Api(#[from] kube::Error),
    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported kind {0}")]
    UnsupportedKind(String),
}

impl ClusterError {
    /// Optimistic concurrency failures, the only errors worth retrying a status write for.
    pub fn is_conflict(&self) -> bool {
        match self {
            ClusterError::Api(kube::Error::Api(response)) => response.code == 409,
            _ => false,
        }
    }
}

/// Read access to the cluster objects the resolvers depend on.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    async fn gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, ClusterError>;
    async fn gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, ClusterError>;
    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>, ClusterError>;
    /// Every route of `kind` in the cluster.
    async fn routes(&self, kind: RouteKind) -> Result<Vec<Route>, ClusterError>;
    async fn reference_grants(&self, namespace: &str) -> Result<Vec<ReferenceGrant>, ClusterError>;
    async fn service(&self, key: &NamespacedName) -> Result<Option<Service>, ClusterError>;
    async fn endpoint_slices(&self, service: &NamespacedName) -> Result<Vec<EndpointSlice>, ClusterError>;
    async fn backend_traffic_policies(&self, namespace: &str) -> Result<Vec<BackendTrafficPolicy>, ClusterError>;
    async fn http_route_policies(&self, namespace: &str) -> Result<Vec<HTTPRoutePolicy>, ClusterError>;
}

/// Read-modify-write access to the status subresource of managed objects.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn get(&self, kind: ObjectKind, key: &NamespacedName) -> Result<Option<ManagedObject>, ClusterError>;
    async fn replace_status(&self, object: &ManagedObject) -> Result<(), ClusterError>;
}

#[derive(Clone)]
pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_routes<K>(&self, kind: RouteKind) -> Result<Vec<Route>, ClusterError>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let routes = api.list(&ListParams::default()).await?;
        routes.items.iter().map(|r| Route::from_resource(kind, r).map_err(ClusterError::from)).collect()
    }
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, ClusterError> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, ClusterError> {
        let api: Api<GatewayClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(namespace).await?.map(|ns| ns.metadata.labels.unwrap_or_default()))
    }

    async fn routes(&self, kind: RouteKind) -> Result<Vec<Route>, ClusterError> {
        match kind {
            RouteKind::HttpRoute => self.list_routes::<HTTPRoute>(kind).await,
            RouteKind::GrpcRoute => self.list_routes::<GRPCRoute>(kind).await,
            RouteKind::TcpRoute => self.list_routes::<TCPRoute>(kind).await,
            RouteKind::TlsRoute => self.list_routes::<TLSRoute>(kind).await,
        }
    }

    async fn reference_grants(&self, namespace: &str) -> Result<Vec<ReferenceGrant>, ClusterError> {
        let api: Api<ReferenceGrant> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn service(&self, key: &NamespacedName) -> Result<Option<Service>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn endpoint_slices(&self, service: &NamespacedName) -> Result<Vec<EndpointSlice>, ClusterError> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), &service.namespace);
        let params = ListParams::default().labels(&format!("{SERVICE_NAME_LABEL}={}", service.name));
        Ok(api.list(&params).await?.items)
    }

    async fn backend_traffic_policies(&self, namespace: &str) -> Result<Vec<BackendTrafficPolicy>, ClusterError> {
        let api: Api<BackendTrafficPolicy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn http_route_policies(&self, namespace: &str) -> Result<Vec<HTTPRoutePolicy>, ClusterError> {
        let api: Api<HTTPRoutePolicy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_typed<K>(&self, key: &NamespacedName) -> Result<Option<ManagedObject>, ClusterError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        ManagedObject: From<K>,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?.map(ManagedObject::from))
    }

    async fn replace_typed<K>(&self, object: &K) -> Result<(), ClusterError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
    {
        let NamespacedName { namespace, name } = NamespacedName::of(object);
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let data = serde_json::to_vec(object)?;
        api.replace_status(&name, &PostParams::default(), data).await?;
        debug!("Replaced status {namespace}/{name}");
        Ok(())
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn get(&self, kind: ObjectKind, key: &NamespacedName) -> Result<Option<ManagedObject>, ClusterError> {
        match kind {
            ObjectKind::Gateway => self.get_typed::<Gateway>(key).await,
            ObjectKind::Route(RouteKind::HttpRoute) => self.get_typed::<HTTPRoute>(key).await,
            ObjectKind::Route(RouteKind::GrpcRoute) => self.get_typed::<GRPCRoute>(key).await,
            ObjectKind::Route(RouteKind::TcpRoute) => self.get_typed::<TCPRoute>(key).await,
            ObjectKind::Route(RouteKind::TlsRoute) => self.get_typed::<TLSRoute>(key).await,
            ObjectKind::Ingress => self.get_typed::<Ingress>(key).await,
            ObjectKind::BackendTrafficPolicy => self.get_typed::<BackendTrafficPolicy>(key).await,
            ObjectKind::HttpRoutePolicy => self.get_typed::<HTTPRoutePolicy>(key).await,
        }
    }

    async fn replace_status(&self, object: &ManagedObject) -> Result<(), ClusterError> {
        match object {
            ManagedObject::Gateway(o) => self.replace_typed(o.as_ref()).await,
            ManagedObject::HttpRoute(o) => self.replace_typed(o.as_ref()).await,
            ManagedObject::GrpcRoute(o) => self.replace_typed(o.as_ref()).await,
            ManagedObject::TcpRoute(o) => self.replace_typed(o.as_ref()).await,
            ManagedObject::TlsRoute(o) => self.replace_typed(o.as_ref()).await,
            ManagedObject::Ingress(o) => self.replace_typed(o.as_ref()).await,
            ManagedObject::BackendTrafficPolicy(o) => self.replace_typed(o.as_ref()).await,
            ManagedObject::HttpRoutePolicy(o) => self.replace_typed(o.as_ref()).await,
            ManagedObject::Unknown(_) => Err(ClusterError::UnsupportedKind(object.resource_key().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    #[test]
    fn conflicts_are_recognised() {
        let conflict = ClusterError::Api(kube::Error::Api(
            ErrorResponse {
                status: "Failure".to_owned(),
                message: "the object has been modified".to_owned(),
                reason: "Conflict".to_owned(),
                code: 409,
            }
            .into(),
        ));
        assert!(conflict.is_conflict());

        let not_found = ClusterError::Api(kube::Error::Api(
            ErrorResponse {
                status: "Failure".to_owned(),
                message: "not found".to_owned(),
                reason: "NotFound".to_owned(),
                code: 404,
            }
            .into(),
        ));
        assert!(!not_found.is_conflict());
        assert!(!ClusterError::UnsupportedKind("Widget".to_owned()).is_conflict());
    }
}
