use std::fmt::Display;

use gateway_api::apis::{
    experimental::{grpcroutes::GRPCRoute, httproutes::HTTPRoute, tcproutes::TCPRoute, tlsroutes::TLSRoute},
    standard::gateways::Gateway,
};
use k8s_openapi::{api::networking::v1::Ingress, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{api::DynamicObject, Resource};

use super::{
    route::{Route, RouteKind},
    ResourceKey, DEFAULT_GROUP_NAME, DEFAULT_KIND_NAME, DEFAULT_NAMESPACE_NAME, INGRESS_GROUP_NAME, INGRESS_KIND_NAME,
};
use crate::crds::{BackendTrafficPolicy, HTTPRoutePolicy, POLICY_GROUP_NAME};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Gateway,
    Route(RouteKind),
    Ingress,
    BackendTrafficPolicy,
    HttpRoutePolicy,
}

impl ObjectKind {
    pub fn group(self) -> &'static str {
        match self {
            ObjectKind::Gateway => DEFAULT_GROUP_NAME,
            ObjectKind::Route(kind) => kind.group(),
            ObjectKind::Ingress => INGRESS_GROUP_NAME,
            ObjectKind::BackendTrafficPolicy | ObjectKind::HttpRoutePolicy => POLICY_GROUP_NAME,
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            ObjectKind::Gateway => DEFAULT_KIND_NAME,
            ObjectKind::Route(kind) => kind.as_str(),
            ObjectKind::Ingress => INGRESS_KIND_NAME,
            ObjectKind::BackendTrafficPolicy => "BackendTrafficPolicy",
            ObjectKind::HttpRoutePolicy => "HTTPRoutePolicy",
        }
    }

    pub fn from_group_kind(group: &str, kind: &str) -> Option<Self> {
        match (group, kind) {
            (DEFAULT_GROUP_NAME, DEFAULT_KIND_NAME) => Some(ObjectKind::Gateway),
            (DEFAULT_GROUP_NAME, kind) => RouteKind::from_kind(kind).map(ObjectKind::Route),
            (INGRESS_GROUP_NAME, INGRESS_KIND_NAME) => Some(ObjectKind::Ingress),
            (POLICY_GROUP_NAME, "BackendTrafficPolicy") => Some(ObjectKind::BackendTrafficPolicy),
            (POLICY_GROUP_NAME, "HTTPRoutePolicy") => Some(ObjectKind::HttpRoutePolicy),
            _ => None,
        }
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Every object whose status this control plane writes.
///
/// Kinds outside this set surface as [`ManagedObject::Unknown`] so that callers
/// handle them explicitly.
#[derive(Clone, Debug)]
pub enum ManagedObject {
    Gateway(Box<Gateway>),
    HttpRoute(Box<HTTPRoute>),
    GrpcRoute(Box<GRPCRoute>),
    TcpRoute(Box<TCPRoute>),
    TlsRoute(Box<TLSRoute>),
    Ingress(Box<Ingress>),
    BackendTrafficPolicy(Box<BackendTrafficPolicy>),
    HttpRoutePolicy(Box<HTTPRoutePolicy>),
    Unknown(Box<DynamicObject>),
}

impl ManagedObject {
    pub fn kind(&self) -> Option<ObjectKind> {
        Some(match self {
            ManagedObject::Gateway(_) => ObjectKind::Gateway,
            ManagedObject::HttpRoute(_) => ObjectKind::Route(RouteKind::HttpRoute),
            ManagedObject::GrpcRoute(_) => ObjectKind::Route(RouteKind::GrpcRoute),
            ManagedObject::TcpRoute(_) => ObjectKind::Route(RouteKind::TcpRoute),
            ManagedObject::TlsRoute(_) => ObjectKind::Route(RouteKind::TlsRoute),
            ManagedObject::Ingress(_) => ObjectKind::Ingress,
            ManagedObject::BackendTrafficPolicy(_) => ObjectKind::BackendTrafficPolicy,
            ManagedObject::HttpRoutePolicy(_) => ObjectKind::HttpRoutePolicy,
            ManagedObject::Unknown(_) => return None,
        })
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Gateway(o) => o.meta(),
            ManagedObject::HttpRoute(o) => o.meta(),
            ManagedObject::GrpcRoute(o) => o.meta(),
            ManagedObject::TcpRoute(o) => o.meta(),
            ManagedObject::TlsRoute(o) => o.meta(),
            ManagedObject::Ingress(o) => o.meta(),
            ManagedObject::BackendTrafficPolicy(o) => o.meta(),
            ManagedObject::HttpRoutePolicy(o) => o.meta(),
            ManagedObject::Unknown(o) => o.meta(),
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::Gateway(o) => o.meta_mut(),
            ManagedObject::HttpRoute(o) => o.meta_mut(),
            ManagedObject::GrpcRoute(o) => o.meta_mut(),
            ManagedObject::TcpRoute(o) => o.meta_mut(),
            ManagedObject::TlsRoute(o) => o.meta_mut(),
            ManagedObject::Ingress(o) => o.meta_mut(),
            ManagedObject::BackendTrafficPolicy(o) => o.meta_mut(),
            ManagedObject::HttpRoutePolicy(o) => o.meta_mut(),
            ManagedObject::Unknown(o) => o.meta_mut(),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.meta().uid.as_deref()
    }

    pub fn resource_key(&self) -> ResourceKey {
        let meta = self.meta();
        let namespace = meta.namespace.clone().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
        let name = meta.name.clone().unwrap_or_default();
        match (self.kind(), self) {
            (Some(kind), _) => ResourceKey::with_kind(kind.group(), kind.kind(), &namespace, &name),
            (None, ManagedObject::Unknown(o)) => {
                let (group, kind) = o.types.as_ref().map(|t| (t.api_version.rsplit_once('/').map_or("", |(g, _)| g), t.kind.as_str())).unwrap_or_default();
                ResourceKey::with_kind(group, kind, &namespace, &name)
            },
            (None, _) => ResourceKey::namespaced(&name, &namespace),
        }
    }

    /// Attachment view of a route object, `None` for anything else.
    pub fn as_route(&self) -> Result<Option<Route>, serde_json::Error> {
        let route = match self {
            ManagedObject::HttpRoute(o) => Route::from_resource(RouteKind::HttpRoute, o.as_ref())?,
            ManagedObject::GrpcRoute(o) => Route::from_resource(RouteKind::GrpcRoute, o.as_ref())?,
            ManagedObject::TcpRoute(o) => Route::from_resource(RouteKind::TcpRoute, o.as_ref())?,
            ManagedObject::TlsRoute(o) => Route::from_resource(RouteKind::TlsRoute, o.as_ref())?,
            _ => return Ok(None),
        };
        Ok(Some(route))
    }
}

impl From<Gateway> for ManagedObject {
    fn from(value: Gateway) -> Self {
        ManagedObject::Gateway(Box::new(value))
    }
}

impl From<HTTPRoute> for ManagedObject {
    fn from(value: HTTPRoute) -> Self {
        ManagedObject::HttpRoute(Box::new(value))
    }
}

impl From<GRPCRoute> for ManagedObject {
    fn from(value: GRPCRoute) -> Self {
        ManagedObject::GrpcRoute(Box::new(value))
    }
}

impl From<TCPRoute> for ManagedObject {
    fn from(value: TCPRoute) -> Self {
        ManagedObject::TcpRoute(Box::new(value))
    }
}

impl From<TLSRoute> for ManagedObject {
    fn from(value: TLSRoute) -> Self {
        ManagedObject::TlsRoute(Box::new(value))
    }
}

impl From<Ingress> for ManagedObject {
    fn from(value: Ingress) -> Self {
        ManagedObject::Ingress(Box::new(value))
    }
}

impl From<BackendTrafficPolicy> for ManagedObject {
    fn from(value: BackendTrafficPolicy) -> Self {
        ManagedObject::BackendTrafficPolicy(Box::new(value))
    }
}

impl From<HTTPRoutePolicy> for ManagedObject {
    fn from(value: HTTPRoutePolicy) -> Self {
        ManagedObject::HttpRoutePolicy(Box::new(value))
    }
}

impl From<DynamicObject> for ManagedObject {
    fn from(value: DynamicObject) -> Self {
        ManagedObject::Unknown(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_group_kind() {
        let kinds = [
            ObjectKind::Gateway,
            ObjectKind::Route(RouteKind::TlsRoute),
            ObjectKind::Ingress,
            ObjectKind::BackendTrafficPolicy,
            ObjectKind::HttpRoutePolicy,
        ];
        for kind in kinds {
            assert_eq!(ObjectKind::from_group_kind(kind.group(), kind.kind()), Some(kind));
        }
        assert_eq!(ObjectKind::from_group_kind("example.com", "Widget"), None);
    }

    #[test]
    fn unknown_objects_keep_their_identity() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": { "name": "w", "namespace": "ns", "uid": "1234" }
        }))
        .unwrap();
        let object = ManagedObject::from(object);
        assert_eq!(object.kind(), None);
        assert_eq!(object.uid(), Some("1234"));
        assert_eq!(object.resource_key(), ResourceKey::with_kind("example.com", "Widget", "ns", "w"));
        assert!(matches!(object.as_route(), Ok(None)));
    }

    #[test]
    fn route_objects_expose_their_attachment_view() {
        let route: GRPCRoute = serde_json::from_value(serde_json::json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "GRPCRoute",
            "metadata": { "name": "rpc", "namespace": "apps" },
            "spec": { "parentRefs": [{ "name": "gw" }], "rules": [{ "name": "first" }] }
        }))
        .unwrap();
        let Ok(Some(view)) = ManagedObject::from(route).as_route() else {
            panic!("GRPCRoute has an attachment view");
        };
        assert_eq!(view.kind, RouteKind::GrpcRoute);
        assert_eq!(view.rule_names(), vec![Some("first")]);

        let failure = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(crate::cluster::ClusterError::from(failure), crate::cluster::ClusterError::Serialization(_)));
    }
}
