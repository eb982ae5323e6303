use std::fmt::Display;

use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

use super::{ParentReference, ResourceKey, CORE_GROUP_NAME, DEFAULT_GROUP_NAME, DEFAULT_NAMESPACE_NAME, SERVICE_KIND_NAME};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    HttpRoute,
    GrpcRoute,
    TcpRoute,
    TlsRoute,
}

impl RouteKind {
    pub const ALL: [RouteKind; 4] = [RouteKind::HttpRoute, RouteKind::GrpcRoute, RouteKind::TcpRoute, RouteKind::TlsRoute];

    pub fn as_str(self) -> &'static str {
        match self {
            RouteKind::HttpRoute => "HTTPRoute",
            RouteKind::GrpcRoute => "GRPCRoute",
            RouteKind::TcpRoute => "TCPRoute",
            RouteKind::TlsRoute => "TLSRoute",
        }
    }

    pub fn group(self) -> &'static str {
        DEFAULT_GROUP_NAME
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl Display for RouteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReference {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub port: Option<i32>,
}

impl BackendReference {
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(CORE_GROUP_NAME)
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(SERVICE_KIND_NAME)
    }

    pub fn is_service(&self) -> bool {
        self.group() == CORE_GROUP_NAME && self.kind() == SERVICE_KIND_NAME
    }

    pub fn resource_key(&self, route_namespace: &str) -> ResourceKey {
        let namespace = self.namespace.as_deref().filter(|ns| !ns.is_empty()).unwrap_or(route_namespace);
        ResourceKey::with_kind(self.group(), self.kind(), namespace, &self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub backend_refs: Vec<BackendReference>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteSpecView {
    #[serde(default)]
    parent_refs: Option<Vec<ParentReference>>,
    #[serde(default)]
    hostnames: Option<Vec<String>>,
    #[serde(default)]
    rules: Option<Vec<RouteRule>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportedParentView {
    parent_ref: ParentReference,
}

#[derive(Default, Deserialize)]
struct RouteStatusView {
    #[serde(default)]
    parents: Option<Vec<ReportedParentView>>,
}

#[derive(Deserialize)]
struct RouteView {
    #[serde(default)]
    spec: RouteSpecView,
    #[serde(default)]
    status: Option<RouteStatusView>,
}

/// The attachment-relevant view of any route kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub key: ResourceKey,
    pub kind: RouteKind,
    pub generation: Option<i64>,
    pub parent_refs: Vec<ParentReference>,
    pub hostnames: Vec<String>,
    pub rules: Vec<RouteRule>,
    /// Parents listed in `status.parents`, by any controller.
    pub reported_parents: Vec<ParentReference>,
}

impl Route {
    /// Builds the view from a typed route. All route kinds share the camelCase
    /// `parentRefs`/`hostnames`/`rules[].backendRefs` layout, which is all this reads.
    pub fn from_resource<R>(kind: RouteKind, route: &R) -> Result<Self, serde_json::Error>
    where
        R: Resource + Serialize,
    {
        let RouteView { spec, status } = serde_json::from_value(serde_json::to_value(route)?)?;
        let namespace = route.namespace().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());

        Ok(Self {
            key: ResourceKey::with_kind(kind.group(), kind.as_str(), &namespace, &route.name_any()),
            kind,
            generation: route.meta().generation,
            parent_refs: spec.parent_refs.unwrap_or_default(),
            hostnames: spec.hostnames.unwrap_or_default(),
            rules: spec.rules.unwrap_or_default(),
            reported_parents: status.and_then(|s| s.parents).unwrap_or_default().into_iter().map(|p| p.parent_ref).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn backend_refs(&self) -> impl Iterator<Item = &BackendReference> {
        self.rules.iter().flat_map(|r| r.backend_refs.iter())
    }

    /// Gateways the route names now or was reported against, each once.
    pub fn gateway_keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = vec![];
        for parent_ref in self.parent_refs.iter().chain(&self.reported_parents).filter(|p| p.is_gateway()) {
            let key = parent_ref.effective_key(self.namespace()).resource_key;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Names of the rules, `None` for unnamed ones.
    pub fn rule_names(&self) -> Vec<Option<&str>> {
        self.rules.iter().map(|r| r.name.as_deref().filter(|n| !n.is_empty())).collect()
    }
}
