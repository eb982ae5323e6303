use std::fmt::Display;

use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway};
use k8s_openapi::api::{core::v1::Service, networking::v1::Ingress};
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP_NAME: &str = "gateway.networking.k8s.io";
pub const DEFAULT_NAMESPACE_NAME: &str = "default";
pub const DEFAULT_KIND_NAME: &str = "Gateway";
pub const CORE_GROUP_NAME: &str = "";
pub const SERVICE_KIND_NAME: &str = "Service";
pub const SECRET_KIND_NAME: &str = "Secret";
pub const INGRESS_GROUP_NAME: &str = "networking.k8s.io";
pub const INGRESS_KIND_NAME: &str = "Ingress";

/// Namespace and name of an object, the key of every map in the translate context.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn of<R: Resource>(resource: &R) -> Self {
        Self {
            namespace: resource.meta().namespace.clone().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned()),
            name: resource.meta().name.clone().unwrap_or_default(),
        }
    }
}

impl Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub group: String,
    pub namespace: String,
    pub name: String,
    pub kind: String,
}

impl ResourceKey {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn namespaced(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_kind(group: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            group: group.to_owned(),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            kind: kind.to_owned(),
        }
    }

    pub fn service(namespace: &str, name: &str) -> Self {
        Self::with_kind(CORE_GROUP_NAME, SERVICE_KIND_NAME, namespace, name)
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }
}

impl Default for ResourceKey {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP_NAME.to_owned(),
            namespace: DEFAULT_NAMESPACE_NAME.to_owned(),
            name: String::default(),
            kind: DEFAULT_KIND_NAME.to_owned(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl From<&Service> for ResourceKey {
    fn from(service: &Service) -> Self {
        let value = &service.metadata;
        let namespace = value.namespace.clone().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
        Self::service(&namespace, value.name.as_deref().unwrap_or_default())
    }
}

impl From<&GatewayClass> for ResourceKey {
    fn from(value: &GatewayClass) -> Self {
        Self {
            group: DEFAULT_GROUP_NAME.to_owned(),
            namespace: String::new(),
            name: value.name_any(),
            kind: "GatewayClass".to_owned(),
        }
    }
}

impl From<&Gateway> for ResourceKey {
    fn from(value: &Gateway) -> Self {
        let namespace = value.meta().namespace.clone().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());

        Self {
            group: DEFAULT_GROUP_NAME.to_owned(),
            namespace,
            name: value.name_any(),
            kind: DEFAULT_KIND_NAME.to_owned(),
        }
    }
}

impl From<&Ingress> for ResourceKey {
    fn from(value: &Ingress) -> Self {
        let namespace = value.meta().namespace.clone().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
        Self::with_kind(INGRESS_GROUP_NAME, INGRESS_KIND_NAME, &namespace, &value.name_any())
    }
}

/// A reference from a child resource (route, policy) to the object it binds to.
///
/// `namespace` stays unset when the child omitted it; [`ParentReference::effective_key`]
/// applies the child's namespace.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

impl ParentReference {
    pub fn gateway(namespace: &str, name: &str) -> Self {
        Self {
            group: Some(DEFAULT_GROUP_NAME.to_owned()),
            kind: Some(DEFAULT_KIND_NAME.to_owned()),
            namespace: Some(namespace.to_owned()),
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(DEFAULT_GROUP_NAME)
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(DEFAULT_KIND_NAME)
    }

    pub fn is_gateway(&self) -> bool {
        self.group() == DEFAULT_GROUP_NAME && self.kind() == DEFAULT_KIND_NAME
    }

    pub fn effective_namespace<'a>(&'a self, child_namespace: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(namespace) if !namespace.is_empty() => namespace,
            _ => child_namespace,
        }
    }

    pub fn effective_key(&self, child_namespace: &str) -> RouteRefKey {
        RouteRefKey {
            resource_key: ResourceKey {
                group: self.group().to_owned(),
                namespace: self.effective_namespace(child_namespace).to_owned(),
                name: self.name.clone(),
                kind: self.kind().to_owned(),
            },
            section_name: self.section_name.clone().filter(|s| !s.is_empty()),
            port: self.port,
        }
    }

    /// Value equality with defaults applied, as status entries are compared.
    pub fn value_eq(&self, other: &ParentReference, child_namespace: &str) -> bool {
        self.effective_key(child_namespace) == other.effective_key(child_namespace)
    }
}

/// A parent reference with every default resolved.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct RouteRefKey {
    pub resource_key: ResourceKey,
    pub section_name: Option<String>,
    pub port: Option<i32>,
}

impl From<&RouteRefKey> for ParentReference {
    fn from(key: &RouteRefKey) -> Self {
        Self {
            group: Some(key.resource_key.group.clone()),
            kind: Some(key.resource_key.kind.clone()),
            namespace: Some(key.resource_key.namespace.clone()),
            name: key.resource_key.name.clone(),
            section_name: key.section_name.clone(),
            port: key.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_reference_defaults() {
        let parent = ParentReference {
            name: "gw".to_owned(),
            ..Default::default()
        };
        assert!(parent.is_gateway());
        let key = parent.effective_key("apps");
        assert_eq!(key.resource_key, ResourceKey::namespaced("gw", "apps"));
        assert_eq!(key.section_name, None);
    }

    #[test]
    fn parent_reference_value_equality() {
        let explicit = ParentReference::gateway("apps", "gw");
        let implicit = ParentReference {
            name: "gw".to_owned(),
            section_name: Some(String::new()),
            ..Default::default()
        };
        assert!(explicit.value_eq(&implicit, "apps"));
        assert!(!explicit.value_eq(&implicit, "other"));

        let with_port = ParentReference { port: Some(80), ..explicit.clone() };
        assert!(!explicit.value_eq(&with_port, "apps"));
    }
}
