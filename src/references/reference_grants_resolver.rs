use gateway_api::apis::standard::referencegrants::{ReferenceGrant, ReferenceGrantFrom, ReferenceGrantTo};
use kube::ResourceExt;
use tracing::debug;

use crate::{
    cluster::{ClusterError, ClusterReader},
    common::{ResourceKey, CORE_GROUP_NAME},
};

fn normalize_group(group: &str) -> &str {
    if group == "core" {
        CORE_GROUP_NAME
    } else {
        group
    }
}

/// The referring side of a cross-namespace reference.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FromResourceKey {
    pub group: String,
    pub namespace: String,
    pub kind: String,
}

impl From<&ResourceKey> for FromResourceKey {
    fn from(rk: &ResourceKey) -> Self {
        Self {
            group: rk.group.clone(),
            namespace: rk.namespace.clone(),
            kind: rk.kind.clone(),
        }
    }
}

impl FromResourceKey {
    fn matches(&self, from: &ReferenceGrantFrom) -> bool {
        normalize_group(&from.group) == normalize_group(&self.group) && from.kind == self.kind && from.namespace == self.namespace
    }
}

/// The referred side; `namespace` unset means the referrer's own namespace.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ToResourceKey {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl From<&ResourceKey> for ToResourceKey {
    fn from(rk: &ResourceKey) -> Self {
        Self {
            group: rk.group.clone(),
            kind: rk.kind.clone(),
            name: rk.name.clone(),
            namespace: Some(rk.namespace.clone()).filter(|ns| !ns.is_empty()),
        }
    }
}

impl ToResourceKey {
    fn matches(&self, to: &ReferenceGrantTo) -> bool {
        normalize_group(&to.group) == normalize_group(&self.group) && to.kind == self.kind && to.name.as_ref().is_none_or(|name| *name == self.name)
    }
}

/// Whether one grant authorises the reference. Namespaces are not checked here.
pub fn grant_permits(grant: &ReferenceGrant, from: &FromResourceKey, to: &ToResourceKey) -> bool {
    grant.spec.from.iter().any(|f| from.matches(f)) && grant.spec.to.iter().any(|t| to.matches(t))
}

pub struct ReferenceGrantsResolver<'a> {
    reader: &'a dyn ClusterReader,
}

impl<'a> ReferenceGrantsResolver<'a> {
    pub fn new(reader: &'a dyn ClusterReader) -> Self {
        Self { reader }
    }

    pub async fn permitted(&self, from: &FromResourceKey, to: &ToResourceKey) -> Result<bool, ClusterError> {
        let target_namespace = match to.namespace.as_deref() {
            Some(namespace) if namespace != from.namespace => namespace,
            _ => return Ok(true),
        };

        let grants = self.reader.reference_grants(target_namespace).await?;
        let granted_by = grants.iter().find(|grant| grant_permits(grant, from, to));
        match granted_by {
            Some(grant) => {
                debug!("Reference {from:?} -> {to:?} granted by {}/{}", target_namespace, grant.name_any());
                Ok(true)
            },
            None => {
                debug!("Reference {from:?} -> {to:?} not granted");
                Ok(false)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;

    fn grant(yaml: &str) -> ReferenceGrant {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn from() -> FromResourceKey {
        FromResourceKey {
            group: "gateway.networking.k8s.io".to_owned(),
            namespace: "apps".to_owned(),
            kind: "HTTPRoute".to_owned(),
        }
    }

    fn to(name: &str, namespace: Option<&str>) -> ToResourceKey {
        ToResourceKey {
            group: String::new(),
            kind: "Service".to_owned(),
            name: name.to_owned(),
            namespace: namespace.map(ToOwned::to_owned),
        }
    }

    #[tokio::test]
    async fn same_namespace_is_always_permitted() {
        let state = State::new();
        let resolver = ReferenceGrantsResolver::new(&state);
        assert!(resolver.permitted(&from(), &to("web", None)).await.unwrap());
        assert!(resolver.permitted(&from(), &to("web", Some("apps"))).await.unwrap());
        assert!(!resolver.permitted(&from(), &to("web", Some("backend"))).await.unwrap());
    }

    #[tokio::test]
    async fn cross_namespace_needs_a_grant() {
        let state = State::new();
        state
            .save_reference_grant(grant(
                r"
apiVersion: gateway.networking.k8s.io/v1beta1
kind: ReferenceGrant
metadata:
  name: allow-apps
  namespace: backend
spec:
  from:
  - group: gateway.networking.k8s.io
    kind: HTTPRoute
    namespace: apps
  to:
  - group: ''
    kind: Service
    name: web
",
            ))
            ;
        state
            .save_reference_grant(grant(
                r"
apiVersion: gateway.networking.k8s.io/v1beta1
kind: ReferenceGrant
metadata:
  name: allow-all-services
  namespace: shared
spec:
  from:
  - group: gateway.networking.k8s.io
    kind: HTTPRoute
    namespace: apps
  to:
  - group: core
    kind: Service
",
            ))
            ;

        let resolver = ReferenceGrantsResolver::new(&state);
        assert!(resolver.permitted(&from(), &to("web", Some("backend"))).await.unwrap());
        assert!(!resolver.permitted(&from(), &to("api", Some("backend"))).await.unwrap());
        assert!(resolver.permitted(&from(), &to("anything", Some("shared"))).await.unwrap());

        let grpc = FromResourceKey {
            kind: "GRPCRoute".to_owned(),
            ..from()
        };
        assert!(!resolver.permitted(&grpc, &to("web", Some("backend"))).await.unwrap());

        let other_namespace = FromResourceKey {
            namespace: "other".to_owned(),
            ..from()
        };
        assert!(!resolver.permitted(&other_namespace, &to("web", Some("backend"))).await.unwrap());
    }
}
