use std::collections::BTreeMap;

use tracing::debug;

use super::super::utils::{AttachmentVerdict, RouteListenerMatcher};
use crate::{
    cluster::{ClusterError, ClusterReader},
    common::{NamespacedName, ParentReference, ResourceKey, Route, RouteKind},
    references::{FromResourceKey, ReferenceGrantsResolver, ToResourceKey},
};

/// Gateways the accepted verdicts attach to, as ancestor refs.
pub fn accepted_gateways(verdicts: &[AttachmentVerdict]) -> Vec<ParentReference> {
    let mut gateways: Vec<ParentReference> = vec![];
    for verdict in verdicts.iter().filter(|v| v.accepted) {
        let gateway = ParentReference::gateway(&verdict.gateway.namespace, &verdict.gateway.name);
        if !gateways.contains(&gateway) {
            gateways.push(gateway);
        }
    }
    gateways
}

pub fn extend_unique(valid: &mut Vec<ParentReference>, more: impl IntoIterator<Item = ParentReference>) {
    for ancestor in more {
        if !valid.contains(&ancestor) {
            valid.push(ancestor);
        }
    }
}

/// Full scan over the routes of the cluster answering which Gateways currently
/// lead to a policy target. Routes are listed once per kind and scan.
pub struct AncestorScan<'a> {
    reader: &'a dyn ClusterReader,
    matcher: RouteListenerMatcher<'a>,
    grants: ReferenceGrantsResolver<'a>,
    routes: BTreeMap<RouteKind, Vec<Route>>,
}

impl<'a> AncestorScan<'a> {
    pub fn new(reader: &'a dyn ClusterReader, controller_name: &'a str) -> Self {
        Self {
            reader,
            matcher: RouteListenerMatcher::new(reader, controller_name),
            grants: ReferenceGrantsResolver::new(reader),
            routes: BTreeMap::new(),
        }
    }

    async fn routes(&mut self, kind: RouteKind) -> Result<Vec<Route>, ClusterError> {
        if let Some(routes) = self.routes.get(&kind) {
            return Ok(routes.clone());
        }
        let routes = self.reader.routes(kind).await?;
        self.routes.insert(kind, routes.clone());
        Ok(routes)
    }

    /// Gateways `route` is attached to right now.
    pub async fn gateways_of(&mut self, route: &Route) -> Result<Vec<ParentReference>, ClusterError> {
        let verdicts = self.matcher.resolve_parent_refs(route, &route.parent_refs).await?;
        Ok(accepted_gateways(&verdicts))
    }

    /// Gateways of the `kind` route called `name`, unless it is one of `skip`.
    pub async fn route_gateways(&mut self, kind: RouteKind, name: &NamespacedName, skip: &[&ResourceKey]) -> Result<Vec<ParentReference>, ClusterError> {
        let mut gateways = vec![];
        for route in self.routes(kind).await? {
            if route.key.namespaced_name() != *name || skip.contains(&&route.key) {
                continue;
            }
            extend_unique(&mut gateways, self.gateways_of(&route).await?);
        }
        Ok(gateways)
    }

    /// Gateways leading to `service` through a permitted backend ref of any route
    /// other than `skip`.
    pub async fn service_gateways(&mut self, service: &ResourceKey, skip: &[&ResourceKey]) -> Result<Vec<ParentReference>, ClusterError> {
        let mut gateways = vec![];
        for kind in RouteKind::ALL {
            for route in self.routes(kind).await? {
                if skip.contains(&&route.key) {
                    continue;
                }
                let references = route.backend_refs().any(|b| b.is_service() && b.resource_key(route.namespace()) == *service);
                if !references || !self.grants.permitted(&FromResourceKey::from(&route.key), &ToResourceKey::from(service)).await? {
                    continue;
                }
                extend_unique(&mut gateways, self.gateways_of(&route).await?);
            }
        }
        debug!("Service {service} reached through {} gateways", gateways.len());
        Ok(gateways)
    }
}
