use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info, instrument, warn};

use super::{
    policies::{process_backend_traffic_policies, process_http_route_policies, update_delete_ancestors, update_delete_backend_traffic_ancestors},
    status::{route_status_update, RouteParentStatus},
    utils::RouteListenerMatcher,
    ControllerError,
};
use crate::{
    cluster::{ClusterError, ClusterReader},
    common::{new_condition, ConditionReason, ManagedObject, Route, CONDITION_TYPE_RESOLVED_REFS},
    references::{FromResourceKey, ReferenceGrantsResolver, ToResourceKey},
    services::StatusUpdater,
    translate_context::TranslateContext,
};

type Result<T, E = ControllerError> = std::result::Result<T, E>;

/// Reconciles one route of any kind: attachment, backends, policies and status.
pub struct RouteReconcileHandler<'a> {
    reader: &'a dyn ClusterReader,
    updater: &'a StatusUpdater,
    controller_name: &'a str,
}

impl<'a> RouteReconcileHandler<'a> {
    pub fn new(reader: &'a dyn ClusterReader, updater: &'a StatusUpdater, controller_name: &'a str) -> Self {
        Self { reader, updater, controller_name }
    }

    /// Builds the translation context of `object`. Status writes are queued on the
    /// context, see [`Self::publish`].
    #[instrument(level = "info", name = "RouteReconcileHandler", skip_all, fields(id = %object.resource_key()))]
    pub async fn reconcile(&self, object: &ManagedObject) -> Result<TranslateContext> {
        let route = object
            .as_route()
            .map_err(ClusterError::from)?
            .ok_or_else(|| ControllerError::UnknownResource(object.resource_key().to_string()))?;
        let mut tctx = TranslateContext::new();

        let mut matcher = RouteListenerMatcher::new(self.reader, self.controller_name);
        let verdicts = matcher.resolve_parent_refs(&route, &route.parent_refs).await?;
        for verdict in verdicts.iter().filter(|v| v.accepted) {
            tctx.parent_refs.add_edge(route.key.clone(), verdict.gateway.clone());
        }
        info!("Route attached to {} of {} parents", verdicts.iter().filter(|v| v.accepted).count(), route.parent_refs.len());

        let (resolved, services) = self.resolve_backends(&route, &mut tctx).await?;

        process_http_route_policies(self.reader, &mut tctx, &route, &verdicts, self.controller_name).await?;
        for service in &services {
            process_backend_traffic_policies(self.reader, &mut tctx, service, self.controller_name).await?;
        }

        let resolved_refs = match resolved {
            None => new_condition(CONDITION_TYPE_RESOLVED_REFS, true, ConditionReason::ResolvedRefs, "Resolved all the Object references", route.generation),
            Some((reason, message)) => new_condition(CONDITION_TYPE_RESOLVED_REFS, false, reason, message, route.generation),
        };
        let entries: Vec<RouteParentStatus> = verdicts
            .into_iter()
            .map(|verdict| {
                let mut conditions = verdict.conditions;
                conditions.push(resolved_refs.clone());
                RouteParentStatus {
                    parent_ref: verdict.parent_ref,
                    controller_name: self.controller_name.to_owned(),
                    conditions,
                }
            })
            .collect();
        if !entries.is_empty() {
            tctx.enqueue_status(route_status_update(route.kind, object.clone(), entries));
        }
        Ok(tctx)
    }

    /// Loads the backend Services of `route` into the context. Returns the last
    /// resolution failure, if any, and the Services found.
    async fn resolve_backends(&self, route: &Route, tctx: &mut TranslateContext) -> Result<(Option<(ConditionReason, String)>, Vec<Service>)> {
        let grants = ReferenceGrantsResolver::new(self.reader);
        let from = FromResourceKey::from(&route.key);
        let mut failure = None;
        let mut services = vec![];

        for backend in route.backend_refs() {
            if !backend.is_service() {
                debug!("Ignoring backend {}/{} {}", backend.group(), backend.kind(), backend.name);
                continue;
            }
            let key = backend.resource_key(route.namespace());
            if !grants.permitted(&from, &ToResourceKey::from(&key)).await? {
                warn!("Backend {key} is not permitted");
                failure = Some((ConditionReason::RefNotPermitted, format!("Reference to {key} is not permitted")));
                continue;
            }

            let service_name = key.namespaced_name();
            let Some(service) = self.reader.service(&service_name).await? else {
                debug!("Backend {key} not found");
                failure = Some((ConditionReason::BackendNotFound, format!("Service {service_name} not found")));
                continue;
            };

            tctx.parent_refs.add_edge(key, route.key.clone());
            let slices = self.reader.endpoint_slices(&service_name).await?;
            tctx.add_endpoint_slices(service_name.clone(), slices);
            tctx.add_service(service_name, service.clone());
            if !services.contains(&service) {
                services.push(service);
            }
        }
        Ok((failure, services))
    }

    /// Sends every queued status write of `tctx` to the status pipeline.
    pub async fn publish(&self, tctx: &mut TranslateContext) -> Result<()> {
        for update in tctx.take_status_updates() {
            self.updater.update(update).await?;
        }
        Ok(())
    }

    /// Retracts the ancestors the deleted route gave to the policies targeting it
    /// and to the traffic policies of its backends.
    #[instrument(level = "info", name = "RouteReconcileHandler::on_deleted", skip_all, fields(id = %route.key))]
    pub async fn on_deleted(&self, route: &Route) -> Result<()> {
        let mut updates = update_delete_ancestors(self.reader, route, self.controller_name).await?;
        updates.extend(update_delete_backend_traffic_ancestors(self.reader, route, self.controller_name).await?);
        info!("Pruning ancestors of {} policies", updates.len());
        for update in updates {
            self.updater.update(update).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use gateway_api::apis::experimental::httproutes::HTTPRoute;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        common::{NamespacedName, ResourceKey, STATUS_FALSE, STATUS_TRUE},
        controllers::utils::tests::{gateway, state_with, CONTROLLER_NAME, HTTP_LISTENER},
        crds::HTTPRoutePolicy,
        services::{status_updater, tests::RecordingWriter, Mutation, RetryConfig},
    };

    fn http_route(backends: &str) -> HTTPRoute {
        serde_yaml::from_str(&format!(
            r"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: web
  namespace: apps
  generation: 4
spec:
  parentRefs:
  - name: gw
    namespace: infra
  rules:
  - name: main
    backendRefs:
{backends}
"
        ))
        .unwrap()
    }

    fn service(namespace: &str, name: &str) -> Service {
        serde_yaml::from_str(&format!(
            r"
apiVersion: v1
kind: Service
metadata:
  name: {name}
  namespace: {namespace}
spec:
  ports:
  - name: http
    port: 80
"
        ))
        .unwrap()
    }

    fn policy() -> HTTPRoutePolicy {
        serde_yaml::from_str(
            r"
apiVersion: apisix.apache.org/v1alpha1
kind: HTTPRoutePolicy
metadata:
  name: timeouts
  namespace: apps
spec:
  targetRefs:
  - group: gateway.networking.k8s.io
    kind: HTTPRoute
    name: web
",
        )
        .unwrap()
    }

    fn route_conditions(tctx: &mut TranslateContext, route: HTTPRoute) -> Vec<(String, String, String)> {
        let updates = tctx.take_status_updates();
        let update = updates.iter().find(|u| u.key == NamespacedName::new("apps", "web")).unwrap();
        let Ok(Mutation::Apply(ManagedObject::HttpRoute(updated))) = (update.mutator)(&route.into()) else {
            panic!("expected a write");
        };
        updated.status.unwrap().parents[0].conditions.iter().flatten().map(|c| (c.type_.clone(), c.status.clone(), c.reason.clone())).collect()
    }

    fn updater() -> StatusUpdater {
        status_updater(16, Arc::new(RecordingWriter::default()), RetryConfig::default()).0
    }

    #[tokio::test]
    async fn reconcile_collects_backends_and_policies() {
        let state = state_with(vec![gateway("gw", "apisix", HTTP_LISTENER)]);
        state.save_service(service("apps", "web"));
        state.save_http_route_policy(policy());
        let route = http_route("    - name: web\n      port: 80");

        let updater = updater();
        let handler = RouteReconcileHandler::new(&state, &updater, CONTROLLER_NAME);
        let mut tctx = handler.reconcile(&route.clone().into()).await.unwrap();

        assert!(tctx.services.contains_key(&NamespacedName::new("apps", "web")));
        assert!(tctx.endpoint_slices.contains_key(&NamespacedName::new("apps", "web")));
        assert_eq!(tctx.http_route_policies.len(), 1);
        let gateways = tctx.parent_refs.ancestors_of_kind(&ResourceKey::service("apps", "web"), "Gateway");
        assert_eq!(gateways, vec![ResourceKey::namespaced("gw", "infra")]);

        let conditions = route_conditions(&mut tctx, route);
        assert_eq!(
            conditions,
            vec![
                ("Accepted".to_owned(), STATUS_TRUE.to_owned(), "Accepted".to_owned()),
                ("ResolvedRefs".to_owned(), STATUS_TRUE.to_owned(), "ResolvedRefs".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn unresolved_backends_are_reported() {
        let state = state_with(vec![gateway("gw", "apisix", HTTP_LISTENER)]);
        state.save_service(service("backend", "shared"));
        let updater = updater();
        let handler = RouteReconcileHandler::new(&state, &updater, CONTROLLER_NAME);

        let route = http_route("    - name: shared\n      namespace: backend\n      port: 80");
        let mut tctx = handler.reconcile(&route.clone().into()).await.unwrap();
        assert!(tctx.services.is_empty());
        let conditions = route_conditions(&mut tctx, route);
        assert_eq!(conditions[1], ("ResolvedRefs".to_owned(), STATUS_FALSE.to_owned(), "RefNotPermitted".to_owned()));

        let route = http_route("    - name: missing\n      port: 80");
        let mut tctx = handler.reconcile(&route.clone().into()).await.unwrap();
        let conditions = route_conditions(&mut tctx, route);
        assert_eq!(conditions[1], ("ResolvedRefs".to_owned(), STATUS_FALSE.to_owned(), "BackendNotFound".to_owned()));
    }

    #[tokio::test]
    async fn non_routes_are_rejected() {
        let state = state_with(vec![]);
        let updater = updater();
        let handler = RouteReconcileHandler::new(&state, &updater, CONTROLLER_NAME);
        let result = handler.reconcile(&gateway("gw", "apisix", HTTP_LISTENER).into()).await;
        assert!(matches!(result, Err(ControllerError::UnknownResource(_))));
    }

    #[tokio::test]
    async fn published_and_pruned_statuses_reach_the_writer() {
        let state = state_with(vec![gateway("gw", "apisix", HTTP_LISTENER)]);
        state.save_http_route_policy(policy());
        let route = http_route("    - name: web\n      port: 80");
        let writer = Arc::new(RecordingWriter::with(vec![route.clone().into(), policy().into()]));
        let (updater, service) = status_updater(16, Arc::clone(&writer) as _, RetryConfig::default());
        let token = CancellationToken::new();
        let worker = tokio::spawn(service.start(token.clone()));

        let handler = RouteReconcileHandler::new(&state, &updater, CONTROLLER_NAME);
        let mut tctx = handler.reconcile(&route.clone().into()).await.unwrap();
        handler.publish(&mut tctx).await.unwrap();
        assert!(tctx.pending_status_updates().is_empty());

        handler.on_deleted(&ManagedObject::from(route).as_route().unwrap().unwrap()).await.unwrap();

        let policy_key = NamespacedName::new("apps", "timeouts");
        let mut ancestors = None;
        for _ in 0..100 {
            if writer.writes().len() == 3 {
                if let Some(ManagedObject::HttpRoutePolicy(policy)) = writer.objects.lock().unwrap().get(&policy_key) {
                    ancestors = policy.status.as_ref().map(|s| s.ancestors.len());
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        worker.await.unwrap().unwrap();
        assert_eq!(ancestors, Some(0));
    }
}
