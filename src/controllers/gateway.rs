use gateway_api::apis::standard::gateways::Gateway;
use tracing::{debug, instrument};

use super::{status::listener_status_update, utils::RouteListenerMatcher, ControllerError};
use crate::{cluster::ClusterReader, common::Route, services::StatusUpdater};

type Result<T, E = ControllerError> = std::result::Result<T, E>;

/// Keeps the listener status of managed Gateways in line with the routes attached to them.
pub struct GatewayListenerHandler<'a> {
    reader: &'a dyn ClusterReader,
    updater: &'a StatusUpdater,
    controller_name: &'a str,
}

impl<'a> GatewayListenerHandler<'a> {
    pub fn new(reader: &'a dyn ClusterReader, updater: &'a StatusUpdater, controller_name: &'a str) -> Self {
        Self { reader, updater, controller_name }
    }

    /// Recounts the routes of every listener of `gateway`. Returns false for
    /// Gateways of another controller.
    #[instrument(level = "debug", name = "GatewayListenerHandler", skip_all, fields(id = %gateway.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn refresh(&self, gateway: &Gateway) -> Result<bool> {
        let mut matcher = RouteListenerMatcher::new(self.reader, self.controller_name);
        if !matcher.manages(gateway).await? {
            return Ok(false);
        }
        let counts = matcher.attached_route_counts(gateway).await?;
        self.updater.update(listener_status_update(gateway, counts)).await?;
        Ok(true)
    }

    /// Refreshes every Gateway `route` names now or was reported against.
    pub async fn refresh_for_route(&self, route: &Route) -> Result<usize> {
        let mut refreshed = 0;
        for key in route.gateway_keys() {
            let Some(gateway) = self.reader.gateway(&key).await? else {
                debug!("Gateway {key} of {} is gone", route.key);
                continue;
            };
            if self.refresh(&gateway).await? {
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        common::{ManagedObject, NamespacedName, ParentReference},
        controllers::utils::tests::{gateway, http_route, state_with, CONTROLLER_NAME, HTTP_LISTENER},
        services::{status_updater, tests::RecordingWriter, RetryConfig},
    };

    fn attached_routes(writer: &RecordingWriter, name: &str) -> Option<i32> {
        match writer.objects.lock().unwrap().get(&NamespacedName::new("infra", name)) {
            Some(ManagedObject::Gateway(gateway)) => gateway.status.as_ref()?.listeners.as_ref()?.first().map(|l| l.attached_routes),
            _ => None,
        }
    }

    #[tokio::test]
    async fn route_changes_refresh_current_and_previous_gateways() {
        let state = state_with(vec![gateway("old", "apisix", HTTP_LISTENER), gateway("new", "apisix", HTTP_LISTENER), gateway("foreign", "other", HTTP_LISTENER)]);
        let writer = Arc::new(RecordingWriter::with(vec![
            gateway("old", "apisix", HTTP_LISTENER).into(),
            gateway("new", "apisix", HTTP_LISTENER).into(),
            gateway("foreign", "other", HTTP_LISTENER).into(),
        ]));
        let (updater, service) = status_updater(16, Arc::clone(&writer) as _, RetryConfig::default());
        let token = CancellationToken::new();
        let worker = tokio::spawn(service.start(token.clone()));

        let mut route = http_route(
            "web",
            "apps",
            "
  parentRefs:
  - name: new
    namespace: infra
  - name: foreign
    namespace: infra",
        );
        route.reported_parents = vec![ParentReference::gateway("infra", "old")];
        state.save_route(route.clone());

        let handler = GatewayListenerHandler::new(&state, &updater, CONTROLLER_NAME);
        assert_eq!(handler.refresh_for_route(&route).await.unwrap(), 2);

        for _ in 0..100 {
            if writer.writes().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        worker.await.unwrap().unwrap();

        assert_eq!(attached_routes(&writer, "new"), Some(1));
        assert_eq!(attached_routes(&writer, "old"), Some(0));
        assert_eq!(attached_routes(&writer, "foreign"), None);
    }
}
