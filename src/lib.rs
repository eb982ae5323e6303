use std::{collections::HashSet, fmt::Debug, sync::Arc};

use cluster::{KubeClusterReader, KubeStatusWriter};
use common::{ManagedObject, Route, RouteKind};
use controllers::{policies::process_ingress_http_route_policies, GatewayListenerHandler, RouteReconcileHandler};
use futures::{FutureExt, StreamExt, TryStreamExt};
use gateway_api::apis::{
    experimental::{grpcroutes::GRPCRoute, httproutes::HTTPRoute, tcproutes::TCPRoute, tlsroutes::TLSRoute},
    standard::gateways::Gateway,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    runtime::{watcher, watcher::Event},
    Api, Client, Resource, ResourceExt,
};
use readiness::{object_name, KubeObjectLister, ReadinessManager};
use serde::de::DeserializeOwned;
use services::{status_updater, StatusUpdater};
use tokio_util::sync::CancellationToken;
use tracing::{info, span, warn, Instrument, Level};
use translate_context::TranslateContext;

pub mod cluster;
pub mod common;
mod configuration;
pub mod controllers;
pub mod crds;
pub mod readiness;
pub mod references;
pub mod services;
#[cfg(test)]
pub(crate) mod state;
pub mod translate_context;

pub use configuration::{Configuration, ReadinessConfiguration, StatusUpdaterConfiguration};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Shared handles of the running controller.
struct ControlPlane {
    client: Client,
    controller_name: String,
    reader: KubeClusterReader,
    updater: StatusUpdater,
    readiness: ReadinessManager,
}

impl ControlPlane {
    fn route_of(object: &ManagedObject) -> Option<Route> {
        match object.as_route() {
            Ok(route) => route,
            Err(e) => {
                warn!("Route {} not readable {e}", object.resource_key());
                None
            },
        }
    }

    async fn refresh_gateways(&self, route: &Route) {
        let handler = GatewayListenerHandler::new(&self.reader, &self.updater, &self.controller_name);
        match handler.refresh_for_route(route).await {
            Ok(refreshed) => info!("Route {} refreshed {refreshed} gateways", route.key),
            Err(e) => warn!("Gateways of {} not refreshed {e}", route.key),
        }
    }

    async fn on_route<K>(&self, route: &K)
    where
        K: Resource<DynamicType = ()> + Clone + Into<ManagedObject>,
    {
        let handler = RouteReconcileHandler::new(&self.reader, &self.updater, &self.controller_name);
        let object: ManagedObject = route.clone().into();
        match handler.reconcile(&object).await {
            Ok(mut tctx) => {
                info!("Route {} resolved {} services", object.resource_key(), tctx.services.len());
                if let Err(e) = handler.publish(&mut tctx).await {
                    warn!("Status not published {e}");
                }
            },
            Err(e) => warn!("Route {} not reconciled {e}", object.resource_key()),
        }
        if let Some(view) = Self::route_of(&object) {
            self.refresh_gateways(&view).await;
        }
        self.readiness.done_for(route).await;
    }

    async fn on_route_deleted<K>(&self, route: &K)
    where
        K: Resource<DynamicType = ()> + Clone + Into<ManagedObject>,
    {
        let object: ManagedObject = route.clone().into();
        if let Some(view) = Self::route_of(&object) {
            let handler = RouteReconcileHandler::new(&self.reader, &self.updater, &self.controller_name);
            if let Err(e) = handler.on_deleted(&view).await {
                warn!("Ancestors of {} not pruned {e}", view.key);
            }
            self.refresh_gateways(&view).await;
        }
        self.readiness.done_for(route).await;
    }

    async fn on_gateway(&self, gateway: &Gateway) -> Result<()> {
        let handler = GatewayListenerHandler::new(&self.reader, &self.updater, &self.controller_name);
        handler.refresh(gateway).await?;
        self.readiness.done_for(gateway).await;
        Ok(())
    }

    async fn on_ingress(&self, ingress: &Ingress) -> Result<()> {
        let mut tctx = TranslateContext::new();
        process_ingress_http_route_policies(&self.reader, &mut tctx, ingress, &self.controller_name).await?;
        let handler = RouteReconcileHandler::new(&self.reader, &self.updater, &self.controller_name);
        handler.publish(&mut tctx).await?;
        Ok(())
    }

    async fn watch_routes<K>(self: Arc<Self>, kind: RouteKind) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static + Into<ManagedObject>,
    {
        info!("{kind} watcher...started");
        let api = Api::<K>::all(self.client.clone());
        let mut events = watcher(api, watcher::Config::default()).boxed();
        let mut delivered = HashSet::new();
        while let Some(event) = events.try_next().await? {
            match event {
                Event::Apply(route) | Event::InitApply(route) => {
                    delivered.insert(object_name(&route));
                    let span = span!(Level::INFO, "RouteWatcher", %kind, name = route.name_any());
                    self.on_route(&route).instrument(span).await;
                },
                Event::Delete(route) => self.on_route_deleted(&route).await,
                Event::Init => delivered.clear(),
                Event::InitDone => self.readiness.settle_for::<K>(&delivered).await,
            }
        }
        info!("{kind} watcher...stopped");
        Ok(())
    }

    async fn watch_gateways(self: Arc<Self>) -> Result<()> {
        info!("Gateway watcher...started");
        let api = Api::<Gateway>::all(self.client.clone());
        let mut events = watcher(api, watcher::Config::default()).boxed();
        let mut delivered = HashSet::new();
        while let Some(event) = events.try_next().await? {
            match event {
                Event::Apply(gateway) | Event::InitApply(gateway) => {
                    delivered.insert(object_name(&gateway));
                    if let Err(e) = self.on_gateway(&gateway).await {
                        warn!("Gateway {} listener status not updated {e}", gateway.name_any());
                    }
                },
                Event::Delete(gateway) => self.readiness.done_for(&gateway).await,
                Event::Init => delivered.clear(),
                Event::InitDone => self.readiness.settle_for::<Gateway>(&delivered).await,
            }
        }
        info!("Gateway watcher...stopped");
        Ok(())
    }

    async fn watch_ingresses(self: Arc<Self>) -> Result<()> {
        info!("Ingress watcher...started");
        let api = Api::<Ingress>::all(self.client.clone());
        let mut events = watcher(api, watcher::Config::default()).boxed();
        while let Some(event) = events.try_next().await? {
            if let Event::Apply(ingress) | Event::InitApply(ingress) = event {
                if let Err(e) = self.on_ingress(&ingress).await {
                    warn!("Policies of ingress {} not processed {e}", ingress.name_any());
                }
            }
        }
        info!("Ingress watcher...stopped");
        Ok(())
    }
}

pub async fn start(configuration: Configuration) -> Result<()> {
    info!("Kubinder started");
    let client = Client::try_default().await?;
    let token = CancellationToken::new();

    let readiness = ReadinessManager::new(Arc::new(KubeObjectLister::new(client.clone())));
    readiness.register::<Gateway>(None)?;
    readiness.register::<HTTPRoute>(None)?;
    readiness.register::<GRPCRoute>(None)?;
    readiness.register::<TCPRoute>(None)?;
    readiness.register::<TLSRoute>(None)?;

    let (updater, updater_service) = status_updater(
        configuration.status_updater.queue_capacity,
        Arc::new(KubeStatusWriter::new(client.clone())),
        configuration.status_updater.retry.clone(),
    );
    let updater_task = tokio::spawn(updater_service.start(token.clone()));

    readiness.start().await?;

    let control_plane = Arc::new(ControlPlane {
        client: client.clone(),
        controller_name: configuration.controller_name.clone(),
        reader: KubeClusterReader::new(client),
        updater,
        readiness: readiness.clone(),
    });

    let readiness_timeout = configuration.readiness.timeout();
    let readiness_token = token.clone();
    let readiness_task = async move {
        if readiness.wait_ready(&readiness_token, readiness_timeout).await {
            info!("Every existing resource reconciled, full synchronisation allowed");
        } else {
            warn!("Readiness not reached within {readiness_timeout:?}");
        }
        crate::Result::<()>::Ok(())
    };

    let services = vec![
        Arc::clone(&control_plane).watch_gateways().boxed(),
        Arc::clone(&control_plane).watch_routes::<HTTPRoute>(RouteKind::HttpRoute).boxed(),
        Arc::clone(&control_plane).watch_routes::<GRPCRoute>(RouteKind::GrpcRoute).boxed(),
        Arc::clone(&control_plane).watch_routes::<TCPRoute>(RouteKind::TcpRoute).boxed(),
        Arc::clone(&control_plane).watch_routes::<TLSRoute>(RouteKind::TlsRoute).boxed(),
        Arc::clone(&control_plane).watch_ingresses().boxed(),
        readiness_task.boxed(),
    ];

    tokio::select! {
        results = futures::future::join_all(services) => {
            for result in results {
                if let Err(e) = result {
                    warn!("Service stopped {e}");
                }
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
        }
    }

    token.cancel();
    updater_task.await??;
    info!("Kubinder stopped");
    Ok(())
}

