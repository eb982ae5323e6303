pub mod gateway;
pub mod policies;
pub mod route;
pub mod status;
pub mod utils;

pub use gateway::GatewayListenerHandler;
pub use route::RouteReconcileHandler;

use crate::{cluster::ClusterError, services::StatusError};

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    Cluster(#[from] ClusterError),
    Status(#[from] StatusError),
    UnknownResource(String),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
