//! Vendor policy and configuration resources of the `apisix.apache.org` group.

mod backend_traffic_policy;
mod gateway_proxy;
mod http_route_policy;
mod plugin_config;

pub use backend_traffic_policy::{BackendTrafficPolicy, BackendTrafficPolicySpec, LoadBalancer, Timeout};
pub use gateway_proxy::{GatewayProxy, GatewayProxyPlugin, GatewayProxyProvider, GatewayProxySpec};
pub use http_route_policy::{HTTPRoutePolicy, HTTPRoutePolicySpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
pub use plugin_config::{Plugin, PluginConfig, PluginConfigSpec};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::ParentReference;

pub const POLICY_GROUP_NAME: &str = "apisix.apache.org";
pub const POLICY_VERSION: &str = "v1alpha1";

/// Local reference to the object a policy applies to, optionally narrowed to a
/// section (a service port name, a route rule name).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl PolicyTargetReference {
    pub fn section(&self) -> Option<&str> {
        self.section_name.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAncestorStatus {
    pub ancestor_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub ancestors: Vec<PolicyAncestorStatus>,
}
