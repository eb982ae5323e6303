use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Plugin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// A named plugin set referenced from route filters.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(kind = "PluginConfig", group = "apisix.apache.org", version = "v1alpha1", namespaced)]
#[kube(derive = "Default")]
#[kube(derive = "PartialEq")]
pub struct PluginConfigSpec {
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}
