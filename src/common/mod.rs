mod conditions;
mod hostname;
mod listener;
mod object;
mod resource_key;
mod route;

pub use conditions::{
    accepted_condition, is_condition_present_and_equal, new_condition, set_condition, ConditionReason, CONDITION_TYPE_ACCEPTED, CONDITION_TYPE_PROGRAMMED, CONDITION_TYPE_RESOLVED_REFS, STATUS_FALSE,
    STATUS_TRUE,
};
pub use hostname::{first_intersecting, hostnames_intersect, hostnames_match, WILDCARD_HOSTNAME};
pub use listener::{AllowedRoutes, Listener, NamespacePolicy, NamespaceSelector, ProtocolType, RouteGroupKind, SelectorRequirement, TlsMode};
pub use object::{ManagedObject, ObjectKind};
pub use resource_key::{
    NamespacedName, ParentReference, ResourceKey, RouteRefKey, CORE_GROUP_NAME, DEFAULT_GROUP_NAME, DEFAULT_KIND_NAME, DEFAULT_NAMESPACE_NAME, INGRESS_GROUP_NAME, INGRESS_KIND_NAME, SECRET_KIND_NAME,
    SERVICE_KIND_NAME,
};
pub use route::{BackendReference, Route, RouteKind, RouteRule};
