use std::{collections::BTreeMap, fmt::Display};

use gateway_api::apis::standard::gateways::{self, GatewayListeners, GatewayListenersAllowedRoutesNamespacesFrom};
use tracing::warn;

use super::{route::RouteKind, ResourceKey, DEFAULT_GROUP_NAME, SECRET_KIND_NAME};

#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub enum ProtocolType {
    Http,
    Https,
    Tcp,
    Tls,
    Udp,
    Other(String),
}

impl From<&str> for ProtocolType {
    fn from(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            "TCP" => Self::Tcp,
            "TLS" => Self::Tls,
            "UDP" => Self::Udp,
            _ => Self::Other(value.to_owned()),
        }
    }
}

impl Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolType::Other(protocol) => f.write_str(protocol),
            _ => {
                let mut e = format! {"{self:?}"};
                e.make_ascii_uppercase();
                write!(f, "{e}")
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsMode {
    Terminate,
    Passthrough,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

/// Label selector over namespace labels; every label and every expression must hold.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceSelector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<SelectorRequirement>,
}

impl NamespaceSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match = self.match_labels.iter().all(|(k, v)| labels.get(k) == Some(v));
        labels_match
            && self.match_expressions.iter().all(|expression| {
                let value = labels.get(&expression.key);
                match expression.operator.as_str() {
                    "In" => value.is_some_and(|v| expression.values.contains(v)),
                    "NotIn" => value.is_none_or(|v| !expression.values.contains(v)),
                    "Exists" => value.is_some(),
                    "DoesNotExist" => value.is_none(),
                    operator => {
                        warn!("Unknown selector operator {operator}");
                        false
                    },
                }
            })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NamespacePolicy {
    All,
    #[default]
    Same,
    Selector(NamespaceSelector),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteGroupKind {
    pub group: String,
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllowedRoutes {
    pub kinds: Vec<RouteGroupKind>,
    pub namespaces: NamespacePolicy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub protocol: ProtocolType,
    pub port: i32,
    pub hostname: Option<String>,
    pub tls_mode: Option<TlsMode>,
    pub certificate_refs: Vec<ResourceKey>,
    pub allowed_routes: AllowedRoutes,
}

impl Listener {
    pub fn listeners_of(gateway: &gateways::Gateway) -> Vec<Listener> {
        let namespace = gateway.metadata.namespace.clone().unwrap_or_default();
        gateway.spec.listeners.iter().map(|l| Listener::from((l, namespace.as_str()))).collect()
    }

    /// Route kinds this listener's protocol can carry.
    pub fn protocol_kinds(&self) -> &'static [RouteKind] {
        match (&self.protocol, self.tls_mode) {
            (ProtocolType::Http, _) | (ProtocolType::Https, None | Some(TlsMode::Terminate)) => &[RouteKind::HttpRoute, RouteKind::GrpcRoute],
            (ProtocolType::Tls, Some(TlsMode::Passthrough) | None) => &[RouteKind::TlsRoute],
            (ProtocolType::Tls, Some(TlsMode::Terminate)) => &[RouteKind::TlsRoute, RouteKind::TcpRoute],
            (ProtocolType::Tcp, _) => &[RouteKind::TcpRoute],
            _ => &[],
        }
    }

    pub fn supports_protocol_of(&self, kind: RouteKind) -> bool {
        self.protocol_kinds().contains(&kind)
    }

    /// Kinds reported as supported: the allow-list intersected with the protocol family,
    /// or the protocol family when no allow-list is configured.
    pub fn supported_kinds(&self) -> Vec<RouteKind> {
        if self.allowed_routes.kinds.is_empty() {
            self.protocol_kinds().to_vec()
        } else {
            self.protocol_kinds().iter().copied().filter(|kind| self.allows_kind(*kind)).collect()
        }
    }

    pub fn allows_kind(&self, kind: RouteKind) -> bool {
        if self.allowed_routes.kinds.is_empty() {
            return self.supports_protocol_of(kind);
        }
        self.allowed_routes.kinds.iter().any(|k| k.kind == kind.as_str() && (k.group.is_empty() || k.group == DEFAULT_GROUP_NAME))
    }
}

impl From<(&GatewayListeners, &str)> for Listener {
    fn from((gateway_listener, gateway_namespace): (&GatewayListeners, &str)) -> Self {
        let tls_mode = gateway_listener.tls.as_ref().map(|tls| match tls.mode {
            Some(gateways::GatewayListenersTlsMode::Passthrough) => TlsMode::Passthrough,
            Some(gateways::GatewayListenersTlsMode::Terminate) | None => TlsMode::Terminate,
        });

        let certificate_refs = gateway_listener
            .tls
            .as_ref()
            .and_then(|tls| tls.certificate_refs.as_ref())
            .map(|refs| {
                refs.iter()
                    .map(|r| ResourceKey {
                        group: r.group.clone().unwrap_or_default(),
                        namespace: r.namespace.clone().unwrap_or(gateway_namespace.to_owned()),
                        name: r.name.clone(),
                        kind: r.kind.clone().unwrap_or(SECRET_KIND_NAME.to_owned()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let allowed_routes = gateway_listener
            .allowed_routes
            .as_ref()
            .map(|allowed_routes| {
                let kinds = allowed_routes
                    .kinds
                    .as_ref()
                    .map(|kinds| {
                        kinds
                            .iter()
                            .map(|k| RouteGroupKind {
                                group: k.group.clone().unwrap_or(DEFAULT_GROUP_NAME.to_owned()),
                                kind: k.kind.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let namespaces = match allowed_routes.namespaces.as_ref() {
                    Some(namespaces) => match namespaces.from {
                        Some(GatewayListenersAllowedRoutesNamespacesFrom::All) => NamespacePolicy::All,
                        Some(GatewayListenersAllowedRoutesNamespacesFrom::Selector) => {
                            let selector = namespaces
                                .selector
                                .as_ref()
                                .map(|selector| NamespaceSelector {
                                    match_labels: selector.match_labels.clone().unwrap_or_default(),
                                    match_expressions: selector
                                        .match_expressions
                                        .as_ref()
                                        .map(|expressions| {
                                            expressions
                                                .iter()
                                                .map(|e| SelectorRequirement {
                                                    key: e.key.clone(),
                                                    operator: e.operator.clone(),
                                                    values: e.values.clone().unwrap_or_default(),
                                                })
                                                .collect()
                                        })
                                        .unwrap_or_default(),
                                })
                                .unwrap_or_default();
                            NamespacePolicy::Selector(selector)
                        },
                        Some(GatewayListenersAllowedRoutesNamespacesFrom::Same) | None => NamespacePolicy::Same,
                    },
                    None => NamespacePolicy::Same,
                };
                AllowedRoutes { kinds, namespaces }
            })
            .unwrap_or_default();

        Self {
            name: gateway_listener.name.clone(),
            protocol: ProtocolType::from(gateway_listener.protocol.as_str()),
            port: gateway_listener.port,
            hostname: gateway_listener.hostname.clone().filter(|h| !h.is_empty()),
            tls_mode,
            certificate_refs,
            allowed_routes,
        }
    }
}
