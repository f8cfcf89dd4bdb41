//! Shared configuration fragments used across the Nimbus CRDs

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Endpoint classes a service may expose
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum EndpointClass {
    /// Externally reachable endpoint
    Public,
    /// Cluster-internal endpoint
    Internal,
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Reference to a topology constraint object applied to a service's pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopologyRef {
    /// Name of the topology object
    pub name: String,
    /// Namespace of the topology object; empty means the plane's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Messaging bus a service publishes its notifications to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagingBusConfig {
    /// Name of the bus cluster instance
    #[serde(default)]
    pub cluster: String,
}

/// Globally declared extra volume mount propagated into every service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtraMount {
    /// Name of the mount
    pub name: String,
    /// Region/zone the mount applies to, empty for all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Volume source name (secret, config map or PVC)
    pub source: String,
    /// Mount path inside the service containers
    pub mount_path: String,
}

/// Deployment-level TLS switches
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// TLS between pods (service endpoints get their own certificates)
    #[serde(default)]
    pub pod_level: TlsFlag,
    /// TLS termination at the ingress for public endpoints
    #[serde(default)]
    pub ingress: TlsFlag,
}

/// A single on/off TLS switch
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsFlag {
    /// Whether this TLS layer is enabled
    #[serde(default)]
    pub enabled: bool,
}

/// TLS state carried on a service template and copied into the child
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTls {
    /// Secret holding the CA bundle the service trusts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle_secret_name: Option<String>,
    /// Certificate secret bound to each endpoint class
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoint_secrets: BTreeMap<EndpointClass, String>,
}

/// Override applied to the Service object of one endpoint class
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutedOverride {
    /// Labels added to the Service object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations added to the Service object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Externally reachable URL computed by the exposure sequencer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl RoutedOverride {
    /// Add a label to the override
    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }
}

/// Per-service endpoint override declared by the operator user
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiOverride {
    /// Route override for the public endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteOverride>,
}

/// Route-level override for a public endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteOverride {
    /// Hostname the endpoint is published under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Annotations for the route object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Custom TLS material for the route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTlsOverride>,
}

/// Custom TLS material bound to a route override.
///
/// When `certificate`/`key` are used, both must be set; admission rejects a
/// partial pair.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTlsOverride {
    /// Existing secret holding the certificate material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// PEM certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// PEM private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl RouteTlsOverride {
    /// Whether a complete custom certificate/key pair is present
    pub fn has_cert_pair(&self) -> bool {
        self.certificate.as_deref().is_some_and(|c| !c.is_empty())
            && self.key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Access rule restricting what an application credential may call
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    /// Target service of the rule
    pub service: String,
    /// Request path pattern
    pub path: String,
    /// HTTP method
    pub method: String,
}

/// Deployment-wide application credential defaults.
///
/// Fields left unset here fall back to built-in defaults at credential
/// creation time.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialOverlay {
    /// Whether application credentials are enabled deployment-wide
    #[serde(default)]
    pub enabled: bool,
    /// Days until a credential expires and is rotated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<i32>,
    /// Days the previous credential stays valid after rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_days: Option<i32>,
    /// Roles granted to the credential
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Whether the credential may create further credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unrestricted: Option<bool>,
    /// Access rules restricting the credential
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_rules: Vec<AccessRule>,
}

/// Per-service application credential overlay.
///
/// Every field except `enabled` is optional: unset means "inherit the
/// global value", while an explicitly set value — including an explicitly
/// empty list — always wins.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCredentialOverlay {
    /// Whether the credential is enabled for this service
    #[serde(default)]
    pub enabled: bool,
    /// Override for the expiration period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<i32>,
    /// Override for the grace period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_days: Option<i32>,
    /// Override for the granted roles; `Some(vec![])` is an explicit
    /// empty set, distinct from unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    /// Override for the unrestricted flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unrestricted: Option<bool>,
    /// Override for the access rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_rules: Option<Vec<AccessRule>>,
}

/// Common configuration template for one managed service.
///
/// Unset fields inherit the control plane's top-level values during the
/// reconcile pass; the service-level value always wins when set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    /// Replica count for the service's API pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Secret holding the service's passwords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Name of the service user in the identity service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_user: Option<String>,
    /// Key inside `secret` holding the service user's password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_selector: Option<String>,
    /// Shared database instance the service uses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_instance: Option<String>,
    /// Node placement constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    /// Topology constraint reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_ref: Option<TopologyRef>,
    /// Messaging bus configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_bus: Option<MessagingBusConfig>,
    /// Deprecated scalar form of the messaging bus name; migrated into
    /// `messaging_bus` during defaulting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_bus_instance: Option<String>,
    /// Telemetry only: whether the metrics pipeline is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_enabled: Option<bool>,
    /// Telemetry only: whether the autoscaling pipeline is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling_enabled: Option<bool>,
    /// TLS state for the service endpoints
    #[serde(default)]
    pub tls: ServiceTls,
    /// Service object overrides per endpoint class
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<EndpointClass, RoutedOverride>,
    /// Extra volume mounts declared at the service level
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_mounts: Vec<ExtraMount>,
    /// Opaque service-specific configuration overlay
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}
