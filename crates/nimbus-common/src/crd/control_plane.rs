//! NimbusControlPlane Custom Resource Definition
//!
//! The control plane is the single desired-state document for a
//! deployment: one section per platform service plus the top-level
//! values those sections inherit. Only one instance may exist per
//! namespace; admission enforces this.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Conditions;

use super::types::{
    ApiOverride, CredentialOverlay, ExtraMount, MessagingBusConfig, ServiceCredentialOverlay,
    ServiceTemplate, TlsConfig, TopologyRef,
};

/// One service's entry in the desired-state document
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSection {
    /// Whether the service is deployed
    #[serde(default)]
    pub enabled: bool,

    /// Service configuration template; materialized with defaults the
    /// first time the service is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ServiceTemplate>,

    /// Per-service application credential overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<ServiceCredentialOverlay>,

    /// Endpoint override for the service's public API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_override: Option<ApiOverride>,

    /// Whether the child object gets a unique per-plane name suffix
    #[serde(default)]
    pub unique_pod_names: bool,

    /// Resolved child object name, bound at admission time. Once bound
    /// to an owned child it never changes, even when `unique_pod_names`
    /// flips, so the underlying workload is never orphaned or duplicated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

/// Specification of the desired deployment state
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nimbus.dev",
    version = "v1alpha1",
    kind = "NimbusControlPlane",
    plural = "nimbuscontrolplanes",
    shortname = "ncp",
    status = "NimbusControlPlaneStatus",
    namespaced,
    printcolumn = r#"{"name":"Deployed","type":"string","jsonPath":".status.deployedVersion"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NimbusControlPlaneSpec {
    /// Secret holding the deployment-wide passwords, inherited by every
    /// service whose template leaves `secret` unset
    #[serde(default)]
    pub secret: String,

    /// Default storage class for services that persist data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Default node placement constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Default topology constraint reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_ref: Option<TopologyRef>,

    /// Default messaging bus configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_bus: Option<MessagingBusConfig>,

    /// Deprecated scalar form of the messaging bus name; migrated into
    /// `messaging_bus` during defaulting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_bus_instance: Option<String>,

    /// Deployment-level TLS switches
    #[serde(default)]
    pub tls: TlsConfig,

    /// Extra volume mounts appended to every service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_mounts: Vec<ExtraMount>,

    /// Deployment-wide application credential defaults
    #[serde(default)]
    pub credential: CredentialOverlay,

    /// Shared SQL database service
    #[serde(default)]
    pub database: ServiceSection,
    /// Shared in-memory cache service
    #[serde(default)]
    pub cache: ServiceSection,
    /// Messaging bus service
    #[serde(default)]
    pub message_bus: ServiceSection,
    /// Identity and authentication service
    #[serde(default)]
    pub identity: ServiceSection,
    /// Machine image registry service
    #[serde(default)]
    pub image_registry: ServiceSection,
    /// Block storage service
    #[serde(default)]
    pub block_storage: ServiceSection,
    /// Resource placement service
    #[serde(default)]
    pub placement: ServiceSection,
    /// Software-defined networking service
    #[serde(default)]
    pub network: ServiceSection,
    /// Compute orchestration service
    #[serde(default)]
    pub compute: ServiceSection,
    /// Workload orchestration (stack) service
    #[serde(default)]
    pub orchestration: ServiceSection,
    /// Object storage service
    #[serde(default)]
    pub object_storage: ServiceSection,
    /// Web dashboard service
    #[serde(default)]
    pub dashboard: ServiceSection,
    /// Key management service
    #[serde(default)]
    pub key_manager: ServiceSection,
    /// Load balancer service
    #[serde(default)]
    pub load_balancer: ServiceSection,
    /// Telemetry service (metrics/autoscaling sub-features)
    #[serde(default)]
    pub telemetry: ServiceSection,
}

/// TLS state computed during reconciliation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsStatus {
    /// Secret holding the deployment CA bundle services trust
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle_secret_name: Option<String>,
}

/// Status of the control plane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NimbusControlPlaneStatus {
    /// The generation last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Rolled-up conditions, one per service plus the top-level Ready
    #[serde(default)]
    pub conditions: Conditions,

    /// Container images currently running, keyed by component, cached
    /// from ready services and compared against the version record
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub container_images: BTreeMap<String, String>,

    /// Version the deployment has fully converged to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_version: Option<String>,

    /// TLS state computed during reconciliation
    #[serde(default)]
    pub tls: TlsStatus,
}

impl NimbusControlPlaneSpec {
    /// Access the section for a service by its registry field name.
    ///
    /// Field names match the serialized (camelCase) spec fields; see the
    /// operator's service registry for the authoritative list.
    pub fn section(&self, field: &str) -> &ServiceSection {
        match field {
            "database" => &self.database,
            "cache" => &self.cache,
            "messageBus" => &self.message_bus,
            "identity" => &self.identity,
            "imageRegistry" => &self.image_registry,
            "blockStorage" => &self.block_storage,
            "placement" => &self.placement,
            "network" => &self.network,
            "compute" => &self.compute,
            "orchestration" => &self.orchestration,
            "objectStorage" => &self.object_storage,
            "dashboard" => &self.dashboard,
            "keyManager" => &self.key_manager,
            "loadBalancer" => &self.load_balancer,
            "telemetry" => &self.telemetry,
            other => panic!("unknown service section: {other}"),
        }
    }

    /// Mutable access to the section for a service
    pub fn section_mut(&mut self, field: &str) -> &mut ServiceSection {
        match field {
            "database" => &mut self.database,
            "cache" => &mut self.cache,
            "messageBus" => &mut self.message_bus,
            "identity" => &mut self.identity,
            "imageRegistry" => &mut self.image_registry,
            "blockStorage" => &mut self.block_storage,
            "placement" => &mut self.placement,
            "network" => &mut self.network,
            "compute" => &mut self.compute,
            "orchestration" => &mut self.orchestration,
            "objectStorage" => &mut self.object_storage,
            "dashboard" => &mut self.dashboard,
            "keyManager" => &mut self.key_manager,
            "loadBalancer" => &mut self.load_balancer,
            "telemetry" => &mut self.telemetry,
            other => panic!("unknown service section: {other}"),
        }
    }
}
