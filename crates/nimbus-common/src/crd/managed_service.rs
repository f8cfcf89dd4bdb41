//! ManagedService Custom Resource Definition
//!
//! The typed child object the reconcile skeleton upserts, one per enabled
//! platform service. Its spec is the resolved service template plus the
//! image pins from the version record; its status is reported by the
//! service's own operator and only read here.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Conditions, READY};

use super::types::{
    EndpointClass, ExtraMount, MessagingBusConfig, RoutedOverride, ServiceTls, TopologyRef,
};

/// Specification of one managed platform service
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nimbus.dev",
    version = "v1alpha1",
    kind = "ManagedService",
    plural = "managedservices",
    shortname = "msvc",
    status = "ManagedServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.service"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceSpec {
    /// Registry name of the platform service this child implements
    pub service: String,

    /// Container images per component, pinned from the version record
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, String>,

    /// Replica count for the service's API pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Secret holding the service's passwords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Shared database instance the service uses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_instance: Option<String>,

    /// Secret produced by the service's application credential; set only
    /// once the credential is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_secret: Option<String>,

    /// Node placement constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Topology constraint reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_ref: Option<TopologyRef>,

    /// Messaging bus configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_bus: Option<MessagingBusConfig>,

    /// TLS configuration for the service endpoints
    #[serde(default)]
    pub tls: ServiceTls,

    /// Service object overrides per endpoint class
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<EndpointClass, RoutedOverride>,

    /// Extra volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_mounts: Vec<ExtraMount>,

    /// Opaque service-specific configuration overlay
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// Status reported by the service's own operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceStatus {
    /// The generation last processed by the owning operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions reported by the owning operator
    #[serde(default)]
    pub conditions: Conditions,
}

impl ManagedService {
    /// Whether the service's own readiness signal is true
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.conditions.is_true(READY))
            .unwrap_or(false)
    }

    /// Whether the owning operator has observed the current generation
    /// and reports the service ready
    pub fn is_current_and_ready(&self) -> bool {
        let observed = self
            .status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .unwrap_or(-1);
        observed == self.metadata.generation.unwrap_or(0) && self.is_ready()
    }
}
