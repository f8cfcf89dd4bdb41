//! Per-service descriptor registry
//!
//! All fifteen platform services run through the same reconcile skeleton;
//! what differs between them lives here: the child object's base name,
//! the components whose images are pinned, which endpoint classes are
//! exposed, whether unique child names are supported, and the dependency
//! rules enforced at admission time.

use nimbus_common::crd::EndpointClass;

/// The platform services managed by the control plane
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceKind {
    Database,
    Cache,
    MessageBus,
    Identity,
    ImageRegistry,
    BlockStorage,
    Placement,
    Network,
    Compute,
    Orchestration,
    ObjectStorage,
    Dashboard,
    KeyManager,
    LoadBalancer,
    Telemetry,
}

impl ServiceKind {
    /// Spec field name of the service's section (camelCase, matching the
    /// serialized CRD)
    pub fn field(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Cache => "cache",
            Self::MessageBus => "messageBus",
            Self::Identity => "identity",
            Self::ImageRegistry => "imageRegistry",
            Self::BlockStorage => "blockStorage",
            Self::Placement => "placement",
            Self::Network => "network",
            Self::Compute => "compute",
            Self::Orchestration => "orchestration",
            Self::ObjectStorage => "objectStorage",
            Self::Dashboard => "dashboard",
            Self::KeyManager => "keyManager",
            Self::LoadBalancer => "loadBalancer",
            Self::Telemetry => "telemetry",
        }
    }

    /// Label used in condition types and user-facing messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Database => "Database",
            Self::Cache => "Cache",
            Self::MessageBus => "MessageBus",
            Self::Identity => "Identity",
            Self::ImageRegistry => "ImageRegistry",
            Self::BlockStorage => "BlockStorage",
            Self::Placement => "Placement",
            Self::Network => "Network",
            Self::Compute => "Compute",
            Self::Orchestration => "Orchestration",
            Self::ObjectStorage => "ObjectStorage",
            Self::Dashboard => "Dashboard",
            Self::KeyManager => "KeyManager",
            Self::LoadBalancer => "LoadBalancer",
            Self::Telemetry => "Telemetry",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Static description of how one service is reconciled
pub struct ServiceDescriptor {
    /// Which service this is
    pub kind: ServiceKind,
    /// Base name of the child object (and the correlation label value)
    pub base_name: &'static str,
    /// Component keys whose images are pinned from the version record
    pub image_keys: &'static [&'static str],
    /// Endpoint classes the service exposes
    pub endpoint_classes: &'static [EndpointClass],
    /// Whether the child name may carry a unique per-plane suffix
    pub supports_unique_names: bool,
    /// Whether the child gets the shared database instance default
    pub needs_database: bool,
    /// Services that must be enabled for this one to be enabled
    pub requires: &'static [ServiceKind],
}

impl ServiceDescriptor {
    /// Condition type tracking the service's readiness on the plane
    pub fn ready_condition(&self) -> String {
        format!("{}Ready", self.kind.label())
    }

    /// Condition type tracking the service's endpoint exposure
    pub fn expose_condition(&self) -> String {
        format!("{}ExposeReady", self.kind.label())
    }
}

use EndpointClass::{Internal, Public};
use ServiceKind::*;

/// The full service registry, in reconcile order: infrastructure services
/// first so their dependents find them on the first converged pass.
pub static REGISTRY: &[ServiceDescriptor] = &[
    ServiceDescriptor {
        kind: Database,
        base_name: "database",
        image_keys: &["database"],
        endpoint_classes: &[],
        supports_unique_names: false,
        needs_database: false,
        requires: &[],
    },
    ServiceDescriptor {
        kind: Cache,
        base_name: "cache",
        image_keys: &["cache"],
        endpoint_classes: &[],
        supports_unique_names: false,
        needs_database: false,
        requires: &[],
    },
    ServiceDescriptor {
        kind: MessageBus,
        base_name: "message-bus",
        image_keys: &["message-bus"],
        endpoint_classes: &[],
        supports_unique_names: false,
        needs_database: false,
        requires: &[],
    },
    ServiceDescriptor {
        kind: Identity,
        base_name: "identity",
        image_keys: &["identity-api"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: false,
        needs_database: true,
        requires: &[Database, Cache, MessageBus],
    },
    ServiceDescriptor {
        kind: ImageRegistry,
        base_name: "image-registry",
        image_keys: &["image-registry-api"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: true,
        needs_database: true,
        requires: &[Database, Cache, Identity],
    },
    ServiceDescriptor {
        kind: BlockStorage,
        base_name: "block-storage",
        image_keys: &["block-storage-api", "block-storage-scheduler", "block-storage-volume"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: true,
        needs_database: true,
        requires: &[Database, Cache, MessageBus, Identity],
    },
    ServiceDescriptor {
        kind: Placement,
        base_name: "placement",
        image_keys: &["placement-api"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: false,
        needs_database: true,
        requires: &[Database, Cache, Identity],
    },
    ServiceDescriptor {
        kind: Network,
        base_name: "network",
        image_keys: &["network-api"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: false,
        needs_database: true,
        requires: &[Database, Cache, MessageBus, Identity],
    },
    ServiceDescriptor {
        kind: Compute,
        base_name: "compute",
        image_keys: &["compute-api", "compute-scheduler", "compute-conductor"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: false,
        needs_database: true,
        requires: &[Database, Cache, MessageBus, Identity, Placement, Network, ImageRegistry],
    },
    ServiceDescriptor {
        kind: Orchestration,
        base_name: "orchestration",
        image_keys: &["orchestration-api", "orchestration-engine"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: false,
        needs_database: true,
        requires: &[Database, Cache, MessageBus, Identity],
    },
    ServiceDescriptor {
        kind: ObjectStorage,
        base_name: "object-storage",
        image_keys: &["object-storage-proxy", "object-storage-server"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: false,
        needs_database: false,
        requires: &[Cache, Identity],
    },
    ServiceDescriptor {
        kind: Dashboard,
        base_name: "dashboard",
        image_keys: &["dashboard"],
        endpoint_classes: &[Public],
        supports_unique_names: false,
        needs_database: true,
        requires: &[Database, Cache, Identity],
    },
    ServiceDescriptor {
        kind: KeyManager,
        base_name: "key-manager",
        image_keys: &["key-manager-api", "key-manager-worker"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: false,
        needs_database: true,
        requires: &[Database, Identity],
    },
    ServiceDescriptor {
        kind: LoadBalancer,
        base_name: "load-balancer",
        image_keys: &["load-balancer-api", "load-balancer-worker"],
        endpoint_classes: &[Public, Internal],
        supports_unique_names: false,
        needs_database: true,
        requires: &[Database, Cache, MessageBus, Identity, Network, ImageRegistry, Compute],
    },
    ServiceDescriptor {
        kind: Telemetry,
        base_name: "telemetry",
        image_keys: &["telemetry-central", "telemetry-notification"],
        endpoint_classes: &[Internal],
        supports_unique_names: false,
        needs_database: false,
        requires: &[],
    },
];

/// Dependency rules gated on a feature sub-flag of a service template
/// rather than the service's own enabled flag.
pub struct FeatureRule {
    /// Service the feature belongs to
    pub kind: ServiceKind,
    /// Template field carrying the flag (camelCase, matching the CRD)
    pub feature: &'static str,
    /// Services that must be enabled for the feature
    pub requires: &'static [ServiceKind],
}

/// Feature-level dependency rules
pub static FEATURE_RULES: &[FeatureRule] = &[
    FeatureRule {
        kind: Telemetry,
        feature: "metricsEnabled",
        requires: &[MessageBus, Identity],
    },
    FeatureRule {
        kind: Telemetry,
        feature: "autoscalingEnabled",
        requires: &[Database, Orchestration, MessageBus, Identity],
    },
];

/// Look up the descriptor for a service
pub fn descriptor(kind: ServiceKind) -> &'static ServiceDescriptor {
    REGISTRY
        .iter()
        .find(|d| d.kind == kind)
        .expect("every ServiceKind has a registry entry")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_kind_once() {
        assert_eq!(REGISTRY.len(), 15);
        for descriptor in REGISTRY {
            assert_eq!(
                REGISTRY.iter().filter(|d| d.kind == descriptor.kind).count(),
                1,
                "{} appears more than once",
                descriptor.kind
            );
        }
    }

    #[test]
    fn test_dependencies_precede_their_dependents() {
        // The registry is reconciled in order; a required service must
        // come before the service that requires it.
        for (index, descriptor) in REGISTRY.iter().enumerate() {
            for required in descriptor.requires {
                let required_index = REGISTRY.iter().position(|d| d.kind == *required).unwrap();
                assert!(
                    required_index < index,
                    "{} is required by {} but listed after it",
                    required,
                    descriptor.kind
                );
            }
        }
    }

    #[test]
    fn test_condition_types_are_distinct_per_service() {
        let identity = descriptor(ServiceKind::Identity);
        assert_eq!(identity.ready_condition(), "IdentityReady");
        assert_eq!(identity.expose_condition(), "IdentityExposeReady");
        let compute = descriptor(ServiceKind::Compute);
        assert_ne!(identity.ready_condition(), compute.ready_condition());
    }

    #[test]
    fn test_unique_names_limited_to_supported_services() {
        let supported: Vec<_> = REGISTRY
            .iter()
            .filter(|d| d.supports_unique_names)
            .map(|d| d.kind)
            .collect();
        assert_eq!(supported, vec![ServiceKind::ImageRegistry, ServiceKind::BlockStorage]);
    }
}
