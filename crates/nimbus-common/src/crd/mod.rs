//! Custom Resource Definitions for the Nimbus control plane
//!
//! Four resources make up the API surface:
//! - [`NimbusControlPlane`] — the single desired-state document declaring
//!   which platform services are enabled and how they are configured
//! - [`NimbusVersion`] — the version record pinning per-component images
//! - [`ManagedService`] — the typed child object reconciled per service
//! - [`AppCredential`] — the auxiliary credential object whose readiness
//!   gates a service's credential secret reference

mod app_credential;
mod control_plane;
mod managed_service;
mod types;
mod version;

pub use app_credential::{AppCredential, AppCredentialSpec, AppCredentialStatus};
pub use control_plane::{
    NimbusControlPlane, NimbusControlPlaneSpec, NimbusControlPlaneStatus, ServiceSection,
    TlsStatus,
};
pub use managed_service::{ManagedService, ManagedServiceSpec, ManagedServiceStatus};
pub use types::{
    AccessRule, ApiOverride, CredentialOverlay, EndpointClass, ExtraMount, MessagingBusConfig,
    RouteOverride, RouteTlsOverride, RoutedOverride, ServiceCredentialOverlay, ServiceTemplate,
    ServiceTls, TlsConfig, TlsFlag, TopologyRef,
};
pub use version::{resolve_container_images, NimbusVersion, NimbusVersionSpec, NimbusVersionStatus, VERSION_INITIALIZED};

/// API group for all Nimbus resources
pub const GROUP: &str = "nimbus.dev";

/// API version for all Nimbus resources
pub const VERSION: &str = "v1alpha1";
