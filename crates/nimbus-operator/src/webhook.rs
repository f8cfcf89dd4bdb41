//! Admission-time validation and defaulting
//!
//! Everything here runs before a write lands in durable state: the
//! singleton and identity invariants (forbidden-class rejections), the
//! dependency and endpoint-override validation (invalid-class rejections
//! collected in bulk), template materialization with inherited defaults,
//! the deprecated messaging-bus field migration, and the unique-name
//! binding that keeps child names stable across naming-mode flips.

use kube::ResourceExt;
use rand::Rng;
use tracing::info;

use nimbus_common::crd::{
    MessagingBusConfig, NimbusControlPlane, NimbusVersion, ServiceTemplate,
};
use nimbus_common::Error;

use crate::dependencies::{validate_service_dependencies, FieldError};
use crate::registry::REGISTRY;
use crate::store::ObjectStore;

/// Default messaging bus cluster name applied during template defaulting
pub const DEFAULT_MESSAGING_BUS: &str = "message-bus";

/// An admission rejection, classified the way the API server reports it
#[derive(Debug)]
pub enum AdmissionError {
    /// The request violates a structural invariant and is never valid
    Forbidden {
        /// Why the request is forbidden
        message: String,
    },
    /// The spec contains invalid fields; all violations are listed
    Invalid {
        /// Name of the rejected object
        name: String,
        /// Every violated constraint
        errors: Vec<FieldError>,
    },
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forbidden { message } => write!(f, "forbidden: {message}"),
            Self::Invalid { name, errors } => {
                write!(f, "{name} is invalid: ")?;
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AdmissionError {}

fn forbidden_from(error: Error) -> AdmissionError {
    AdmissionError::Forbidden {
        message: error.to_string(),
    }
}

/// Validate a control plane at creation time.
///
/// Enforces the one-instance-per-namespace invariant, then collects every
/// field-level violation into a single response. The Ok value carries
/// admission warnings (currently none are produced).
pub async fn validate_create(
    store: &dyn ObjectStore,
    plane: &NimbusControlPlane,
) -> Result<Vec<String>, AdmissionError> {
    info!(plane = %plane.name_any(), "validate create");

    let namespace = plane.namespace().unwrap_or_default();
    let existing = store
        .list_control_planes(&namespace)
        .await
        .map_err(forbidden_from)?;
    if let Some(other) = existing.first() {
        return Err(AdmissionError::Forbidden {
            message: format!(
                "only one NimbusControlPlane instance per namespace is supported; {} already exists",
                other.name_any()
            ),
        });
    }

    let errors = validate_spec(plane);
    if !errors.is_empty() {
        return Err(AdmissionError::Invalid {
            name: plane.name_any(),
            errors,
        });
    }
    Ok(Vec::new())
}

/// Validate a control plane at update time
pub fn validate_update(
    plane: &NimbusControlPlane,
    _old: &NimbusControlPlane,
) -> Result<Vec<String>, AdmissionError> {
    info!(plane = %plane.name_any(), "validate update");

    let errors = validate_spec(plane);
    if !errors.is_empty() {
        return Err(AdmissionError::Invalid {
            name: plane.name_any(),
            errors,
        });
    }
    Ok(Vec::new())
}

/// Validate a version record at creation time.
///
/// One record per namespace, and its identity must match the control
/// plane's once both exist.
pub async fn validate_version_create(
    store: &dyn ObjectStore,
    version: &NimbusVersion,
) -> Result<(), AdmissionError> {
    let namespace = version.namespace().unwrap_or_default();

    let versions = store
        .list_versions(&namespace)
        .await
        .map_err(forbidden_from)?;
    if let Some(other) = versions.first() {
        return Err(AdmissionError::Forbidden {
            message: format!(
                "only one NimbusVersion instance per namespace is supported; {} already exists",
                other.name_any()
            ),
        });
    }

    let planes = store
        .list_control_planes(&namespace)
        .await
        .map_err(forbidden_from)?;
    if let Some(plane) = planes.first() {
        if plane.name_any() != version.name_any() {
            return Err(AdmissionError::Forbidden {
                message: format!(
                    "NimbusVersion {} must match the NimbusControlPlane name {}",
                    version.name_any(),
                    plane.name_any()
                ),
            });
        }
    }
    Ok(())
}

/// All field-level checks, collected without fail-fast
fn validate_spec(plane: &NimbusControlPlane) -> Vec<FieldError> {
    let mut errors = validate_service_dependencies(&plane.spec);
    errors.extend(validate_route_tls(plane));
    errors
}

/// A route override's TLS certificate/key pair must be complete
fn validate_route_tls(plane: &NimbusControlPlane) -> Vec<FieldError> {
    let mut errors = Vec::new();
    for descriptor in REGISTRY {
        let section = plane.spec.section(descriptor.kind.field());
        let Some(tls) = section
            .api_override
            .as_ref()
            .and_then(|o| o.route.as_ref())
            .and_then(|r| r.tls.as_ref())
        else {
            continue;
        };
        let cert_set = tls.certificate.as_deref().is_some_and(|c| !c.is_empty());
        let key_set = tls.key.as_deref().is_some_and(|k| !k.is_empty());
        if cert_set != key_set {
            errors.push(FieldError {
                field: format!("spec.{}.apiOverride.route.tls", descriptor.kind.field()),
                value: if cert_set { "certificate" } else { "key" }.to_string(),
                message: "custom TLS requires both certificate and key to be set".to_string(),
            });
        }
    }
    errors
}

/// Migrate the deprecated scalar messaging-bus field into the structured
/// one. The new field wins; the deprecated field is cleared only once the
/// structured field carries a value. A deprecated field explicitly set to
/// the empty string triggers no migration: the structured field stays
/// absent and the deprecated field is left in place.
pub fn migrate_messaging_bus(
    bus: &mut Option<MessagingBusConfig>,
    deprecated: &mut Option<String>,
) {
    if let Some(instance) = deprecated.as_deref() {
        if !instance.is_empty() {
            let config = bus.get_or_insert_with(Default::default);
            if config.cluster.is_empty() {
                config.cluster = instance.to_string();
            }
            *deprecated = None;
        }
    }
}

/// Template-level messaging-bus defaulting: migrate the deprecated field,
/// then fall back to the built-in default when a structured config exists
/// but names no cluster. A nil structured field with an empty deprecated
/// value stays nil.
pub fn default_messaging_bus(
    bus: &mut Option<MessagingBusConfig>,
    deprecated: &mut Option<String>,
) {
    let cluster_unset = bus.as_ref().map(|b| b.cluster.is_empty()).unwrap_or(true);
    if cluster_unset {
        match deprecated.as_deref() {
            Some(instance) if !instance.is_empty() => {
                bus.get_or_insert_with(Default::default).cluster = instance.to_string();
            }
            _ => {
                if let Some(config) = bus.as_mut() {
                    if config.cluster.is_empty() {
                        config.cluster = DEFAULT_MESSAGING_BUS.to_string();
                    }
                }
            }
        }
    }
    if bus.as_ref().map(|b| !b.cluster.is_empty()).unwrap_or(false) {
        *deprecated = None;
    }
}

/// Materialize templates and defaults across the control plane.
///
/// A service's template comes into existence the first time the service
/// is enabled (or when the user declares one); its credential-engine
/// inputs get their conventional defaults so the engine can run.
pub fn default_control_plane(plane: &mut NimbusControlPlane) {
    migrate_messaging_bus(
        &mut plane.spec.messaging_bus,
        &mut plane.spec.messaging_bus_instance,
    );

    for descriptor in REGISTRY {
        let section = plane.spec.section_mut(descriptor.kind.field());
        if !section.enabled && section.template.is_none() {
            continue;
        }
        let template = section.template.get_or_insert_with(ServiceTemplate::default);
        if template.service_user.is_none() {
            template.service_user = Some(descriptor.base_name.to_string());
        }
        if template.password_selector.is_none() {
            template.password_selector = Some(format!("{}Password", descriptor.kind.label()));
        }
        default_messaging_bus(
            &mut template.messaging_bus,
            &mut template.messaging_bus_instance,
        );
    }
}

/// Random 5-character hexadecimal suffix for unique child names
fn generate_name_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// Bind child names for services that support unique naming.
///
/// A name already bound is never changed. On update, an existing child
/// owned by this plane keeps its name regardless of the current naming
/// mode — flipping `unique_pod_names` must not orphan or duplicate the
/// underlying workload.
pub async fn bind_service_names(
    store: &dyn ObjectStore,
    plane: &mut NimbusControlPlane,
    is_create: bool,
) -> Result<(), Error> {
    let namespace = plane.namespace().unwrap_or_default();
    let plane_uid = plane.metadata.uid.clone().unwrap_or_default();

    let existing = if is_create {
        Vec::new()
    } else {
        store.list_managed_services(&namespace).await?
    };

    for descriptor in REGISTRY {
        if !descriptor.supports_unique_names {
            continue;
        }
        let owned_name = existing
            .iter()
            .find(|child| {
                child.spec.service == descriptor.base_name
                    && child
                        .metadata
                        .owner_references
                        .as_ref()
                        .is_some_and(|refs| refs.iter().any(|r| r.uid == plane_uid))
            })
            .map(|child| child.name_any());

        let section = plane.spec.section_mut(descriptor.kind.field());
        if section.service_name.is_some() {
            continue;
        }
        if let Some(name) = owned_name {
            section.service_name = Some(name);
        } else if section.unique_pod_names {
            let name = format!("{}-{}", descriptor.base_name, generate_name_suffix());
            info!(service = %descriptor.kind, name = %name, "binding unique service name");
            section.service_name = Some(name);
        }
    }
    Ok(())
}
