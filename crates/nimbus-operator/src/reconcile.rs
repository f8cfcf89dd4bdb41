//! Generic per-service reconcile skeleton
//!
//! Every platform service runs through this single control loop,
//! parameterized by its [`ServiceDescriptor`]:
//!
//! 1. disabled → delete the child (absence is fine), drop cached images
//!    and conditions, done
//! 2. materialize the effective template: inherited fields are resolved
//!    fresh every pass and never overwrite an explicit service-level value
//! 3. resolve the canonical child name (a bound name never changes)
//! 4. run the credential engine; a retry hint aborts the pass before the
//!    upsert so the child never sees a stale secret reference
//! 5. tag endpoints with the correlation label and run the exposure
//!    sequencer; "still converging" aborts the pass the same way
//! 6. upsert the child with image pins, required defaults, global extra
//!    mounts and ownership linkage in one write
//! 7. interpret readiness: observed generation must match and the child's
//!    own Ready signal must be true; otherwise mirror the child's
//!    highest-priority condition (or synthesize a running placeholder)

use kube::ResourceExt;
use tracing::{debug, info};

use nimbus_common::conditions::{reason, Condition, ConditionSeverity};
use nimbus_common::crd::{
    ManagedService, ManagedServiceSpec, NimbusControlPlane, NimbusControlPlaneStatus,
    NimbusVersion, ServiceSection, ServiceTemplate,
};
use nimbus_common::{service_selector_labels, Error};

use crate::credentials::{self, CredentialInput};
use crate::exposure::{self, certificate_name, ExposureInput, ExposureOutcome};
use crate::registry::ServiceDescriptor;
use crate::rollout;
use crate::store::{owner_reference, ObjectStore, OpResult};
use crate::Requeue;

/// Shared database instance name applied when a service needs one and the
/// template does not name it
pub const DEFAULT_DATABASE_INSTANCE: &str = "nimbus";

/// Canonical child name for a service: the name bound at admission time
/// wins; otherwise the descriptor's base name.
pub fn resolved_service_name(section: &ServiceSection, descriptor: &ServiceDescriptor) -> String {
    section
        .service_name
        .clone()
        .unwrap_or_else(|| descriptor.base_name.to_string())
}

fn status_mut(plane: &mut NimbusControlPlane) -> &mut NimbusControlPlaneStatus {
    plane.status.get_or_insert_with(Default::default)
}

/// Run one reconcile pass for one service.
///
/// Mutates only the plane's status (conditions and cached images); the
/// effective template is computed per pass and persisted nowhere but the
/// child object, so upstream configuration changes cascade on the next
/// pass without overwriting explicit service-level values.
pub async fn reconcile_service(
    store: &dyn ObjectStore,
    plane: &mut NimbusControlPlane,
    version: &NimbusVersion,
    descriptor: &'static ServiceDescriptor,
) -> Result<Requeue, Error> {
    let namespace = plane.namespace().unwrap_or_default();
    let section = plane.spec.section(descriptor.kind.field()).clone();
    let name = resolved_service_name(&section, descriptor);

    if !section.enabled {
        store.delete_managed_service(&namespace, &name).await?;
        store
            .delete_app_credential(&namespace, &nimbus_common::crd::AppCredential::name_for(&name))
            .await?;
        for class in descriptor.endpoint_classes {
            store
                .delete_certificate(&namespace, &certificate_name(&name, *class))
                .await?;
        }
        let status = status_mut(plane);
        for key in descriptor.image_keys {
            status.container_images.remove(*key);
        }
        status.conditions.remove(&descriptor.ready_condition());
        status.conditions.remove(&descriptor.expose_condition());
        return Ok(Requeue::No);
    }

    // Effective template: inherited fields resolved fresh, service-level
    // values take precedence.
    let mut template = section.template.clone().unwrap_or_default();
    if template.node_selector.is_none() {
        template.node_selector = plane.spec.node_selector.clone();
    }
    if template.topology_ref.is_none() {
        template.topology_ref = plane.spec.topology_ref.clone();
    }
    if template.messaging_bus.is_none() {
        template.messaging_bus = plane.spec.messaging_bus.clone();
    }
    template.tls.ca_bundle_secret_name = plane
        .status
        .as_ref()
        .and_then(|s| s.tls.ca_bundle_secret_name.clone());

    let existing = store.get_managed_service(&namespace, &name).await?;

    // Preserve certificate bindings already on the child so they are only
    // changed through the exposure computation below.
    if plane.spec.tls.pod_level.enabled {
        if let Some(child) = &existing {
            template.tls.endpoint_secrets = child.spec.tls.endpoint_secrets.clone();
        }
    }

    let service_ready = existing
        .as_ref()
        .map(|c| c.is_current_and_ready())
        .unwrap_or(false);

    // Application credential: evaluated when enabled or when the child
    // already carries a reference (so disabling cleans it up).
    let existing_credential_ref = existing
        .as_ref()
        .and_then(|c| c.spec.credential_secret.clone());
    let credential_enabled =
        credentials::effective_enabled(&plane.spec.credential, section.credential.as_ref());
    let mut credential_secret = existing_credential_ref.clone();
    if credential_enabled || existing_credential_ref.is_some() {
        let secret = template
            .secret
            .clone()
            .unwrap_or_else(|| plane.spec.secret.clone());
        let (issued, requeue) = credentials::ensure_app_credential(
            store,
            CredentialInput {
                namespace: &namespace,
                service_name: &name,
                service_ready,
                secret: &secret,
                password_selector: template.password_selector.as_deref().unwrap_or_default(),
                service_user: template.service_user.as_deref().unwrap_or_default(),
                global: &plane.spec.credential,
                overlay: section.credential.as_ref(),
                owner: owner_reference(plane),
            },
        )
        .await?;
        if requeue.is_requested() {
            return Ok(requeue);
        }
        credential_secret = issued;
    }

    // Endpoint exposure: correlate, then sequence once any network object
    // exists. Before the first object materializes the pass proceeds to
    // the upsert, otherwise the child could never come into existence.
    let mut declared = template.overrides.clone();
    for class in descriptor.endpoint_classes {
        let entry = declared.entry(*class).or_default();
        for (key, value) in service_selector_labels(&name) {
            entry.add_label(key, value);
        }
    }
    if !descriptor.endpoint_classes.is_empty() {
        let materialized = store
            .list_endpoints_with_label(&namespace, &service_selector_labels(&name))
            .await?;
        if !materialized.is_empty() {
            let outcome = exposure::ensure_endpoint_config(
                store,
                ExposureInput {
                    namespace: &namespace,
                    service_name: &name,
                    declared: &declared,
                    api_override: section.api_override.as_ref(),
                    pod_tls_enabled: plane.spec.tls.pod_level.enabled,
                    ingress_tls_enabled: plane.spec.tls.ingress.enabled,
                    materialized: &materialized,
                },
            )
            .await?;
            match outcome {
                ExposureOutcome::Converging(requeue) => {
                    debug!(service = %name, "exposure still converging");
                    return Ok(requeue);
                }
                ExposureOutcome::Ready(endpoints) => {
                    declared = endpoints.service_overrides(&declared);
                    for class in descriptor.endpoint_classes {
                        if let Some(secret) = endpoints.cert_secret(*class) {
                            template
                                .tls
                                .endpoint_secrets
                                .insert(*class, secret.to_string());
                        }
                    }
                    status_mut(plane).conditions.mark_true(
                        descriptor.expose_condition(),
                        format!("{} endpoints exposed", descriptor.kind),
                    );
                }
            }
        }
    }
    template.overrides = declared;

    info!(service = %name, namespace = %namespace, "reconciling managed service");
    let desired = build_child(descriptor, &namespace, &name, &template, credential_secret, version, plane)?;
    match store.upsert_managed_service(desired).await {
        Err(e) => {
            status_mut(plane).conditions.set(Condition::false_(
                descriptor.ready_condition(),
                reason::ERROR,
                ConditionSeverity::Warning,
                format!("{} reconcile error: {e}", descriptor.kind),
            ));
            return Err(e);
        }
        Ok(op) => {
            if op != OpResult::Unchanged {
                info!(service = %name, operation = %op, "managed service reconciled");
            }
        }
    }

    // Readiness interpretation against the state observed at the start of
    // the pass; the next pass sees the effect of the write above.
    if service_ready {
        let status = status_mut(plane);
        for key in descriptor.image_keys {
            if let Some(image) = version.image(key) {
                status
                    .container_images
                    .insert((*key).to_string(), image.to_string());
            }
        }
        status.conditions.mark_true(
            descriptor.ready_condition(),
            format!("{} ready", descriptor.kind),
        );
    } else {
        let mirrored = existing
            .as_ref()
            .and_then(|c| c.status.as_ref())
            .filter(|s| !s.conditions.is_empty())
            .and_then(|s| s.conditions.mirror(descriptor.ready_condition()));
        let condition = mirrored
            .unwrap_or_else(|| rollout::running_placeholder(descriptor.ready_condition(), descriptor.kind.label()));
        status_mut(plane).conditions.set(condition);
    }

    Ok(Requeue::No)
}

/// Assemble the desired child object for one service
fn build_child(
    descriptor: &ServiceDescriptor,
    namespace: &str,
    name: &str,
    template: &ServiceTemplate,
    credential_secret: Option<String>,
    version: &NimbusVersion,
    plane: &NimbusControlPlane,
) -> Result<ManagedService, Error> {
    let mut images = std::collections::BTreeMap::new();
    for key in descriptor.image_keys {
        let image = version.image(key).ok_or_else(|| {
            Error::internal_with_context(
                "reconciler",
                format!(
                    "version {} resolves no image for component {key}",
                    version.name_any()
                ),
            )
        })?;
        images.insert((*key).to_string(), image.to_string());
    }

    // Globally declared extra mounts are appended after the service's own.
    let mut extra_mounts = template.extra_mounts.clone();
    extra_mounts.extend(plane.spec.extra_mounts.iter().cloned());

    let mut child = ManagedService::new(
        name,
        ManagedServiceSpec {
            service: descriptor.base_name.to_string(),
            images,
            replicas: template.replicas,
            secret: Some(
                template
                    .secret
                    .clone()
                    .unwrap_or_else(|| plane.spec.secret.clone()),
            ),
            database_instance: descriptor.needs_database.then(|| {
                template
                    .database_instance
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DATABASE_INSTANCE.to_string())
            }),
            credential_secret,
            node_selector: template.node_selector.clone(),
            topology_ref: template.topology_ref.clone(),
            messaging_bus: template.messaging_bus.clone(),
            tls: template.tls.clone(),
            overrides: template.overrides.clone(),
            extra_mounts,
            config: template.config.clone(),
        },
    );
    child.metadata.namespace = Some(namespace.to_string());
    child.metadata.labels = Some(service_selector_labels(name));
    child.metadata.owner_references = Some(vec![owner_reference(plane)]);
    Ok(child)
}
