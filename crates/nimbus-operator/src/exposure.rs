//! Endpoint/TLS exposure sequencer
//!
//! Computes the externally reachable address and certificate binding for
//! each endpoint class of a service — but only once every declared
//! endpoint's network object has materialized. A partial set means
//! upstream object creation is still in flight; computing endpoints
//! against it would publish a transient, incorrect address, so the
//! sequencer reports an explicit "still converging" signal instead and
//! the caller re-enters on the next pass.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;
use tracing::debug;

use nimbus_common::crd::{ApiOverride, EndpointClass, RoutedOverride};
use nimbus_common::{Error, ENDPOINT_ANNOTATION};

use crate::store::{CertificateRequest, ObjectStore};
use crate::Requeue;

/// Computed exposure for one endpoint class
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointDetail {
    /// Endpoint class
    pub class: EndpointClass,
    /// Name of the underlying network object
    pub name: String,
    /// Hostname the endpoint is reachable under
    pub hostname: String,
    /// Full externally reachable URL
    pub endpoint_url: String,
    /// Certificate secret bound to the endpoint, when TLS applies
    pub cert_secret: Option<String>,
}

/// Computed exposure for a whole service
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Endpoints {
    details: BTreeMap<EndpointClass, EndpointDetail>,
}

impl Endpoints {
    /// The detail for one endpoint class
    pub fn detail(&self, class: EndpointClass) -> Option<&EndpointDetail> {
        self.details.get(&class)
    }

    /// Certificate secret bound to one endpoint class
    pub fn cert_secret(&self, class: EndpointClass) -> Option<&str> {
        self.details
            .get(&class)
            .and_then(|d| d.cert_secret.as_deref())
    }

    /// The declared overrides with each endpoint's computed URL written
    /// back, ready to feed into the next reconciliation pass
    pub fn service_overrides(
        &self,
        declared: &BTreeMap<EndpointClass, RoutedOverride>,
    ) -> BTreeMap<EndpointClass, RoutedOverride> {
        let mut overrides = declared.clone();
        for (class, detail) in &self.details {
            overrides.entry(*class).or_default().endpoint_url = Some(detail.endpoint_url.clone());
        }
        overrides
    }
}

/// Result of one sequencer evaluation
#[derive(Clone, Debug, PartialEq)]
pub enum ExposureOutcome {
    /// Underlying network objects or certificates are still materializing;
    /// re-enter on the next pass after the given delay
    Converging(Requeue),
    /// All endpoints computed
    Ready(Endpoints),
}

/// Inputs for one sequencer evaluation
pub struct ExposureInput<'a> {
    /// Namespace of the control plane
    pub namespace: &'a str,
    /// Resolved name of the service's child object
    pub service_name: &'a str,
    /// Declared overrides, one per expected endpoint class
    pub declared: &'a BTreeMap<EndpointClass, RoutedOverride>,
    /// User-declared endpoint override for the public API
    pub api_override: Option<&'a ApiOverride>,
    /// Whether pod-level TLS is enabled for the deployment
    pub pod_tls_enabled: bool,
    /// Whether ingress TLS is enabled for the deployment
    pub ingress_tls_enabled: bool,
    /// Network objects currently materialized, queried by correlation label
    pub materialized: &'a [Service],
}

impl ExposureInput<'_> {
    fn tls_applies(&self, class: EndpointClass) -> bool {
        match class {
            EndpointClass::Public => self.pod_tls_enabled || self.ingress_tls_enabled,
            EndpointClass::Internal => self.pod_tls_enabled,
        }
    }
}

/// Deterministic certificate name for one endpoint of a service
pub fn certificate_name(service_name: &str, class: EndpointClass) -> String {
    format!("{service_name}-{class}-cert")
}

fn endpoint_class_of(service: &Service) -> EndpointClass {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ENDPOINT_ANNOTATION))
        .map(|v| {
            if v == "public" {
                EndpointClass::Public
            } else {
                EndpointClass::Internal
            }
        })
        .unwrap_or(EndpointClass::Internal)
}

/// Compute endpoints and certificate bindings for a service.
///
/// Performs no writes while the materialized set is incomplete. When TLS
/// applies, certificates are ensured under deterministic names so a
/// previously bound certificate reference is never silently rotated; a
/// custom certificate declared on the route override replaces the issued
/// one, which is deleted.
pub async fn ensure_endpoint_config(
    store: &dyn ObjectStore,
    input: ExposureInput<'_>,
) -> Result<ExposureOutcome, Error> {
    if input.materialized.len() != input.declared.len() {
        debug!(
            service = %input.service_name,
            materialized = input.materialized.len(),
            declared = input.declared.len(),
            "network objects still materializing"
        );
        return Ok(ExposureOutcome::Converging(Requeue::after_secs(10)));
    }

    let custom_route_tls = input.api_override.and_then(|o| o.route.as_ref()).and_then(|r| r.tls.as_ref());
    let override_host = input
        .api_override
        .and_then(|o| o.route.as_ref())
        .and_then(|r| r.host.clone());

    let mut endpoints = Endpoints::default();
    for service in input.materialized {
        let class = endpoint_class_of(service);
        let name = service.metadata.name.clone().unwrap_or_default();

        let hostname = match (class, &override_host) {
            (EndpointClass::Public, Some(host)) => host.clone(),
            _ => format!("{}.{}.svc", name, input.namespace),
        };

        let tls_enabled = input.tls_applies(class);
        let mut cert_secret = None;
        if tls_enabled {
            let custom = class == EndpointClass::Public
                && custom_route_tls
                    .map(|tls| tls.secret_name.is_some() || tls.has_cert_pair())
                    .unwrap_or(false);
            if custom {
                // A custom certificate supersedes the issued one. When it
                // lives in a secret, the secret must exist and provide the
                // expected entries before the endpoint binds to it.
                if let Some(secret_name) = custom_route_tls.and_then(|tls| tls.secret_name.clone())
                {
                    for key in ["tls.crt", "tls.key"] {
                        let (value, requeue) =
                            store.secret_field(input.namespace, &secret_name, key).await?;
                        if value.is_none() {
                            debug!(
                                service = %input.service_name,
                                secret = %secret_name,
                                "custom certificate secret not published yet"
                            );
                            return Ok(ExposureOutcome::Converging(requeue));
                        }
                    }
                    cert_secret = Some(secret_name);
                }
                store
                    .delete_certificate(input.namespace, &certificate_name(input.service_name, class))
                    .await?;
            } else {
                let request = CertificateRequest {
                    name: certificate_name(input.service_name, class),
                    namespace: input.namespace.to_string(),
                    issuer: match class {
                        EndpointClass::Public => "nimbus-public-issuer".to_string(),
                        EndpointClass::Internal => "nimbus-internal-issuer".to_string(),
                    },
                    hostnames: vec![hostname.clone()],
                    labels: nimbus_common::service_selector_labels(input.service_name),
                };
                let (secret, requeue) = store.ensure_certificate(request).await?;
                match secret {
                    Some(secret) => cert_secret = Some(secret),
                    None => return Ok(ExposureOutcome::Converging(requeue)),
                }
            }
        }

        let proto = if tls_enabled { "https" } else { "http" };
        endpoints.details.insert(
            class,
            EndpointDetail {
                class,
                name,
                endpoint_url: format!("{proto}://{hostname}"),
                hostname,
                cert_secret,
            },
        );
    }

    Ok(ExposureOutcome::Ready(endpoints))
}
