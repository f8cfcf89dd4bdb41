//! Object store abstraction
//!
//! All reads and writes the engines perform go through the [`ObjectStore`]
//! trait so reconciliation logic can be tested against a mock while the
//! real implementation wraps the Kubernetes API. The upsert methods are
//! the "create-or-patch" primitive: idempotent, merge-style (never a blind
//! overwrite), and carrying ownership linkage in the same write that
//! introduces spec changes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use nimbus_common::crd::{AppCredential, ManagedService, NimbusControlPlane, NimbusVersion};
use nimbus_common::Error;

use crate::Requeue;

/// Field manager used for all writes performed by this operator
pub const FIELD_MANAGER: &str = "nimbus-control-plane";

/// What an upsert did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpResult {
    /// The object already matched the desired state
    Unchanged,
    /// The object was created
    Created,
    /// The object was patched
    Updated,
}

impl std::fmt::Display for OpResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

/// Request for a certificate bound to a service endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Certificate (and issued secret) name
    pub name: String,
    /// Namespace the certificate lives in
    pub namespace: String,
    /// Issuer the certificate is requested from
    pub issuer: String,
    /// Hostnames the certificate covers
    pub hostnames: Vec<String>,
    /// Labels set on the certificate object
    pub labels: BTreeMap<String, String>,
}

/// Typed access to every external object the engines touch
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a managed service child by name
    async fn get_managed_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedService>, Error>;

    /// List all managed service children in a namespace
    async fn list_managed_services(&self, namespace: &str) -> Result<Vec<ManagedService>, Error>;

    /// Create or merge-patch a managed service child
    async fn upsert_managed_service(&self, desired: ManagedService) -> Result<OpResult, Error>;

    /// Delete a managed service child; absence is not an error
    async fn delete_managed_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get an application credential by name
    async fn get_app_credential(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AppCredential>, Error>;

    /// Create or merge-patch an application credential
    async fn upsert_app_credential(&self, desired: AppCredential) -> Result<OpResult, Error>;

    /// Delete an application credential; absence is not an error
    async fn delete_app_credential(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// List the network endpoint objects matching a label selector
    async fn list_endpoints_with_label(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>, Error>;

    /// Ensure a certificate exists for an endpoint. Returns the issued
    /// secret name once ready, or a retry hint while issuance is pending.
    async fn ensure_certificate(
        &self,
        request: CertificateRequest,
    ) -> Result<(Option<String>, Requeue), Error>;

    /// Delete a certificate; absence is not an error
    async fn delete_certificate(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Read one field from a secret. Returns a retry hint while the
    /// secret has not been published yet.
    async fn secret_field(
        &self,
        namespace: &str,
        secret: &str,
        key: &str,
    ) -> Result<(Option<String>, Requeue), Error>;

    /// List the control planes in a namespace
    async fn list_control_planes(&self, namespace: &str)
        -> Result<Vec<NimbusControlPlane>, Error>;

    /// Patch the status of a control plane
    async fn update_control_plane_status(&self, plane: &NimbusControlPlane) -> Result<(), Error>;

    /// Get a version record by name
    async fn get_version(&self, namespace: &str, name: &str)
        -> Result<Option<NimbusVersion>, Error>;

    /// List the version records in a namespace
    async fn list_versions(&self, namespace: &str) -> Result<Vec<NimbusVersion>, Error>;

    /// Create or merge-patch a version record
    async fn upsert_version(&self, desired: NimbusVersion) -> Result<OpResult, Error>;

    /// Patch the status of a version record
    async fn update_version_status(&self, version: &NimbusVersion) -> Result<(), Error>;
}

/// Controller owner reference for objects owned by a control plane
pub fn owner_reference(plane: &NimbusControlPlane) -> OwnerReference {
    plane
        .controller_owner_ref(&())
        .expect("control plane carries name and uid")
}

/// Real implementation over the Kubernetes API
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Wrap a Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn certificate_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind {
            group: "cert-manager.io".to_string(),
            version: "v1".to_string(),
            kind: "Certificate".to_string(),
        })
    }
}

/// Swallow 404s on delete: the object already being gone is convergence
fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), Error> {
    match result {
        Ok(()) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get_managed_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedService>, Error> {
        let api: Api<ManagedService> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_managed_services(&self, namespace: &str) -> Result<Vec<ManagedService>, Error> {
        let api: Api<ManagedService> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn upsert_managed_service(&self, desired: ManagedService) -> Result<OpResult, Error> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();
        let api: Api<ManagedService> = Api::namespaced(self.client.clone(), &namespace);

        match api.get_opt(&name).await? {
            None => {
                api.create(&PostParams::default(), &desired).await?;
                Ok(OpResult::Created)
            }
            Some(current) => {
                if current.spec == desired.spec
                    && current.metadata.owner_references == desired.metadata.owner_references
                    && current.metadata.labels == desired.metadata.labels
                {
                    return Ok(OpResult::Unchanged);
                }
                let patch = json!({
                    "metadata": {
                        "labels": desired.metadata.labels,
                        "ownerReferences": desired.metadata.owner_references,
                    },
                    "spec": desired.spec,
                });
                api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                    .await?;
                Ok(OpResult::Updated)
            }
        }
    }

    async fn delete_managed_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<ManagedService> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn get_app_credential(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AppCredential>, Error> {
        let api: Api<AppCredential> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn upsert_app_credential(&self, desired: AppCredential) -> Result<OpResult, Error> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();
        let api: Api<AppCredential> = Api::namespaced(self.client.clone(), &namespace);

        match api.get_opt(&name).await? {
            None => {
                api.create(&PostParams::default(), &desired).await?;
                Ok(OpResult::Created)
            }
            Some(current) => {
                if current.spec == desired.spec
                    && current.metadata.owner_references == desired.metadata.owner_references
                {
                    return Ok(OpResult::Unchanged);
                }
                let patch = json!({
                    "metadata": { "ownerReferences": desired.metadata.owner_references },
                    "spec": desired.spec,
                });
                api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                    .await?;
                Ok(OpResult::Updated)
            }
        }
    }

    async fn delete_app_credential(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<AppCredential> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn list_endpoints_with_label(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let selector = labels
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join(",");
        let params = ListParams::default().labels(&selector);
        Ok(api.list(&params).await?.items)
    }

    async fn ensure_certificate(
        &self,
        request: CertificateRequest,
    ) -> Result<(Option<String>, Requeue), Error> {
        let ar = Self::certificate_resource();
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &request.namespace, &ar);

        let desired = json!({
            "apiVersion": "cert-manager.io/v1",
            "kind": "Certificate",
            "metadata": {
                "name": request.name,
                "namespace": request.namespace,
                "labels": request.labels,
            },
            "spec": {
                "secretName": request.name,
                "issuerRef": { "name": request.issuer },
                "dnsNames": request.hostnames,
            }
        });
        let patched = api
            .patch(
                &request.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&desired),
            )
            .await?;

        // issued once the certificate reports Ready; until then poll
        let ready = patched
            .data
            .pointer("/status/conditions")
            .and_then(|c| c.as_array())
            .map(|conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(|t| t.as_str()) == Some("Ready")
                        && c.get("status").and_then(|s| s.as_str()) == Some("True")
                })
            })
            .unwrap_or(false);

        if ready {
            Ok((Some(request.name), Requeue::No))
        } else {
            debug!(certificate = %request.name, "certificate not issued yet");
            Ok((None, Requeue::after_secs(5)))
        }
    }

    async fn delete_certificate(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let ar = Self::certificate_resource();
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn secret_field(
        &self,
        namespace: &str,
        secret: &str,
        key: &str,
    ) -> Result<(Option<String>, Requeue), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(object) = api.get_opt(secret).await? else {
            return Ok((None, Requeue::after_secs(10)));
        };
        let value = object
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).to_string());
        match value {
            Some(v) => Ok((Some(v), Requeue::No)),
            None => Err(Error::internal_with_context(
                "secret",
                format!("secret {secret} does not provide field {key}"),
            )),
        }
    }

    async fn list_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<NimbusControlPlane>, Error> {
        let api: Api<NimbusControlPlane> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update_control_plane_status(&self, plane: &NimbusControlPlane) -> Result<(), Error> {
        let namespace = plane.namespace().unwrap_or_default();
        let api: Api<NimbusControlPlane> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({ "status": plane.status });
        api.patch_status(
            &plane.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NimbusVersion>, Error> {
        let api: Api<NimbusVersion> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_versions(&self, namespace: &str) -> Result<Vec<NimbusVersion>, Error> {
        let api: Api<NimbusVersion> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn upsert_version(&self, desired: NimbusVersion) -> Result<OpResult, Error> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();
        let api: Api<NimbusVersion> = Api::namespaced(self.client.clone(), &namespace);

        match api.get_opt(&name).await? {
            None => {
                api.create(&PostParams::default(), &desired).await?;
                Ok(OpResult::Created)
            }
            Some(current) => {
                if current.metadata.owner_references == desired.metadata.owner_references {
                    return Ok(OpResult::Unchanged);
                }
                let patch = json!({
                    "metadata": { "ownerReferences": desired.metadata.owner_references },
                });
                api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                    .await?;
                Ok(OpResult::Updated)
            }
        }
    }

    async fn update_version_status(&self, version: &NimbusVersion) -> Result<(), Error> {
        let namespace = version.namespace().unwrap_or_default();
        let api: Api<NimbusVersion> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({ "status": version.status });
        api.patch_status(
            &version.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}
