//! AppCredential Custom Resource Definition
//!
//! Auxiliary credential object managed by the credential lifecycle engine.
//! Its name is a pure function of the owning service's name so creation is
//! idempotent under retries, and at most one exists per service.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Conditions, READY};

use super::types::AccessRule;

/// Specification of an application credential
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nimbus.dev",
    version = "v1alpha1",
    kind = "AppCredential",
    plural = "appcredentials",
    shortname = "appcred",
    status = "AppCredentialStatus",
    namespaced,
    printcolumn = r#"{"name":"User","type":"string","jsonPath":".spec.userName"}"#,
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".status.secretName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppCredentialSpec {
    /// Service user the credential authenticates as
    pub user_name: String,

    /// Secret holding the user's current password
    pub secret: String,

    /// Key inside `secret` holding the password
    pub password_selector: String,

    /// Days until the credential expires and is rotated
    pub expiration_days: i32,

    /// Days the previous credential stays valid after rotation
    pub grace_period_days: i32,

    /// Roles granted to the credential
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Whether the credential may create further credentials
    #[serde(default)]
    pub unrestricted: bool,

    /// Access rules restricting what the credential may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_rules: Vec<AccessRule>,
}

/// Status reported by the credential's own operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppCredentialStatus {
    /// Secret holding the issued credential, set once ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Conditions reported by the owning operator
    #[serde(default)]
    pub conditions: Conditions,
}

impl AppCredential {
    /// Deterministic credential object name for a service.
    ///
    /// Pure function of the service name, no randomness, so repeated
    /// creates converge on the same object.
    pub fn name_for(service_name: &str) -> String {
        format!("{service_name}-appcred")
    }

    /// Whether the credential has been issued
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.conditions.is_true(READY))
            .unwrap_or(false)
    }

    /// The issued secret name, when ready
    pub fn secret_name(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.secret_name.as_deref())
    }
}
