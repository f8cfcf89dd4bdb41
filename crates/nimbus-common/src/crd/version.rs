//! NimbusVersion Custom Resource Definition
//!
//! The version record tracks the deployment's target version and the
//! per-component container images it resolves to. At most one exists per
//! namespace and its name must match the control plane's name; admission
//! enforces both.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Conditions;

/// Condition set once the version's images have been resolved
pub const VERSION_INITIALIZED: &str = "Initialized";

/// Specification of the target deployment version
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nimbus.dev",
    version = "v1alpha1",
    kind = "NimbusVersion",
    plural = "nimbusversions",
    shortname = "nv",
    status = "NimbusVersionStatus",
    namespaced,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.targetVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NimbusVersionSpec {
    /// Version the deployment should converge to
    #[serde(default)]
    pub target_version: String,

    /// Per-component image overrides; any component not listed here uses
    /// the built-in default for the target version
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_container_images: BTreeMap<String, String>,
}

/// Status of the version record
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NimbusVersionStatus {
    /// The generation last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions (notably `Initialized`)
    #[serde(default)]
    pub conditions: Conditions,

    /// Resolved container images per component for the target version
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub container_images: BTreeMap<String, String>,
}

impl NimbusVersion {
    /// Whether the version's images have been resolved
    pub fn is_initialized(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.conditions.is_true(VERSION_INITIALIZED))
            .unwrap_or(false)
    }

    /// Resolved image for a component, if any
    pub fn image(&self, key: &str) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.container_images.get(key))
            .map(String::as_str)
    }
}

/// Resolve the effective container images for a version: a custom image
/// wins over the default for the same component key.
pub fn resolve_container_images(
    defaults: &BTreeMap<String, String>,
    custom: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut images = defaults.clone();
    for (key, image) in custom {
        images.insert(key.clone(), image.clone());
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_images_override_defaults_per_key() {
        let defaults = BTreeMap::from([
            ("identity-api".to_string(), "registry/identity:1.0".to_string()),
            ("compute-api".to_string(), "registry/compute:1.0".to_string()),
        ]);
        let custom = BTreeMap::from([(
            "identity-api".to_string(),
            "registry/identity:patched".to_string(),
        )]);

        let resolved = resolve_container_images(&defaults, &custom);
        assert_eq!(resolved["identity-api"], "registry/identity:patched");
        assert_eq!(resolved["compute-api"], "registry/compute:1.0");
    }

    #[test]
    fn test_uninitialized_version_reports_no_images() {
        let version = NimbusVersion::new("plane", NimbusVersionSpec::default());
        assert!(!version.is_initialized());
        assert!(version.image("identity-api").is_none());
    }
}
