//! Status aggregation and version-rollout gating
//!
//! The aggregation side keeps the plane's rolled-up `Ready` condition
//! honest: it is True only when every per-service condition is True, and
//! otherwise mirrors the highest-priority problem. The rollout side is a
//! pure comparison: a target version counts as deployed only when every
//! *enabled* service's cached images equal the version's declared images —
//! all or nothing, with disabled services excluded. The actual
//! `deployed_version` write happens in the controller once the comparison
//! holds.

use nimbus_common::conditions::{reason, Condition, ConditionSeverity, Conditions, READY};
use nimbus_common::crd::{NimbusControlPlane, NimbusVersion};

use crate::registry::{ServiceDescriptor, REGISTRY};

/// Placeholder condition used before a child has reported anything.
///
/// Keeps the aggregate from showing a readiness value it cannot justify
/// during the window before the child's first reconcile.
pub fn running_placeholder(type_: String, kind_label: &str) -> Condition {
    Condition::false_(
        type_,
        reason::REQUESTED,
        ConditionSeverity::Info,
        format!("{kind_label} deployment in progress"),
    )
}

/// Derive the top-level Ready condition from the per-service conditions
pub fn aggregate_ready(conditions: &mut Conditions) {
    if conditions.all_sub_conditions_true() {
        conditions.mark_true(READY, "Setup complete");
    } else if let Some(mirrored) = conditions.mirror(READY) {
        conditions.set(mirrored);
    }
}

/// Whether one service's cached images match the version's declared
/// images. Disabled services always match — they are excluded from the
/// rollout comparison.
pub fn service_images_match(
    plane: &NimbusControlPlane,
    version: &NimbusVersion,
    descriptor: &ServiceDescriptor,
) -> bool {
    if !plane.spec.section(descriptor.kind.field()).enabled {
        return true;
    }
    descriptor.image_keys.iter().all(|key| {
        let cached = plane
            .status
            .as_ref()
            .and_then(|s| s.container_images.get(*key))
            .map(String::as_str);
        cached.is_some() && cached == version.image(key)
    })
}

/// Whether every enabled service has converged to the version's images
pub fn control_plane_images_match(plane: &NimbusControlPlane, version: &NimbusVersion) -> bool {
    REGISTRY
        .iter()
        .all(|descriptor| service_images_match(plane, version, descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{descriptor, ServiceKind};
    use nimbus_common::crd::{
        NimbusControlPlaneSpec, NimbusControlPlaneStatus, NimbusVersionSpec, NimbusVersionStatus,
    };
    use std::collections::BTreeMap;

    fn version_with(images: &[(&str, &str)]) -> NimbusVersion {
        let mut version = NimbusVersion::new("plane", NimbusVersionSpec::default());
        version.status = Some(NimbusVersionStatus {
            container_images: images
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        });
        version
    }

    fn plane_with(enabled: &[&str], cached: &[(&str, &str)]) -> NimbusControlPlane {
        let mut spec = NimbusControlPlaneSpec::default();
        for field in enabled {
            spec.section_mut(field).enabled = true;
        }
        let mut plane = NimbusControlPlane::new("plane", spec);
        plane.status = Some(NimbusControlPlaneStatus {
            container_images: cached
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        });
        plane
    }

    /// Story: a single enabled service with a stale image blocks the
    /// deployed-version transition
    #[test]
    fn story_single_mismatch_blocks_rollout() {
        let version = version_with(&[
            ("identity-api", "registry/identity:2.0"),
            ("cache", "registry/cache:2.0"),
        ]);
        let plane = plane_with(
            &["identity", "cache"],
            &[
                ("identity-api", "registry/identity:1.0"),
                ("cache", "registry/cache:2.0"),
            ],
        );

        assert!(!service_images_match(
            &plane,
            &version,
            descriptor(ServiceKind::Identity)
        ));
        assert!(service_images_match(
            &plane,
            &version,
            descriptor(ServiceKind::Cache)
        ));
        assert!(!control_plane_images_match(&plane, &version));
    }

    /// Story: mismatches on disabled services never block the rollout
    #[test]
    fn story_disabled_services_excluded_from_rollout() {
        let version = version_with(&[
            ("cache", "registry/cache:2.0"),
            ("identity-api", "registry/identity:2.0"),
        ]);
        // identity is disabled and has a stale cached image
        let plane = plane_with(
            &["cache"],
            &[
                ("cache", "registry/cache:2.0"),
                ("identity-api", "registry/identity:1.0"),
            ],
        );

        assert!(service_images_match(
            &plane,
            &version,
            descriptor(ServiceKind::Identity)
        ));
        assert!(control_plane_images_match(&plane, &version));
    }

    /// Story: an enabled service that has not cached any image yet does
    /// not count as converged
    #[test]
    fn story_missing_cached_image_blocks_rollout() {
        let version = version_with(&[("cache", "registry/cache:2.0")]);
        let plane = plane_with(&["cache"], &[]);

        assert!(!service_images_match(
            &plane,
            &version,
            descriptor(ServiceKind::Cache)
        ));
    }

    /// Story: multi-component services need every component to match
    #[test]
    fn story_all_components_must_match() {
        let version = version_with(&[
            ("compute-api", "registry/compute-api:2.0"),
            ("compute-scheduler", "registry/compute-scheduler:2.0"),
            ("compute-conductor", "registry/compute-conductor:2.0"),
        ]);
        let plane = plane_with(
            &["compute"],
            &[
                ("compute-api", "registry/compute-api:2.0"),
                ("compute-scheduler", "registry/compute-scheduler:1.0"),
                ("compute-conductor", "registry/compute-conductor:2.0"),
            ],
        );

        assert!(!service_images_match(
            &plane,
            &version,
            descriptor(ServiceKind::Compute)
        ));
    }

    /// Story: all sub-conditions True rolls up to Ready True
    #[test]
    fn story_aggregate_ready_when_all_true() {
        let mut conditions = Conditions::default();
        conditions.mark_true("DatabaseReady", "ready");
        conditions.mark_true("IdentityReady", "ready");

        aggregate_ready(&mut conditions);
        assert!(conditions.is_true(READY));
    }

    /// Story: any non-True sub-condition surfaces on Ready
    #[test]
    fn story_aggregate_mirrors_problem_onto_ready() {
        let mut conditions = Conditions::default();
        conditions.mark_true("DatabaseReady", "ready");
        conditions.set(Condition::false_(
            "IdentityReady",
            reason::ERROR,
            ConditionSeverity::Warning,
            "identity reconcile error",
        ));

        aggregate_ready(&mut conditions);
        let ready = conditions.get(READY).unwrap();
        assert_eq!(ready.status, nimbus_common::conditions::ConditionStatus::False);
        assert_eq!(ready.message, "identity reconcile error");
    }

    #[test]
    fn test_running_placeholder_shape() {
        let condition = running_placeholder("IdentityReady".into(), "Identity");
        assert_eq!(condition.reason, reason::REQUESTED);
        assert_eq!(condition.severity, ConditionSeverity::Info);
        assert_eq!(
            condition.status,
            nimbus_common::conditions::ConditionStatus::False
        );
    }
}
