//! Admission-time dependency validation
//!
//! A pure predicate over the desired-state document: for every enabled
//! service, all of its required services must also be enabled. Violations
//! are collected across all services (no fail-fast) so one admission
//! response carries the complete correction list.

use nimbus_common::crd::NimbusControlPlaneSpec;

use crate::registry::{FEATURE_RULES, REGISTRY};

/// A single field-path-addressed validation failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Path of the offending field (e.g., "spec.compute.enabled")
    pub field: String,
    /// The offending value
    pub value: String,
    /// What is wrong and how to fix it
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: Invalid value: {}: {}", self.field, self.value, self.message)
    }
}

/// Validate that every enabled service has all of its required services
/// enabled. Returns every violation found; performs no mutation.
pub fn validate_service_dependencies(spec: &NimbusControlPlaneSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for descriptor in REGISTRY {
        if !spec.section(descriptor.kind.field()).enabled || descriptor.requires.is_empty() {
            continue;
        }

        let missing: Vec<&str> = descriptor
            .requires
            .iter()
            .filter(|required| !spec.section(required.field()).enabled)
            .map(|required| required.label())
            .collect();

        if !missing.is_empty() {
            errors.push(FieldError {
                field: format!("spec.{}.enabled", descriptor.kind.field()),
                value: "true".to_string(),
                message: format!(
                    "{} requires these services to be enabled: {}",
                    descriptor.kind,
                    missing.join(", ")
                ),
            });
        }
    }

    for rule in FEATURE_RULES {
        let section = spec.section(rule.kind.field());
        if !section.enabled {
            continue;
        }
        let feature_enabled = section
            .template
            .as_ref()
            .and_then(|t| match rule.feature {
                "metricsEnabled" => t.metrics_enabled,
                "autoscalingEnabled" => t.autoscaling_enabled,
                _ => None,
            })
            .unwrap_or(false);
        if !feature_enabled {
            continue;
        }

        let missing: Vec<&str> = rule
            .requires
            .iter()
            .filter(|required| !spec.section(required.field()).enabled)
            .map(|required| required.label())
            .collect();

        if !missing.is_empty() {
            errors.push(FieldError {
                field: format!("spec.{}.template.{}", rule.kind.field(), rule.feature),
                value: "true".to_string(),
                message: format!(
                    "{}.{} requires these services to be enabled: {}",
                    rule.kind,
                    rule.feature.trim_end_matches("Enabled"),
                    missing.join(", ")
                ),
            });
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_common::crd::ServiceTemplate;

    fn spec_with_enabled(fields: &[&str]) -> NimbusControlPlaneSpec {
        let mut spec = NimbusControlPlaneSpec::default();
        for field in fields {
            spec.section_mut(field).enabled = true;
        }
        spec
    }

    /// Story: enabling compute without its prerequisites lists every
    /// missing service in a single error
    #[test]
    fn story_compute_violation_lists_all_missing_prerequisites() {
        let spec = spec_with_enabled(&["compute", "database", "cache", "messageBus", "identity"]);

        let errors = validate_service_dependencies(&spec);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "spec.compute.enabled");
        assert!(errors[0].message.contains("Placement"));
        assert!(errors[0].message.contains("Network"));
        assert!(errors[0].message.contains("ImageRegistry"));
    }

    /// Story: violations across services are all collected, not fail-fast
    #[test]
    fn story_multiple_violations_collected_together() {
        let spec = spec_with_enabled(&["identity", "imageRegistry"]);

        let errors = validate_service_dependencies(&spec);
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"spec.identity.enabled"));
        assert!(fields.contains(&"spec.imageRegistry.enabled"));
    }

    /// Story: a fully consistent desired state validates cleanly
    #[test]
    fn story_consistent_state_has_no_errors() {
        let spec = spec_with_enabled(&[
            "database",
            "cache",
            "messageBus",
            "identity",
            "imageRegistry",
            "placement",
            "network",
            "compute",
        ]);
        assert!(validate_service_dependencies(&spec).is_empty());
    }

    /// Story: feature sub-flags carry their own dependency rules
    #[test]
    fn story_telemetry_autoscaling_requires_orchestration() {
        let mut spec = spec_with_enabled(&["database", "cache", "messageBus", "identity", "telemetry"]);
        spec.telemetry.template = Some(ServiceTemplate {
            autoscaling_enabled: Some(true),
            ..Default::default()
        });

        let errors = validate_service_dependencies(&spec);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "spec.telemetry.template.autoscalingEnabled");
        assert!(errors[0].message.contains("Orchestration"));
    }

    /// Story: a disabled feature flag does not trigger the feature rule
    #[test]
    fn story_disabled_feature_flag_skips_rule() {
        let mut spec = spec_with_enabled(&["telemetry"]);
        spec.telemetry.template = Some(ServiceTemplate {
            metrics_enabled: Some(false),
            ..Default::default()
        });
        assert!(validate_service_dependencies(&spec).is_empty());

        // unset flag behaves the same as explicitly disabled
        spec.telemetry.template = Some(ServiceTemplate::default());
        assert!(validate_service_dependencies(&spec).is_empty());
    }

    /// Story: disabled services are never validated
    #[test]
    fn story_disabled_services_skip_validation() {
        let spec = NimbusControlPlaneSpec::default();
        assert!(validate_service_dependencies(&spec).is_empty());
    }

    #[test]
    fn test_field_error_display() {
        let err = FieldError {
            field: "spec.identity.enabled".into(),
            value: "true".into(),
            message: "Identity requires these services to be enabled: Database".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("spec.identity.enabled"));
        assert!(rendered.contains("Database"));
    }
}
