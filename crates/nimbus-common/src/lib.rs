//! Shared types for the Nimbus control-plane operator
//!
//! This crate holds everything the operator crates share: the custom
//! resource definitions, the condition machinery used for status
//! aggregation, and the operator-wide error type.

pub mod conditions;
pub mod crd;
pub mod error;

pub use error::Error;

use std::collections::BTreeMap;

/// Label marking an object as part of a Nimbus control plane.
///
/// Added alongside [`SERVICE_SELECTOR`] so our label queries never collide
/// with labels the individual service operators put on their own objects.
pub const SELECTOR: &str = "nimbusplane";

/// Label correlating a network endpoint object with the managed service
/// that owns it. The value is the resolved service name.
pub const SERVICE_SELECTOR: &str = "nimbusplane-service";

/// Annotation carrying the endpoint class ("public"/"internal") on the
/// Service objects materialized for a managed service.
pub const ENDPOINT_ANNOTATION: &str = "nimbus.dev/endpoint";

/// Labels selecting the network endpoint objects of one managed service.
pub fn service_selector_labels(value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SERVICE_SELECTOR.to_string(), value.to_string()),
        (SELECTOR.to_string(), String::new()),
    ])
}
